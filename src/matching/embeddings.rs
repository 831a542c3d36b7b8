//! Client for the external text-embedding model.
//!
//! The trait exists so the engine and tests can run against a local fake;
//! `RemoteEmbedder` is the production implementation speaking the
//! OpenAI-style `/embeddings` protocol.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::ModelsConfig;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed embedding response: {0}")]
    BadResponse(String),

    #[error("api key not set: {0}")]
    MissingApiKey(String),

    #[error("embedding has {got} dimensions, model is configured for {expected}")]
    WrongDimensions { expected: usize, got: usize },
}

/// Turns text into a fixed-dimensionality embedding vector.
///
/// All embeddings in one deployment must come from the same model; the
/// persisted indexes carry the model id and refuse to load anything else.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn from_config(models: &ModelsConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&models.api_key_env)
            .map_err(|_| EmbeddingError::MissingApiKey(models.api_key_env.clone()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(models.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: models.endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: models.embedding_model.clone(),
            dimensions: models.dimensions,
        })
    }
}

impl TextEmbedder for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
            }))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingsResponse = response.json()?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::BadResponse("empty data array".into()))?;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::WrongDimensions {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
