//! Client for the external vision-captioning model.
//!
//! A found item's photos are turned into a title, a prose description and
//! a tag list. The trait exists so the engine and tests can run against a
//! deterministic fake.

use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use crate::config::ModelsConfig;

const PROMPT: &str = "Analyze this image of a found item and provide:\n\
1. A concise title (max 50 characters)\n\
2. A detailed description (2-3 sentences)\n\
3. A list of 5-8 relevant tags (comma-separated)\n\
\n\
Format your response as JSON:\n\
{\n  \"title\": \"...\",\n  \"description\": \"...\",\n  \"tags\": [\"tag1\", \"tag2\", ...]\n}";

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vision api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("empty vision response")]
    EmptyResponse,

    #[error("api key not set: {0}")]
    MissingApiKey(String),
}

/// What the captioning model saw in an item's photos.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnalysis {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

pub trait VisionModel: Send + Sync {
    /// Describe an item from one or more raw image payloads.
    fn describe(&self, images: &[Vec<u8>]) -> Result<ImageAnalysis, VisionError>;
}

pub struct RemoteVision {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl RemoteVision {
    pub fn from_config(models: &ModelsConfig) -> Result<Self, VisionError> {
        let api_key = std::env::var(&models.api_key_env)
            .map_err(|_| VisionError::MissingApiKey(models.api_key_env.clone()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(models.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: models.endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: models.vision_model.clone(),
        })
    }
}

impl VisionModel for RemoteVision {
    fn describe(&self, images: &[Vec<u8>]) -> Result<ImageAnalysis, VisionError> {
        let mut content = vec![json!({ "type": "text", "text": PROMPT })];
        for image in images {
            let data = base64::engine::general_purpose::STANDARD.encode(image);
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{data}") },
            }));
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": content }],
                "max_tokens": 500,
            }))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json()?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(VisionError::EmptyResponse)?;

        Ok(parse_analysis(&content))
    }
}

/// Parse the model's reply, tolerating non-JSON output.
///
/// Models occasionally ignore the JSON instruction and answer in prose;
/// a heuristic line split is better than failing the whole ingestion.
fn parse_analysis(content: &str) -> ImageAnalysis {
    // Models sometimes fence the JSON in markdown
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Ok(parsed) = serde_json::from_str::<ImageAnalysis>(trimmed) {
        return parsed;
    }

    let lines: Vec<&str> = content.lines().collect();
    let title = lines
        .first()
        .map(|l| strip_title_prefix(l.trim()).to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Found Item".to_string());
    let description = lines
        .get(1..3)
        .map(|ls| ls.join(" ").trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "A found item".to_string());
    let tags = lines
        .get(3)
        .map(|l| {
            l.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ImageAnalysis {
        title,
        description,
        tags,
    }
}

fn strip_title_prefix(line: &str) -> &str {
    // Byte comparison: an ASCII prefix match guarantees the boundary at 5
    if line.len() >= 5 && line.as_bytes()[..5].eq_ignore_ascii_case(b"title") {
        line[5..].trim_start_matches(':').trim_start()
    } else {
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_response() {
        let content = r#"{"title": "Black Wallet", "description": "A worn bifold.", "tags": ["wallet", "leather"]}"#;
        let analysis = parse_analysis(content);
        assert_eq!(analysis.title, "Black Wallet");
        assert_eq!(analysis.tags, vec!["wallet", "leather"]);
    }

    #[test]
    fn test_parse_fenced_json_response() {
        let content = "```json\n{\"title\": \"Keys\", \"description\": \"A keyring.\", \"tags\": []}\n```";
        let analysis = parse_analysis(content);
        assert_eq!(analysis.title, "Keys");
    }

    #[test]
    fn test_parse_prose_fallback() {
        let content = "Title: Blue Umbrella\nA compact folding umbrella.\nSlightly frayed at one rib.\numbrella, blue, compact";
        let analysis = parse_analysis(content);
        assert_eq!(analysis.title, "Blue Umbrella");
        assert!(analysis.description.contains("folding umbrella"));
        assert_eq!(analysis.tags, vec!["umbrella", "blue", "compact"]);
    }

    #[test]
    fn test_parse_empty_falls_back_to_defaults() {
        let analysis = parse_analysis("");
        assert_eq!(analysis.title, "Found Item");
        assert_eq!(analysis.description, "A found item");
        assert!(analysis.tags.is_empty());
    }
}
