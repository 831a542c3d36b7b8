use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::app::App;
use crate::config::Config;
use crate::items::BackendCsv;
use crate::matching::{EmbeddingError, TextEmbedder};
use crate::storage::BackendLocal;
use crate::vision::{ImageAnalysis, VisionError, VisionModel};


const FAKE_DIMENSIONS: usize = 128;

/// Deterministic bag-of-words embedder: each token of length > 2 hashes
/// into a bucket. Texts sharing words get high cosine similarity, which is
/// all the pipeline needs from an embedding model.
pub struct FakeEmbedder;

impl TextEmbedder for FakeEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; FAKE_DIMENSIONS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() as usize) % FAKE_DIMENSIONS] += 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        FAKE_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        "fake-embedding-model"
    }
}

/// Fake vision model: the "image" payload is `title|description|tags`
/// text, so tests fully control what the model saw.
pub struct FakeVision;

impl VisionModel for FakeVision {
    fn describe(&self, images: &[Vec<u8>]) -> Result<ImageAnalysis, VisionError> {
        let first = images.first().ok_or(VisionError::EmptyResponse)?;
        let text = String::from_utf8_lossy(first);
        let mut parts = text.splitn(3, '|');

        Ok(ImageAnalysis {
            title: parts.next().unwrap_or("Found Item").to_string(),
            description: parts.next().unwrap_or("A found item").to_string(),
            tags: parts
                .next()
                .map(|tags| tags.split(',').map(|t| t.trim().to_string()).collect())
                .unwrap_or_default(),
        })
    }
}

/// Creates an isolated App over a unique temp directory so parallel tests
/// never collide.
pub fn create_app() -> (App, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let base = tmp.path().to_str().expect("temp path not utf-8");

    let config = Config::load_with(base).expect("failed to load config");
    let store = Arc::new(BackendCsv::load(tmp.path()).expect("failed to create item store"));
    let storage_mgr = Arc::new(
        BackendLocal::new(tmp.path().join("uploads").to_str().expect("path not utf-8"))
            .expect("failed to create storage"),
    );

    let app = App::new(
        config,
        store,
        storage_mgr,
        Arc::new(FakeEmbedder),
        Arc::new(FakeVision),
    )
    .expect("failed to build app");

    (app, tmp)
}

/// An "image" the fake vision model reads as a black leather wallet.
pub fn wallet_image() -> Vec<u8> {
    b"Black Leather Wallet|A worn black leather bifold wallet with card slots|wallet,leather,black"
        .to_vec()
}
