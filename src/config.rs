use crate::storage::{self, StorageManager};
use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Canonical embedding combination weights. Visual features weigh higher
/// because they are more discriminative for physical objects.
const DEFAULT_VISUAL_WEIGHT: f32 = 0.6;
const DEFAULT_TEXT_WEIGHT: f32 = 0.4;

/// Threshold ladder for user-facing search, strictest first.
const DEFAULT_SEARCH_THRESHOLDS: [f32; 3] = [0.65, 0.60, 0.55];
/// Permissive ladder for reverse-matching found items against alerts.
const DEFAULT_ALERT_THRESHOLDS: [f32; 3] = [0.5, 0.4, 0.3];

const DEFAULT_CANDIDATE_LIMIT: usize = 50;
const DEFAULT_PAGE_SIZE: usize = 10;
const DEFAULT_RANK_EPSILON: f32 = 0.01;

const DEFAULT_MODEL_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_VISION_MODEL: &str = "gpt-4.1";
const DEFAULT_DIMENSIONS: usize = 1536;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Upstream embedding / vision model endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// OpenAI-compatible API base url
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Output dimensionality of the embedding model. Fixed for the lifetime
    /// of the stored indexes; changing it requires re-embedding everything.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Per-request timeout for upstream calls, in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            api_key_env: default_api_key_env(),
            embedding_model: default_embedding_model(),
            vision_model: default_vision_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

/// Matching pipeline policy. One canonical set of constants; the threshold
/// ladders run strictest to most lenient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_visual_weight")]
    pub visual_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,

    #[serde(default = "default_search_thresholds")]
    pub search_thresholds: Vec<f32>,

    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<f32>,

    /// Nearest neighbors requested per cascade tier
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Maximum results returned to a caller
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Similarity differences below this count as ties when distance
    /// breaks the ordering
    #[serde(default = "default_rank_epsilon")]
    pub rank_epsilon: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            visual_weight: DEFAULT_VISUAL_WEIGHT,
            text_weight: DEFAULT_TEXT_WEIGHT,
            search_thresholds: DEFAULT_SEARCH_THRESHOLDS.to_vec(),
            alert_thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            rank_epsilon: DEFAULT_RANK_EPSILON,
        }
    }
}

fn default_model_endpoint() -> String {
    DEFAULT_MODEL_ENDPOINT.to_string()
}

fn default_api_key_env() -> String {
    "REFOUND_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_upstream_timeout_secs() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_SECS
}

fn default_visual_weight() -> f32 {
    DEFAULT_VISUAL_WEIGHT
}

fn default_text_weight() -> f32 {
    DEFAULT_TEXT_WEIGHT
}

fn default_search_thresholds() -> Vec<f32> {
    DEFAULT_SEARCH_THRESHOLDS.to_vec()
}

fn default_alert_thresholds() -> Vec<f32> {
    DEFAULT_ALERT_THRESHOLDS.to_vec()
}

fn default_candidate_limit() -> usize {
    DEFAULT_CANDIDATE_LIMIT
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_rank_epsilon() -> f32 {
    DEFAULT_RANK_EPSILON
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            models: ModelsConfig::default(),
            matching: MatchingConfig::default(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let m = &self.matching;

        for (name, w) in [("visual_weight", m.visual_weight), ("text_weight", m.text_weight)] {
            if !(0.0..=1.0).contains(&w) {
                bail!("matching.{name} must be between 0.0 and 1.0, got {w}");
            }
        }
        if (m.visual_weight + m.text_weight - 1.0).abs() > 1e-4 {
            bail!(
                "matching.visual_weight + matching.text_weight must sum to 1.0, got {}",
                m.visual_weight + m.text_weight
            );
        }

        for (name, ladder) in [
            ("search_thresholds", &m.search_thresholds),
            ("alert_thresholds", &m.alert_thresholds),
        ] {
            if ladder.is_empty() {
                bail!("matching.{name} must not be empty");
            }
            if ladder.iter().any(|t| !(0.0..=1.0).contains(t)) {
                bail!("matching.{name} values must be between 0.0 and 1.0");
            }
            if ladder.windows(2).any(|w| w[0] <= w[1]) {
                bail!("matching.{name} must be strictly descending (strictest first)");
            }
        }

        if m.candidate_limit == 0 {
            bail!("matching.candidate_limit must be greater than 0");
        }
        if m.page_size == 0 {
            bail!("matching.page_size must be greater than 0");
        }
        // Zero would divide away the similarity buckets in ranking
        if !(m.rank_epsilon > 0.0 && m.rank_epsilon < 1.0) {
            bail!("matching.rank_epsilon must be in (0.0, 1.0)");
        }

        if self.models.dimensions == 0 {
            bail!("models.dimensions must be greater than 0");
        }
        if self.models.timeout_secs == 0 {
            bail!("models.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            store.write("config.yaml", serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;
        store.write("config.yaml", serde_yml::to_string(&self)?.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}
