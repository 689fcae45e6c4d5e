use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::semantic::scoring::ScoreWeights;
use crate::semantic::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};

/// Default minimum score for general search
const DEFAULT_THRESHOLD: f32 = 0.4;
/// Default minimum score for "find similar to this record"
const DEFAULT_SIMILAR_THRESHOLD: f32 = 0.5;
/// Default number of matches returned
const DEFAULT_LIMIT: usize = 6;
/// Default per-call provider timeout in seconds
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
/// Default deadline for a whole rank call in milliseconds
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Default number of concurrent candidate resolutions per rank call
const DEFAULT_MAX_CONCURRENCY: usize = 6;
/// Default retries for transient provider failures
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
const DEFAULT_BACKOFF_JITTER_MS: u64 = 100;

const DEFAULT_GEMINI_MODEL: &str = "text-embedding-004";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be between 0.0 and 1.0, got {value}")]
    OutOfRange { field: &'static str, value: f32 },

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("score weights must be non-negative and sum to a positive value")]
    InvalidWeights,
}

/// Tunables for caching, scoring and request handling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Cache entry time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub weights: ScoreWeights,

    /// Minimum score (exclusive) for general search [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Minimum score (exclusive) for similar-record search [0.0, 1.0]
    #[serde(default = "default_similar_threshold")]
    pub similar_threshold: f32,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Deadline for a whole rank call in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Concurrent candidate resolutions per rank call
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries after the first attempt, for timeout/network failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,

    #[serde(default)]
    pub gemini: GeminiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            weights: ScoreWeights::default(),
            default_threshold: DEFAULT_THRESHOLD,
            similar_threshold: DEFAULT_SIMILAR_THRESHOLD,
            default_limit: DEFAULT_LIMIT,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_jitter_ms: DEFAULT_BACKOFF_JITTER_MS,
            gemini: GeminiConfig::default(),
        }
    }
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_similar_threshold() -> f32 {
    DEFAULT_SIMILAR_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_backoff_jitter_ms() -> u64 {
    DEFAULT_BACKOFF_JITTER_MS
}

/// Settings for the Gemini embedding provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

fn default_gemini_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

impl GeminiConfig {
    /// Fill empty fields from `GEMINI_API_KEY` and `GEMINI_MODEL`.
    pub fn with_env(mut self) -> Self {
        if self.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                self.api_key = key.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("default_threshold", self.default_threshold),
            ("similar_threshold", self.similar_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }

        let w = &self.weights;
        let weights = [w.vector, w.keyword, w.category];
        let negative = weights.iter().any(|x| !x.is_finite() || *x < 0.0);
        if negative || weights.iter().sum::<f32>() <= 0.0 {
            return Err(ConfigError::InvalidWeights);
        }

        for (field, value) in [
            ("cache_capacity", self.cache_capacity as u64),
            ("cache_ttl_secs", self.cache_ttl_secs),
            ("default_limit", self.default_limit as u64),
            ("provider_timeout_secs", self.provider_timeout_secs),
            ("request_timeout_ms", self.request_timeout_ms),
            ("max_concurrency", self.max_concurrency as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(field));
            }
        }

        Ok(())
    }

    /// Parse and validate a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yml::from_str(yaml).context("config is malformed")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file, then fill Gemini settings from the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.gemini = config.gemini.with_env();

        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yml::to_string(self).context("failed to serialize config")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_jitter(&self) -> Duration {
        Duration::from_millis(self.backoff_jitter_ms)
    }
}
