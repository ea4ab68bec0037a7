use serde::{Deserialize, Serialize};

use super::defaults::*;

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Explicit database path. Defaults to `<state_dir>/viabilities.db`.
    pub db_path: Option<String>,
    /// Maximum chunk length in characters.
    pub chunk_max_chars: usize,
    /// Number of results a search returns.
    pub top_k: usize,
    /// Hits at or above this distance are not considered relevant.
    pub relevance_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            top_k: DEFAULT_TOP_K,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
        }
    }
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Openai,
    Mistral,
    Voyage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProviderKind,
    /// Model name; the provider's default when unset.
    pub model: Option<String>,
    /// API base URL; the provider's default when unset.
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Vector dimension; the provider's default when unset.
    pub dimensions: Option<usize>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: None,
            base_url: None,
            api_key: None,
            dimensions: None,
            timeout_ms: EMBEDDING_TIMEOUT_MS,
            max_attempts: EMBEDDING_RETRY_MAX_ATTEMPTS,
            retry_initial_ms: EMBEDDING_RETRY_INITIAL_MS,
            retry_max_ms: EMBEDDING_RETRY_MAX_MS,
        }
    }
}

impl EmbeddingsConfig {
    pub fn apply_api_key(&mut self, key: &str) {
        if self.api_key.is_none() {
            self.api_key = Some(key.to_string());
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
