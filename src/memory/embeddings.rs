use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ProviderError;
use crate::config::{
    EmbeddingProviderKind, EmbeddingsConfig, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, EMBEDDING_RETRY_INITIAL_MS, EMBEDDING_RETRY_MAX_ATTEMPTS,
    EMBEDDING_RETRY_MAX_MS, EMBEDDING_TIMEOUT_MS,
};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A provider that turns text into dense vector embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embeddings for a batch of texts.
    ///
    /// Returns one vector per input text, each of length [`Self::dimensions`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// The model identifier used by this provider (e.g. `text-embedding-3-small`).
    fn model_name(&self) -> String;

    /// Dimensionality of the vectors produced by [`Self::embed`].
    fn dimensions(&self) -> usize;
}

/// Type-erased wrapper so we can store any provider behind a single type.
pub type EmbeddingProviderBox = Box<dyn EmbeddingProvider>;

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create an [`EmbeddingProviderBox`] from the embedding configuration.
///
/// Returns `None` when no API key is configured.
pub fn create_provider(config: &EmbeddingsConfig) -> Option<EmbeddingProviderBox> {
    let api_key = config.api_key.clone().filter(|k| !k.is_empty())?;
    let defaults = ProviderDefaults::for_kind(config.provider);

    let provider = OpenAiCompatibleProvider::new(api_key, config.model.clone(), config.provider)
        .with_base_url(
            config
                .base_url
                .clone()
                .unwrap_or_else(|| defaults.base_url.to_string()),
        )
        .with_dimensions(config.dimensions.unwrap_or(defaults.dimensions));

    Some(Box::new(provider))
}

/// Built-in endpoint, model and dimension for each provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub base_url: &'static str,
    pub model: &'static str,
    pub dimensions: usize,
}

impl ProviderDefaults {
    pub fn for_kind(kind: EmbeddingProviderKind) -> Self {
        match kind {
            EmbeddingProviderKind::Openai => Self {
                base_url: "https://api.openai.com/v1",
                model: DEFAULT_EMBEDDING_MODEL,
                dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            },
            EmbeddingProviderKind::Mistral => Self {
                base_url: "https://api.mistral.ai/v1",
                model: "mistral-embed",
                dimensions: 1024,
            },
            EmbeddingProviderKind::Voyage => Self {
                base_url: "https://api.voyageai.com/v1",
                model: "voyage-3",
                dimensions: 1024,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// Calls an OpenAI-style `/embeddings` endpoint. OpenAI, Mistral and Voyage
/// all accept the same request and response shape.
pub struct OpenAiCompatibleProvider {
    api_key: String,
    model: String,
    base_url: String,
    dims: usize,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: String, model: Option<String>, kind: EmbeddingProviderKind) -> Self {
        let defaults = ProviderDefaults::for_kind(kind);
        Self {
            api_key,
            model: model.unwrap_or_else(|| defaults.model.to_string()),
            base_url: normalize_base_url(defaults.base_url),
            dims: defaults.dimensions,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = normalize_base_url(&url);
        self
    }

    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let resp = self
            .client
            .post(embeddings_endpoint(&self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        let mut parsed: EmbeddingResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // Providers may return items out of order; `index` is authoritative.
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(ProviderError::Malformed(format!(
                "expected {}-dimensional vectors, got {}",
                self.dims,
                bad.len()
            )));
        }

        Ok(vectors)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

// ---------------------------------------------------------------------------
// Bounded calls
// ---------------------------------------------------------------------------

/// Timeout and retry budget applied to every embedding call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wall-clock limit for a single attempt.
    pub timeout: Duration,
    /// Total attempts, including the first. Always at least one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(EMBEDDING_TIMEOUT_MS),
            max_attempts: EMBEDDING_RETRY_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(EMBEDDING_RETRY_INITIAL_MS),
            max_backoff: Duration::from_millis(EMBEDDING_RETRY_MAX_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingsConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_initial_ms),
            max_backoff: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Embed a single text under `policy`.
///
/// Each attempt is bounded by `policy.timeout`. Transient failures are
/// retried with exponential backoff until `policy.max_attempts` is spent; the
/// last error is returned.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, ProviderError> {
    let input = [text.to_string()];
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.timeout, provider.embed(&input)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                after_ms: policy.timeout.as_millis() as u64,
            }),
        };

        let err = match outcome {
            Ok(mut vectors) if vectors.len() == 1 => return Ok(vectors.remove(0)),
            Ok(vectors) => ProviderError::Malformed(format!(
                "expected 1 embedding, got {}",
                vectors.len()
            )),
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            model = %provider.model_name(),
            "embedding call failed, retrying: {err}"
        );
        tokio::time::sleep(delay).await;
        debug!(attempt = attempt + 1, "retrying embedding call");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error for the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ProviderError::Status {
                    status: self.status,
                    body: "nope".to_string(),
                });
            }
            Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
        }

        fn model_name(&self) -> String {
            "flaky".to_string()
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    struct Hanging;

    #[async_trait]
    impl EmbeddingProvider for Hanging {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }

        fn model_name(&self) -> String {
            "hanging".to_string()
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_endpoint_from_host_base() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_endpoint_from_versioned_base() {
        assert_eq!(
            embeddings_endpoint("https://api.mistral.ai/v1/"),
            "https://api.mistral.ai/v1/embeddings"
        );
    }

    #[test]
    fn test_endpoint_keeps_explicit_path() {
        assert_eq!(
            embeddings_endpoint("https://api.example.com/v1/embeddings"),
            "https://api.example.com/v1/embeddings"
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(1500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff(30), Duration::from_millis(1500));
    }

    #[test]
    fn test_create_provider_requires_key() {
        let config = EmbeddingsConfig::default();
        assert!(create_provider(&config).is_none());

        let config = EmbeddingsConfig {
            api_key: Some("sk-test".to_string()),
            provider: EmbeddingProviderKind::Voyage,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "voyage-3");
        assert_eq!(provider.dimensions(), 1024);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let provider = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            status: 503,
        };
        let v = embed_one(&provider, "hi", &fast_policy(3)).await.unwrap();
        assert_eq!(v, vec![1.0, 2.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let provider = Flaky {
            failures: 100,
            calls: AtomicU32::new(0),
            status: 429,
        };
        let err = embed_one(&provider, "hi", &fast_policy(3)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 429, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let provider = Flaky {
            failures: 100,
            calls: AtomicU32::new(0),
            status: 401,
        };
        let err = embed_one(&provider, "hi", &fast_policy(5)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_call_times_out() {
        let err = embed_one(&Hanging, "hi", &fast_policy(2)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { after_ms: 50 }));
    }
}
