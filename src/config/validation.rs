use super::Config;
use anyhow::Result;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn error(path: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Validate a configuration object.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    let memory = &config.memory;
    let embeddings = &config.embeddings;

    if memory.chunk_max_chars == 0 {
        errors.push(error("memory.chunkMaxChars", "Chunk length must be greater than 0"));
    }

    if !memory.relevance_threshold.is_finite() || memory.relevance_threshold < 0.0 {
        errors.push(error(
            "memory.relevanceThreshold",
            "Threshold must be a finite, non-negative distance",
        ));
    }

    if embeddings.dimensions == Some(0) {
        errors.push(error("embeddings.dimensions", "Dimension must be greater than 0"));
    }

    if embeddings.timeout_ms == 0 {
        errors.push(error("embeddings.timeoutMs", "Timeout must be greater than 0"));
    }

    if embeddings.max_attempts == 0 {
        errors.push(error("embeddings.maxAttempts", "At least one attempt is required"));
    }

    if embeddings.retry_initial_ms > embeddings.retry_max_ms {
        errors.push(error(
            "embeddings.retryInitialMs",
            "Initial backoff cannot exceed retryMaxMs",
        ));
    }

    if let Some(url) = &embeddings.base_url {
        if url.trim().is_empty() {
            errors.push(error("embeddings.baseUrl", "Base URL cannot be empty"));
        }
    }

    if embeddings.api_key.is_none() {
        warn!("No embedding API key configured; ingestion and search will be unavailable");
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_empty());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = Config::default();
        config.memory.chunk_max_chars = 0;
        config.memory.relevance_threshold = f32::NAN;
        config.embeddings.dimensions = Some(0);
        config.embeddings.timeout_ms = 0;
        config.embeddings.max_attempts = 0;

        let paths: Vec<String> = validate_config(&config).into_iter().map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![
                "memory.chunkMaxChars",
                "memory.relevanceThreshold",
                "embeddings.dimensions",
                "embeddings.timeoutMs",
                "embeddings.maxAttempts",
            ]
        );
    }

    #[test]
    fn validate_object_joins_messages() {
        let mut config = Config::default();
        config.embeddings.base_url = Some("  ".to_string());
        let err = validate_config_object(&config).unwrap_err().to_string();
        assert!(err.contains("embeddings.baseUrl"));
    }
}
