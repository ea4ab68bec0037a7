mod defaults;
mod io;
mod types;
mod validation;

pub use defaults::*;
pub use io::*;
pub use types::*;
pub use validation::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// State directory for persistent data.
    #[serde(skip)]
    pub state_dir: PathBuf,

    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    ///
    /// Runs before logging is set up; callers report [`Config::source`]
    /// once the subscriber exists.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(find_config_file)
            .unwrap_or_else(|| PathBuf::from("viability.json"));

        let mut config = if config_path.exists() {
            let mut config = load_config_file(&config_path)?;
            config.source = Some(config_path);
            config
        } else {
            Config::default()
        };

        config.state_dir = resolve_state_dir();
        config.apply_env_overrides();

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Resolved location of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        match &self.memory.db_path {
            Some(p) => PathBuf::from(p),
            None => self.state_dir.join(DEFAULT_DB_FILE),
        }
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.embeddings.apply_api_key(&key);
        }

        if let Ok(path) = std::env::var("VIABILITY_DB_PATH") {
            self.memory.db_path = Some(path);
        }

        if let Ok(url) = std::env::var("VIABILITY_EMBEDDING_BASE_URL") {
            self.embeddings.base_url = Some(url);
        }

        if let Ok(model) = std::env::var("VIABILITY_EMBEDDING_MODEL") {
            self.embeddings.model = Some(model);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            logging: LoggingConfig::default(),
            state_dir: resolve_state_dir(),
            source: None,
        }
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("viability.json"),
        PathBuf::from("viability.yaml"),
        PathBuf::from("viability.yml"),
        PathBuf::from("viability.toml"),
    ];

    for path in &candidates {
        if path.exists() {
            return Some(path.clone());
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".viability").join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Resolve the state directory for persistent data.
fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("VIABILITY_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".viability"))
        .unwrap_or_else(|| PathBuf::from(".viability"))
}

/// Load configuration from a file path.
fn load_config_file(path: &Path) -> Result<Config> {
    let value = read_config_file_snapshot(path)?;
    let config = serde_json::from_value(value)?;
    Ok(config)
}
