use anyhow::{bail, Context, Result};
use std::path::Path;

/// Maximum size for a config file (10 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Parse a JSON5 configuration string.
pub fn parse_config_json5(content: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = json5::from_str(content)?;
    Ok(value)
}

/// Read a configuration file into a generic JSON value.
///
/// The format follows the extension: `.yaml`/`.yml`, `.toml`, anything else
/// is parsed as JSON5 (a superset of JSON). Files larger than
/// [`MAX_CONFIG_FILE_BYTES`] are rejected before reading.
pub fn read_config_file_snapshot(path: &Path) -> Result<serde_json::Value> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat config file '{}'", path.display()))?;

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match ext {
        "yaml" | "yml" => {
            let value: serde_json::Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in '{}'", path.display()))?;
            Ok(value)
        }
        "toml" => {
            let value: serde_json::Value = toml::from_str(&content)
                .with_context(|| format!("Invalid TOML in '{}'", path.display()))?;
            Ok(value)
        }
        _ => parse_config_json5(&content)
            .with_context(|| format!("Invalid JSON in '{}'", path.display())),
    }
}

// ============================================================================
// Tests
// ============================================================================
