//! Configuration management for the indexer.
//!
//! Supports loading configuration from TOML files, in the same shape the
//! rest of this stack uses for its own config surfaces.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,
}

/// Indexer-related configuration. Cores themselves are supplied by the
/// caller at construction time, not discovered from this config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Maximum number of entries buffered per batch before the driver stops
    /// pulling and waits on the consumer.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Forget all persisted progress and re-emit every locally present
    /// block on open.
    #[serde(default)]
    pub reindex: bool,

    /// Root directory for the default `FileStorage`-backed storage factory.
    /// Ignored if the caller supplies a `StorageLocation::Factory` directly.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_max_batch() -> usize {
    100
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".multicore-indexer")
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            reindex: false,
            storage_dir: default_storage_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            indexer: IndexerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations.
    ///
    /// Search order:
    /// 1. `MULTICORE_INDEXER_CONFIG` environment variable
    /// 2. `./multicore-indexer.toml` (current directory)
    /// 3. `~/.config/multicore-indexer/config.toml` (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("MULTICORE_INDEXER_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("multicore-indexer.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("multicore-indexer").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Generate a template configuration file.
    pub fn generate_template() -> String {
        r#"# multicore-indexer configuration
# Generated template - customize as needed

[indexer]
# Maximum number of entries buffered per batch.
max_batch = 100

# Forget all persisted progress and re-emit every locally present block.
reindex = false

# Root directory for per-core state files.
storage_dir = ".multicore-indexer"
"#
        .to_string()
    }

    /// Write template config to the specified path.
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.indexer.max_batch, 100);
        assert!(!config.indexer.reindex);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[indexer]
max_batch = 50
reindex = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.indexer.max_batch, 50);
        assert!(config.indexer.reindex);
    }

    #[test]
    fn test_generate_template() {
        let template = Config::generate_template();
        assert!(template.contains("[indexer]"));
        assert!(template.contains("max_batch"));
    }
}
