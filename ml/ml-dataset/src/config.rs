//! Storage configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// Default shard rotation threshold (64 MiB).
pub const DEFAULT_SHARD_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for writing sharded splits.
///
/// # Example
///
/// ```
/// use ml_dataset::StoreConfig;
///
/// let config = StoreConfig::default().with_shard_size(4096);
/// assert_eq!(config.shard_size_bytes, 4096);
/// assert!(config.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// A shard is closed once adding the next record would exceed this size.
    ///
    /// A single record larger than the threshold still gets a shard of its own.
    pub shard_size_bytes: u64,

    /// Whether to fsync shard files when a writer finishes.
    pub sync_on_finish: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_size_bytes: DEFAULT_SHARD_SIZE_BYTES,
            sync_on_finish: true,
        }
    }
}

impl StoreConfig {
    /// Sets the shard rotation threshold.
    #[must_use]
    pub const fn with_shard_size(mut self, bytes: u64) -> Self {
        self.shard_size_bytes = bytes;
        self
    }

    /// Disables fsync on finish (useful for tests and scratch data).
    #[must_use]
    pub const fn without_sync(mut self) -> Self {
        self.sync_on_finish = false;
        self
    }

    /// Validates the configuration.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.shard_size_bytes > 0
    }

    /// Returns an error if the configuration is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConfig`] if the shard size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(DatasetError::invalid_config("shard_size_bytes must be > 0"))
        }
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(DatasetError::from)
    }

    /// Deserializes and validates a configuration from JSON.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Saves the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.shard_size_bytes, DEFAULT_SHARD_SIZE_BYTES);
        assert!(config.sync_on_finish);
        assert!(config.is_valid());
    }

    #[test]
    fn config_builder() {
        let config = StoreConfig::default().with_shard_size(10).without_sync();
        assert_eq!(config.shard_size_bytes, 10);
        assert!(!config.sync_on_finish);
    }

    #[test]
    fn config_invalid() {
        let config = StoreConfig::default().with_shard_size(0);
        assert!(!config.is_valid());
        assert!(matches!(
            config.validate(),
            Err(DatasetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_partial_json_uses_defaults() {
        let config = StoreConfig::from_json(r#"{"shard_size_bytes": 1024}"#).unwrap();
        assert_eq!(config.shard_size_bytes, 1024);
        assert!(config.sync_on_finish);
    }

    #[test]
    fn config_zero_size_json_rejected() {
        assert!(StoreConfig::from_json(r#"{"shard_size_bytes": 0}"#).is_err());
    }

    #[test]
    fn config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let config = StoreConfig::default().with_shard_size(123);
        config.save(&path).unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), config);
    }
}
