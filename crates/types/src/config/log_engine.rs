//! Log engine configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, Durability, validate_cache_size};

/// Configuration for the durable log and stable store.
///
/// # Validation Rules
///
/// - `cache_size_bytes` must be >= 1 MB (1,048,576 bytes)
///
/// # Example
///
/// ```no_run
/// # use vellum_types::config::{Durability, LogEngineConfig};
/// let config = LogEngineConfig::builder()
///     .cache_size_bytes(32 * 1024 * 1024)
///     .durability(Durability::Immediate)
///     .build()
///     .expect("valid log engine config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogEngineConfig {
    /// Page cache size of the embedded store, in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size_bytes: usize,
    /// Commit durability for log and stable writes.
    #[serde(default)]
    pub durability: Durability,
}

#[bon::bon]
impl LogEngineConfig {
    /// Creates a new log engine configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `cache_size_bytes` < 1 MB.
    #[builder]
    pub fn new(
        #[builder(default = default_cache_size())] cache_size_bytes: usize,
        #[builder(default)] durability: Durability,
    ) -> Result<Self, ConfigError> {
        let config = Self { cache_size_bytes, durability };
        config.validate()?;
        Ok(config)
    }
}

impl LogEngineConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cache_size(self.cache_size_bytes)
    }
}

impl Default for LogEngineConfig {
    fn default() -> Self {
        Self { cache_size_bytes: default_cache_size(), durability: Durability::default() }
    }
}

fn default_cache_size() -> usize {
    64 * 1024 * 1024 // 64 MB
}
