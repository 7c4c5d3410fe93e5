//! Replicated state machine configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, Durability, validate_cache_size};

/// Maximum bounded capacity of the commitment notification channel.
const MAX_NOTIFY_CAPACITY: usize = 1_000_000;

/// Maximum zstd compression level.
const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Minimum zstd compression level.
const MIN_COMPRESSION_LEVEL: i32 = 1;

/// What the state machine does when the notification channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPolicy {
    /// Wait for the consumer. A stalled consumer stalls `apply`. Inside an
    /// async runtime this behaves like `DropNewest`.
    #[default]
    Block,
    /// Drop the notification and count it in metrics.
    DropNewest,
}

/// Configuration for the replicated state machine and its store.
///
/// # Validation Rules
///
/// - `cache_size_bytes` must be >= 1 MB
/// - `notify_capacity` must be 1-1,000,000
/// - `snapshot_compression_level` must be 1-22 (zstd valid range)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StateMachineConfig {
    /// Page cache size of the state machine store, in bytes.
    #[serde(default = "default_cache_size")]
    pub cache_size_bytes: usize,
    /// Commit durability for tree mutations.
    #[serde(default)]
    pub durability: Durability,
    /// Bounded capacity of the commitment notification channel.
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
    /// Behavior when the notification channel is full.
    #[serde(default)]
    pub notify_policy: NotifyPolicy,
    /// Zstd compression level for snapshot streams (1-22, 3 recommended).
    #[serde(default = "default_compression_level")]
    pub snapshot_compression_level: i32,
    /// Applies slower than this are logged at warn level.
    #[serde(default = "default_slow_apply_threshold")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub slow_apply_threshold: Duration,
}

#[bon::bon]
impl StateMachineConfig {
    /// Creates a new state machine configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `cache_size_bytes` < 1 MB
    /// - `notify_capacity` outside 1-1,000,000
    /// - `snapshot_compression_level` outside 1-22
    #[builder]
    pub fn new(
        #[builder(default = default_cache_size())] cache_size_bytes: usize,
        #[builder(default)] durability: Durability,
        #[builder(default = default_notify_capacity())] notify_capacity: usize,
        #[builder(default)] notify_policy: NotifyPolicy,
        #[builder(default = default_compression_level())] snapshot_compression_level: i32,
        #[builder(default = default_slow_apply_threshold())] slow_apply_threshold: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            cache_size_bytes,
            durability,
            notify_capacity,
            notify_policy,
            snapshot_compression_level,
            slow_apply_threshold,
        };
        config.validate()?;
        Ok(config)
    }
}

impl StateMachineConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_cache_size(self.cache_size_bytes)?;
        if self.notify_capacity == 0 || self.notify_capacity > MAX_NOTIFY_CAPACITY {
            return Err(ConfigError::Validation {
                message: format!(
                    "notify_capacity must be 1-{}, got {}",
                    MAX_NOTIFY_CAPACITY, self.notify_capacity
                ),
            });
        }
        if self.snapshot_compression_level < MIN_COMPRESSION_LEVEL
            || self.snapshot_compression_level > MAX_COMPRESSION_LEVEL
        {
            return Err(ConfigError::Validation {
                message: format!(
                    "snapshot_compression_level must be {}-{}, got {}",
                    MIN_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, self.snapshot_compression_level
                ),
            });
        }
        Ok(())
    }
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: default_cache_size(),
            durability: Durability::default(),
            notify_capacity: default_notify_capacity(),
            notify_policy: NotifyPolicy::default(),
            snapshot_compression_level: default_compression_level(),
            slow_apply_threshold: default_slow_apply_threshold(),
        }
    }
}

fn default_cache_size() -> usize {
    128 * 1024 * 1024 // 128 MB
}

fn default_notify_capacity() -> usize {
    1024
}

fn default_compression_level() -> i32 {
    3 // Good balance of speed/ratio
}

fn default_slow_apply_threshold() -> Duration {
    Duration::from_millis(250)
}
