//! Configuration types for vellum.
//!
//! Configuration is usually deserialized from the host's own config file.
//! All config structs validate their values at construction time via
//! fallible builders. Post-deserialization validation is available via
//! the `validate()` method on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions. Config types are declarative structs with minimal procedural
// code, so the lint is relaxed for the whole module.
#![allow(clippy::disallowed_methods)]

mod log_engine;
mod state_machine;

pub use log_engine::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
pub use state_machine::*;

use crate::error::ErrorCode;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range or
/// violates a cross-field constraint.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

impl ConfigError {
    /// Returns the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::AppConfig
    }
}

/// Commit durability for write transactions.
///
/// `Immediate` fsyncs before a write call returns. `Relaxed` skips the
/// fsync: a crash may lose the most recent commits, in exchange for
/// much lower write latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Every commit is persisted before returning.
    #[default]
    Immediate,
    /// Commits are not synced to disk on return.
    Relaxed,
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Minimum cache size shared by every store: 1 MB.
const MIN_CACHE_SIZE_BYTES: usize = 1024 * 1024;

fn validate_cache_size(cache_size_bytes: usize) -> Result<(), ConfigError> {
    if cache_size_bytes < MIN_CACHE_SIZE_BYTES {
        return Err(ConfigError::Validation {
            message: format!(
                "cache_size_bytes must be >= {} (1 MB), got {}",
                MIN_CACHE_SIZE_BYTES, cache_size_bytes
            ),
        });
    }
    Ok(())
}
