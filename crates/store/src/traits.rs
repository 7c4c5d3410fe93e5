//! Storage contracts consumed by the consensus layer.
//!
//! Both traits take `&self`: implementations synchronize internally so the
//! consensus layer can share one handle between its log and metadata paths.
//! A successful write is crash-durable unless the store was opened with
//! relaxed durability.

use snafu::ensure;

use crate::{
    entry::LogEntry,
    error::{CorruptSnafu, Result},
};

/// Append-only, index-keyed log storage.
pub trait LogStore: Send + Sync {
    /// Lowest stored index, or 0 when the log is empty.
    fn first_index(&self) -> Result<u64>;

    /// Highest stored index, or 0 when the log is empty.
    fn last_index(&self) -> Result<u64>;

    /// Reads the entry at `index`.
    ///
    /// Fails with `StoreError::LogNotFound` when absent, which is how the
    /// consensus layer detects a compaction boundary.
    fn get_log(&self, index: u64) -> Result<LogEntry>;

    /// Stores a single entry.
    fn store_log(&self, entry: &LogEntry) -> Result<()> {
        self.store_logs(std::slice::from_ref(entry))
    }

    /// Stores a batch of entries atomically: all of them or none.
    fn store_logs(&self, entries: &[LogEntry]) -> Result<()>;

    /// Deletes every entry with `min <= index <= max` atomically.
    fn delete_range(&self, min: u64, max: u64) -> Result<()>;
}

/// Key-value storage for consensus metadata (term, vote, node id).
pub trait StableStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Reads the value under `key`; fails with `StoreError::KeyNotFound` when absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Stores a `u64` as 8 big-endian bytes.
    fn set_u64(&self, key: &[u8], value: u64) -> Result<()> {
        self.set(key, &value.to_be_bytes())
    }

    /// Reads a `u64` written by [`set_u64`](Self::set_u64).
    fn get_u64(&self, key: &[u8]) -> Result<u64> {
        let bytes = self.get(key)?;
        ensure!(
            bytes.len() == 8,
            CorruptSnafu {
                reason: format!(
                    "value for key {} is {} bytes, expected 8",
                    hex::encode(key),
                    bytes.len()
                )
            }
        );
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf))
    }
}
