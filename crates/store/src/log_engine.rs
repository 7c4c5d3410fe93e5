//! Durable log and stable store for the consensus layer.
//!
//! [`LogEngine`] owns one redb file with three partitions (see
//! [`Tables`](crate::Tables)): `general` for engine metadata, `stable` for
//! consensus metadata and `raft_log` for log entries. Every write call is a
//! single redb write transaction, so batches and range deletes are atomic.
//!
//! # Closing
//!
//! The engine handle lives behind a lock. Every call holds a read guard for
//! its duration; [`LogEngine::close`] takes the write guard, which waits for
//! in-flight calls and then drops the handle. Closing twice is a no-op and
//! every call after close fails with `StoreError::Closed`.

use std::{path::Path, sync::Arc, time::Instant};

use parking_lot::RwLock;
use redb::ReadableTable;
use snafu::{OptionExt, ResultExt};
use vellum_types::{MetricsSink, config::LogEngineConfig, decode, encode};

use crate::{
    engine::StorageEngine,
    entry::LogEntry,
    error::{
        ClosedSnafu, CodecSnafu, CommitSnafu, CorruptSnafu, KeyNotFoundSnafu, LogNotFoundSnafu,
        Result, StorageSnafu, TableSnafu,
    },
    tables::{FORMAT_VERSION, FORMAT_VERSION_KEY, Tables},
    traits::{LogStore, StableStore},
};

/// redb-backed implementation of [`LogStore`] and [`StableStore`].
pub struct LogEngine {
    engine: RwLock<Option<StorageEngine>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for LogEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEngine").field("engine", &*self.engine.read()).finish()
    }
}

impl LogEngine {
    /// Opens or creates the log engine at `path`.
    ///
    /// Creates all partitions and writes the format marker on first open.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the file cannot be opened and
    /// `StoreError::Corrupt` if the format marker does not match.
    pub fn open(
        path: impl AsRef<Path>,
        config: &LogEngineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let engine = StorageEngine::open(path, config.cache_size_bytes, config.durability)?;

        let txn = engine.begin_write()?;
        {
            let mut general = txn.open_table(Tables::GENERAL).context(TableSnafu)?;
            txn.open_table(Tables::STABLE).context(TableSnafu)?;
            txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;

            let existing =
                general.get(FORMAT_VERSION_KEY).context(StorageSnafu)?.map(|v| v.value().to_vec());
            match existing {
                None => {
                    general
                        .insert(FORMAT_VERSION_KEY, FORMAT_VERSION.to_be_bytes().as_slice())
                        .context(StorageSnafu)?;
                },
                Some(bytes) if bytes == FORMAT_VERSION.to_be_bytes() => {},
                Some(bytes) => {
                    return CorruptSnafu {
                        reason: format!(
                            "unsupported log engine format {}, expected {FORMAT_VERSION}",
                            hex::encode(bytes)
                        ),
                    }
                    .fail();
                },
            }
        }
        txn.commit().context(CommitSnafu)?;

        tracing::info!(
            path = %engine.path().display(),
            durability = ?engine.durability(),
            "Opened log engine"
        );
        Ok(Self { engine: RwLock::new(Some(engine)), metrics })
    }

    /// Releases the underlying database.
    ///
    /// Waits for in-flight calls. Calling `close` again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.engine.write();
        if let Some(engine) = guard.take() {
            tracing::info!(path = %engine.path().display(), "Closed log engine");
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.engine.read().is_none()
    }

    fn with_engine<T>(&self, f: impl FnOnce(&StorageEngine) -> Result<T>) -> Result<T> {
        let guard = self.engine.read();
        let engine = guard.as_ref().context(ClosedSnafu)?;
        f(engine)
    }
}

impl LogStore for LogEngine {
    fn first_index(&self) -> Result<u64> {
        self.with_engine(|engine| {
            let txn = engine.begin_read()?;
            let table = txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;
            let first = table.first().context(StorageSnafu)?;
            Ok(first.map(|(key, _)| key.value()).unwrap_or(0))
        })
    }

    fn last_index(&self) -> Result<u64> {
        self.with_engine(|engine| {
            let txn = engine.begin_read()?;
            let table = txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;
            let last = table.last().context(StorageSnafu)?;
            Ok(last.map(|(key, _)| key.value()).unwrap_or(0))
        })
    }

    fn get_log(&self, index: u64) -> Result<LogEntry> {
        self.with_engine(|engine| {
            let txn = engine.begin_read()?;
            let table = txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;
            let guard = table.get(index).context(StorageSnafu)?.context(LogNotFoundSnafu { index })?;
            let entry = decode(guard.value()).context(CodecSnafu)?;
            Ok(entry)
        })
    }

    fn store_logs(&self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.with_engine(|engine| {
            let start = Instant::now();
            let txn = engine.begin_write()?;
            {
                let mut table = txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;
                for entry in entries {
                    let bytes = encode(entry).context(CodecSnafu)?;
                    table.insert(entry.index, bytes.as_slice()).context(StorageSnafu)?;
                }
            }
            txn.commit().context(CommitSnafu)?;

            self.metrics.record_log_write(entries.len(), start.elapsed().as_secs_f64());
            tracing::debug!(
                count = entries.len(),
                first = entries.first().map(|e| e.index),
                last = entries.last().map(|e| e.index),
                "Stored log entries"
            );
            Ok(())
        })
    }

    fn delete_range(&self, min: u64, max: u64) -> Result<()> {
        if min > max {
            return Ok(());
        }
        self.with_engine(|engine| {
            let txn = engine.begin_write()?;
            let removed = {
                let mut table = txn.open_table(Tables::RAFT_LOG).context(TableSnafu)?;
                let keys: Vec<u64> = table
                    .range(min..=max)
                    .context(StorageSnafu)?
                    .map(|item| item.map(|(key, _)| key.value()).context(StorageSnafu))
                    .collect::<Result<_>>()?;
                for key in &keys {
                    table.remove(*key).context(StorageSnafu)?;
                }
                keys.len() as u64
            };
            txn.commit().context(CommitSnafu)?;

            self.metrics.record_log_delete(removed);
            tracing::info!(min, max, removed, "Deleted log range");
            Ok(())
        })
    }
}

impl StableStore for LogEngine {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_engine(|engine| {
            let txn = engine.begin_write()?;
            {
                let mut table = txn.open_table(Tables::STABLE).context(TableSnafu)?;
                table.insert(key, value).context(StorageSnafu)?;
            }
            txn.commit().context(CommitSnafu)?;
            Ok(())
        })
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.with_engine(|engine| {
            let txn = engine.begin_read()?;
            let table = txn.open_table(Tables::STABLE).context(TableSnafu)?;
            let guard = table
                .get(key)
                .context(StorageSnafu)?
                .context(KeyNotFoundSnafu { key: hex::encode(key) })?;
            let value = guard.value().to_vec();
            Ok(value)
        })
    }
}
