//! Durable storage for vellum.
//!
//! This crate provides:
//! - [`StorageEngine`]: a redb database wrapper shared by every store
//! - [`LogEngine`]: the raft log and stable metadata store
//! - [`LogStore`] / [`StableStore`]: the contracts the consensus layer consumes
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vellum_store::{LogEngine, LogEntry, LogStore, StableStore};
//! use vellum_types::{NoopMetrics, config::LogEngineConfig};
//!
//! let engine = LogEngine::open("raft.redb", &LogEngineConfig::default(), Arc::new(NoopMetrics))?;
//! engine.store_log(&LogEntry::command(1, 1, b"cmd".to_vec()))?;
//! engine.set_u64(b"current_term", 1)?;
//! assert_eq!(engine.last_index()?, 1);
//! # Ok::<(), vellum_store::StoreError>(())
//! ```

mod engine;
mod entry;
mod error;
mod log_engine;
mod tables;
mod traits;

pub use engine::StorageEngine;
pub use entry::{EntryKind, LogEntry};
pub use error::{
    ClosedSnafu, CodecSnafu, CommitSnafu, CorruptSnafu, Result, StorageSnafu, StoreError,
    TableSnafu, TransactionSnafu,
};
pub use log_engine::LogEngine;
pub use tables::Tables;
pub use traits::{LogStore, StableStore};
