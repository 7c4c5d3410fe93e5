//! Raft log entry record.

use serde::{Deserialize, Serialize};

/// What a log entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// An encoded state machine command.
    Command,
    /// A no-op appended by a new leader.
    Noop,
    /// A cluster membership change owned by the consensus layer.
    Configuration,
    /// A barrier used to wait for prior entries to apply.
    Barrier,
}

/// A single record in the raft log partition.
///
/// The log engine never interprets `data`; it is opaque bytes owned by
/// the consensus layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log. Also the storage key.
    pub index: u64,
    /// Term of the leader that created the entry.
    pub term: u64,
    /// Entry kind.
    pub kind: EntryKind,
    /// Opaque payload.
    pub data: Vec<u8>,
}

impl LogEntry {
    /// Creates a command entry.
    pub fn command(index: u64, term: u64, data: impl Into<Vec<u8>>) -> Self {
        Self { index, term, kind: EntryKind::Command, data: data.into() }
    }

    /// Creates a no-op entry.
    pub fn noop(index: u64, term: u64) -> Self {
        Self { index, term, kind: EntryKind::Noop, data: Vec::new() }
    }
}
