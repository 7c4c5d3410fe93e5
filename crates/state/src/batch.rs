//! Staged writes awaiting a shared commit.
//!
//! The history tree and the peer index never open write transactions on
//! their own. They stage every mutation in a [`MutationBatch`]; the state
//! machine merges the batches, adds its own state record and writes the
//! lot in one redb transaction. Dropping a batch discards it.

use std::collections::BTreeMap;

use redb::WriteTransaction;
use snafu::ResultExt;
use vellum_store::{Result, StorageSnafu, TableSnafu};

use crate::tables::TableId;

/// Ordered set of pending `put`s across the state machine tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    entries: BTreeMap<(TableId, Vec<u8>), Vec<u8>>,
}

impl MutationBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `value` under `key` in `table`, replacing an earlier staged value.
    pub fn put(&mut self, table: TableId, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert((table, key.into()), value.into());
    }

    /// Reads a staged value.
    pub fn get(&self, table: TableId, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(&(table, key.to_vec())).map(Vec::as_slice)
    }

    /// Moves every entry of `other` into this batch. Later values win.
    pub fn extend(&mut self, other: MutationBatch) {
        self.entries.extend(other.entries);
    }

    /// Number of staged entries in `table`.
    pub fn count(&self, table: TableId) -> usize {
        self.entries.keys().filter(|(t, _)| *t == table).count()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops every staged entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Writes every entry into `txn`. The caller commits.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be opened or an insert fails.
    pub fn write(&self, txn: &WriteTransaction) -> Result<()> {
        for table_id in TableId::ALL {
            let mut entries = self
                .entries
                .range((table_id, Vec::new())..)
                .take_while(|((t, _), _)| *t == table_id)
                .peekable();
            if entries.peek().is_none() {
                continue;
            }

            let mut table = txn.open_table(table_id.definition()).context(TableSnafu)?;
            for ((_, key), value) in entries {
                table.insert(key.as_slice(), value.as_slice()).context(StorageSnafu)?;
            }
        }
        Ok(())
    }
}
