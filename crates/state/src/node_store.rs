//! Node storage for the history tree.
//!
//! The tree keeps two node sets: events at layer 0, written once per
//! [`add`](crate::HistoryTree::add), and frozen interior nodes, cached the
//! first time a fully determined subtree is computed. Neither set is ever
//! rewritten with a different value.

use std::collections::BTreeMap;

use vellum_store::Result;
use vellum_types::Hash;

use crate::position::Position;

/// Backing storage for a [`HistoryTree`](crate::HistoryTree).
///
/// Implementations may buffer writes; the tree only relies on reads seeing
/// its own earlier writes.
pub trait NodeStore {
    /// Digest of the event at leaf `index`, if stored.
    fn event(&self, index: u64) -> Result<Option<Hash>>;

    /// Stores the event digest for leaf `index`.
    fn put_event(&mut self, index: u64, digest: Hash) -> Result<()>;

    /// Cached digest of a fully determined node, if present.
    fn frozen(&self, position: Position) -> Result<Option<Hash>>;

    /// Caches the digest of a fully determined node.
    fn put_frozen(&mut self, position: Position, digest: Hash) -> Result<()>;

    /// Number of stored events. Events always occupy `0..count`.
    fn event_count(&self) -> Result<u64>;

    /// Digest supplied from outside the tree, taking precedence over
    /// every other source. Only proof verification pins nodes.
    fn pinned(&self, _position: Position) -> Option<Hash> {
        None
    }
}

/// In-memory node store.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    events: BTreeMap<u64, Hash>,
    frozen: BTreeMap<Position, Hash>,
}

impl MemoryNodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached frozen nodes.
    pub fn frozen_len(&self) -> usize {
        self.frozen.len()
    }
}

impl NodeStore for MemoryNodeStore {
    fn event(&self, index: u64) -> Result<Option<Hash>> {
        Ok(self.events.get(&index).copied())
    }

    fn put_event(&mut self, index: u64, digest: Hash) -> Result<()> {
        self.events.insert(index, digest);
        Ok(())
    }

    fn frozen(&self, position: Position) -> Result<Option<Hash>> {
        Ok(self.frozen.get(&position).copied())
    }

    fn put_frozen(&mut self, position: Position, digest: Hash) -> Result<()> {
        self.frozen.insert(position, digest);
        Ok(())
    }

    fn event_count(&self) -> Result<u64> {
        Ok(self.events.len() as u64)
    }
}
