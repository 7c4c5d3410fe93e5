//! Membership and incremental proofs.
//!
//! Both proof kinds are verified the same way: a throwaway tree is seeded
//! with the audit nodes, pinned by position, plus the leaves under test, and
//! the commitment is recomputed with the ordinary node rule. Pinned digests
//! are never accepted for a position that covers a leaf under test, so a
//! proof cannot substitute the root or the leaf itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vellum_types::{Hash, hash_eq};

use crate::{node_store::NodeStore, position::Position, tree::HistoryTree};

/// A digest supplied by a proof for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNode {
    /// Position of the node.
    pub position: Position,
    /// Its digest at the proof's version.
    pub digest: Hash,
}

/// Proof that an event sits at a leaf of the tree at some version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    /// Leaf index of the event.
    pub index: u64,
    /// Version the proof is against.
    pub version: u64,
    /// Event digest under test.
    pub event_digest: Hash,
    /// Commitment at `version`.
    pub root: Hash,
    /// Sibling nodes, root to leaf, at most one per layer.
    pub audit_nodes: Vec<AuditNode>,
}

impl MembershipProof {
    /// Recomputes the commitment from the audit nodes and compares it with
    /// [`root`](Self::root).
    pub fn verify(&self) -> bool {
        if self.index > self.version {
            return false;
        }
        let store = ProofStore::new(&self.audit_nodes, [(self.index, self.event_digest)]);
        let mut tree = HistoryTree::new(store);
        match tree.node(Position::root(self.version), self.version) {
            Ok(computed) => hash_eq(&computed, &self.root),
            Err(err) => {
                tracing::debug!(error = %err, index = self.index, "Membership proof is incomplete");
                false
            },
        }
    }
}

/// Proof that the tree at `start` is a prefix of the tree at `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalProof {
    /// Earlier version.
    pub start: u64,
    /// Later version.
    pub end: u64,
    /// Digest of the event added at `start`.
    pub start_event: Hash,
    /// Digest of the event added at `end`.
    pub end_event: Hash,
    /// Nodes needed to recompute both commitments, ordered by position.
    pub audit_nodes: Vec<AuditNode>,
}

impl IncrementalProof {
    /// Checks that `start_commitment` and `end_commitment` are the roots at
    /// `start` and `end` of one tree.
    ///
    /// Both roots are recomputed from the same node set, so a tree at `end`
    /// that rewrote any event up to `start` cannot pass.
    pub fn verify(&self, start_commitment: &Hash, end_commitment: &Hash) -> bool {
        if self.start > self.end {
            return false;
        }
        let store = ProofStore::new(
            &self.audit_nodes,
            [(self.start, self.start_event), (self.end, self.end_event)],
        );
        let mut tree = HistoryTree::new(store);

        let start_root = tree.node(Position::root(self.start), self.start);
        let end_root = tree.node(Position::root(self.end), self.end);
        match (start_root, end_root) {
            (Ok(start), Ok(end)) => {
                hash_eq(&start, start_commitment) && hash_eq(&end, end_commitment)
            },
            (Err(err), _) | (_, Err(err)) => {
                tracing::debug!(
                    error = %err,
                    start = self.start,
                    end = self.end,
                    "Incremental proof is incomplete"
                );
                false
            },
        }
    }
}

/// Throwaway node store used during verification.
struct ProofStore {
    pinned: BTreeMap<Position, Hash>,
    events: BTreeMap<u64, Hash>,
    frozen: BTreeMap<Position, Hash>,
}

impl ProofStore {
    fn new(audit_nodes: &[AuditNode], events: impl IntoIterator<Item = (u64, Hash)>) -> Self {
        Self {
            pinned: audit_nodes.iter().map(|node| (node.position, node.digest)).collect(),
            events: events.into_iter().collect(),
            frozen: BTreeMap::new(),
        }
    }
}

impl NodeStore for ProofStore {
    fn event(&self, index: u64) -> vellum_store::Result<Option<Hash>> {
        Ok(self.events.get(&index).copied())
    }

    fn put_event(&mut self, index: u64, digest: Hash) -> vellum_store::Result<()> {
        self.events.insert(index, digest);
        Ok(())
    }

    fn frozen(&self, position: Position) -> vellum_store::Result<Option<Hash>> {
        Ok(self.frozen.get(&position).copied())
    }

    fn put_frozen(&mut self, position: Position, digest: Hash) -> vellum_store::Result<()> {
        self.frozen.insert(position, digest);
        Ok(())
    }

    fn event_count(&self) -> vellum_store::Result<u64> {
        Ok(self.events.len() as u64)
    }

    fn pinned(&self, position: Position) -> Option<Hash> {
        if self.events.keys().any(|index| position.covers(*index)) {
            return None;
        }
        self.pinned.get(&position).copied()
    }
}
