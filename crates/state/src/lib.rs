//! Authenticated history tree for vellum.
//!
//! This crate sits between the redb storage engine (`vellum-store`) and the
//! replicated state machine (`vellum-raft`), providing:
//!
//! - [`HistoryTree`], an append-only Merkle history tree with a commitment
//!   per version
//! - [`MembershipProof`] and [`IncrementalProof`], both verifiable without
//!   access to the tree
//! - Node stores: [`MemoryNodeStore`] for tests and tools,
//!   [`StagedNodeStore`] over redb with writes staged for a shared commit
//! - [`VersionIndex`], the peer index updated in lockstep with the tree
//!
//! # Example
//!
//! ```
//! use vellum_state::{HistoryTree, MemoryNodeStore};
//! use vellum_types::event_digest;
//!
//! let mut tree = HistoryTree::new(MemoryNodeStore::new());
//! for event in [b"a", b"b", b"c"] {
//!     tree.add(event_digest(event)).expect("in-memory add");
//! }
//!
//! let proof = tree.membership_proof(1, 2, event_digest(b"b")).expect("valid range");
//! assert!(proof.verify());
//! ```

#![deny(unsafe_code)]

mod batch;
mod error;
mod node_store;
mod position;
mod proof;
mod staged;
pub mod tables;
mod tree;
mod version_index;

pub use batch::MutationBatch;
pub use error::{Result, TreeError};
pub use node_store::{MemoryNodeStore, NodeStore};
pub use position::{Position, depth, event_key};
pub use proof::{AuditNode, IncrementalProof, MembershipProof};
pub use staged::StagedNodeStore;
pub use tables::{TableId, Tables};
pub use tree::{Commitment, HistoryTree};
pub use version_index::{
    PeerIndex, VersionIndex, decode_chain_meta, encode_chain_meta, rebuild_chain,
};
