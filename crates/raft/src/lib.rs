//! Replicated state machine for vellum.
//!
//! This crate provides:
//! - [`Command`], the four replicated commands and their tag-byte wire format
//! - [`ReplicatedStateMachine`], which applies committed entries to the
//!   history tree and keeps per-node metadata
//! - Commitment notifications over a bounded channel
//! - Snapshot streams with zstd compression and a SHA-256 footer
//!
//! The consensus protocol itself is out of scope: a host wires the
//! [`StateMachine`] trait to its consensus library and the
//! [`vellum_store::LogEngine`] to that library's log storage.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vellum_raft::{ApplyOutcome, Command, ReplicatedStateMachine};
//! use vellum_types::{NoopMetrics, config::StateMachineConfig, event_digest};
//!
//! let config = StateMachineConfig::default();
//! let (fsm, mut commitments) =
//!     ReplicatedStateMachine::open_path("fsm.redb", &config, Arc::new(NoopMetrics))?;
//!
//! let command = Command::AddEvent { digest: event_digest(b"login alice") }.encode()?;
//! let outcome = fsm.apply(1, 1, &command)?;
//! assert!(matches!(outcome, ApplyOutcome::Added(ref c) if c.len() == 1));
//! assert_eq!(commitments.try_recv()?.version, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Threading
//!
//! `apply`, `snapshot` and `restore` are synchronous and block on storage
//! I/O. With the default blocking notification policy, `apply` also waits
//! for room in the commitment channel, so async hosts should call it from a
//! blocking thread; called from a runtime thread it drops notifications
//! when the channel is full instead of waiting.

#![deny(unsafe_code)]

mod command;
mod error;
mod metadata;
mod notify;
mod snapshot;
mod state;
mod state_machine;

pub use command::{Command, CommandError, CommandTag};
pub use error::{ApplyError, FsmError, Result};
pub use metadata::{InMemoryMetadata, MetadataHandle, MetadataMap, MetadataRegistry};
pub use notify::{CommitmentNotification, CommitmentReceiver, CommitmentSender, commitment_channel};
pub use snapshot::{
    CHECKSUM_SIZE, FsmSnapshot, HashingWriter, MAX_FIELD_LEN, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
    SnapshotError, SnapshotImage, SnapshotWriter, TableEntries,
};
pub use state::FsmState;
pub use state_machine::{ApplyOutcome, ReplicatedStateMachine, StateMachine};
