//! Core types, errors, and cryptographic primitives for vellum.
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - SHA-256 hashing with leaf/interior domain separation
//! - postcard encoding and decoding
//! - Machine-readable error codes
//! - Configuration types with validated builders
//! - The injected metrics sink

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;

pub use codec::{CodecError, decode, encode};
pub use error::ErrorCode;
pub use hash::{
    EMPTY_HASH, Hash, ZERO_HASH, chain_hash, event_digest, hash_eq, interior_hash, leaf_hash,
    partial_hash, sha256,
};
pub use metrics::{MetricsSink, NoopMetrics, RecorderMetrics};
