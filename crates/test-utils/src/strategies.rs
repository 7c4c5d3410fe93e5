//! Proptest strategies for vellum domain values.
//!
//! Reusable generators for property-based testing across crates. Strategies produce
//! well-formed values (digests, log batches, node metadata) while exploring edge
//! cases through random variation.
//!
//! # Usage
//!
//! ```no_run
//! use proptest::prelude::*;
//! use vellum_test_utils::strategies;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(digests in strategies::arb_distinct_digests(1..32)) {
//!         // add every digest to a tree and check an invariant
//!     }
//! }
//! ```

use std::{collections::BTreeMap, ops::Range};

use proptest::prelude::*;
use vellum_types::{Hash, event_digest};

/// Generates an arbitrary 32-byte hash (uniform random bytes).
pub fn arb_hash() -> impl Strategy<Value = Hash> {
    proptest::array::uniform32(any::<u8>())
}

/// Generates an event digest by hashing a short random payload.
///
/// Digests produced this way look like the ones clients submit, and two
/// equal payloads map to the same digest.
pub fn arb_event_digest() -> impl Strategy<Value = Hash> {
    proptest::collection::vec(any::<u8>(), 0..64).prop_map(|payload| event_digest(&payload))
}

/// Generates a vector of pairwise distinct event digests with a length in `len`.
///
/// Distinctness matters for the version index, which maps each digest to a
/// single version.
pub fn arb_distinct_digests(len: Range<usize>) -> impl Strategy<Value = Vec<Hash>> {
    proptest::collection::btree_set(arb_hash(), len)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Generates a contiguous log batch of up to `max_len` entries as
/// `(index, term, payload)` triples, starting at an index in `1..1_000`.
///
/// Terms never decrease within a batch.
pub fn arb_log_batch(max_len: usize) -> impl Strategy<Value = Vec<(u64, u64, Vec<u8>)>> {
    (1u64..1_000, 1u64..10, proptest::collection::vec((0u64..2, arb_payload()), 1..=max_len))
        .prop_map(|(start, first_term, steps)| {
            let mut term = first_term;
            steps
                .into_iter()
                .enumerate()
                .map(|(offset, (bump, payload))| {
                    term += bump;
                    (start + offset as u64, term, payload)
                })
                .collect()
        })
}

/// Generates an opaque log payload of 0-127 bytes.
pub fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..128)
}

/// Generates a node identifier matching `node-[a-z0-9]{1,8}`.
pub fn arb_node_id() -> impl Strategy<Value = String> {
    "node-[a-z0-9]{1,8}"
}

/// Generates a metadata map of 0-7 short key/value pairs.
pub fn arb_metadata() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 0..8)
}
