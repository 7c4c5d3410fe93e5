//! Cryptographic hashing functions for vellum.
//!
//! All hashing uses SHA-256. Every input that feeds the history tree is
//! prefixed with a one-byte domain tag so that a leaf can never be
//! reinterpreted as an interior node (or the other way around):
//!
//! | Tag    | Node kind | Input                                  |
//! |--------|-----------|----------------------------------------|
//! | `0x00` | leaf      | `0x00 ‖ event_digest`                  |
//! | `0x01` | interior  | `0x01 ‖ left ‖ right`                  |
//! | `0x01` | partial   | `0x01 ‖ left ‖ 0x00` (no right subtree)|
//! | `0x02` | chain     | `0x02 ‖ prev ‖ event_digest ‖ version` |

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Hash of empty input: SHA-256("").
pub const EMPTY_HASH: Hash = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

/// Zero hash: 32 zero bytes. Seed of the peer index chain.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Domain tag for leaf nodes.
pub const LEAF_PREFIX: u8 = 0x00;

/// Domain tag for interior nodes.
pub const INTERIOR_PREFIX: u8 = 0x01;

/// Domain tag for the peer index chain.
pub const CHAIN_PREFIX: u8 = 0x02;

/// Placeholder appended in place of a right subtree that has no events yet.
pub const ZERO_PAD: [u8; 1] = [0x00];

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digest of a raw client event, as stored at layer 0 of the history tree.
#[inline]
pub fn event_digest(event: &[u8]) -> Hash {
    sha256(event)
}

/// Leaf value: `H(0x00 ‖ event_digest)`.
#[inline]
pub fn leaf_hash(event_digest: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(event_digest);
    hasher.finalize().into()
}

/// Interior value with both children live: `H(0x01 ‖ left ‖ right)`.
#[inline]
pub fn interior_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([INTERIOR_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Interior value whose right subtree holds no events: `H(0x01 ‖ left ‖ 0x00)`.
#[inline]
pub fn partial_hash(left: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([INTERIOR_PREFIX]);
    hasher.update(left);
    hasher.update(ZERO_PAD);
    hasher.finalize().into()
}

/// Next link of the peer index chain: `H(0x02 ‖ prev ‖ event_digest ‖ version_be)`.
pub fn chain_hash(prev: &Hash, event_digest: &Hash, version: u64) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([CHAIN_PREFIX]);
    hasher.update(prev);
    hasher.update(event_digest);
    hasher.update(version.to_be_bytes());
    hasher.finalize().into()
}

/// Constant-time hash comparison.
///
/// Use this for every comparison against an externally supplied digest.
#[inline]
pub fn hash_eq(a: &Hash, b: &Hash) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_sha256_of_empty() {
        assert_eq!(sha256(&[]), EMPTY_HASH);
        assert_ne!(EMPTY_HASH, ZERO_HASH);
    }

    #[test]
    fn test_sha256_basic() {
        assert_eq!(
            hex::encode(sha256(b"hello")),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_leaf_hash_prefixes_zero_byte() {
        let event = event_digest(b"hello");
        let mut input = vec![0x00];
        input.extend_from_slice(&event);
        assert_eq!(leaf_hash(&event), sha256(&input));
    }

    #[test]
    fn test_interior_hash_prefixes_one_byte() {
        let left = sha256(b"left");
        let right = sha256(b"right");
        let mut input = vec![0x01];
        input.extend_from_slice(&left);
        input.extend_from_slice(&right);
        assert_eq!(interior_hash(&left, &right), sha256(&input));
    }

    #[test]
    fn test_partial_hash_appends_single_zero_byte() {
        let left = sha256(b"left");
        let mut input = vec![0x01];
        input.extend_from_slice(&left);
        input.push(0x00);
        assert_eq!(input.len(), 34);
        assert_eq!(partial_hash(&left), sha256(&input));
    }

    #[test]
    fn test_domain_separation_distinguishes_node_kinds() {
        let digest = sha256(b"x");
        // Same 32 payload bytes, different tags
        assert_ne!(leaf_hash(&digest), sha256(&digest));
        assert_ne!(partial_hash(&digest), interior_hash(&digest, &ZERO_HASH));
    }

    #[test]
    fn test_chain_hash_depends_on_version() {
        let event = sha256(b"e");
        assert_ne!(chain_hash(&ZERO_HASH, &event, 0), chain_hash(&ZERO_HASH, &event, 1));
        assert_ne!(chain_hash(&ZERO_HASH, &event, 0), chain_hash(&event, &event, 0));
    }

    #[test]
    fn test_hash_eq() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        assert!(hash_eq(&a, &a));
        assert!(!hash_eq(&a, &b));
    }
}
