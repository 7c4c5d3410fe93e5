//! Node positions in the history tree.
//!
//! A position `(index, layer)` names the subtree whose leaves are
//! `index..index + 2^layer`. Layer 0 positions are the events themselves.
//!
//! Storage key format: `{index:8BE}{layer:8BE}`. Big-endian keeps the
//! frozen table ordered by index first.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Encoded size of a position key.
pub const POSITION_KEY_LEN: usize = 16;

/// A node position in the history tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// First leaf covered by the subtree.
    pub index: u64,
    /// Height above the leaves.
    pub layer: u64,
}

impl Position {
    /// Creates a position.
    pub const fn new(index: u64, layer: u64) -> Self {
        Self { index, layer }
    }

    /// Root position of the tree at `version`.
    pub const fn root(version: u64) -> Self {
        Self { index: 0, layer: depth(version.saturating_add(1)) }
    }

    /// Number of leaves the subtree spans.
    pub const fn width(&self) -> u64 {
        pow2(self.layer)
    }

    /// Last leaf index the subtree spans.
    pub const fn last(&self) -> u64 {
        self.index.saturating_add(self.width() - 1)
    }

    /// Whether leaf `index` lies inside the subtree.
    pub const fn covers(&self, index: u64) -> bool {
        index >= self.index && index <= self.last()
    }

    /// Whether every leaf of the subtree exists at `version`.
    ///
    /// Such a node never changes again and may be cached.
    pub const fn is_full_at(&self, version: u64) -> bool {
        version >= self.last()
    }

    /// Left and right children. Undefined for layer 0.
    pub const fn children(&self) -> (Position, Position) {
        let half = pow2(self.layer - 1);
        (
            Position { index: self.index, layer: self.layer - 1 },
            Position { index: self.index + half, layer: self.layer - 1 },
        )
    }

    /// Storage key: index then layer, both big-endian.
    pub fn key(&self) -> [u8; POSITION_KEY_LEN] {
        let mut key = [0u8; POSITION_KEY_LEN];
        key[..8].copy_from_slice(&self.index.to_be_bytes());
        key[8..].copy_from_slice(&self.layer.to_be_bytes());
        key
    }

    /// Decodes a storage key. Returns `None` if the length is wrong.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != POSITION_KEY_LEN {
            return None;
        }
        let index = u64::from_be_bytes(key[..8].try_into().ok()?);
        let layer = u64::from_be_bytes(key[8..].try_into().ok()?);
        Some(Self { index, layer })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.index, self.layer)
    }
}

/// `2^layer`.
#[inline]
pub const fn pow2(layer: u64) -> u64 {
    1u64 << layer
}

/// Number of layers needed to cover `leaves` leaves: `ceil(log2(leaves))`,
/// with 0 and 1 both mapping to 0.
#[inline]
pub const fn depth(leaves: u64) -> u64 {
    if leaves <= 1 { 0 } else { (64 - (leaves - 1).leading_zeros()) as u64 }
}

/// Storage key of the event at `index`.
#[inline]
pub fn event_key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

/// Decodes an event key. Returns `None` if the length is wrong.
pub fn decode_event_key(key: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(key.try_into().ok()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_depth() {
        let cases = [(0, 0), (1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4), (1 << 40, 40)];
        for (leaves, expected) in cases {
            assert_eq!(depth(leaves), expected, "depth({leaves})");
        }
        assert_eq!(depth(u64::MAX), 64);
    }

    #[test]
    fn test_root_position() {
        assert_eq!(Position::root(0), Position::new(0, 0));
        assert_eq!(Position::root(1), Position::new(0, 1));
        assert_eq!(Position::root(4), Position::new(0, 3));
        assert_eq!(Position::root(7), Position::new(0, 3));
    }

    #[test]
    fn test_covers_and_fullness() {
        let pos = Position::new(4, 2);
        assert!(!pos.covers(3));
        assert!(pos.covers(4));
        assert!(pos.covers(7));
        assert!(!pos.covers(8));
        assert!(!pos.is_full_at(6));
        assert!(pos.is_full_at(7));
    }

    #[test]
    fn test_children() {
        let (left, right) = Position::new(8, 3).children();
        assert_eq!(left, Position::new(8, 2));
        assert_eq!(right, Position::new(12, 2));
    }

    #[test]
    fn test_key_ordering_follows_index() {
        let a = Position::new(1, 5).key();
        let b = Position::new(2, 0).key();
        assert!(a < b);
        assert_eq!(Position::from_key(&a), Some(Position::new(1, 5)));
        assert_eq!(Position::from_key(&a[..15]), None);
    }

    #[test]
    fn test_event_key() {
        assert_eq!(decode_event_key(&event_key(258)), Some(258));
        assert_eq!(decode_event_key(&[1, 2]), None);
        assert!(event_key(255) < event_key(256));
    }
}
