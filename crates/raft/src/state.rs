//! Applied position of the state machine.

use serde::{Deserialize, Serialize};

/// Last applied log position and the tree size it produced.
///
/// Persisted in the `fsm_state` table in the same write transaction as the
/// tree mutation, so the two never disagree after a crash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmState {
    /// Last applied log index.
    pub index: u64,
    /// Term of the last applied entry.
    pub term: u64,
    /// Number of events in the history tree after the last applied entry.
    pub balloon_version: u64,
}

impl FsmState {
    /// Whether a command at `(index, term)` is new relative to this state.
    ///
    /// A lower term is stale. Within the same term the index must advance.
    /// A higher term is always accepted, even with a lower index, since a new
    /// leader may have truncated and rewritten the log tail.
    pub const fn accepts(&self, index: u64, term: u64) -> bool {
        if term < self.term {
            return false;
        }
        term > self.term || index > self.index
    }

    /// The state after applying a command at `(index, term)` that left the
    /// tree with `balloon_version` events.
    pub const fn advance(&self, index: u64, term: u64, balloon_version: u64) -> Self {
        Self { index, term, balloon_version }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_state_accepts_first_entry() {
        let state = FsmState::default();
        assert!(state.accepts(1, 1));
        // (0, 0) is the clean state itself
        assert!(!state.accepts(0, 0));
    }

    #[test]
    fn test_same_term_requires_higher_index() {
        let state = FsmState { index: 5, term: 2, balloon_version: 3 };
        assert!(!state.accepts(4, 2));
        assert!(!state.accepts(5, 2));
        assert!(state.accepts(6, 2));
    }

    #[test]
    fn test_lower_term_is_stale() {
        let state = FsmState { index: 5, term: 2, balloon_version: 3 };
        assert!(!state.accepts(9, 1));
    }

    #[test]
    fn test_higher_term_is_authoritative() {
        let state = FsmState { index: 5, term: 2, balloon_version: 3 };
        assert!(state.accepts(1, 3));
        assert!(state.accepts(6, 3));
    }

    #[test]
    fn test_advance() {
        let state = FsmState::default().advance(1, 1, 1);
        assert_eq!(state, FsmState { index: 1, term: 1, balloon_version: 1 });
    }
}
