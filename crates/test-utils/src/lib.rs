//! Shared test utilities for vellum crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`init_tracing`] - Install a test-writer tracing subscriber once per process
//! - [`strategies`] - Proptest generators for event digests, log entries and node ids

#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod logging;
pub use logging::init_tracing;

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::{
        strategy::{Strategy, ValueTree},
        test_runner::TestRunner,
    };

    use super::*;

    // ============================================
    // TestDir tests
    // ============================================

    #[test]
    fn test_dir_creates_temp_directory() {
        let dir = TestDir::new();
        assert!(dir.path().exists(), "temp directory should exist");
        assert!(dir.path().is_dir(), "should be a directory");
    }

    #[test]
    fn test_dir_join_stays_inside() {
        let dir = TestDir::new();
        let subpath = dir.join("state/history.redb");
        assert!(subpath.starts_with(dir.path()));
        assert!(subpath.ends_with("state/history.redb"));
    }

    #[test]
    fn test_dir_cleanup_on_drop() {
        let path = {
            let dir = TestDir::new();
            let p = dir.path().to_path_buf();
            std::fs::write(p.join("file.txt"), "data").expect("write file");
            p
        };
        assert!(!path.exists(), "temp directory should be cleaned up on drop");
    }

    // ============================================
    // Tracing tests
    // ============================================

    #[test]
    fn test_init_tracing_is_reentrant() {
        init_tracing();
        init_tracing();
        tracing::debug!("subscriber installed");
    }

    // ============================================
    // Strategy tests
    // ============================================

    #[test]
    fn test_arb_digests_are_distinct() {
        let mut runner = TestRunner::deterministic();
        let digests = strategies::arb_distinct_digests(1..16).new_tree(&mut runner).unwrap().current();
        let mut sorted = digests.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), digests.len());
    }

    #[test]
    fn test_arb_log_batch_is_contiguous() {
        let mut runner = TestRunner::deterministic();
        let batch = strategies::arb_log_batch(8).new_tree(&mut runner).unwrap().current();
        for pair in batch.windows(2) {
            assert_eq!(pair[0].0 + 1, pair[1].0);
        }
    }
}
