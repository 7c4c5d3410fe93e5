//! Injected metrics sink.
//!
//! Components never reach into a process-wide registry on their own: each
//! one receives an `Arc<dyn MetricsSink>` at construction. [`NoopMetrics`]
//! discards everything; [`RecorderMetrics`] forwards to whatever recorder
//! the host installed for the `metrics` facade.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `vellum_{subsystem}_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Histograms: `_seconds` or `_bytes` suffix
//! - Gauges: no suffix

use std::fmt;

use metrics::{counter, gauge, histogram};

// =============================================================================
// Metric Names (constants for consistency)
// =============================================================================

// State machine metrics
const FSM_APPLY_TOTAL: &str = "vellum_fsm_apply_total";
const FSM_APPLY_LATENCY: &str = "vellum_fsm_apply_latency_seconds";
const FSM_STALE_TOTAL: &str = "vellum_fsm_stale_commands_total";
const FSM_DIVERGED_TOTAL: &str = "vellum_fsm_divergence_total";
const FSM_APPLIED_INDEX: &str = "vellum_fsm_applied_index";
const TREE_SIZE: &str = "vellum_history_tree_size";

// Notification metrics
const NOTIFY_DROPPED_TOTAL: &str = "vellum_notify_dropped_total";

// Snapshot metrics
const SNAPSHOTS_TOTAL: &str = "vellum_snapshots_total";
const SNAPSHOT_SIZE_BYTES: &str = "vellum_snapshot_size_bytes";
const SNAPSHOT_LATENCY: &str = "vellum_snapshot_latency_seconds";
const RESTORES_TOTAL: &str = "vellum_restores_total";
const RESTORE_LATENCY: &str = "vellum_restore_latency_seconds";

// Log engine metrics
const LOG_WRITES_TOTAL: &str = "vellum_log_writes_total";
const LOG_WRITE_ENTRIES: &str = "vellum_log_write_entries";
const LOG_WRITE_LATENCY: &str = "vellum_log_write_latency_seconds";
const LOG_DELETED_TOTAL: &str = "vellum_log_deleted_entries_total";

/// Destination for operational measurements.
///
/// Every method has an empty default body so sinks only override what they
/// care about.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Records one `apply` call for a command kind.
    fn record_apply(&self, _kind: &'static str, _success: bool, _latency_secs: f64) {}

    /// Records a command rejected as already applied.
    fn record_stale_command(&self) {}

    /// Records a fatal divergence.
    fn record_divergence(&self) {}

    /// Sets the last applied log index.
    fn set_applied_index(&self, _index: u64) {}

    /// Sets the number of events in the history tree.
    fn set_tree_size(&self, _size: u64) {}

    /// Records a commitment notification dropped because the channel was full.
    fn record_notification_dropped(&self) {}

    /// Records a persisted snapshot.
    fn record_snapshot(&self, _success: bool, _size_bytes: u64, _latency_secs: f64) {}

    /// Records a snapshot restore.
    fn record_restore(&self, _success: bool, _latency_secs: f64) {}

    /// Records a batch of log entries written.
    fn record_log_write(&self, _entries: usize, _latency_secs: f64) {}

    /// Records log entries removed by compaction.
    fn record_log_delete(&self, _entries: u64) {}
}

/// Sink that discards every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Sink that forwards to the `metrics` facade.
///
/// Without an installed recorder the facade is itself a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderMetrics;

#[inline]
fn status(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

impl MetricsSink for RecorderMetrics {
    fn record_apply(&self, kind: &'static str, success: bool, latency_secs: f64) {
        counter!(FSM_APPLY_TOTAL, "kind" => kind, "status" => status(success)).increment(1);
        histogram!(FSM_APPLY_LATENCY, "kind" => kind).record(latency_secs);
    }

    fn record_stale_command(&self) {
        counter!(FSM_STALE_TOTAL).increment(1);
    }

    fn record_divergence(&self) {
        counter!(FSM_DIVERGED_TOTAL).increment(1);
    }

    fn set_applied_index(&self, index: u64) {
        gauge!(FSM_APPLIED_INDEX).set(index as f64);
    }

    fn set_tree_size(&self, size: u64) {
        gauge!(TREE_SIZE).set(size as f64);
    }

    fn record_notification_dropped(&self) {
        counter!(NOTIFY_DROPPED_TOTAL).increment(1);
    }

    fn record_snapshot(&self, success: bool, size_bytes: u64, latency_secs: f64) {
        counter!(SNAPSHOTS_TOTAL, "status" => status(success)).increment(1);
        histogram!(SNAPSHOT_LATENCY).record(latency_secs);
        if success {
            histogram!(SNAPSHOT_SIZE_BYTES).record(size_bytes as f64);
        }
    }

    fn record_restore(&self, success: bool, latency_secs: f64) {
        counter!(RESTORES_TOTAL, "status" => status(success)).increment(1);
        histogram!(RESTORE_LATENCY).record(latency_secs);
    }

    fn record_log_write(&self, entries: usize, latency_secs: f64) {
        counter!(LOG_WRITES_TOTAL).increment(1);
        histogram!(LOG_WRITE_ENTRIES).record(entries as f64);
        histogram!(LOG_WRITE_LATENCY).record(latency_secs);
    }

    fn record_log_delete(&self, entries: u64) {
        counter!(LOG_DELETED_TOTAL).increment(entries);
    }
}
