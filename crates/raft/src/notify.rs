//! Outbound commitment notifications.
//!
//! Every successful add publishes one [`CommitmentNotification`], in apply
//! order, to a bounded channel read by an external publisher. After a crash
//! and replay the same notification may be sent again, so consumers must
//! tolerate re-delivery.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};
use vellum_types::{Hash, MetricsSink, config::NotifyPolicy};

/// One applied event, as published to the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitmentNotification {
    /// History tree commitment after the add.
    pub history_digest: Hash,
    /// Peer index digest after the add.
    pub hyper_digest: Hash,
    /// Version the event was added at.
    pub version: u64,
    /// Digest of the added event.
    pub event_digest: Hash,
}

/// Receiving half of the commitment channel.
pub type CommitmentReceiver = mpsc::Receiver<CommitmentNotification>;

/// Sending half of the commitment channel, owned by the state machine.
#[derive(Debug)]
pub struct CommitmentSender {
    tx: mpsc::Sender<CommitmentNotification>,
    policy: NotifyPolicy,
    metrics: Arc<dyn MetricsSink>,
    closed_logged: AtomicBool,
    runtime_logged: AtomicBool,
}

/// Creates a bounded commitment channel.
///
/// With [`NotifyPolicy::Block`], `publish` waits for room. Blocking is
/// impossible inside an async runtime, so there it degrades to the
/// `DropNewest` behavior; run `apply` on a blocking thread to keep
/// backpressure.
pub fn commitment_channel(
    capacity: usize,
    policy: NotifyPolicy,
    metrics: Arc<dyn MetricsSink>,
) -> (CommitmentSender, CommitmentReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = CommitmentSender {
        tx,
        policy,
        metrics,
        closed_logged: AtomicBool::new(false),
        runtime_logged: AtomicBool::new(false),
    };
    (sender, rx)
}

impl CommitmentSender {
    /// Publishes one notification according to the channel policy.
    ///
    /// Never fails: a full channel under `DropNewest` drops and counts the
    /// notification, and a closed receiver is logged once and ignored.
    pub fn publish(&self, notification: CommitmentNotification) {
        let delivered = match self.policy {
            NotifyPolicy::Block if Handle::try_current().is_err() => {
                self.tx.blocking_send(notification).is_ok()
            },
            NotifyPolicy::Block => {
                if !self.runtime_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "Publishing from inside an async runtime; full channel drops notifications"
                    );
                }
                self.try_publish(notification)
            },
            NotifyPolicy::DropNewest => self.try_publish(notification),
        };

        if !delivered && !self.closed_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!("Commitment receiver dropped; notifications are discarded");
        }
    }

    /// Sends without waiting. Returns `false` only if the receiver is gone.
    fn try_publish(&self, notification: CommitmentNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                self.metrics.record_notification_dropped();
                tracing::debug!(version = dropped.version, "Notification channel full");
                true
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
