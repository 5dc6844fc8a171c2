//! In-process notice bus.
//!
//! Local components (UI shells, observability, a second core instance in
//! the same process) learn about sync progress and scope violations
//! through explicit message passing instead of watching storage for
//! changes.

use crate::agent::DrainSummary;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tally_engine::BranchViolation;
use tokio::sync::mpsc;

/// Identifier of one bus subscription.
pub type SubscriberId = u64;

/// Notices published by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A cross-branch access attempt was detected
    BranchAccessViolation(BranchViolation),
    /// One drain pass finished
    SyncCompleted(DrainSummary),
    /// An operation exhausted its retries and needs an operator
    OperationFailed { op_id: String, error: String },
    /// An operation was parked for manual conflict resolution
    ConflictDetected { op_id: String },
    /// Connectivity transitions
    Online,
    Offline,
}

/// Fan-out registry of notice subscribers.
///
/// Thread-safe and shared across the runtime via `Arc`.
#[derive(Debug, Default)]
pub struct NoticeBus {
    subscribers: DashMap<SubscriberId, mpsc::UnboundedSender<Notice>>,
    next_id: AtomicU64,
}

impl NoticeBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns its id and the receiving end.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Notice>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Drop a subscription.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.remove(&id);
    }

    /// Deliver a notice to every live subscriber. Dead subscribers are
    /// removed. Returns the number of deliveries.
    pub fn publish(&self, notice: Notice) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().send(notice.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }

        delivered
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
