//! The periodic sync drain loop.
//!
//! The agent pushes unsynced ledger events and pending object mutations to
//! the backend, arbitrates conflicts through the engine's resolver, and
//! enforces the bounded retry policy. It never blocks the append path: a
//! terminal keeps recording new events while every sync attempt fails.

use crate::bus::{Notice, NoticeBus};
use crate::clock::Clock;
use crate::error::{Result, TerminalError};
use crate::transport::{AckStatus, SyncTransport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_engine::{
    resolve, BranchScope, EventLog, ManualChoice, Resolution, SyncEntity, SyncOpStatus,
    SyncOperation, SyncQueue, VersionedObjectStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainSummary {
    /// Items acknowledged by the backend (events and operations)
    pub synced: usize,
    /// Operations that failed permanently this pass
    pub failed: usize,
    /// Operations parked for manual conflict resolution this pass
    pub conflicts: usize,
}

/// Outcome of syncing one queued operation.
enum OpOutcome {
    Synced,
    Conflict,
    Failed { error: String },
    /// Transient failure below the retry bound; stays pending.
    Retrying,
}

/// Drains the outbound queue to the backend on a timer.
pub struct SyncAgent {
    log: Arc<Mutex<EventLog>>,
    objects: Arc<VersionedObjectStore>,
    queue: Arc<SyncQueue>,
    scope: Arc<BranchScope>,
    transport: Arc<dyn SyncTransport>,
    bus: Arc<NoticeBus>,
    clock: Arc<dyn Clock>,
    device_id: String,
    interval_ms: u64,
    online: AtomicBool,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl SyncAgent {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: Arc<Mutex<EventLog>>,
        objects: Arc<VersionedObjectStore>,
        queue: Arc<SyncQueue>,
        scope: Arc<BranchScope>,
        transport: Arc<dyn SyncTransport>,
        bus: Arc<NoticeBus>,
        clock: Arc<dyn Clock>,
        device_id: String,
        interval_ms: u64,
    ) -> Self {
        Self {
            log,
            objects,
            queue,
            scope,
            transport,
            bus,
            clock,
            device_id,
            interval_ms,
            online: AtomicBool::new(true),
            task: Mutex::new(None),
        }
    }

    /// Whether the agent currently believes the backend is reachable.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flip connectivity awareness. Drains are no-ops while offline.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            tracing::info!(online, "connectivity changed");
            self.bus.publish(if online { Notice::Online } else { Notice::Offline });
        }
    }

    /// Start the periodic drain task.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.task.lock().map_err(|_| TerminalError::Poisoned)?;
        if slot.is_some() {
            return Err(TerminalError::AgentAlreadyRunning);
        }

        let (tx, mut rx) = watch::channel(false);
        let agent = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(agent.interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        // A stop mid-drain cancels the in-flight pass; any
                        // operation that was mid-upload simply stays
                        // pending, it is never marked synced speculatively.
                        tokio::select! {
                            _ = rx.changed() => break,
                            result = agent.drain_once() => {
                                if let Err(e) = result {
                                    tracing::error!(error = %e, "drain pass failed");
                                }
                            }
                        }
                    }
                }
            }
        });

        *slot = Some((tx, handle));
        Ok(())
    }

    /// Stop the drain task, cancelling any in-flight pass cleanly.
    pub async fn stop(&self) -> Result<()> {
        let entry = self
            .task
            .lock()
            .map_err(|_| TerminalError::Poisoned)?
            .take();
        if let Some((tx, handle)) = entry {
            let _ = tx.send(true);
            let _ = handle.await;
        }
        Ok(())
    }

    /// One drain pass over unsynced events and pending operations.
    ///
    /// A no-op while offline. Connection-level transport failures flip the
    /// agent offline and end the pass early; everything already persisted
    /// stays pending for the next drain.
    pub async fn drain_once(&self) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();
        if !self.is_online() {
            return Ok(summary);
        }

        let branch = self.scope.active_branch().map_err(TerminalError::Engine)?;

        // Phase 1: ledger events, in chain order.
        let events = {
            let log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
            log.unsynced_events(self.clock.now_ms())?
        };
        if !events.is_empty() {
            match self
                .transport
                .push_events(&self.device_id, &branch, &events)
                .await
            {
                Ok(acks) => {
                    for ack in acks {
                        match ack.status {
                            AckStatus::Acked => {
                                let log =
                                    self.log.lock().map_err(|_| TerminalError::Poisoned)?;
                                log.mark_synced(&ack.id, self.clock.now_ms())?;
                                summary.synced += 1;
                            }
                            AckStatus::Conflict | AckStatus::Rejected => {
                                summary.failed += 1;
                                tracing::warn!(event = %ack.id, status = ?ack.status, "event push not accepted");
                                self.bus.publish(Notice::OperationFailed {
                                    op_id: ack.id,
                                    error: ack
                                        .error
                                        .unwrap_or_else(|| "rejected by backend".to_string()),
                                });
                            }
                        }
                    }
                }
                Err(TransportError::Request(e)) => {
                    tracing::warn!(error = %e, "backend unreachable, going offline");
                    self.set_online(false);
                    return Ok(summary);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "event batch push failed, retrying next drain");
                }
            }
        }

        // Phase 2: object operations, oldest first.
        for op in self.queue.pending(self.clock.now_ms())? {
            match self.sync_one(&op).await {
                Ok(OpOutcome::Synced) => summary.synced += 1,
                Ok(OpOutcome::Conflict) => {
                    summary.conflicts += 1;
                    self.bus
                        .publish(Notice::ConflictDetected { op_id: op.id.clone() });
                }
                Ok(OpOutcome::Failed { error }) => {
                    summary.failed += 1;
                    self.bus.publish(Notice::OperationFailed {
                        op_id: op.id.clone(),
                        error,
                    });
                }
                Ok(OpOutcome::Retrying) => {}
                Err(TerminalError::Transport(TransportError::Request(e))) => {
                    tracing::warn!(error = %e, "backend unreachable, going offline");
                    self.set_online(false);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.bus.publish(Notice::SyncCompleted(summary));
        Ok(summary)
    }

    async fn sync_one(&self, op: &SyncOperation) -> Result<OpOutcome> {
        match &op.entity {
            SyncEntity::Event { hash } => {
                // Event references ride with the batch push in phase 1;
                // close the operation once its event is acknowledged.
                let acked = {
                    let log = self.log.lock().map_err(|_| TerminalError::Poisoned)?;
                    log.events(self.clock.now_ms())?
                        .iter()
                        .any(|e| &e.hash == hash && !e.is_pending())
                };
                if acked {
                    self.queue.mark_synced(&op.id, self.clock.now_ms())?;
                    Ok(OpOutcome::Synced)
                } else {
                    Ok(OpOutcome::Retrying)
                }
            }
            SyncEntity::Object(snapshot) => {
                // Arbitrate against the freshest local copy, not the
                // snapshot taken at enqueue time.
                let local = self
                    .objects
                    .get(&op.entity_type, &snapshot.id, self.clock.now_ms())?
                    .unwrap_or_else(|| snapshot.clone());

                match self
                    .transport
                    .fetch_object(&op.entity_type, &snapshot.id)
                    .await
                {
                    Ok(Some(remote)) => match resolve(&local, &remote) {
                        Resolution::KeepLocal => self.upload(op).await,
                        Resolution::KeepRemote => {
                            self.objects.apply_remote(remote, self.clock.now_ms())?;
                            self.queue.mark_synced(&op.id, self.clock.now_ms())?;
                            Ok(OpOutcome::Synced)
                        }
                        Resolution::Conflict => {
                            self.queue.mark_conflict(&op.id, self.clock.now_ms())?;
                            Ok(OpOutcome::Conflict)
                        }
                    },
                    Ok(None) => self.upload(op).await,
                    Err(TransportError::Request(e)) => {
                        Err(TransportError::Request(e).into())
                    }
                    Err(e) => self.note_failure(op, &e.to_string()),
                }
            }
        }
    }

    async fn upload(&self, op: &SyncOperation) -> Result<OpOutcome> {
        match self.transport.push_object(op).await {
            Ok(ack) => match ack.status {
                AckStatus::Acked => {
                    self.queue.mark_synced(&op.id, self.clock.now_ms())?;
                    Ok(OpOutcome::Synced)
                }
                AckStatus::Conflict => {
                    self.queue.mark_conflict(&op.id, self.clock.now_ms())?;
                    Ok(OpOutcome::Conflict)
                }
                AckStatus::Rejected => {
                    self.note_failure(op, ack.error.as_deref().unwrap_or("rejected by backend"))
                }
            },
            Err(TransportError::Request(e)) => Err(TransportError::Request(e).into()),
            Err(e) => self.note_failure(op, &e.to_string()),
        }
    }

    fn note_failure(&self, op: &SyncOperation, error: &str) -> Result<OpOutcome> {
        let updated = self
            .queue
            .record_failure(&op.id, error, self.clock.now_ms())?;
        if updated.status == SyncOpStatus::Failed {
            tracing::error!(op_id = %op.id, error = %error, "sync operation failed permanently");
            Ok(OpOutcome::Failed {
                error: error.to_string(),
            })
        } else {
            tracing::debug!(op_id = %op.id, retry = updated.retry_count, "sync attempt failed, retrying");
            Ok(OpOutcome::Retrying)
        }
    }

    /// Finish a parked conflict with an explicit human decision.
    ///
    /// `KeepRemote` fetches and adopts the backend's copy before closing
    /// the operation. `KeepLocal` re-queues the operation and pushes the
    /// local copy right away; if that push fails transiently the operation
    /// stays pending for the regular drain.
    pub async fn resolve_manually(
        &self,
        op_id: &str,
        choice: ManualChoice,
    ) -> Result<SyncOperation> {
        let now = self.clock.now_ms();
        let op = self
            .queue
            .get(op_id, now)?
            .ok_or_else(|| tally_engine::Error::OperationNotFound(op_id.to_string()))
            .map_err(TerminalError::Engine)?;

        if choice == ManualChoice::KeepRemote {
            if let SyncEntity::Object(local) = &op.entity {
                if let Some(remote) = self
                    .transport
                    .fetch_object(&op.entity_type, &local.id)
                    .await?
                {
                    self.objects.apply_remote(remote, self.clock.now_ms())?;
                }
            }
        }

        let resolved = self
            .queue
            .resolve_manually(op_id, choice, self.clock.now_ms())?;
        tracing::info!(op_id = %op_id, ?choice, "conflict resolved manually");

        if choice == ManualChoice::KeepLocal {
            let _ = self.upload(&resolved).await?;
            let latest = self
                .queue
                .get(op_id, self.clock.now_ms())?
                .unwrap_or(resolved);
            return Ok(latest);
        }

        Ok(resolved)
    }
}
