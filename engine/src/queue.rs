//! The outbound sync queue.
//!
//! Every local mutation that must reach the backend is tracked by exactly
//! one [`SyncOperation`]. Operations are retried until synced, marked
//! failed after a bounded retry count, or parked as conflicts awaiting
//! manual disposition. They are never silently dropped.

use crate::{
    error::Result, BranchId, BranchScope, EntityType, Error, EventHash, ScopedStore, Timestamp,
    VersionedObject,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifier correlating a local operation with backend acks.
pub type OperationId = String;

/// Default retry bound before an operation is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What kind of mutation the operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

/// Sync lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpStatus {
    Pending,
    Synced,
    Failed,
    Conflict,
}

/// The tracked entity: a versioned object snapshot or a ledger event
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SyncEntity {
    Object(VersionedObject),
    Event { hash: EventHash },
}

/// Manual disposition for an operation parked in `Conflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualChoice {
    KeepLocal,
    KeepRemote,
}

/// One tracked outbound mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub id: OperationId,
    pub op: SyncOp,
    pub entity_type: EntityType,
    pub entity: SyncEntity,
    pub status: SyncOpStatus,
    pub retry_count: u32,
    pub created_at: Timestamp,
    pub branch_id: BranchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn op_key(id: &str) -> String {
    format!("syncQueue/{id}")
}

/// Write an operation within an already-open scope. Used by the object
/// store so upsert and enqueue land in the same scoped operation.
pub(crate) fn write_in(store: &ScopedStore<'_>, op: &SyncOperation) -> Result<()> {
    store.put_record(&op_key(&op.id), op)
}

/// Branch-scoped view of the outbound queue.
pub struct SyncQueue {
    scope: Arc<BranchScope>,
    max_retries: u32,
}

impl SyncQueue {
    /// Create a queue over the scope with the default retry bound.
    pub fn new(scope: Arc<BranchScope>) -> Self {
        Self {
            scope,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The configured retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Track a new mutation.
    pub fn enqueue(&self, op: SyncOperation, now: Timestamp) -> Result<()> {
        self.scope
            .execute_scoped("sync.enqueue", now, |store| write_in(store, &op))
    }

    /// Fetch one operation by id.
    pub fn get(&self, op_id: &str, now: Timestamp) -> Result<Option<SyncOperation>> {
        self.scope
            .execute_scoped("sync.read", now, |store| store.get_as(&op_key(op_id)))
    }

    fn by_status(&self, status: SyncOpStatus, now: Timestamp) -> Result<Vec<SyncOperation>> {
        let mut ops: Vec<SyncOperation> = self
            .scope
            .execute_scoped("sync.read", now, |store| store.scan_as("syncQueue/"))?
            .into_iter()
            .filter(|op: &SyncOperation| op.status == status)
            .collect();
        ops.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(ops)
    }

    /// Operations awaiting a drain, oldest first.
    pub fn pending(&self, now: Timestamp) -> Result<Vec<SyncOperation>> {
        self.by_status(SyncOpStatus::Pending, now)
    }

    /// Operations parked for manual conflict resolution.
    pub fn conflicts(&self, now: Timestamp) -> Result<Vec<SyncOperation>> {
        self.by_status(SyncOpStatus::Conflict, now)
    }

    /// Operations that exhausted their retries.
    pub fn failed(&self, now: Timestamp) -> Result<Vec<SyncOperation>> {
        self.by_status(SyncOpStatus::Failed, now)
    }

    fn update<F>(&self, op_id: &str, now: Timestamp, f: F) -> Result<SyncOperation>
    where
        F: FnOnce(&mut SyncOperation),
    {
        self.scope.execute_scoped("sync.update", now, |store| {
            let key = op_key(op_id);
            let mut op: SyncOperation = store
                .get_as(&key)?
                .ok_or_else(|| Error::OperationNotFound(op_id.to_string()))?;
            f(&mut op);
            store.put_record(&key, &op)?;
            Ok(op)
        })
    }

    /// Transition an operation to `Synced`.
    pub fn mark_synced(&self, op_id: &str, now: Timestamp) -> Result<SyncOperation> {
        self.update(op_id, now, |op| {
            op.status = SyncOpStatus::Synced;
            op.error = None;
        })
    }

    /// Park an operation for manual resolution.
    pub fn mark_conflict(&self, op_id: &str, now: Timestamp) -> Result<SyncOperation> {
        self.update(op_id, now, |op| {
            op.status = SyncOpStatus::Conflict;
        })
    }

    /// Record a failed attempt. The operation stays `Pending` until the
    /// retry bound is reached, then flips to `Failed` for an operator to
    /// pick up.
    pub fn record_failure(
        &self,
        op_id: &str,
        error: &str,
        now: Timestamp,
    ) -> Result<SyncOperation> {
        let max_retries = self.max_retries;
        self.update(op_id, now, |op| {
            op.retry_count += 1;
            op.error = Some(error.to_string());
            if op.retry_count >= max_retries {
                op.status = SyncOpStatus::Failed;
            }
        })
    }

    /// Finish a parked conflict with an explicit human decision.
    ///
    /// `KeepLocal` re-queues the operation for upload; `KeepRemote` closes
    /// it as synced (the caller applies the remote copy locally).
    pub fn resolve_manually(
        &self,
        op_id: &str,
        choice: ManualChoice,
        now: Timestamp,
    ) -> Result<SyncOperation> {
        let current = self
            .get(op_id, now)?
            .ok_or_else(|| Error::OperationNotFound(op_id.to_string()))?;
        if current.status != SyncOpStatus::Conflict {
            return Err(Error::NotInConflict(op_id.to_string()));
        }
        self.update(op_id, now, |op| {
            op.status = match choice {
                ManualChoice::KeepLocal => SyncOpStatus::Pending,
                ManualChoice::KeepRemote => SyncOpStatus::Synced,
            };
            op.retry_count = 0;
            op.error = None;
        })
    }
}
