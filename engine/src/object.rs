//! Mutable shared entities tracked by version.
//!
//! Ledger events are append-only; prices, stock records, and staff records
//! are not. Those live here as [`VersionedObject`]s: last-write-wins with
//! detection, arbitrated by [`crate::resolve`] when a remote copy has moved
//! ahead.

use crate::{
    error::Result, queue, BranchScope, EntityType, ObjectId, SyncEntity, SyncOp, SyncOpStatus,
    SyncOperation, Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A mutable entity with version and last-modifier metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedObject {
    pub id: ObjectId,
    pub entity_type: EntityType,
    /// Monotonic, starts at 1, +1 per local mutation, never reused
    pub version: Version,
    /// Device-local wall clock of the last mutation (milliseconds)
    pub last_modified: Timestamp,
    /// Who last touched it, as `actor@device`
    pub modified_by: String,
    pub branch_id: crate::BranchId,
    /// Entity-specific payload
    pub data: Value,
}

fn object_key(entity_type: &str, id: &str) -> String {
    format!("objects:{entity_type}/{id}")
}

/// Branch-scoped store for versioned objects.
pub struct VersionedObjectStore {
    scope: Arc<BranchScope>,
}

impl VersionedObjectStore {
    /// Create a store over the shared branch scope.
    pub fn new(scope: Arc<BranchScope>) -> Self {
        Self { scope }
    }

    /// Insert or update an object and enqueue it for sync.
    ///
    /// Reads the existing version (0 if absent), increments it, stamps the
    /// modifier metadata, and persists object and sync operation in one
    /// scoped write. Never touches the network; durability before return.
    pub fn upsert(
        &self,
        entity_type: &str,
        id: &str,
        data: Value,
        modified_by: &str,
        op_id: impl Into<queue::OperationId>,
        now: Timestamp,
    ) -> Result<VersionedObject> {
        let op_id = op_id.into();
        self.scope.execute_scoped("objects.upsert", now, |store| {
            let key = object_key(entity_type, id);
            let existing: Option<VersionedObject> = store.get_as(&key)?;
            let version = existing.as_ref().map(|o| o.version).unwrap_or(0) + 1;

            let object = VersionedObject {
                id: id.to_string(),
                entity_type: entity_type.to_string(),
                version,
                last_modified: now,
                modified_by: modified_by.to_string(),
                branch_id: store.branch().to_string(),
                data,
            };
            store.put_record(&key, &object)?;

            let op = SyncOperation {
                id: op_id,
                op: if version == 1 {
                    SyncOp::Create
                } else {
                    SyncOp::Update
                },
                entity_type: entity_type.to_string(),
                entity: SyncEntity::Object(object.clone()),
                status: SyncOpStatus::Pending,
                retry_count: 0,
                created_at: now,
                branch_id: store.branch().to_string(),
                error: None,
            };
            queue::write_in(store, &op)?;

            Ok(object)
        })
    }

    /// Local, branch-scoped read of one object.
    pub fn get(&self, entity_type: &str, id: &str, now: Timestamp) -> Result<Option<VersionedObject>> {
        self.scope.execute_scoped("objects.read", now, |store| {
            store.get_as(&object_key(entity_type, id))
        })
    }

    /// Local, branch-scoped read of all objects of one type.
    pub fn list(&self, entity_type: &str, now: Timestamp) -> Result<Vec<VersionedObject>> {
        let prefix = format!("objects:{entity_type}/");
        self.scope
            .execute_scoped("objects.read", now, |store| store.scan_as(&prefix))
    }

    /// Adopt a remote copy after conflict resolution chose it.
    ///
    /// Overwrites the local entry with the remote's version and metadata
    /// verbatim (no version increment: this is convergence, not a local
    /// mutation). The branch tag is rewritten to the active branch.
    pub fn apply_remote(&self, mut remote: VersionedObject, now: Timestamp) -> Result<VersionedObject> {
        self.scope
            .execute_scoped("objects.applyRemote", now, |store| {
                remote.branch_id = store.branch().to_string();
                store.put_record(&object_key(&remote.entity_type, &remote.id), &remote)?;
                Ok(remote)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, SyncQueue};
    use serde_json::json;

    fn fixture() -> (VersionedObjectStore, SyncQueue) {
        let scope = Arc::new(BranchScope::new(Arc::new(MemoryStore::new())));
        scope.set_active_branch("cairo-1").unwrap();
        (
            VersionedObjectStore::new(scope.clone()),
            SyncQueue::new(scope),
        )
    }

    #[test]
    fn versions_increase_by_one_per_upsert() {
        let (objects, _) = fixture();

        let v1 = objects
            .upsert("product", "product:7", json!({"price": 10}), "staff-1@term-1", "op-1", 1000)
            .unwrap();
        assert_eq!(v1.version, 1);

        let v2 = objects
            .upsert("product", "product:7", json!({"price": 12}), "staff-1@term-1", "op-2", 2000)
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.last_modified, 2000);
        assert_eq!(v2.data, json!({"price": 12}));
    }

    #[test]
    fn upsert_enqueues_exactly_one_operation() {
        let (objects, queue) = fixture();

        objects
            .upsert("product", "product:7", json!({"price": 10}), "staff-1@term-1", "op-1", 1000)
            .unwrap();

        let pending = queue.pending(2000).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, SyncOp::Create);
        match &pending[0].entity {
            SyncEntity::Object(object) => assert_eq!(object.version, 1),
            other => panic!("unexpected entity: {other:?}"),
        }

        // Second mutation tracks as an update
        objects
            .upsert("product", "product:7", json!({"price": 12}), "staff-1@term-1", "op-2", 2000)
            .unwrap();
        let pending = queue.pending(3000).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].op, SyncOp::Update);
    }

    #[test]
    fn get_and_list_are_local_reads() {
        let (objects, _) = fixture();

        objects
            .upsert("product", "p1", json!({"price": 1}), "system", "op-1", 1000)
            .unwrap();
        objects
            .upsert("product", "p2", json!({"price": 2}), "system", "op-2", 2000)
            .unwrap();
        objects
            .upsert("staff", "s1", json!({"name": "Amira"}), "system", "op-3", 3000)
            .unwrap();

        assert!(objects.get("product", "p1", 4000).unwrap().is_some());
        assert!(objects.get("product", "missing", 4000).unwrap().is_none());

        let products = objects.list("product", 4000).unwrap();
        assert_eq!(products.len(), 2);

        let staff = objects.list("staff", 4000).unwrap();
        assert_eq!(staff.len(), 1);
    }

    #[test]
    fn apply_remote_adopts_version_verbatim() {
        let (objects, queue) = fixture();

        objects
            .upsert("product", "product:7", json!({"price": 10}), "staff-1@term-1", "op-1", 1000)
            .unwrap();

        let remote = VersionedObject {
            id: "product:7".to_string(),
            entity_type: "product".to_string(),
            version: 5,
            last_modified: 9000,
            modified_by: "staff-9@term-2".to_string(),
            branch_id: "cairo-1".to_string(),
            data: json!({"price": 15}),
        };
        objects.apply_remote(remote, 9500).unwrap();

        let local = objects.get("product", "product:7", 9600).unwrap().unwrap();
        assert_eq!(local.version, 5);
        assert_eq!(local.data, json!({"price": 15}));
        assert_eq!(local.modified_by, "staff-9@term-2");

        // Convergence does not enqueue a new outbound operation
        assert_eq!(queue.pending(9700).unwrap().len(), 1);
    }
}
