//! Branch isolation for the shared store.
//!
//! Branches (physical store locations) share one persistent substrate but
//! must never see each other's data. [`BranchScope`] makes the isolation
//! structural: every read and write goes through [`BranchScope::execute_scoped`],
//! which yields a store view that prefixes keys with the active branch,
//! stamps written records, and filters reads. A read that surfaces a record
//! tagged with a foreign branch raises a violation signal instead of
//! silently returning nothing, so observers can tell "no data" apart from
//! "wrong scope requested".

use crate::{error::Result, BranchId, Error, Store, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Default audit retention window: 30 days in milliseconds.
pub const DEFAULT_AUDIT_RETENTION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// A detected cross-branch access attempt.
///
/// Signaled, never thrown: a violation must not crash a terminal
/// mid-transaction. It is a security/audit signal for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchViolation {
    pub active_branch: BranchId,
    pub requested_branch: BranchId,
    pub operation: String,
    pub timestamp: Timestamp,
}

/// Hook invoked on every detected violation.
pub type ViolationHook = Arc<dyn Fn(&BranchViolation) + Send + Sync>;

/// One audit record per scoped operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub branch_id: BranchId,
    pub operation: String,
    pub timestamp: Timestamp,
}

/// Read/write filter enforcing branch isolation over the shared store.
pub struct BranchScope {
    store: Arc<dyn Store>,
    active: RwLock<Option<BranchId>>,
    hook: RwLock<Option<ViolationHook>>,
    audit_retention_ms: u64,
    audit_seq: AtomicU64,
}

impl BranchScope {
    /// Create a scope over the shared store with the default audit retention.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            active: RwLock::new(None),
            hook: RwLock::new(None),
            audit_retention_ms: DEFAULT_AUDIT_RETENTION_MS,
            audit_seq: AtomicU64::new(0),
        }
    }

    /// Override the audit retention window.
    pub fn with_audit_retention(mut self, retention_ms: u64) -> Self {
        self.audit_retention_ms = retention_ms;
        self
    }

    /// Install the violation hook. The runtime wires this to its notice bus.
    pub fn set_violation_hook(&self, hook: ViolationHook) {
        if let Ok(mut slot) = self.hook.write() {
            *slot = Some(hook);
        }
    }

    /// Switch the implicit scope for all subsequent operations.
    pub fn set_active_branch(&self, branch_id: &str) -> Result<()> {
        if branch_id.is_empty() {
            return Err(Error::InvalidBranch(branch_id.to_string()));
        }
        let mut active = self
            .active
            .write()
            .map_err(|_| Error::Storage("scope lock poisoned".into()))?;
        *active = Some(branch_id.to_string());
        Ok(())
    }

    /// The currently active branch.
    pub fn active_branch(&self) -> Result<BranchId> {
        self.active
            .read()
            .map_err(|_| Error::Storage("scope lock poisoned".into()))?
            .clone()
            .ok_or(Error::NoActiveBranch)
    }

    /// Run `f` against a store view scoped to the active branch.
    ///
    /// This is the only sanctioned way business logic touches persisted
    /// state. Each successful operation appends an audit record keyed by
    /// branch and timestamp.
    pub fn execute_scoped<T, F>(&self, operation: &str, now: Timestamp, f: F) -> Result<T>
    where
        F: FnOnce(&ScopedStore<'_>) -> Result<T>,
    {
        let branch = self.active_branch()?;
        let hook = self
            .hook
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().cloned());

        let scoped = ScopedStore {
            store: self.store.as_ref(),
            branch: branch.clone(),
            operation: operation.to_string(),
            hook,
            now,
        };

        let result = f(&scoped)?;

        let seq = self.audit_seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("auditLog:{branch}/{now:013}-{seq:06}");
        self.store.put(
            &key,
            json!({
                "branchId": branch,
                "operation": operation,
                "timestamp": now,
            }),
        )?;

        Ok(result)
    }

    /// Audit records for a branch, newest first.
    pub fn audit_log(&self, branch_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let prefix = format!("auditLog:{branch_id}/");
        let mut records: Vec<AuditRecord> = self
            .store
            .scan(&prefix)?
            .into_iter()
            .filter_map(|(_, value)| serde_json::from_value(value).ok())
            .collect();
        records.sort_by(|a: &AuditRecord, b: &AuditRecord| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    /// Delete audit records older than the retention window.
    ///
    /// Unparsable entries are removed as well. Returns the number of
    /// deleted records.
    pub fn prune_audit(&self, branch_id: &str, now: Timestamp) -> Result<usize> {
        let cutoff = now.saturating_sub(self.audit_retention_ms);
        let prefix = format!("auditLog:{branch_id}/");
        let mut pruned = 0;
        for (key, value) in self.store.scan(&prefix)? {
            let stale = match serde_json::from_value::<AuditRecord>(value) {
                Ok(record) => record.timestamp < cutoff,
                Err(_) => true,
            };
            if stale {
                self.store.delete(&key)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

/// Store view bound to one branch for the duration of a scoped operation.
pub struct ScopedStore<'a> {
    store: &'a dyn Store,
    branch: BranchId,
    operation: String,
    hook: Option<ViolationHook>,
    now: Timestamp,
}

impl ScopedStore<'_> {
    /// The branch this view is bound to.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}/{}", self.branch, key)
    }

    fn signal(&self, requested: &str) {
        let violation = BranchViolation {
            active_branch: self.branch.clone(),
            requested_branch: requested.to_string(),
            operation: self.operation.clone(),
            timestamp: self.now,
        };
        if let Some(hook) = &self.hook {
            hook(&violation);
        }
    }

    fn tagged_branch(value: &Value) -> Option<&str> {
        value.get("branchId").and_then(Value::as_str)
    }

    /// Read a value; a record tagged with a foreign branch signals a
    /// violation and reads as absent.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.store.get(&self.scoped_key(key))? {
            Some(value) => {
                if let Some(tagged) = Self::tagged_branch(&value) {
                    if tagged != self.branch {
                        self.signal(tagged);
                        return Ok(None);
                    }
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read and deserialize a record.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Corrupt {
                    key: self.scoped_key(key),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Write a value, stamping the active branch into object payloads.
    ///
    /// A value already tagged with a different branch is refused: the
    /// violation is signaled and the write fails, because silently
    /// persisting it would breach isolation.
    pub fn put(&self, key: &str, mut value: Value) -> Result<()> {
        if let Some(object) = value.as_object_mut() {
            match object.get("branchId").and_then(Value::as_str) {
                Some(tagged) if tagged != self.branch => {
                    let tagged = tagged.to_string();
                    self.signal(&tagged);
                    return Err(Error::BranchMismatch {
                        active: self.branch.clone(),
                        requested: tagged,
                    });
                }
                Some(_) => {}
                None => {
                    object.insert("branchId".to_string(), json!(self.branch));
                }
            }
        }
        self.store.put(&self.scoped_key(key), value)
    }

    /// Serialize and write a record.
    pub fn put_record<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
        self.put(key, value)
    }

    /// Delete a key within the branch.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.scoped_key(key))
    }

    /// Scan entries under a prefix within the branch, keys stripped of the
    /// branch segment. Foreign-tagged records are signaled and skipped.
    pub fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let scoped_prefix = self.scoped_key(prefix);
        let strip = format!("{}/", self.branch);
        let mut entries = Vec::new();
        for (key, value) in self.store.scan(&scoped_prefix)? {
            if let Some(tagged) = Self::tagged_branch(&value) {
                if tagged != self.branch {
                    self.signal(tagged);
                    continue;
                }
            }
            let key = key.strip_prefix(&strip).map(str::to_string).unwrap_or(key);
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Scan and deserialize records under a prefix.
    pub fn scan_as<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for (key, value) in self.scan(prefix)? {
            let record = serde_json::from_value(value).map_err(|e| Error::Corrupt {
                key: self.scoped_key(&key),
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::sync::Mutex;

    fn scope() -> BranchScope {
        BranchScope::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn empty_branch_id_rejected() {
        let scope = scope();
        assert!(matches!(
            scope.set_active_branch(""),
            Err(Error::InvalidBranch(_))
        ));
    }

    #[test]
    fn no_active_branch_is_an_error() {
        let scope = scope();
        let result = scope.execute_scoped("test", 1000, |_| Ok(()));
        assert!(matches!(result, Err(Error::NoActiveBranch)));
    }

    #[test]
    fn writes_are_stamped_and_prefixed() {
        let store = Arc::new(MemoryStore::new());
        let scope = BranchScope::new(store.clone());
        scope.set_active_branch("cairo-1").unwrap();

        scope
            .execute_scoped("test.write", 1000, |s| s.put("objects:product/7", json!({"price": 10})))
            .unwrap();

        let raw = store.get("cairo-1/objects:product/7").unwrap().unwrap();
        assert_eq!(raw["branchId"], "cairo-1");
    }

    #[test]
    fn reads_are_branch_filtered() {
        let store = Arc::new(MemoryStore::new());
        let scope = BranchScope::new(store.clone());

        scope.set_active_branch("giza-2").unwrap();
        scope
            .execute_scoped("test.write", 1000, |s| s.put("staff/s1", json!({"name": "Amira"})))
            .unwrap();

        scope.set_active_branch("cairo-1").unwrap();
        let read = scope
            .execute_scoped("test.read", 2000, |s| s.get("staff/s1"))
            .unwrap();
        assert!(read.is_none());

        scope.set_active_branch("giza-2").unwrap();
        let read = scope
            .execute_scoped("test.read", 3000, |s| s.get("staff/s1"))
            .unwrap();
        assert!(read.is_some());
    }

    #[test]
    fn foreign_tag_signals_violation_and_reads_absent() {
        let store = Arc::new(MemoryStore::new());
        // Simulate corrupted/mis-tagged data under cairo-1's keyspace
        store
            .put("cairo-1/staff/s1", json!({"branchId": "giza-2", "name": "X"}))
            .unwrap();

        let scope = BranchScope::new(store);
        scope.set_active_branch("cairo-1").unwrap();

        let seen: Arc<Mutex<Vec<BranchViolation>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        scope.set_violation_hook(Arc::new(move |v| {
            sink.lock().unwrap().push(v.clone());
        }));

        let read = scope
            .execute_scoped("staff.read", 1000, |s| s.get("staff/s1"))
            .unwrap();
        assert!(read.is_none());

        let violations = seen.lock().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].active_branch, "cairo-1");
        assert_eq!(violations[0].requested_branch, "giza-2");
        assert_eq!(violations[0].operation, "staff.read");
    }

    #[test]
    fn mis_tagged_write_is_refused() {
        let scope = scope();
        scope.set_active_branch("cairo-1").unwrap();

        let result = scope.execute_scoped("test.write", 1000, |s| {
            s.put("staff/s1", json!({"branchId": "giza-2"}))
        });
        assert!(matches!(result, Err(Error::BranchMismatch { .. })));
    }

    #[test]
    fn scoped_operations_are_audited() {
        let scope = scope();
        scope.set_active_branch("cairo-1").unwrap();

        scope
            .execute_scoped("ledger.append", 1000, |_| Ok(()))
            .unwrap();
        scope
            .execute_scoped("objects.upsert", 2000, |_| Ok(()))
            .unwrap();

        let log = scope.audit_log("cairo-1", 10).unwrap();
        assert_eq!(log.len(), 2);
        // Newest first
        assert_eq!(log[0].operation, "objects.upsert");
        assert_eq!(log[1].operation, "ledger.append");
    }

    #[test]
    fn failed_operations_are_not_audited() {
        let scope = scope();
        scope.set_active_branch("cairo-1").unwrap();

        let _ = scope.execute_scoped::<(), _>("bad.op", 1000, |_| {
            Err(Error::Storage("boom".into()))
        });

        assert!(scope.audit_log("cairo-1", 10).unwrap().is_empty());
    }

    #[test]
    fn audit_pruning_respects_retention() {
        let scope = BranchScope::new(Arc::new(MemoryStore::new())).with_audit_retention(1000);
        scope.set_active_branch("cairo-1").unwrap();

        scope.execute_scoped("old.op", 100, |_| Ok(())).unwrap();
        scope.execute_scoped("new.op", 5000, |_| Ok(())).unwrap();

        let pruned = scope.prune_audit("cairo-1", 5500).unwrap();
        assert_eq!(pruned, 1);

        let log = scope.audit_log("cairo-1", 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, "new.op");
    }

    #[test]
    fn scan_strips_branch_prefix() {
        let scope = scope();
        scope.set_active_branch("cairo-1").unwrap();

        scope
            .execute_scoped("test.write", 1000, |s| {
                s.put("objects:product/1", json!({"price": 1}))?;
                s.put("objects:product/2", json!({"price": 2}))
            })
            .unwrap();

        let entries = scope
            .execute_scoped("test.scan", 2000, |s| s.scan("objects:product/"))
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "objects:product/1");
    }
}
