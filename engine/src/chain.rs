//! The append-only, hash-chained event log.
//!
//! One [`EventLog`] instance exists per terminal (device). Appends are
//! synchronous and durable: the in-memory chain head only advances after
//! the store accepted the write, so a crash mid-append can never leave the
//! head pointing at an event that was not persisted.

use crate::{
    error::Result, ActorId, BranchScope, DeviceId, Error, EventHash, EventPayload, LedgerEvent,
    Timestamp,
};
use std::sync::Arc;

/// Width of the zero-padded append sequence in event keys. Lexicographic
/// scans over `events/` return chain order because of this padding.
const SEQ_KEY_WIDTH: usize = 20;

fn event_key(sequence: u64) -> String {
    format!("events/{sequence:0width$}", width = SEQ_KEY_WIDTH)
}

fn parse_event_key(key: &str) -> Option<u64> {
    key.rsplit('/').next()?.parse().ok()
}

/// Appends locally generated business events into a hash-chained,
/// append-only sequence.
pub struct EventLog {
    device_id: DeviceId,
    scope: Arc<BranchScope>,
    head: Option<EventHash>,
    next_sequence: u64,
    appended: bool,
}

impl EventLog {
    /// Create a fresh log for a device. Use [`EventLog::set_last_event_hash`]
    /// or [`EventLog::resume_from_storage`] before the first append when
    /// resuming an existing chain.
    pub fn new(device_id: impl Into<DeviceId>, scope: Arc<BranchScope>) -> Self {
        Self {
            device_id: device_id.into(),
            scope,
            head: None,
            next_sequence: 0,
            appended: false,
        }
    }

    /// The device this log belongs to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The hash of the most recently appended event, if any.
    pub fn head(&self) -> Option<&EventHash> {
        self.head.as_ref()
    }

    /// Rehydration hook: resume the chain after a restart.
    ///
    /// Must be called before any append; afterwards the chain is live and
    /// resuming it from the outside would fork history.
    pub fn set_last_event_hash(&mut self, hash: EventHash) -> Result<()> {
        if self.appended || self.head.is_some() {
            return Err(Error::ChainAlreadyStarted);
        }
        self.head = Some(hash);
        Ok(())
    }

    /// Load the active branch's events from storage, verify the chain, and
    /// resume the head and append sequence from the last stored event.
    ///
    /// Returns the verified events. A verification failure surfaces as
    /// [`Error::ChainBroken`] and leaves the log untouched; recovery is
    /// either restore-from-backend or [`EventLog::restart_with_gap`].
    pub fn resume_from_storage(&mut self, now: Timestamp) -> Result<Vec<LedgerEvent>> {
        if self.appended || self.head.is_some() {
            return Err(Error::ChainAlreadyStarted);
        }

        let entries = self
            .scope
            .execute_scoped("ledger.resume", now, |store| store.scan("events/"))?;

        let mut events = Vec::with_capacity(entries.len());
        let mut last_sequence = None;
        for (key, value) in entries {
            let event: LedgerEvent =
                serde_json::from_value(value).map_err(|e| Error::Corrupt {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            last_sequence = parse_event_key(&key).or(last_sequence);
            events.push(event);
        }

        Self::verify_chain(&events)?;

        if let Some(last) = events.last() {
            self.head = Some(last.hash.clone());
        }
        if let Some(sequence) = last_sequence {
            self.next_sequence = sequence + 1;
        }

        Ok(events)
    }

    /// Append a business event to the chain.
    ///
    /// The event links to the current head, is persisted inside the active
    /// branch scope, and only then advances the head. Persistence failure
    /// propagates as [`Error::Storage`] with the head untouched.
    pub fn append(
        &mut self,
        branch_id: &str,
        actor_id: impl Into<ActorId>,
        payload: EventPayload,
        now: Timestamp,
    ) -> Result<LedgerEvent> {
        let event = LedgerEvent::build(
            self.head.clone(),
            branch_id,
            self.device_id.clone(),
            actor_id,
            now,
            payload,
        )?;

        let key = event_key(self.next_sequence);
        self.scope
            .execute_scoped("ledger.append", now, |store| store.put_record(&key, &event))?;

        self.head = Some(event.hash.clone());
        self.next_sequence += 1;
        self.appended = true;

        Ok(event)
    }

    /// Start a fresh chain segment after an integrity failure.
    ///
    /// Appends an explicit [`EventPayload::ChainRestarted`] gap marker with
    /// no predecessor link. The broken history stays in storage; the gap is
    /// never hidden.
    pub fn restart_with_gap(
        &mut self,
        branch_id: &str,
        actor_id: impl Into<ActorId>,
        reason: impl Into<String>,
        broken_sequence: Option<u64>,
        now: Timestamp,
    ) -> Result<LedgerEvent> {
        self.head = None;
        self.append(
            branch_id,
            actor_id,
            EventPayload::ChainRestarted {
                reason: reason.into(),
                broken_sequence,
            },
            now,
        )
    }

    /// Verify an ordered event sequence: recompute every content hash and
    /// check the `prev_hash` linkage. The first break is reported with its
    /// position; a broken chain is never silently repaired.
    ///
    /// A `ChainRestarted` gap marker starts a new segment and is expected
    /// to carry no predecessor link.
    pub fn verify_chain(events: &[LedgerEvent]) -> Result<()> {
        let mut prev: Option<EventHash> = None;
        for (sequence, event) in events.iter().enumerate() {
            let broken = || Error::ChainBroken {
                sequence: sequence as u64,
                event_hash: event.hash.clone(),
            };

            if event.recompute_hash()? != event.hash {
                return Err(broken());
            }

            let expected_prev = match event.payload {
                EventPayload::ChainRestarted { .. } => None,
                _ => prev.clone(),
            };
            if event.prev_hash != expected_prev {
                return Err(broken());
            }

            prev = Some(event.hash.clone());
        }
        Ok(())
    }

    /// All events of the active branch in chain order.
    pub fn events(&self, now: Timestamp) -> Result<Vec<LedgerEvent>> {
        self.scope
            .execute_scoped("ledger.read", now, |store| store.scan_as("events/"))
    }

    /// Events of the active branch still awaiting backend acknowledgment,
    /// in chain order.
    pub fn unsynced_events(&self, now: Timestamp) -> Result<Vec<LedgerEvent>> {
        Ok(self
            .events(now)?
            .into_iter()
            .filter(LedgerEvent::is_pending)
            .collect())
    }

    /// Mark an event as synced. Rewrites only the sync bookkeeping; the
    /// hashed content and the chain are untouched.
    pub fn mark_synced(&self, hash: &str, now: Timestamp) -> Result<()> {
        self.scope
            .execute_scoped("ledger.markSynced", now, |store| {
                for (key, value) in store.scan("events/")? {
                    let mut event: LedgerEvent =
                        serde_json::from_value(value).map_err(|e| Error::Corrupt {
                            key: key.clone(),
                            reason: e.to_string(),
                        })?;
                    if event.hash == hash {
                        event.mark_synced(now);
                        return store.put_record(&key, &event);
                    }
                }
                Err(Error::EventNotFound(hash.to_string()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, MemoryStore, StockReason, Store, SyncState};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn payload(n: i64) -> EventPayload {
        EventPayload::StockAdjusted {
            product_id: format!("product:{n}"),
            delta: n,
            reason: StockReason::Recount,
        }
    }

    fn log_on(branch: &str) -> (EventLog, Arc<BranchScope>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scope = Arc::new(BranchScope::new(store.clone()));
        scope.set_active_branch(branch).unwrap();
        (EventLog::new("term-1", scope.clone()), scope, store)
    }

    /// Store double whose writes can be switched off to exercise the
    /// durability error path.
    struct FailingStore {
        inner: MemoryStore,
        fail_puts: AtomicBool,
    }

    impl FailingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_puts: AtomicBool::new(false),
            }
        }
    }

    impl Store for FailingStore {
        fn get(&self, key: &str) -> Result<Option<Value>> {
            self.inner.get(key)
        }
        fn put(&self, key: &str, value: Value) -> Result<()> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(Error::Storage("injected write failure".into()));
            }
            self.inner.put(key, value)
        }
        fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key)
        }
        fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
            self.inner.scan(prefix)
        }
    }

    #[test]
    fn appends_link_into_a_chain() {
        let (mut log, _, _) = log_on("cairo-1");

        let e1 = log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
        let e2 = log.append("cairo-1", "staff-1", payload(2), 2000).unwrap();
        let e3 = log.append("cairo-1", "staff-1", payload(3), 3000).unwrap();

        assert_eq!(e1.prev_hash, None);
        assert_eq!(e2.prev_hash, Some(e1.hash.clone()));
        assert_eq!(e3.prev_hash, Some(e2.hash.clone()));
        assert_eq!(log.head(), Some(&e3.hash));
    }

    #[test]
    fn verify_passes_for_appended_chain() {
        let (mut log, _, _) = log_on("cairo-1");
        for n in 0..5 {
            log.append("cairo-1", "staff-1", payload(n), 1000 + n as u64)
                .unwrap();
        }
        let events = log.events(9000).unwrap();
        assert_eq!(events.len(), 5);
        assert!(EventLog::verify_chain(&events).is_ok());
    }

    #[test]
    fn corrupted_event_is_reported_as_break_point() {
        let (mut log, _, store) = log_on("cairo-1");
        log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
        let e2 = log.append("cairo-1", "staff-1", payload(2), 2000).unwrap();
        log.append("cairo-1", "staff-1", payload(3), 3000).unwrap();

        // Corrupt E2's payload directly in storage
        let key = "cairo-1/events/00000000000000000001";
        let mut raw = store.get(key).unwrap().unwrap();
        raw["payload"]["delta"] = serde_json::json!(9999);
        store.put(key, raw).unwrap();

        let events = log.events(4000).unwrap();
        let err = EventLog::verify_chain(&events).unwrap_err();
        assert_eq!(
            err,
            Error::ChainBroken {
                sequence: 1,
                event_hash: e2.hash,
            }
        );
    }

    #[test]
    fn broken_linkage_is_detected() {
        let (mut log, _, _) = log_on("cairo-1");
        log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
        log.append("cairo-1", "staff-1", payload(2), 2000).unwrap();

        let mut events = log.events(3000).unwrap();
        // Drop the first event: E2 now claims a predecessor that is absent
        events.remove(0);

        assert!(matches!(
            EventLog::verify_chain(&events),
            Err(Error::ChainBroken { sequence: 0, .. })
        ));
    }

    #[test]
    fn failed_persistence_leaves_head_untouched() {
        let store = Arc::new(FailingStore::new());
        let scope = Arc::new(BranchScope::new(store.clone()));
        scope.set_active_branch("cairo-1").unwrap();
        let mut log = EventLog::new("term-1", scope);

        let e1 = log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();

        store.fail_puts.store(true, Ordering::SeqCst);
        let err = log.append("cairo-1", "staff-1", payload(2), 2000);
        assert!(matches!(err, Err(Error::Storage(_))));
        assert_eq!(log.head(), Some(&e1.hash));

        // Once the store recovers, the chain continues from e1
        store.fail_puts.store(false, Ordering::SeqCst);
        let e3 = log.append("cairo-1", "staff-1", payload(3), 3000).unwrap();
        assert_eq!(e3.prev_hash, Some(e1.hash));
    }

    #[test]
    fn rehydration_must_precede_appends() {
        let (mut log, _, _) = log_on("cairo-1");

        log.set_last_event_hash("abc".into()).unwrap();
        assert!(matches!(
            log.set_last_event_hash("def".into()),
            Err(Error::ChainAlreadyStarted)
        ));

        let e = log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
        assert_eq!(e.prev_hash, Some("abc".to_string()));
    }

    #[test]
    fn resume_restores_head_and_sequence() {
        let store = Arc::new(MemoryStore::new());
        let scope = Arc::new(BranchScope::new(store.clone()));
        scope.set_active_branch("cairo-1").unwrap();

        let last_hash = {
            let mut log = EventLog::new("term-1", scope.clone());
            log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
            log.append("cairo-1", "staff-1", payload(2), 2000)
                .unwrap()
                .hash
        };

        // Fresh log instance, as after a process restart
        let mut log = EventLog::new("term-1", scope);
        let events = log.resume_from_storage(3000).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(log.head(), Some(&last_hash));

        let e3 = log.append("cairo-1", "staff-1", payload(3), 4000).unwrap();
        assert_eq!(e3.prev_hash, Some(last_hash));
        assert_eq!(log.events(5000).unwrap().len(), 3);
    }

    #[test]
    fn restart_with_gap_starts_a_verifiable_segment() {
        let (mut log, _, _) = log_on("cairo-1");
        log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();

        let marker = log
            .restart_with_gap("cairo-1", "system", "storage corruption", Some(1), 2000)
            .unwrap();
        assert_eq!(marker.prev_hash, None);
        assert_eq!(marker.kind(), EventKind::ChainRestarted);

        let e = log.append("cairo-1", "staff-1", payload(2), 3000).unwrap();
        assert_eq!(e.prev_hash, Some(marker.hash.clone()));

        // The full log including the gap marker verifies
        let events = log.events(4000).unwrap();
        assert_eq!(events.len(), 3);
        assert!(EventLog::verify_chain(&events).is_ok());
    }

    #[test]
    fn mark_synced_transitions_without_breaking_the_chain() {
        let (mut log, _, _) = log_on("cairo-1");
        let e1 = log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();
        log.append("cairo-1", "staff-1", payload(2), 2000).unwrap();

        assert_eq!(log.unsynced_events(3000).unwrap().len(), 2);

        log.mark_synced(&e1.hash, 3000).unwrap();

        let unsynced = log.unsynced_events(4000).unwrap();
        assert_eq!(unsynced.len(), 1);

        let events = log.events(5000).unwrap();
        assert_eq!(events[0].sync_state, SyncState::Synced);
        assert_eq!(events[0].synced_at, Some(3000));
        assert!(EventLog::verify_chain(&events).is_ok());
    }

    #[test]
    fn mark_synced_unknown_hash_errors() {
        let (mut log, _, _) = log_on("cairo-1");
        log.append("cairo-1", "staff-1", payload(1), 1000).unwrap();

        assert!(matches!(
            log.mark_synced("missing", 2000),
            Err(Error::EventNotFound(_))
        ));
    }
}
