//! Property tests for the ledger invariants.

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tally_engine::{
    resolve, BranchScope, EventLog, EventPayload, MemoryStore, Resolution, StockReason,
    VersionedObject, VersionedObjectStore,
};

fn scoped() -> Arc<BranchScope> {
    let scope = Arc::new(BranchScope::new(Arc::new(MemoryStore::new())));
    scope.set_active_branch("cairo-1").unwrap();
    scope
}

fn adjustment(delta: i64) -> EventPayload {
    EventPayload::StockAdjusted {
        product_id: "product:7".into(),
        delta,
        reason: StockReason::Recount,
    }
}

fn object(version: u64, last_modified: u64, price: i64) -> VersionedObject {
    VersionedObject {
        id: "product:7".into(),
        entity_type: "product".into(),
        version,
        last_modified,
        modified_by: "staff-1@term-1".into(),
        branch_id: "cairo-1".into(),
        data: json!({ "price": price }),
    }
}

fn deltas_and_index() -> impl Strategy<Value = (Vec<i64>, usize)> {
    prop::collection::vec(-1000i64..1000, 1..16).prop_flat_map(|deltas| {
        let len = deltas.len();
        (Just(deltas), 0..len)
    })
}

proptest! {
    /// For all append sequences, verification over the resulting log
    /// succeeds.
    #[test]
    fn appended_chains_always_verify(deltas in prop::collection::vec(-1000i64..1000, 1..16)) {
        let scope = scoped();
        let mut log = EventLog::new("term-1", scope);

        for (i, delta) in deltas.iter().enumerate() {
            log.append("cairo-1", "staff-1", adjustment(*delta), 1000 + i as u64)
                .unwrap();
        }

        let events = log.events(99_000).unwrap();
        prop_assert_eq!(events.len(), deltas.len());
        prop_assert!(EventLog::verify_chain(&events).is_ok());
    }

    /// Tampering with any single event's payload makes verification fail.
    #[test]
    fn corrupting_any_event_breaks_verification((deltas, index) in deltas_and_index()) {
        let scope = scoped();
        let mut log = EventLog::new("term-1", scope);

        for (i, delta) in deltas.iter().enumerate() {
            log.append("cairo-1", "staff-1", adjustment(*delta), 1000 + i as u64)
                .unwrap();
        }

        let mut events = log.events(99_000).unwrap();
        events[index].payload = adjustment(9_999_999);

        prop_assert!(EventLog::verify_chain(&events).is_err());
    }

    /// Versions increase by exactly one per upsert on the same id.
    #[test]
    fn versions_are_strictly_monotonic(prices in prop::collection::vec(0i64..100_000, 1..24)) {
        let scope = scoped();
        let objects = VersionedObjectStore::new(scope);

        for (i, price) in prices.iter().enumerate() {
            let object = objects
                .upsert(
                    "product",
                    "product:7",
                    json!({ "price": price }),
                    "system",
                    format!("op-{i}"),
                    1000 + i as u64,
                )
                .unwrap();
            prop_assert_eq!(object.version, i as u64 + 1);
        }
    }

    /// resolve() is a pure function: repeated calls on the same inputs
    /// yield the same outcome.
    #[test]
    fn resolution_is_deterministic(
        local_version in 1u64..8,
        local_modified in 0u64..8,
        local_price in 0i64..4,
        remote_version in 1u64..8,
        remote_modified in 0u64..8,
        remote_price in 0i64..4,
    ) {
        let local = object(local_version, local_modified, local_price);
        let remote = object(remote_version, remote_modified, remote_price);

        let first = resolve(&local, &remote);
        for _ in 0..10 {
            prop_assert_eq!(resolve(&local, &remote), first);
        }
    }

    /// A remote that has not advanced past the local version never wins
    /// automatically.
    #[test]
    fn stale_remote_never_wins(
        version in 1u64..8,
        behind in 0u64..4,
        local_modified in 0u64..8,
        remote_modified in 0u64..8,
        local_price in 0i64..4,
        remote_price in 0i64..4,
    ) {
        let local = object(version + behind, local_modified, local_price);
        let remote = object(version, remote_modified, remote_price);

        prop_assert_ne!(resolve(&local, &remote), Resolution::KeepRemote);
    }
}
