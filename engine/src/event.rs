//! Ledger event types.
//!
//! Every business action a terminal records is an immutable [`LedgerEvent`].
//! Events form a per-device hash chain: each event's `hash` covers its full
//! content including the `prev_hash` link, so any later tampering with a
//! stored event is detectable by recomputation.

use crate::{error::Result, ActorId, BranchId, DeviceId, Error, EventHash, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sync lifecycle of a locally recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Recorded locally, not yet acknowledged by the backend
    Pending,
    /// Acknowledged by the backend
    Synced,
}

/// Payment tender for a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenderKind {
    Cash,
    Card,
    Digital,
}

/// One line of a recorded sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    /// Unit price in minor currency units
    pub unit_price_minor: i64,
}

/// Why a stock level was adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockReason {
    Sale,
    Waste,
    Transfer,
    Recount,
}

/// Why cash moved between hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CashMoveReason {
    ShiftChange,
    BankDeposit,
    ManagerCollection,
}

/// The closed set of business events a terminal can record.
///
/// Each variant carries its own typed payload; consumers match exhaustively
/// instead of poking at untyped maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventPayload {
    SaleRecorded {
        order_id: String,
        lines: Vec<SaleLine>,
        subtotal_minor: i64,
        tax_minor: i64,
        total_minor: i64,
        tender: TenderKind,
    },
    SaleRefunded {
        order_id: String,
        amount_minor: i64,
        reason: String,
    },
    StockAdjusted {
        product_id: String,
        delta: i64,
        reason: StockReason,
    },
    StockReceived {
        product_id: String,
        quantity: i64,
        supplier_id: Option<String>,
        cost_per_unit_minor: i64,
    },
    PriceChanged {
        product_id: String,
        old_price_minor: i64,
        new_price_minor: i64,
    },
    CashDrawerOpened {
        opening_balance_minor: i64,
    },
    CashDrawerClosed {
        closing_balance_minor: i64,
    },
    CashMoved {
        amount_minor: i64,
        from_actor: ActorId,
        to_actor: ActorId,
        reason: CashMoveReason,
    },
    ShiftStarted {
        shift_id: String,
        staff_id: String,
        opening_balance_minor: Option<i64>,
    },
    ShiftEnded {
        shift_id: String,
        staff_id: String,
        closing_balance_minor: Option<i64>,
    },
    StaffAction {
        action: String,
        detail: Option<String>,
    },
    BranchOpened,
    BranchClosed,
    /// Explicit gap marker appended when a chain is restarted after an
    /// integrity failure. The gap stays visible in the log forever.
    ChainRestarted {
        reason: String,
        broken_sequence: Option<u64>,
    },
}

/// Fieldless tag identifying an event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    SaleRecorded,
    SaleRefunded,
    StockAdjusted,
    StockReceived,
    PriceChanged,
    CashDrawerOpened,
    CashDrawerClosed,
    CashMoved,
    ShiftStarted,
    ShiftEnded,
    StaffAction,
    BranchOpened,
    BranchClosed,
    ChainRestarted,
}

impl EventPayload {
    /// The kind tag for this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SaleRecorded { .. } => EventKind::SaleRecorded,
            EventPayload::SaleRefunded { .. } => EventKind::SaleRefunded,
            EventPayload::StockAdjusted { .. } => EventKind::StockAdjusted,
            EventPayload::StockReceived { .. } => EventKind::StockReceived,
            EventPayload::PriceChanged { .. } => EventKind::PriceChanged,
            EventPayload::CashDrawerOpened { .. } => EventKind::CashDrawerOpened,
            EventPayload::CashDrawerClosed { .. } => EventKind::CashDrawerClosed,
            EventPayload::CashMoved { .. } => EventKind::CashMoved,
            EventPayload::ShiftStarted { .. } => EventKind::ShiftStarted,
            EventPayload::ShiftEnded { .. } => EventKind::ShiftEnded,
            EventPayload::StaffAction { .. } => EventKind::StaffAction,
            EventPayload::BranchOpened => EventKind::BranchOpened,
            EventPayload::BranchClosed => EventKind::BranchClosed,
            EventPayload::ChainRestarted { .. } => EventKind::ChainRestarted,
        }
    }
}

/// An immutable, hash-chained ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    /// Content hash of this event (hex SHA-256); also its identifier
    pub hash: EventHash,
    /// Hash of the preceding event on this device's chain; `None` for the
    /// first event of a chain segment
    pub prev_hash: Option<EventHash>,
    /// Branch this event belongs to
    pub branch_id: BranchId,
    /// Terminal that recorded the event
    pub device_id: DeviceId,
    /// Staff member (or the `system` sentinel) that triggered it
    pub actor_id: ActorId,
    /// Device-local wall clock at append time (milliseconds since epoch)
    pub timestamp: Timestamp,
    /// Typed business payload
    pub payload: EventPayload,
    /// Sync lifecycle state
    pub sync_state: SyncState,
    /// When the event was acknowledged by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<Timestamp>,
}

/// The hashed view of an event. Sync bookkeeping stays out of the hash so
/// the Pending -> Synced transition never invalidates the chain.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedContent<'a> {
    prev_hash: &'a Option<EventHash>,
    branch_id: &'a str,
    device_id: &'a str,
    actor_id: &'a str,
    timestamp: Timestamp,
    payload: &'a EventPayload,
}

fn content_hash(
    prev_hash: &Option<EventHash>,
    branch_id: &str,
    device_id: &str,
    actor_id: &str,
    timestamp: Timestamp,
    payload: &EventPayload,
) -> Result<EventHash> {
    let content = HashedContent {
        prev_hash,
        branch_id,
        device_id,
        actor_id,
        timestamp,
        payload,
    };
    let bytes = serde_json::to_vec(&content).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl LedgerEvent {
    /// Build a new event, computing its content hash.
    pub fn build(
        prev_hash: Option<EventHash>,
        branch_id: impl Into<BranchId>,
        device_id: impl Into<DeviceId>,
        actor_id: impl Into<ActorId>,
        timestamp: Timestamp,
        payload: EventPayload,
    ) -> Result<Self> {
        let branch_id = branch_id.into();
        let device_id = device_id.into();
        let actor_id = actor_id.into();
        let hash = content_hash(
            &prev_hash,
            &branch_id,
            &device_id,
            &actor_id,
            timestamp,
            &payload,
        )?;
        Ok(Self {
            hash,
            prev_hash,
            branch_id,
            device_id,
            actor_id,
            timestamp,
            payload,
            sync_state: SyncState::Pending,
            synced_at: None,
        })
    }

    /// Recompute the content hash from the event's current fields.
    ///
    /// Used by chain verification to detect tampering; a stored event whose
    /// recomputed hash differs from `self.hash` has been altered.
    pub fn recompute_hash(&self) -> Result<EventHash> {
        content_hash(
            &self.prev_hash,
            &self.branch_id,
            &self.device_id,
            &self.actor_id,
            self.timestamp,
            &self.payload,
        )
    }

    /// The kind tag of this event's payload.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Whether the event still awaits backend acknowledgment.
    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Pending
    }

    /// Transition to `Synced`. Does not touch the hashed content.
    pub fn mark_synced(&mut self, now: Timestamp) {
        self.sync_state = SyncState::Synced;
        self.synced_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale_payload() -> EventPayload {
        EventPayload::SaleRecorded {
            order_id: "order-1".into(),
            lines: vec![SaleLine {
                product_id: "product:7".into(),
                name: "Espresso".into(),
                quantity: 2,
                unit_price_minor: 1500,
            }],
            subtotal_minor: 3000,
            tax_minor: 450,
            total_minor: 3450,
            tender: TenderKind::Cash,
        }
    }

    #[test]
    fn build_computes_hash() {
        let event =
            LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload()).unwrap();

        assert!(event.prev_hash.is_none());
        assert_eq!(event.hash.len(), 64); // hex sha-256
        assert_eq!(event.sync_state, SyncState::Pending);
        assert_eq!(event.kind(), EventKind::SaleRecorded);
    }

    #[test]
    fn hash_is_deterministic() {
        let a = LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload())
            .unwrap();
        let b = LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload())
            .unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn hash_covers_every_content_field() {
        let base =
            LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload()).unwrap();

        let other =
            LedgerEvent::build(None, "giza-2", "term-1", "staff-1", 1000, sale_payload()).unwrap();
        assert_ne!(base.hash, other.hash);

        let other =
            LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1001, sale_payload()).unwrap();
        assert_ne!(base.hash, other.hash);

        let other = LedgerEvent::build(
            Some(base.hash.clone()),
            "cairo-1",
            "term-1",
            "staff-1",
            1000,
            sale_payload(),
        )
        .unwrap();
        assert_ne!(base.hash, other.hash);
    }

    #[test]
    fn mark_synced_keeps_hash_valid() {
        let mut event =
            LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload()).unwrap();

        event.mark_synced(2000);
        assert_eq!(event.sync_state, SyncState::Synced);
        assert_eq!(event.synced_at, Some(2000));
        assert_eq!(event.recompute_hash().unwrap(), event.hash);
    }

    #[test]
    fn tampered_payload_changes_recomputed_hash() {
        let mut event =
            LedgerEvent::build(None, "cairo-1", "term-1", "staff-1", 1000, sale_payload()).unwrap();

        event.payload = EventPayload::SaleRefunded {
            order_id: "order-1".into(),
            amount_minor: 3450,
            reason: "tampered".into(),
        };

        assert_ne!(event.recompute_hash().unwrap(), event.hash);
    }

    #[test]
    fn serialization_roundtrip() {
        let event = LedgerEvent::build(
            None,
            "cairo-1",
            "term-1",
            "staff-1",
            1000,
            EventPayload::StockAdjusted {
                product_id: "product:7".into(),
                delta: -3,
                reason: StockReason::Waste,
            },
        )
        .unwrap();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"stockAdjusted\""));
        assert!(json.contains("prevHash"));

        let parsed: LedgerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn unit_variants_serialize_with_tag() {
        let event = LedgerEvent::build(
            None,
            "cairo-1",
            "term-1",
            "system",
            1000,
            EventPayload::BranchOpened,
        )
        .unwrap();

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"branchOpened\""));
    }
}
