//! # Tally Engine
//!
//! The offline ledger core for Tally POS terminals.
//!
//! This crate provides the deterministic logic a terminal needs to keep
//! operating with zero connectivity: a tamper-evident, hash-chained event
//! log, branch-isolated storage, versioned shared entities with conflict
//! resolution, the outbound sync queue, and staff sessions.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine persists through the [`Store`] capability and
//!   has no knowledge of files, network, or platform
//! - **Durability before acknowledgment**: appends and upserts return only
//!   after the store accepted the write
//! - **Tamper-evident**: every event's hash covers its full content and its
//!   link to the previous event; corruption is detected, never repaired
//! - **Deterministic**: conflict resolution is a pure function; same inputs
//!   always produce the same outcome
//!
//! ## Core Concepts
//!
//! ### Events
//!
//! Business actions are recorded as [`LedgerEvent`]s with a closed, typed
//! [`EventPayload`]. Events form a per-device hash chain: `prev_hash` of
//! event *n* equals `hash` of event *n−1*. [`EventLog::verify_chain`]
//! recomputes and checks the whole sequence.
//!
//! ### Branch isolation
//!
//! All persisted state is scoped to one active branch through
//! [`BranchScope::execute_scoped`]. Cross-branch access attempts raise a
//! [`BranchViolation`] signal so observers can distinguish "no data" from
//! "wrong scope requested".
//!
//! ### Versioned objects
//!
//! Mutable shared entities (prices, stock records) live in the
//! [`VersionedObjectStore`] with monotonic versions and last-modifier
//! metadata. [`resolve`] arbitrates when a remote copy has moved ahead.
//!
//! ### Sync queue
//!
//! Every mutation is tracked by exactly one [`SyncOperation`] until it is
//! synced, failed after a bounded retry count, or parked as a conflict for
//! manual disposition.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tally_engine::{
//!     BranchScope, EventLog, EventPayload, MemoryStore, StockReason,
//!     VersionedObjectStore,
//! };
//!
//! // 1. One shared store behind the branch scope
//! let store = Arc::new(MemoryStore::new());
//! let scope = Arc::new(BranchScope::new(store));
//! scope.set_active_branch("cairo-1").unwrap();
//!
//! // 2. Append hash-chained events
//! let mut log = EventLog::new("term-1", scope.clone());
//! let event = log
//!     .append(
//!         "cairo-1",
//!         "staff-1",
//!         EventPayload::StockAdjusted {
//!             product_id: "product:7".into(),
//!             delta: -2,
//!             reason: StockReason::Sale,
//!         },
//!         1706745600000,
//!     )
//!     .unwrap();
//! assert!(event.prev_hash.is_none());
//!
//! // 3. Verify the chain after a restore
//! let events = log.events(1706745601000).unwrap();
//! EventLog::verify_chain(&events).unwrap();
//!
//! // 4. Mutable entities go through the versioned object store
//! let objects = VersionedObjectStore::new(scope);
//! let product = objects
//!     .upsert(
//!         "product",
//!         "product:7",
//!         json!({"price": 10}),
//!         "staff-1@term-1",
//!         "op-1",
//!         1706745602000,
//!     )
//!     .unwrap();
//! assert_eq!(product.version, 1);
//! ```

pub mod chain;
pub mod error;
pub mod event;
pub mod object;
pub mod queue;
pub mod resolve;
pub mod scope;
pub mod session;
pub mod store;

// Re-export main types at crate root
pub use chain::EventLog;
pub use error::{Error, Result};
pub use event::{
    CashMoveReason, EventKind, EventPayload, LedgerEvent, SaleLine, StockReason, SyncState,
    TenderKind,
};
pub use object::{VersionedObject, VersionedObjectStore};
pub use queue::{
    ManualChoice, OperationId, SyncEntity, SyncOp, SyncOpStatus, SyncOperation, SyncQueue,
    DEFAULT_MAX_RETRIES,
};
pub use resolve::{resolve, Resolution};
pub use scope::{
    AuditRecord, BranchScope, BranchViolation, ScopedStore, ViolationHook,
    DEFAULT_AUDIT_RETENTION_MS,
};
pub use session::{
    ActorSession, MemoryStaffDirectory, Staff, StaffDirectory, StaffRole,
    DEFAULT_SESSION_TTL_MS, SYSTEM_ACTOR,
};
pub use store::{MemoryStore, Store};

/// Type aliases for clarity
pub type BranchId = String;
pub type DeviceId = String;
pub type ActorId = String;
pub type EntityType = String;
pub type ObjectId = String;
pub type EventHash = String;
pub type Timestamp = u64;
pub type Version = u64;
