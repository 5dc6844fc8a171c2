//! # Tally Terminal
//!
//! The terminal-side runtime around [`tally_engine`]: configuration, the
//! HTTP sync transport, the periodic drain loop with bounded retries and
//! clean cancellation, an in-process notice bus, and the builder that
//! wires a fully-constructed core.
//!
//! A terminal built here keeps recording business events with zero
//! connectivity; the [`SyncAgent`] reconciles with the backend whenever it
//! becomes reachable again.

pub mod agent;
pub mod bus;
pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod transport;

pub use agent::{DrainSummary, SyncAgent};
pub use bus::{Notice, NoticeBus, SubscriberId};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, TerminalConfig, DEFAULT_SYNC_INTERVAL_MS};
pub use crate::core::{Terminal, TerminalBuilder};
pub use error::{Result, TerminalError};
pub use transport::{
    AckStatus, EventPushRequest, HttpTransport, ItemAck, PushResponse, SyncTransport,
    TransportError,
};
