//! Staff identity and session binding.
//!
//! An [`ActorSession`] ties an authenticated staff member to every
//! subsequent ledger write. While nobody is logged in, writes are
//! attributed to the `system` sentinel; logging out never rewrites history
//! recorded under the previous actor.

use crate::{error::Result, ActorId, DeviceId, Error, Store, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Actor recorded when no staff member is logged in.
pub const SYSTEM_ACTOR: &str = "system";

/// Default session lifetime: 12 hours in milliseconds.
pub const DEFAULT_SESSION_TTL_MS: u64 = 12 * 60 * 60 * 1000;

/// Staff roles recognised by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Cashier,
    Chef,
    Waiter,
    Manager,
}

/// A staff member from the local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Staff {
    pub id: String,
    pub name: String,
    /// Short login code typed at the terminal
    pub code: String,
    pub role: StaffRole,
}

/// The local staff directory the session authenticates against.
///
/// Contract: `verify_pin` returns `None` on no-match rather than failing,
/// and takes the same time whether the code exists or not.
pub trait StaffDirectory: Send + Sync {
    fn verify_pin(&self, code: &str, pin: &str) -> Option<Staff>;
    fn get_staff_by_id(&self, id: &str) -> Option<Staff>;
}

/// In-memory staff directory for wiring and tests.
#[derive(Default)]
pub struct MemoryStaffDirectory {
    by_code: HashMap<String, (Staff, String)>,
}

fn pin_matches(expected: &str, given: &str) -> bool {
    // Bitwise fold instead of early-exit comparison
    if expected.len() != given.len() {
        return false;
    }
    expected
        .bytes()
        .zip(given.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

impl MemoryStaffDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a staff member with their pin.
    pub fn add(&mut self, staff: Staff, pin: impl Into<String>) {
        self.by_code.insert(staff.code.clone(), (staff, pin.into()));
    }
}

impl StaffDirectory for MemoryStaffDirectory {
    fn verify_pin(&self, code: &str, pin: &str) -> Option<Staff> {
        let (staff, expected) = self.by_code.get(code)?;
        pin_matches(expected, pin).then(|| staff.clone())
    }

    fn get_staff_by_id(&self, id: &str) -> Option<Staff> {
        self.by_code
            .values()
            .find(|(staff, _)| staff.id == id)
            .map(|(staff, _)| staff.clone())
    }
}

/// Session token persisted per device. Not shared across devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    token: String,
    staff_id: String,
    logged_in_at: Timestamp,
    expires_at: Timestamp,
}

/// Binds an authenticated staff identity to subsequent ledger writes.
///
/// State machine: {LoggedOut} -> (login) -> {LoggedIn(actor)} -> (logout or
/// expiry) -> {LoggedOut}. A failed login leaves the session LoggedOut.
pub struct ActorSession {
    device_id: DeviceId,
    directory: Arc<dyn StaffDirectory>,
    store: Arc<dyn Store>,
    ttl_ms: u64,
    current: Option<(Staff, SessionRecord)>,
}

impl ActorSession {
    /// Create a logged-out session for a device.
    pub fn new(
        device_id: impl Into<DeviceId>,
        directory: Arc<dyn StaffDirectory>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            directory,
            store,
            ttl_ms: DEFAULT_SESSION_TTL_MS,
            current: None,
        }
    }

    /// Override the session lifetime.
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    fn session_key(&self) -> String {
        format!("session/{}", self.device_id)
    }

    /// Verify credentials and bind the staff member as the default actor.
    ///
    /// The session token is caller-supplied (the runtime generates one per
    /// login) and persisted scoped to this device only.
    pub fn login(
        &mut self,
        code: &str,
        pin: &str,
        token: impl Into<String>,
        now: Timestamp,
    ) -> Result<Staff> {
        let staff = self
            .directory
            .verify_pin(code, pin)
            .ok_or(Error::InvalidCredentials)?;

        let record = SessionRecord {
            token: token.into(),
            staff_id: staff.id.clone(),
            logged_in_at: now,
            expires_at: now + self.ttl_ms,
        };
        let value =
            serde_json::to_value(&record).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.put(&self.session_key(), value)?;

        self.current = Some((staff.clone(), record));
        Ok(staff)
    }

    /// Reset the default actor to the `system` sentinel.
    ///
    /// Unsynced events attributed to the previous actor are untouched.
    pub fn logout(&mut self) -> Result<()> {
        self.current = None;
        self.store.delete(&self.session_key())
    }

    /// Resume a persisted session after a restart.
    ///
    /// Returns the staff member if a valid, unexpired session record exists
    /// for this device and the staff id still resolves in the directory.
    pub fn resume(&mut self, now: Timestamp) -> Result<Option<Staff>> {
        let Some(value) = self.store.get(&self.session_key())? else {
            return Ok(None);
        };
        let record: SessionRecord =
            serde_json::from_value(value).map_err(|e| Error::Corrupt {
                key: self.session_key(),
                reason: e.to_string(),
            })?;

        if record.expires_at <= now {
            self.logout()?;
            return Ok(None);
        }
        let Some(staff) = self.directory.get_staff_by_id(&record.staff_id) else {
            self.logout()?;
            return Ok(None);
        };

        self.current = Some((staff.clone(), record));
        Ok(Some(staff))
    }

    /// Flip to LoggedOut if the session passed its expiry. Returns whether
    /// an expiry happened.
    pub fn expire_if_due(&mut self, now: Timestamp) -> Result<bool> {
        let expired = matches!(&self.current, Some((_, record)) if record.expires_at <= now);
        if expired {
            self.logout()?;
        }
        Ok(expired)
    }

    /// The actor id stamped onto ledger writes. Always usable: the
    /// `system` sentinel while logged out.
    pub fn current_actor(&self) -> ActorId {
        self.current
            .as_ref()
            .map(|(staff, _)| staff.id.clone())
            .unwrap_or_else(|| SYSTEM_ACTOR.to_string())
    }

    /// The logged-in staff member, if any.
    pub fn current_staff(&self) -> Option<&Staff> {
        self.current.as_ref().map(|(staff, _)| staff)
    }

    /// Whether a staff member is currently bound.
    pub fn is_logged_in(&self) -> bool {
        self.current.is_some()
    }
}
