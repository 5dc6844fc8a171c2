//! Conflict resolution for versioned objects.
//!
//! [`resolve`] is a pure decision function: no store access, no clock, no
//! side effects. Given the local and remote copy of an object it produces a
//! [`Resolution`], so the whole policy is exhaustively testable.

use crate::VersionedObject;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of comparing a local and a remote object copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The local copy stands; upload it.
    KeepLocal,
    /// The remote copy wins; adopt it locally.
    KeepRemote,
    /// Ambiguous; park for manual disposition. Never guessed.
    Conflict,
}

/// Decide between a local and a remote copy of the same object.
///
/// Rule order:
/// 1. `remote.version > local.version` — the remote advanced past what
///    local knew about; break the candidate conflict by recency:
///    the more recently modified copy wins. Equal timestamps with
///    identical payloads are a pure fast-forward (`KeepRemote`); equal
///    timestamps with divergent payloads are a [`Resolution::Conflict`].
/// 2. Equal versions with equal timestamps but divergent payloads are
///    ambiguous — [`Resolution::Conflict`].
/// 3. Everything else: local knows at least as much as the remote —
///    [`Resolution::KeepLocal`].
pub fn resolve(local: &VersionedObject, remote: &VersionedObject) -> Resolution {
    if remote.version > local.version {
        return match remote.last_modified.cmp(&local.last_modified) {
            Ordering::Greater => Resolution::KeepRemote,
            Ordering::Less => Resolution::KeepLocal,
            Ordering::Equal if remote.data == local.data => Resolution::KeepRemote,
            Ordering::Equal => Resolution::Conflict,
        };
    }

    if remote.version == local.version
        && remote.last_modified == local.last_modified
        && remote.data != local.data
    {
        return Resolution::Conflict;
    }

    Resolution::KeepLocal
}
