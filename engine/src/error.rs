//! Error types for the Tally engine.

use crate::{BranchId, EventHash, OperationId};
use thiserror::Error;

/// All possible errors from the Tally engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Durability errors - always propagate, never swallowed
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("malformed record under key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("event serialization failed: {0}")]
    Serialization(String),

    // Chain errors - fatal for the local history, operator recovery required
    #[error("chain integrity broken at sequence {sequence} (event {event_hash})")]
    ChainBroken {
        sequence: u64,
        event_hash: EventHash,
    },

    #[error("chain already started; rehydration must happen before the first append")]
    ChainAlreadyStarted,

    #[error("event not found: {0}")]
    EventNotFound(EventHash),

    // Branch scoping errors
    #[error("invalid branch id: {0:?}")]
    InvalidBranch(String),

    #[error("no active branch set")]
    NoActiveBranch,

    #[error("branch access violation: active '{active}', requested '{requested}'")]
    BranchMismatch {
        active: BranchId,
        requested: BranchId,
    },

    // Sync queue errors
    #[error("sync operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("sync operation {0} is not awaiting manual resolution")]
    NotInConflict(OperationId),

    // Session errors - recovered locally, session stays logged out
    #[error("invalid staff code or pin")]
    InvalidCredentials,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Storage("disk full".into());
        assert_eq!(err.to_string(), "storage failure: disk full");

        let err = Error::ChainBroken {
            sequence: 1,
            event_hash: "abc123".into(),
        };
        assert_eq!(
            err.to_string(),
            "chain integrity broken at sequence 1 (event abc123)"
        );

        let err = Error::BranchMismatch {
            active: "cairo-1".into(),
            requested: "giza-2".into(),
        };
        assert_eq!(
            err.to_string(),
            "branch access violation: active 'cairo-1', requested 'giza-2'"
        );
    }
}
