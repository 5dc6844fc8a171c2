//! Unified error handling for the terminal runtime.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Runtime error type.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("engine error: {0}")]
    Engine(#[from] tally_engine::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("sync agent is already running")]
    AgentAlreadyRunning,

    #[error("internal lock poisoned")]
    Poisoned,
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, TerminalError>;
