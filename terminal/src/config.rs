//! Configuration for the terminal runtime.

use std::env;
use tally_engine::{DEFAULT_AUDIT_RETENTION_MS, DEFAULT_MAX_RETRIES, DEFAULT_SESSION_TTL_MS};

/// Default drain interval: 30 seconds.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 30_000;

/// Terminal configuration, loaded from environment variables or built
/// directly by an embedder.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Stable identifier of this terminal
    pub device_id: String,
    /// Branch this terminal starts scoped to
    pub branch_id: String,
    /// Base URL of the backend sync endpoint
    pub sync_endpoint: String,
    /// Drain loop interval in milliseconds
    pub sync_interval_ms: u64,
    /// Retry bound before a sync operation is marked failed
    pub max_retries: u32,
    /// Audit log retention window in milliseconds
    pub audit_retention_ms: u64,
    /// Staff session lifetime in milliseconds
    pub session_ttl_ms: u64,
}

impl TerminalConfig {
    /// Build a configuration with defaults for everything but the
    /// identifiers. The starting point for tests and embedders.
    pub fn for_device(device_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            branch_id: branch_id.into(),
            sync_endpoint: "http://localhost:3000".to_string(),
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            audit_retention_ms: DEFAULT_AUDIT_RETENTION_MS,
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let device_id = env::var("TALLY_DEVICE_ID").map_err(|_| ConfigError::MissingDeviceId)?;
        let branch_id = env::var("TALLY_BRANCH_ID").map_err(|_| ConfigError::MissingBranchId)?;

        let mut config = Self::for_device(device_id, branch_id);

        if let Ok(endpoint) = env::var("TALLY_SYNC_ENDPOINT") {
            config.sync_endpoint = endpoint;
        }
        config.sync_interval_ms =
            parse_var("TALLY_SYNC_INTERVAL_MS", config.sync_interval_ms)?;
        config.max_retries = parse_var("TALLY_SYNC_MAX_RETRIES", config.max_retries)?;
        config.audit_retention_ms =
            parse_var("TALLY_AUDIT_RETENTION_MS", config.audit_retention_ms)?;
        config.session_ttl_ms = parse_var("TALLY_SESSION_TTL_MS", config.session_ttl_ms)?;

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TALLY_DEVICE_ID environment variable is required")]
    MissingDeviceId,

    #[error("TALLY_BRANCH_ID environment variable is required")]
    MissingBranchId,

    #[error("invalid {name} value: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = TerminalConfig::for_device("term-1", "cairo-1");
        assert_eq!(config.device_id, "term-1");
        assert_eq!(config.branch_id, "cairo-1");
        assert_eq!(config.sync_interval_ms, 30_000);
        assert_eq!(config.max_retries, 3);
    }
}
