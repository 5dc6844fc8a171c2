//! The sync transport boundary.
//!
//! The backend owns the wire schema; this module only requires that every
//! pushed item round-trips an identifier the agent can correlate with its
//! local [`SyncOperation`]. [`HttpTransport`] is the production
//! implementation; tests script their own [`SyncTransport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_engine::{LedgerEvent, SyncOperation, VersionedObject};
use thiserror::Error;

/// Transport-level failures. All variants are transient from the agent's
/// perspective and feed the bounded retry path.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure; the terminal is treated as offline.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {0}")]
    Http(u16),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Request(e.to_string())
    }
}

/// Per-item acknowledgment status from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Accepted; the local item can be marked synced.
    Acked,
    /// The backend detected a conflict it refuses to auto-resolve.
    Conflict,
    /// Permanently rejected (malformed, unauthorized, ...).
    Rejected,
}

/// Acknowledgment for one pushed item, correlated by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAck {
    /// Event hash or sync-operation id of the pushed item
    pub id: String,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch of ledger events pushed to the backend.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPushRequest<'a> {
    pub device_id: &'a str,
    pub branch_id: &'a str,
    pub events: &'a [LedgerEvent],
}

/// Backend response to a batch push.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub acks: Vec<ItemAck>,
}

/// Async boundary to the backend sync endpoint.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Push a batch of ledger events; returns one ack per event, keyed by
    /// event hash.
    async fn push_events(
        &self,
        device_id: &str,
        branch_id: &str,
        events: &[LedgerEvent],
    ) -> Result<Vec<ItemAck>, TransportError>;

    /// Push one object mutation; the ack is keyed by the operation id.
    async fn push_object(&self, op: &SyncOperation) -> Result<ItemAck, TransportError>;

    /// Fetch the backend's current copy of an object, if it has one.
    async fn fetch_object(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<VersionedObject>, TransportError>;
}

/// HTTP implementation of the sync transport.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push_events(
        &self,
        device_id: &str,
        branch_id: &str,
        events: &[LedgerEvent],
    ) -> Result<Vec<ItemAck>, TransportError> {
        let request = EventPushRequest {
            device_id,
            branch_id,
            events,
        };
        let response = self
            .client
            .post(self.url("/sync/events"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(body.acks)
    }

    async fn push_object(&self, op: &SyncOperation) -> Result<ItemAck, TransportError> {
        let response = self
            .client
            .post(self.url("/sync/objects"))
            .json(op)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn fetch_object(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<VersionedObject>, TransportError> {
        let response = self
            .client
            .get(self.url(&format!("/sync/objects/{entity_type}/{id}")))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Http(status.as_u16()));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
