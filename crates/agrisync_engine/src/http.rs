//! HTTP remote gateway.
//!
//! [`HttpGateway`] speaks the CBOR wire messages of `agrisync_protocol`
//! over any [`HttpClient`], so hosts can plug in the HTTP stack they
//! already ship. Endpoints:
//!
//! - `POST {base}/sync/{domain}/fetch`: [`FetchRequest`] → [`FetchResponse`]
//! - `POST {base}/sync/{domain}/push`: [`PushRequest`] → [`PushResponse`]

use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use agrisync_protocol::{
    EntityRecord, FetchRequest, FetchResponse, PushRequest, PushResponse, Timestamp,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an [`HttpClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The request never got a response.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}: {message}")]
    Status {
        /// Status code.
        status: u16,
        /// Response text, if any.
        message: String,
    },
}

impl HttpError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::Unreachable(_) => true,
            HttpError::Status { status, .. } => matches!(status, 408 | 429 | 500..=599),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this over reqwest, ureq, a platform HTTP stack, or anything
/// else that can POST bytes.
pub trait HttpClient: Send + Sync {
    /// Sends a POST and returns the response body.
    ///
    /// Must give up once `timeout` has passed, reporting
    /// [`HttpError::Unreachable`] if no response arrived.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, HttpError>;

    /// Returns false if the client knows it cannot reach the server.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// A [`RemoteGateway`] over HTTP with CBOR bodies.
pub struct HttpGateway<C: HttpClient> {
    base_url: String,
    device_id: String,
    client: C,
    timeout: Duration,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpGateway<C> {
    /// Creates a gateway for `base_url` (e.g. `https://sync.example.com`).
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            client,
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request timeout passed to the client.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last client error, if the last request failed.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Clears the disconnected state after a transport failure.
    pub fn reconnect(&self) {
        self.mark_connected();
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            tracing::debug!(base_url = %self.base_url, "gateway reconnected");
        }
        *self.last_error.write() = None;
    }

    /// Marks the gateway disconnected.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn post(&self, path: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }

        let url = format!("{}{}", self.base_url, path);
        match self.client.post(&url, body, self.timeout) {
            Ok(bytes) => {
                *self.last_error.write() = None;
                Ok(bytes)
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "gateway request failed");
                *self.last_error.write() = Some(e.to_string());
                if matches!(e, HttpError::Unreachable(_)) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(SyncError::Transport {
                    retryable: e.is_retryable(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl<C: HttpClient> RemoteGateway for HttpGateway<C> {
    fn fetch_updated(
        &self,
        entity_type: &str,
        since: Timestamp,
        limit: u32,
    ) -> SyncResult<Vec<EntityRecord>> {
        let request = FetchRequest::new(self.device_id.as_str(), entity_type, since, limit);
        let bytes = self.post(&format!("/sync/{entity_type}/fetch"), request.encode()?)?;
        let response = FetchResponse::decode(&bytes)?;

        if let Some(stray) = response.records.iter().find(|r| r.entity_type != entity_type) {
            return Err(SyncError::Codec(format!(
                "fetch for {entity_type} returned {}",
                stray.key()
            )));
        }
        Ok(response.records)
    }

    fn push_batch(&self, entity_type: &str, records: &[EntityRecord]) -> SyncResult<u32> {
        let request = PushRequest::new(self.device_id.as_str(), entity_type, records.to_vec());
        let bytes = self.post(&format!("/sync/{entity_type}/push"), request.encode()?)?;
        Ok(PushResponse::decode(&bytes)?.acknowledged)
    }

    fn is_reachable(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn reconnect(&self) {
        self.mark_connected();
    }
}

/// Server side of a [`LoopbackClient`].
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST to `path` (starting at `/sync/`).
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpError>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpError> {
        (**self).handle_post(path, body)
    }
}

/// An [`HttpClient`] that hands requests straight to an in-process server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client routed to `server`.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, HttpError> {
        if !self.is_healthy() {
            return Err(HttpError::Unreachable("loopback offline".into()));
        }
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
