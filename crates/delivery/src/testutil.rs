//! Shared test utilities for delivery.
//!
//! [`MemoryTransport`] records every send and can be told which connections
//! are gone or failing. It is also its own [`TransportFactory`], recording
//! the endpoints it was bound to.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use std::sync::Arc;
//!
//! use wsgate_delivery::{DeliveryConfig, DeliveryService, testutil::MemoryTransport};
//!
//! let transport = MemoryTransport::new();
//! transport.mark_gone("stale-connection");
//! let service = DeliveryService::new(Arc::new(transport.clone()), DeliveryConfig::default());
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    error::SendError,
    transport::{ConnectionTransport, TransportEndpoint, TransportFactory},
    types::{ConnectionId, ConnectionRecord},
};

/// Gateway domain of the fixture events.
pub const TEST_DOMAIN: &str = "abc123.execute-api.eu-west-1.amazonaws.com";

/// Stage of the fixture events.
pub const TEST_STAGE: &str = "production";

/// Endpoint derived from [`TEST_DOMAIN`] and [`TEST_STAGE`].
pub fn test_endpoint() -> TransportEndpoint {
    TransportEndpoint::from_request(TEST_DOMAIN, TEST_STAGE).expect("fixture endpoint is valid")
}

/// Non-expiring directory record for `connection_id`.
pub fn record(connection_id: &str) -> ConnectionRecord {
    ConnectionRecord::builder()
        .connection_id(connection_id)
        .principal_id(format!("principal-{connection_id}"))
        .scope("chat:write")
        .build()
}

/// A gateway message event from `connection_id` (or with none).
pub fn message_event(connection_id: Option<&str>) -> Value {
    let mut context = json!({
        "domainName": TEST_DOMAIN,
        "stage": TEST_STAGE,
        "routeKey": "$default",
    });
    if let Some(id) = connection_id {
        context["connectionId"] = json!(id);
    }
    json!({ "requestContext": context, "body": "{\"action\":\"message\"}" })
}

#[derive(Default)]
struct State {
    sent: Mutex<Vec<(ConnectionId, Bytes)>>,
    endpoints: Mutex<Vec<TransportEndpoint>>,
    gone: Mutex<HashSet<ConnectionId>>,
    failing: Mutex<HashSet<ConnectionId>>,
    slow: Mutex<HashMap<ConnectionId, Duration>>,
    attempts: AtomicUsize,
}

/// In-memory [`ConnectionTransport`] with scripted failures.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<State>,
    delay: Option<Duration>,
}

impl MemoryTransport {
    /// Creates a transport where every connection accepts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every send by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sends to `connection_id` fail with [`SendError::Gone`].
    pub fn mark_gone(&self, connection_id: impl Into<ConnectionId>) {
        self.state.gone.lock().insert(connection_id.into());
    }

    /// Sends to `connection_id` fail with status 500.
    pub fn mark_failing(&self, connection_id: impl Into<ConnectionId>) {
        self.state.failing.lock().insert(connection_id.into());
    }

    /// Sends to `connection_id` take an extra `delay`.
    pub fn mark_slow(&self, connection_id: impl Into<ConnectionId>, delay: Duration) {
        self.state.slow.lock().insert(connection_id.into(), delay);
    }

    /// Successful sends, in completion order.
    #[must_use]
    pub fn sent(&self) -> Vec<(ConnectionId, Bytes)> {
        self.state.sent.lock().clone()
    }

    /// Endpoints this transport was bound to.
    #[must_use]
    pub fn endpoints(&self) -> Vec<TransportEndpoint> {
        self.state.endpoints.lock().clone()
    }

    /// Send attempts, failures included.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionTransport for MemoryTransport {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> Result<(), SendError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let slow = self.state.slow.lock().get(connection_id).copied();
        if let Some(delay) = slow {
            tokio::time::sleep(delay).await;
        }
        if self.state.gone.lock().contains(connection_id) {
            return Err(SendError::Gone);
        }
        if self.state.failing.lock().contains(connection_id) {
            return Err(SendError::Status { status: 500 });
        }
        self.state.sent.lock().push((connection_id.clone(), payload));
        Ok(())
    }
}

impl TransportFactory for MemoryTransport {
    fn transport_for(&self, endpoint: &TransportEndpoint) -> Arc<dyn ConnectionTransport> {
        self.state.endpoints.lock().push(endpoint.clone());
        Arc::new(self.clone())
    }
}
