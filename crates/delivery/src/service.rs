//! Connection delivery service.
//!
//! [`DeliveryService::deliver`] sends one payload to one connection and
//! reports a [`DeliveryOutcome`]; it never returns an error. A transport
//! "gone" becomes [`DeliveryStatus::Stale`], anything else becomes
//! [`DeliveryStatus::TransportError`]. There is no retry.
//!
//! Every send is bounded by [`DeliveryConfig::send_timeout`] on top of any
//! timeout the transport enforces itself.

use std::sync::Arc;

use bytes::Bytes;
use fail::fail_point;
use futures_util::{StreamExt, stream};

use crate::{
    config::DeliveryConfig,
    error::SendError,
    transport::{ConnectionTransport, GatewayTransportFactory, TransportEndpoint, TransportFactory},
    types::{ConnectionId, DeliveryOutcome, DeliveryStatus},
};

/// Delivers payloads to connections through a [`TransportFactory`].
#[derive(Clone)]
pub struct DeliveryService {
    factory: Arc<dyn TransportFactory>,
    config: DeliveryConfig,
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService").field("config", &self.config).finish_non_exhaustive()
    }
}

impl DeliveryService {
    /// Creates a service over an arbitrary transport factory.
    pub fn new(factory: Arc<dyn TransportFactory>, config: DeliveryConfig) -> Self {
        Self { factory, config }
    }

    /// Creates a service sending through the gateway's connection
    /// management API, with AWS region and credentials taken from the
    /// environment.
    pub async fn from_config(config: DeliveryConfig) -> Self {
        Self::new(Arc::new(GatewayTransportFactory::from_env().await), config)
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Delivers `payload` to one connection.
    #[tracing::instrument(skip(self, payload), fields(connection_id = %connection_id, endpoint = %endpoint))]
    pub async fn deliver(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
        endpoint: &TransportEndpoint,
    ) -> DeliveryOutcome {
        let transport = self.factory.transport_for(endpoint);
        self.send_with(transport.as_ref(), connection_id, payload).await
    }

    /// Delivers `payload` to every connection in `connection_ids`.
    ///
    /// Sends run concurrently, up to
    /// [`DeliveryConfig::max_concurrency`] at a time. Returns one outcome
    /// per identifier, in input order. A failed send never affects the
    /// others.
    #[tracing::instrument(skip_all, fields(targets = connection_ids.len(), endpoint = %endpoint))]
    pub async fn deliver_all(
        &self,
        connection_ids: &[ConnectionId],
        payload: Bytes,
        endpoint: &TransportEndpoint,
    ) -> Vec<DeliveryOutcome> {
        let transport = self.factory.transport_for(endpoint);
        let transport = transport.as_ref();

        stream::iter(connection_ids)
            .map(|connection_id| self.send_with(transport, connection_id, payload.clone()))
            .buffered(self.config.max_concurrency())
            .collect()
            .await
    }

    async fn send_with(
        &self,
        transport: &dyn ConnectionTransport,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> DeliveryOutcome {
        let result = self.timed_send(transport, connection_id, payload).await;

        let status = match result {
            Ok(()) => {
                tracing::debug!(connection_id = %connection_id, status = "delivered", "payload delivered");
                DeliveryStatus::Delivered
            },
            Err(err) => {
                let status = DeliveryStatus::from_send_error(&err);
                if status.is_stale() {
                    tracing::info!(connection_id = %connection_id, status = %status, "connection gone");
                } else {
                    tracing::warn!(
                        connection_id = %connection_id,
                        status = %status,
                        error = %err,
                        "delivery failed"
                    );
                }
                status
            },
        };

        DeliveryOutcome::new(connection_id.clone(), status)
    }

    async fn timed_send(
        &self,
        transport: &dyn ConnectionTransport,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), SendError> {
        fail_point!("transport-before-send", |_| {
            Err(SendError::connection("injected failure before transport send"))
        });

        let timeout = self.config.send_timeout();
        match tokio::time::timeout(timeout, transport.post_to_connection(connection_id, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(timeout)),
        }
    }
}
