//! Message route handler.
//!
//! For an inbound message event the handler derives the transport endpoint
//! from the event's domain and stage and sends an acknowledgement to the
//! sender's own connection. Whatever happens, the gateway gets
//! `{statusCode: 200, body: "Success"}`; failures are logged only.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    directory::ConnectionDirectory,
    error::{DeliveryError, Result},
    service::DeliveryService,
    transport::TransportEndpoint,
    types::{ConnectionId, DeliveryOutcome, DeliveryStatus},
};

/// Acknowledgement sent back to the sender.
pub const ACKNOWLEDGEMENT: &[u8] = br#"{"message":"here"}"#;

/// Inbound message event, as delivered by the gateway.
///
/// Only the routing metadata is read; the message body is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    /// Routing metadata.
    pub request_context: MessageContext,
}

/// Routing metadata of a [`MessageEvent`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContext {
    /// Gateway domain name.
    pub domain_name: Option<String>,
    /// Deployment stage.
    pub stage: Option<String>,
    /// Sender's connection.
    pub connection_id: Option<String>,
    /// Route that matched, e.g. `$default`.
    pub route_key: Option<String>,
}

impl MessageEvent {
    /// Decodes an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::MalformedEvent`] if the value does not have
    /// the expected shape.
    pub fn from_value(event: serde_json::Value) -> Result<Self> {
        serde_json::from_value(event).map_err(|e| DeliveryError::malformed_event(e.to_string()))
    }

    /// Endpoint for replies: `https://<domainName>/<stage>`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::MissingField`] if either field is absent,
    /// or [`DeliveryError::InvalidEndpoint`] if they do not form an endpoint.
    pub fn endpoint(&self) -> Result<TransportEndpoint> {
        let context = &self.request_context;
        let domain = context
            .domain_name
            .as_deref()
            .ok_or(DeliveryError::missing_field("requestContext.domainName"))?;
        let stage =
            context.stage.as_deref().ok_or(DeliveryError::missing_field("requestContext.stage"))?;
        TransportEndpoint::from_request(domain, stage)
    }

    /// The sender's connection.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::MissingField`] if absent or empty.
    pub fn connection_id(&self) -> Result<ConnectionId> {
        self.request_context
            .connection_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ConnectionId::from)
            .ok_or(DeliveryError::missing_field("requestContext.connectionId"))
    }
}

/// Response returned to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: String,
}

impl GatewayResponse {
    /// `{statusCode: 200, body: "Success"}`.
    #[must_use]
    pub fn success() -> Self {
        Self { status_code: 200, body: "Success".to_owned() }
    }
}

/// Acknowledges inbound messages on the sender's connection.
#[derive(Clone)]
pub struct MessageHandler {
    service: DeliveryService,
    directory: Arc<dyn ConnectionDirectory>,
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler").field("service", &self.service).finish_non_exhaustive()
    }
}

impl MessageHandler {
    /// Creates a handler.
    pub fn new(service: DeliveryService, directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self { service, directory }
    }

    /// Handles one decoded event. Always succeeds.
    #[tracing::instrument(
        skip_all,
        fields(connection_id = event.request_context.connection_id.as_deref().unwrap_or("-"))
    )]
    pub async fn handle(&self, event: &MessageEvent) -> GatewayResponse {
        match self.acknowledge(event).await {
            Ok(outcome) => {
                tracing::info!(status = %outcome.status, "message acknowledged");
                if outcome.status == DeliveryStatus::Stale {
                    self.forget(&outcome.connection_id).await;
                }
            },
            Err(err) => tracing::warn!(error = %err, "message not acknowledged"),
        }
        GatewayResponse::success()
    }

    /// Handles one raw event. Always succeeds, even if the event is malformed.
    pub async fn handle_event(&self, event: serde_json::Value) -> GatewayResponse {
        match MessageEvent::from_value(event) {
            Ok(event) => self.handle(&event).await,
            Err(err) => {
                tracing::warn!(error = %err, "message event rejected");
                GatewayResponse::success()
            },
        }
    }

    async fn acknowledge(&self, event: &MessageEvent) -> Result<DeliveryOutcome> {
        let endpoint = event.endpoint()?;
        let connection_id = event.connection_id()?;
        Ok(self
            .service
            .deliver(&connection_id, Bytes::from_static(ACKNOWLEDGEMENT), &endpoint)
            .await)
    }

    async fn forget(&self, connection_id: &ConnectionId) {
        if let Err(err) = self.directory.remove(connection_id).await {
            tracing::warn!(error = %err, "failed to remove stale connection");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::DeliveryConfig,
        directory::MemoryConnectionDirectory,
        testutil::{MemoryTransport, TEST_DOMAIN, TEST_STAGE, message_event, record, test_endpoint},
    };

    async fn setup() -> (MessageHandler, MemoryTransport, MemoryConnectionDirectory) {
        let transport = MemoryTransport::new();
        let directory = MemoryConnectionDirectory::new();
        directory.put(record("sender")).await.unwrap();
        let service = DeliveryService::new(Arc::new(transport.clone()), DeliveryConfig::default());
        (MessageHandler::new(service, Arc::new(directory.clone())), transport, directory)
    }

    #[test]
    fn test_acknowledgement_payload() {
        let value: serde_json::Value = serde_json::from_slice(ACKNOWLEDGEMENT).unwrap();
        assert_eq!(value, json!({"message": "here"}));
    }

    #[test]
    fn test_gateway_response_shape() {
        assert_eq!(
            serde_json::to_value(GatewayResponse::success()).unwrap(),
            json!({"statusCode": 200, "body": "Success"})
        );
    }

    #[test]
    fn test_event_accessors() {
        let event = MessageEvent::from_value(message_event(Some("sender"))).unwrap();
        assert_eq!(event.connection_id().unwrap(), ConnectionId::from("sender"));
        assert_eq!(event.endpoint().unwrap(), test_endpoint());
        assert_eq!(event.request_context.domain_name.as_deref(), Some(TEST_DOMAIN));
        assert_eq!(event.request_context.stage.as_deref(), Some(TEST_STAGE));
    }

    #[test]
    fn test_missing_connection_id() {
        let event = MessageEvent::from_value(message_event(None)).unwrap();
        assert!(matches!(
            event.connection_id(),
            Err(DeliveryError::MissingField { field: "requestContext.connectionId" })
        ));
    }

    #[tokio::test]
    async fn test_acknowledges_sender() {
        let (handler, transport, _) = setup().await;

        let response = handler.handle_event(message_event(Some("sender"))).await;

        assert_eq!(response, GatewayResponse::success());
        assert_eq!(
            transport.sent(),
            vec![(ConnectionId::from("sender"), Bytes::from_static(ACKNOWLEDGEMENT))]
        );
        assert_eq!(transport.endpoints(), vec![test_endpoint()]);
    }

    #[tokio::test]
    async fn test_stale_sender_is_removed() {
        let (handler, transport, directory) = setup().await;
        transport.mark_gone("sender");

        let response = handler.handle_event(message_event(Some("sender"))).await;

        assert_eq!(response, GatewayResponse::success());
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_still_succeeds() {
        let (handler, transport, directory) = setup().await;
        transport.mark_failing("sender");

        let response = handler.handle_event(message_event(Some("sender"))).await;

        assert_eq!(response, GatewayResponse::success());
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_event_still_succeeds() {
        let (handler, transport, _) = setup().await;

        for event in [json!("not an object"), json!({"requestContext": {}}), json!({})] {
            assert_eq!(handler.handle_event(event).await, GatewayResponse::success());
        }
        assert_eq!(transport.send_count(), 0);
    }
}
