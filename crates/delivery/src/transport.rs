//! Connection transport: the named-connection send primitive.
//!
//! A [`TransportEndpoint`] is derived from the inbound request's domain and
//! stage as `https://<domain>/<stage>`. A [`TransportFactory`] binds a
//! [`ConnectionTransport`] to one endpoint; the delivery service asks for one
//! per request rather than holding a process-wide client per endpoint.
//!
//! [`GatewayConnectionTransport`] calls the gateway's connection management
//! API (`PostToConnection`) through the AWS SDK, which signs every request
//! with the credentials of the running function. `GoneException` becomes
//! [`SendError::Gone`].

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::{
    Client,
    config::{http::HttpResponse, retry::RetryConfig},
    error::SdkError,
    operation::post_to_connection::PostToConnectionError,
    primitives::Blob,
};
use bytes::Bytes;
use url::Url;

use crate::{
    error::{DeliveryError, Result, SendError},
    types::ConnectionId,
};

/// Base URL of the gateway's connection management API for one stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportEndpoint {
    url: Url,
}

impl TransportEndpoint {
    /// Derives `https://<domain>/<stage>` from request routing metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::InvalidEndpoint`] if either part is empty,
    /// contains a `/`, or does not form a valid URL.
    pub fn from_request(domain: &str, stage: &str) -> Result<Self> {
        let domain = domain.trim();
        let stage = stage.trim();
        if domain.is_empty() {
            return Err(DeliveryError::invalid_endpoint("empty domain"));
        }
        if stage.is_empty() {
            return Err(DeliveryError::invalid_endpoint("empty stage"));
        }
        if domain.contains('/') || stage.contains('/') {
            return Err(DeliveryError::invalid_endpoint("domain and stage must not contain '/'"));
        }

        let url = Url::parse(&format!("https://{domain}/{stage}"))
            .map_err(|e| DeliveryError::invalid_endpoint(e.to_string()))?;
        Ok(Self { url })
    }

    /// Wraps an explicit endpoint URL, e.g. a local gateway emulator.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::InvalidEndpoint`] unless the scheme is http(s)
    /// and the URL has a host.
    pub fn from_url(url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "https" | "http") {
            return Err(DeliveryError::invalid_endpoint("scheme must be http or https"));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(DeliveryError::invalid_endpoint("missing host"));
        }
        Ok(Self { url })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Sends one payload to one named connection.
#[async_trait]
pub trait ConnectionTransport: Send + Sync {
    /// Posts `payload` to `connection_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Gone`] if the connection no longer exists, or
    /// another [`SendError`] for any other failure.
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), SendError>;
}

/// Binds transports to endpoints.
pub trait TransportFactory: Send + Sync {
    /// Returns a transport that sends through `endpoint`.
    fn transport_for(&self, endpoint: &TransportEndpoint) -> Arc<dyn ConnectionTransport>;
}

/// Sends through the gateway's connection management API for one endpoint.
#[derive(Clone, Debug)]
pub struct GatewayConnectionTransport {
    client: Client,
    endpoint: TransportEndpoint,
}

impl GatewayConnectionTransport {
    /// Returns the bound endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ConnectionTransport for GatewayConnectionTransport {
    async fn post_to_connection(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), SendError> {
        self.client
            .post_to_connection()
            .connection_id(connection_id.as_str())
            .data(Blob::new(payload.to_vec()))
            .send()
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }
}

fn classify_sdk_error(err: SdkError<PostToConnectionError, HttpResponse>) -> SendError {
    if err.as_service_error().is_some_and(PostToConnectionError::is_gone_exception) {
        return SendError::Gone;
    }
    if matches!(err, SdkError::TimeoutError(_)) {
        return SendError::connection_with_source("request timed out", err);
    }

    let status = err.raw_response().map(|response| response.status().as_u16());
    match status.map(classify_status) {
        Some(Err(classified)) => classified,
        _ => SendError::connection_with_source("request failed", err),
    }
}

fn classify_status(status: u16) -> std::result::Result<(), SendError> {
    match status {
        200..=299 => Ok(()),
        410 => Err(SendError::Gone),
        other => Err(SendError::Status { status: other }),
    }
}

/// Hands out [`GatewayConnectionTransport`]s built from one shared AWS
/// configuration. Sends are never retried.
#[derive(Clone, Debug)]
pub struct GatewayTransportFactory {
    sdk_config: aws_config::SdkConfig,
}

impl GatewayTransportFactory {
    /// Creates a factory from an already loaded AWS configuration.
    #[must_use]
    pub fn new(sdk_config: aws_config::SdkConfig) -> Self {
        Self { sdk_config }
    }

    /// Loads region and credentials from the standard AWS sources
    /// (environment, profile, container or instance metadata).
    pub async fn from_env() -> Self {
        Self::new(aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await)
    }
}

impl TransportFactory for GatewayTransportFactory {
    fn transport_for(&self, endpoint: &TransportEndpoint) -> Arc<dyn ConnectionTransport> {
        let config = aws_sdk_apigatewaymanagement::config::Builder::from(&self.sdk_config)
            .endpoint_url(endpoint.url().as_str().trim_end_matches('/'))
            .retry_config(RetryConfig::disabled())
            .build();
        Arc::new(GatewayConnectionTransport {
            client: Client::from_conf(config),
            endpoint: endpoint.clone(),
        })
    }
}
