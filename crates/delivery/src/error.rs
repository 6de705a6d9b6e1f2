//! Delivery error types and result alias.
//!
//! Two layers of failure exist here:
//!
//! - [`SendError`] is what a [`ConnectionTransport`](crate::ConnectionTransport)
//!   reports for one send. The delivery service folds it into a
//!   [`DeliveryStatus`](crate::DeliveryStatus); it never aborts a batch.
//! - [`DeliveryError`] covers everything around the send: bad endpoints,
//!   malformed inbound events, directory failures.
//!
//! # Example
//!
//! ```
//! use wsgate_delivery::{SendError, DeliveryStatus};
//!
//! let status = DeliveryStatus::from_send_error(&SendError::Gone);
//! assert!(status.is_stale());
//! ```

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure of a single transport send.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SendError {
    /// The connection no longer exists on the gateway.
    ///
    /// The identifier is stale and should be removed from the directory.
    #[error("Connection gone")]
    Gone,

    /// The send did not complete in time.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    /// The transport answered with an unexpected status.
    #[error("Transport returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The transport could not be reached.
    #[error("Transport error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl SendError {
    /// Creates a `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` if the connection is gone.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// Errors outside the send itself.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum DeliveryError {
    /// The transport endpoint could not be derived.
    #[error("Invalid endpoint: {message}")]
    InvalidEndpoint {
        /// Why the endpoint was rejected.
        message: String,
    },

    /// An inbound event lacks a field the handler needs.
    #[error("Missing request field: {field}")]
    MissingField {
        /// Dotted path of the field.
        field: &'static str,
    },

    /// An inbound event could not be decoded.
    #[error("Malformed event: {message}")]
    MalformedEvent {
        /// Decoder message.
        message: String,
    },

    /// The connection directory failed.
    #[error("Directory error: {message}")]
    Directory {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl DeliveryError {
    /// Creates an `InvalidEndpoint` error.
    #[must_use]
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::InvalidEndpoint { message: message.into() }
    }

    /// Creates a `MissingField` error.
    #[must_use]
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Creates a `MalformedEvent` error.
    #[must_use]
    pub fn malformed_event(message: impl Into<String>) -> Self {
        Self::MalformedEvent { message: message.into() }
    }

    /// Creates a `Directory` error.
    #[must_use]
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory { message: message.into(), source: None }
    }

    /// Creates a `Directory` error with a message and source error.
    #[must_use]
    pub fn directory_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Directory { message: message.into(), source: Some(Arc::new(source)) }
    }
}

/// Startup configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A setting is present but cannot be used.
    #[error("Invalid setting {name}: {message}")]
    Invalid {
        /// Name of the setting.
        name: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    /// Creates an `Invalid` error.
    #[must_use]
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { name, message: message.into() }
    }
}
