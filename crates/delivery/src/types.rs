//! Connection identifiers, directory records and delivery outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SendError;

/// Gateway-issued identifier of one live connection.
///
/// Opaque to this crate; compared byte for byte.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wraps a raw identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Directory entry for one admitted connection.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use wsgate_delivery::ConnectionRecord;
///
/// let record = ConnectionRecord::builder()
///     .connection_id("L0SM9cOFvHcCIhw=")
///     .principal_id("user-1")
///     .scope("chat:write")
///     .expires_at(Utc::now() + Duration::hours(2))
///     .build();
///
/// assert!(record.is_live_at(Utc::now()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Gateway connection identifier.
    #[builder(into)]
    pub connection_id: ConnectionId,

    /// Principal attached at connect time, if any.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,

    /// Scope attached at connect time, if any.
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// When the connection was admitted.
    #[builder(default = Utc::now())]
    pub connected_at: DateTime<Utc>,

    /// After this instant the record is treated as absent.
    ///
    /// `None` means the record lives until removed.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    /// Returns `true` if the record has not expired at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// Result of one delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The transport accepted the payload.
    Delivered,
    /// The connection is gone; its identifier should be dropped.
    Stale,
    /// Any other failure. Not retried.
    TransportError {
        /// Redacted failure description.
        reason: String,
    },
}

impl DeliveryStatus {
    /// Classifies a transport failure.
    #[must_use]
    pub fn from_send_error(err: &SendError) -> Self {
        match err {
            SendError::Gone => Self::Stale,
            other => Self::TransportError { reason: other.to_string() },
        }
    }

    /// Returns `true` for [`DeliveryStatus::Delivered`].
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Returns `true` for [`DeliveryStatus::Stale`].
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    /// Short label for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Stale => "stale",
            Self::TransportError { .. } => "transport_error",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of delivering to one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Target connection.
    pub connection_id: ConnectionId,
    /// What happened.
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    /// Creates an outcome.
    pub fn new(connection_id: ConnectionId, status: DeliveryStatus) -> Self {
        Self { connection_id, status }
    }
}
