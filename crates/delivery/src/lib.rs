//! # wsgate Delivery
//!
//! Pushes payloads to live gateway connections.
//!
//! This crate provides:
//! - **Delivery service**: one send per connection, classified as delivered, stale or failed
//! - **Dispatcher**: fan-out over the Connection Directory with stale-entry cleanup
//! - **Message handler**: acknowledges inbound messages on the sender's connection
//! - **Connection Directory**: the interface plus an in-memory implementation
//!
//! Delivery never fails loudly: a gone connection or a transport error is an
//! outcome, not an `Err`, and one failed send never aborts a batch.
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use wsgate_delivery::{ConnectionId, DeliveryConfig, DeliveryService, TransportEndpoint};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = DeliveryService::from_config(DeliveryConfig::from_env()?).await;
//! let endpoint = TransportEndpoint::from_request("abc123.execute-api.eu-west-1.amazonaws.com", "production")?;
//!
//! let outcome = service
//!     .deliver(&ConnectionId::from("L0SM9cOFvHcCIhw="), Bytes::from_static(b"hello"), &endpoint)
//!     .await;
//! println!("{}", outcome.status);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Delivery configuration.
pub mod config;
/// Connection Directory.
pub mod directory;
/// Directory fan-out.
pub mod dispatcher;
/// Delivery error types.
pub mod error;
/// Message route handler.
pub mod handler;
/// Connection delivery service.
pub mod service;
/// Named-connection transport.
pub mod transport;
/// Identifiers, records and outcomes.
pub mod types;

/// Shared test fixtures.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::DeliveryConfig;
pub use directory::{ConnectionDirectory, MemoryConnectionDirectory};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use error::{ConfigError, DeliveryError, Result, SendError};
pub use handler::{GatewayResponse, MessageEvent, MessageHandler};
pub use service::DeliveryService;
pub use transport::{
    ConnectionTransport, GatewayConnectionTransport, GatewayTransportFactory, TransportEndpoint,
    TransportFactory,
};
pub use types::{ConnectionId, ConnectionRecord, DeliveryOutcome, DeliveryStatus};
