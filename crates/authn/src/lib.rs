//! # wsgate Authentication
//!
//! Handshake authorizer for the wsgate message gateway.
//!
//! This crate provides:
//! - **Key resolution**: JWKS-backed signing keys with a TTL cache, coalesced misses and a fetch
//!   rate limit
//! - **Token verification**: RSA-family JWTs checked for signature, audience, issuer and expiry
//! - **Decision documents**: gateway policy documents for admitted connections
//!
//! ## Features
//!
//! - Only RSA algorithms (RS256/384/512, PS256/384/512) are accepted
//! - Symmetric algorithms and `none` are rejected before any key lookup
//! - Authentication never fails loudly: every failure is a logged `Deny`
//!
//! ## Example
//!
//! ```no_run
//! use wsgate_authn::{Authorizer, AuthorizerConfig};
//!
//! # async fn example(event: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthorizerConfig::from_env()?;
//! let authorizer = Authorizer::from_config(&config)?;
//!
//! match authorizer.handle_event(event).await {
//!     Ok(document) => println!("admit {}", document.principal_id),
//!     Err(unauthorized) => println!("{unauthorized}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Handshake authentication pipeline.
pub mod authenticator;
/// Authorizer entry point.
pub mod authorizer;
/// Authorizer configuration.
pub mod config;
/// Gateway decision documents.
pub mod decision;
/// Authentication error types.
pub mod error;
/// Key-set retrieval.
pub mod jwks;
/// Token decoding and verification.
pub mod jwt;
/// Signing-key cache and resolver.
pub mod key_resolver;
/// Key-set fetch rate limiting.
pub mod rate_limiter;
/// Inbound handshake request.
pub mod request;
/// Header validation.
pub mod validation;

/// Shared test fixtures.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authenticator::{AuthenticationResult, DenyReason, Principal, TokenAuthenticator};
pub use authorizer::{Authorizer, Unauthorized};
pub use config::AuthorizerConfig;
pub use decision::{DecisionDocument, to_decision_document};
pub use error::{AuthError, AuthStage, ConfigError, FailureCategory, Result, VerificationFailure};
pub use jwks::{HttpKeySetSource, KeySetError, KeySetSource};
pub use key_resolver::{KeyResolver, ResolvedKey};
pub use request::{HandshakeRequest, MethodArn};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
