//! Authorizer entry point.
//!
//! [`Authorizer`] is what the gateway invokes for each handshake: it parses
//! the event, authenticates, and either returns a [`DecisionDocument`] or
//! [`Unauthorized`]. The gateway turns `Unauthorized` into a uniform 401
//! without learning why.

use thiserror::Error;

use crate::{
    authenticator::TokenAuthenticator,
    config::AuthorizerConfig,
    decision::{DecisionDocument, to_decision_document},
    jwks::KeySetError,
    request::HandshakeRequest,
};

/// Uniform rejection returned to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unauthorized")]
pub struct Unauthorized;

/// Handshake authorizer.
#[derive(Debug, Clone)]
pub struct Authorizer {
    authenticator: TokenAuthenticator,
}

impl Authorizer {
    /// Wraps an authenticator.
    #[must_use]
    pub fn new(authenticator: TokenAuthenticator) -> Self {
        Self { authenticator }
    }

    /// Builds an authorizer that fetches keys over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError`] if the HTTP client cannot be built.
    pub fn from_config(config: &AuthorizerConfig) -> Result<Self, KeySetError> {
        Ok(Self::new(TokenAuthenticator::from_config(config)?))
    }

    /// The underlying authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.authenticator
    }

    /// Authorizes a parsed handshake request.
    ///
    /// # Errors
    ///
    /// Returns [`Unauthorized`] for every denied handshake.
    #[tracing::instrument(skip_all)]
    pub async fn handle(&self, request: &HandshakeRequest) -> Result<DecisionDocument, Unauthorized> {
        let result = self.authenticator.authenticate(request).await;
        match to_decision_document(&result) {
            Some(document) => {
                tracing::info!(principal_id = %document.principal_id, "authorised");
                Ok(document)
            },
            None => {
                tracing::info!("unauthorised");
                Err(Unauthorized)
            },
        }
    }

    /// Authorizes a raw gateway event.
    ///
    /// # Errors
    ///
    /// Returns [`Unauthorized`] if the event cannot be parsed or the
    /// handshake is denied.
    pub async fn handle_event(
        &self,
        event: serde_json::Value,
    ) -> Result<DecisionDocument, Unauthorized> {
        match HandshakeRequest::from_value(event) {
            Ok(request) => self.handle(&request).await,
            Err(err) => {
                tracing::warn!(
                    stage = %err.stage(),
                    category = %err.category(),
                    error = %err,
                    "handshake rejected"
                );
                tracing::info!("unauthorised");
                Err(Unauthorized)
            },
        }
    }
}
