//! Handshake authentication.
//!
//! [`TokenAuthenticator::authenticate`] runs the whole pipeline and never
//! fails: every [`AuthError`] is folded into
//! [`AuthenticationResult::Deny`], logged with its stage and category.
//!
//! ```text
//! request type == REQUEST        → MalformedRequest
//! query `auth` present           → MissingToken
//! methodArn region == configured → RegionMismatch
//! header alg/kid (unverified)    → InvalidTokenFormat
//! resolve key by kid             → KeyFetch / RateLimitExceeded
//! verify sig, aud, iss, exp, sub → TokenVerificationFailed
//! ```

use std::sync::Arc;

use tracing::field;

use crate::{
    config::AuthorizerConfig,
    error::{AuthError, AuthStage, FailureCategory, Result},
    jwks::{HttpKeySetSource, KeySetError},
    jwt::{TokenExpectations, decode_unverified_header, verify_token},
    key_resolver::KeyResolver,
    request::HandshakeRequest,
};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Token subject.
    pub principal_id: String,
    /// Scope granted by the token; empty when none.
    pub scope: String,
    /// Execution resource wildcard of the invoked API.
    pub resource: String,
}

/// Why a handshake was denied, without any caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenyReason {
    /// Pipeline step that failed.
    pub stage: AuthStage,
    /// Operator-facing classification.
    pub category: FailureCategory,
}

impl From<&AuthError> for DenyReason {
    fn from(err: &AuthError) -> Self {
        Self { stage: err.stage(), category: err.category() }
    }
}

/// Outcome of one handshake authentication.
///
/// A `Deny` carries no principal, so nothing downstream can authorize on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// The token is valid.
    Allow(Principal),
    /// The handshake must be rejected.
    Deny(DenyReason),
}

impl AuthenticationResult {
    /// Returns `true` for `Allow`.
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// The principal, for `Allow` only.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Allow(principal) => Some(principal),
            Self::Deny(_) => None,
        }
    }
}

/// Authenticates handshake requests against the issuer's key set.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    expectations: TokenExpectations,
    region: String,
    resolver: Arc<KeyResolver>,
}

impl TokenAuthenticator {
    /// Creates an authenticator using an existing resolver.
    #[must_use]
    pub fn new(config: &AuthorizerConfig, resolver: Arc<KeyResolver>) -> Self {
        Self {
            expectations: TokenExpectations::from_config(config),
            region: config.region().to_owned(),
            resolver,
        }
    }

    /// Creates an authenticator that fetches keys over HTTP from the
    /// configured key-set URL.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError`] if the HTTP client cannot be built.
    pub fn from_config(config: &AuthorizerConfig) -> std::result::Result<Self, KeySetError> {
        let source = HttpKeySetSource::new(config.jwks_uri().clone(), config.jwks_fetch_timeout())?;
        let resolver = Arc::new(KeyResolver::from_config(Arc::new(source), config));
        Ok(Self::new(config, resolver))
    }

    /// The resolver backing this authenticator.
    #[must_use]
    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    /// Authenticates one handshake.
    ///
    /// Never fails; any failure is a [`AuthenticationResult::Deny`]. The
    /// token itself is never logged.
    #[tracing::instrument(
        skip(self, request),
        fields(connection_id = request.connection_id().unwrap_or("-"), kid = field::Empty)
    )]
    pub async fn authenticate(&self, request: &HandshakeRequest) -> AuthenticationResult {
        match self.try_authenticate(request).await {
            Ok(principal) => {
                tracing::info!(
                    principal_id = %principal.principal_id,
                    scope = %principal.scope,
                    "handshake authenticated"
                );
                AuthenticationResult::Allow(principal)
            },
            Err(err) => {
                let reason = DenyReason::from(&err);
                tracing::warn!(
                    stage = %reason.stage,
                    category = %reason.category,
                    error = %err,
                    "handshake rejected"
                );
                AuthenticationResult::Deny(reason)
            },
        }
    }

    async fn try_authenticate(&self, request: &HandshakeRequest) -> Result<Principal> {
        request.ensure_handshake()?;
        let token = request.token()?;

        let arn = request.method_arn()?;
        if arn.region() != self.region {
            return Err(AuthError::region_mismatch(&self.region, arn.region()));
        }

        let header = decode_unverified_header(token)?;
        tracing::Span::current().record("kid", header.kid.as_str());

        let key = self.resolver.resolve_key(&header.kid).await?;
        let claims = verify_token(token, &header, &key, &self.expectations)?;

        Ok(Principal {
            principal_id: claims.sub,
            scope: claims.scope,
            resource: arn.execution_resource_wildcard(),
        })
    }
}
