//! Authentication error types.
//!
//! Every failure on the handshake path is an [`AuthError`]. None of them
//! escape [`TokenAuthenticator::authenticate`](crate::authenticator::TokenAuthenticator::authenticate):
//! the authenticator folds them into a deny outcome and logs the
//! [`stage`](AuthError::stage) and [`category`](AuthError::category).
//!
//! [`ConfigError`] is separate because it is only produced at process start.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// A shared error type for source chain tracking.
///
/// `Arc` rather than `Box` so [`AuthError`] stays `Clone`: a single key-set
/// failure is handed to every caller waiting on the same coalesced fetch.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Step of the handshake pipeline at which authentication failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthStage {
    /// Validating the shape of the inbound handshake request.
    Request,
    /// Extracting the bearer token from the request.
    Token,
    /// Decoding the unverified token header.
    Header,
    /// Resolving the signing key from the key set.
    KeyResolution,
    /// Verifying signature and claims.
    Verification,
}

impl AuthStage {
    /// Stable label used in structured log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Token => "token",
            Self::Header => "header",
            Self::KeyResolution => "key_resolution",
            Self::Verification => "verification",
        }
    }
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a failure for operators.
///
/// Separates misconfiguration (wrong audience, issuer or region) from
/// malicious input (bad signature) and from transient upstream trouble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The client sent something unusable.
    ClientInput,
    /// The deployment's expected values do not match what tokens carry.
    Misconfiguration,
    /// The token failed a cryptographic or validity check.
    Security,
    /// The key-set endpoint was unavailable or throttled.
    Transient,
}

impl FailureCategory {
    /// Stable label used in structured log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientInput => "client_input",
            Self::Misconfiguration => "misconfiguration",
            Self::Security => "security",
            Self::Transient => "transient",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a token failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum VerificationFailure {
    /// Signature does not match the resolved key.
    #[error("invalid signature")]
    InvalidSignature,
    /// `aud` does not contain the expected audience.
    #[error("audience mismatch")]
    InvalidAudience,
    /// `iss` does not equal the expected issuer.
    #[error("issuer mismatch")]
    InvalidIssuer,
    /// `exp` has passed.
    #[error("token expired")]
    Expired,
    /// `nbf` is in the future.
    #[error("token not yet valid")]
    NotYetValid,
    /// Header `alg` disagrees with the algorithm pinned by the key.
    #[error("algorithm does not match signing key")]
    AlgorithmMismatch,
    /// The resolved key belongs to a different key identifier.
    #[error("signing key identifier mismatch")]
    KeyMismatch,
    /// A required claim is absent or empty.
    #[error("missing required claim")]
    MissingClaim,
    /// Claims could not be deserialized after the signature checked out.
    #[error("malformed claims")]
    MalformedClaims,
    /// Any other rejection reported by the JWT library.
    #[error("verification rejected")]
    Other,
}

impl VerificationFailure {
    /// Classifies the failure for operators.
    #[must_use]
    pub fn category(self) -> FailureCategory {
        match self {
            Self::InvalidAudience | Self::InvalidIssuer => FailureCategory::Misconfiguration,
            _ => FailureCategory::Security,
        }
    }
}

/// Authentication errors.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The inbound request is not a handshake authorization request.
    #[error("Malformed request: {message}")]
    MalformedRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// The `auth` query parameter is absent or empty.
    #[error("Missing token")]
    MissingToken,

    /// The token cannot be decoded or its header lacks a key identifier.
    #[error("Invalid token format: {message}")]
    InvalidTokenFormat {
        /// Description of the format problem. Never contains token text.
        message: String,
    },

    /// The key set could not be fetched or has no usable entry for `kid`.
    #[error("Key fetch failed for {kid}: {message}")]
    KeyFetch {
        /// Key identifier that was being resolved.
        kid: String,
        /// Description of the failure.
        message: String,
        /// The underlying transport or decoding error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The key-set fetch budget is exhausted and the key is not cached.
    #[error("Key fetch rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Time until the next fetch would be admitted.
        retry_after: Duration,
    },

    /// Signature, audience, issuer or expiry checks failed.
    #[error("Token verification failed: {reason}")]
    TokenVerificationFailed {
        /// The specific check that failed.
        reason: VerificationFailure,
    },

    /// The handshake targets an API in a different region than configured.
    #[error("Region mismatch: expected {expected}, got {actual}")]
    RegionMismatch {
        /// Configured region.
        expected: String,
        /// Region found in the method ARN.
        actual: String,
    },
}

impl AuthError {
    /// Creates a `MalformedRequest` error.
    #[must_use]
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::MalformedRequest { message: message.into() }
    }

    /// Creates a `MissingToken` error.
    #[must_use]
    pub fn missing_token() -> Self {
        Self::MissingToken
    }

    /// Creates an `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat { message: message.into() }
    }

    /// Creates a `KeyFetch` error without a source.
    #[must_use]
    pub fn key_fetch(kid: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyFetch { kid: kid.into(), message: message.into(), source: None }
    }

    /// Creates a `KeyFetch` error carrying its source.
    #[must_use]
    pub fn key_fetch_with_source(
        kid: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::KeyFetch { kid: kid.into(), message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `RateLimitExceeded` error.
    #[must_use]
    pub fn rate_limit_exceeded(retry_after: Duration) -> Self {
        Self::RateLimitExceeded { retry_after }
    }

    /// Creates a `TokenVerificationFailed` error.
    #[must_use]
    pub fn verification_failed(reason: VerificationFailure) -> Self {
        Self::TokenVerificationFailed { reason }
    }

    /// Creates a `RegionMismatch` error.
    #[must_use]
    pub fn region_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::RegionMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// The pipeline step that produced this error.
    #[must_use]
    pub fn stage(&self) -> AuthStage {
        match self {
            Self::MalformedRequest { .. } | Self::RegionMismatch { .. } => AuthStage::Request,
            Self::MissingToken => AuthStage::Token,
            Self::InvalidTokenFormat { .. } => AuthStage::Header,
            Self::KeyFetch { .. } | Self::RateLimitExceeded { .. } => AuthStage::KeyResolution,
            Self::TokenVerificationFailed { .. } => AuthStage::Verification,
        }
    }

    /// Classifies the error for operators.
    #[must_use]
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::MalformedRequest { .. } | Self::MissingToken | Self::InvalidTokenFormat { .. } => {
                FailureCategory::ClientInput
            },
            Self::RegionMismatch { .. } => FailureCategory::Misconfiguration,
            Self::KeyFetch { .. } | Self::RateLimitExceeded { .. } => FailureCategory::Transient,
            Self::TokenVerificationFailed { reason } => reason.category(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let reason = match err.kind() {
            ErrorKind::InvalidSignature => VerificationFailure::InvalidSignature,
            ErrorKind::ExpiredSignature => VerificationFailure::Expired,
            ErrorKind::ImmatureSignature => VerificationFailure::NotYetValid,
            ErrorKind::InvalidAudience => VerificationFailure::InvalidAudience,
            ErrorKind::InvalidIssuer => VerificationFailure::InvalidIssuer,
            ErrorKind::InvalidAlgorithm => VerificationFailure::AlgorithmMismatch,
            ErrorKind::MissingRequiredClaim(_) => VerificationFailure::MissingClaim,
            ErrorKind::Json(_) => VerificationFailure::MalformedClaims,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                return AuthError::invalid_token_format("Invalid JWT structure");
            },
            _ => VerificationFailure::Other,
        };
        AuthError::verification_failed(reason)
    }
}

/// Startup configuration errors.
///
/// These are fatal: a process that cannot build its configuration must not
/// start serving handshakes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required setting is absent or empty.
    #[error("Missing required setting: {name}")]
    Missing {
        /// Name of the setting (environment variable name when loaded from env).
        name: &'static str,
    },

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
    /// Creates a `Missing` error.
    #[must_use]
    pub fn missing(name: &'static str) -> Self {
        Self::Missing { name }
    }

    /// Creates an `Invalid` error.
    #[must_use]
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { name, message: message.into() }
    }
}
