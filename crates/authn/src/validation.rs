//! JWT header validation.
//!
//! Checks applied to the unverified header before any key lookup, so that a
//! token with a forbidden algorithm or a hostile key identifier never causes
//! a key-set fetch.
//!
//! # Security
//!
//! - Symmetric algorithms and `none` are always rejected
//! - Only the RSA family (PKCS#1 v1.5 and PSS) is accepted
//! - Key identifiers are bounded in length and restricted to printable ASCII

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// JWT algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric; a public key would act as the secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// JWT algorithms accepted for handshake tokens.
///
/// The key set only publishes RSA keys, so anything outside the RSA family
/// could never verify and is refused up front (RFC 8725 Section 3.1).
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512", "PS256", "PS384", "PS512"];

/// Upper bound on the length of a `kid` header value.
pub const MAX_KID_LENGTH: usize = 256;

/// Validates a header `alg` value and returns the parsed algorithm.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the algorithm is forbidden or
/// not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use jsonwebtoken::Algorithm;
/// use wsgate_authn::validation::validate_algorithm;
///
/// assert_eq!(validate_algorithm("RS256").unwrap(), Algorithm::RS256);
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::invalid_token_format(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    match alg {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "PS256" => Ok(Algorithm::PS256),
        "PS384" => Ok(Algorithm::PS384),
        "PS512" => Ok(Algorithm::PS512),
        _ => Err(AuthError::invalid_token_format(format!(
            "Algorithm '{}' is not in accepted list",
            truncate(alg)
        ))),
    }
}

/// Validates a header `kid` value before it is used as a cache key.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the kid is empty, longer than
/// [`MAX_KID_LENGTH`], or contains characters outside printable ASCII.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::invalid_token_format("JWT header 'kid' is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::invalid_token_format(format!(
            "JWT header 'kid' exceeds {MAX_KID_LENGTH} bytes"
        )));
    }
    if !kid.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(AuthError::invalid_token_format(
            "JWT header 'kid' contains non-printable characters",
        ));
    }
    Ok(())
}

// Attacker-controlled; keep error messages bounded.
fn truncate(value: &str) -> &str {
    match value.char_indices().nth(32) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
