//! Token decoding and verification.
//!
//! Two steps with separate types:
//!
//! 1. [`decode_unverified_header`] reads `alg` and `kid` from the header. The resulting
//!    [`UnverifiedHeader`] only says which key to fetch; it establishes no trust.
//! 2. [`verify_token`] checks the signature with the resolved key, then audience, issuer and
//!    expiry, and yields [`VerifiedClaims`].
//!
//! ```no_run
//! # use wsgate_authn::{jwt::{TokenExpectations, decode_unverified_header, verify_token}, KeyResolver};
//! # async fn example(token: &str, resolver: &KeyResolver) -> wsgate_authn::Result<()> {
//! let header = decode_unverified_header(token)?;
//! let key = resolver.resolve_key(&header.kid).await?;
//! let expected = TokenExpectations::new("my-app", "https://issuer.example/");
//! let claims = verify_token(token, &header, &key, &expected)?;
//! println!("principal {}", claims.sub);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;

use crate::{
    config::AuthorizerConfig,
    error::{AuthError, Result, VerificationFailure},
    key_resolver::ResolvedKey,
    validation::{validate_algorithm, validate_kid},
};

/// Upper bound on accepted token length in bytes.
pub const MAX_TOKEN_LENGTH: usize = 16 * 1024;

/// Header fields read before verification.
///
/// Untrusted: everything here came from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedHeader {
    /// Claimed key identifier.
    pub kid: String,
    /// Claimed signing algorithm, already restricted to the accepted list.
    pub algorithm: Algorithm,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: Option<String>,
    kid: Option<String>,
}

/// Claims extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    /// Subject; becomes the principal identifier.
    pub sub: String,
    /// Granted scope, empty when the token carries none.
    pub scope: String,
}

#[derive(Deserialize)]
struct HandshakeClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<ScopeClaim>,
}

/// `scope` as a space-delimited string (RFC 8693) or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeClaim {
    Text(String),
    List(Vec<String>),
}

impl ScopeClaim {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::List(items) => items.join(" "),
        }
    }
}

/// Values a token must carry to be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExpectations {
    audience: String,
    issuer: String,
    leeway: Duration,
}

impl TokenExpectations {
    /// Expect `audience` and `issuer` with no clock leeway.
    #[must_use]
    pub fn new(audience: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self { audience: audience.into(), issuer: issuer.into(), leeway: Duration::ZERO }
    }

    /// Sets the clock leeway for `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Takes audience, issuer and leeway from `config`.
    #[must_use]
    pub fn from_config(config: &AuthorizerConfig) -> Self {
        Self::new(config.audience(), config.issuer()).with_leeway(config.leeway())
    }

    /// Expected audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Expected issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.leeway.as_secs();
        validation
    }
}

/// Decodes the token header without verifying anything.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if:
/// - the token is oversized or not three dot-separated segments
/// - the header is not base64url JSON
/// - `alg` is absent, forbidden, or not in the accepted list
/// - `kid` is absent or malformed
pub fn decode_unverified_header(token: &str) -> Result<UnverifiedHeader> {
    if token.len() > MAX_TOKEN_LENGTH {
        return Err(AuthError::invalid_token_format("Token exceeds maximum length"));
    }

    let mut segments = token.split('.');
    let (Some(header_b64), Some(_), Some(_), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| AuthError::invalid_token_format("JWT header is not valid base64url"))?;
    let raw: RawHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| AuthError::invalid_token_format("JWT header is not valid JSON"))?;

    let alg = raw.alg.ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'alg'"))?;
    let algorithm = validate_algorithm(&alg)?;

    let kid = raw.kid.ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'kid'"))?;
    validate_kid(&kid)?;

    Ok(UnverifiedHeader { kid, algorithm })
}

/// Verifies `token` with `key` and returns its claims.
///
/// The key must have been resolved for `header.kid`; a key published under
/// another identifier is refused before any cryptography runs.
///
/// # Errors
///
/// Returns [`AuthError::TokenVerificationFailed`] if the key does not belong
/// to the header's `kid`, the key pins a different algorithm, the signature
/// is wrong, `aud`/`iss` do not match, the token is expired or not yet
/// valid, or `sub` is missing or empty.
pub fn verify_token(
    token: &str,
    header: &UnverifiedHeader,
    key: &ResolvedKey,
    expected: &TokenExpectations,
) -> Result<VerifiedClaims> {
    if key.kid() != header.kid {
        return Err(AuthError::verification_failed(VerificationFailure::KeyMismatch));
    }
    if let Some(pinned) = key.algorithm()
        && pinned != header.algorithm
    {
        return Err(AuthError::verification_failed(VerificationFailure::AlgorithmMismatch));
    }

    let data =
        decode::<HandshakeClaims>(token, key.decoding_key(), &expected.validation(header.algorithm))?;

    let sub = data
        .claims
        .sub
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::verification_failed(VerificationFailure::MissingClaim))?;
    let scope = data.claims.scope.map(ScopeClaim::into_string).unwrap_or_default();

    Ok(VerifiedClaims { sub, scope })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        KeyResolver,
        testutil::{
            OTHER_KID, StaticKeySetSource, TEST_AUDIENCE, TEST_ISSUER, TEST_KID, TestKey,
            craft_raw_jwt, create_signed_token, create_signed_token_with_alg, key_set,
            standard_claims,
        },
    };

    fn expectations() -> TokenExpectations {
        TokenExpectations::new(TEST_AUDIENCE, TEST_ISSUER)
    }

    async fn resolve(kid: &str, key: TestKey) -> Arc<ResolvedKey> {
        let source = Arc::new(StaticKeySetSource::new(key_set(&[(kid, key)])));
        KeyResolver::builder().source(source).build().resolve_key(kid).await.unwrap()
    }

    fn verify_failure(result: Result<VerifiedClaims>) -> VerificationFailure {
        match result {
            Err(AuthError::TokenVerificationFailed { reason }) => reason,
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unverified_header() {
        let token = create_signed_token(&standard_claims("user-1", "chat:write"), TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        assert_eq!(header.kid, TEST_KID);
        assert_eq!(header.algorithm, Algorithm::RS256);
    }

    #[rstest]
    #[case::empty("")]
    #[case::one_part("abc")]
    #[case::two_parts("abc.def")]
    #[case::four_parts("a.b.c.d")]
    #[case::bad_base64("!!!.e30.sig")]
    fn test_decode_header_rejects_malformed(#[case] token: &str) {
        let result = decode_unverified_header(token);
        assert!(matches!(result, Err(AuthError::InvalidTokenFormat { .. })), "{result:?}");
    }

    #[test]
    fn test_decode_header_requires_kid() {
        let token = craft_raw_jwt(&json!({"alg": "RS256", "typ": "JWT"}), &json!({"sub": "x"}));
        let err = decode_unverified_header(&token).unwrap_err();
        assert!(err.to_string().contains("kid"), "{err}");
    }

    #[rstest]
    #[case::none("none")]
    #[case::hs256("HS256")]
    #[case::es256("ES256")]
    fn test_decode_header_rejects_algorithms(#[case] alg: &str) {
        let token = craft_raw_jwt(&json!({"alg": alg, "kid": TEST_KID}), &json!({"sub": "x"}));
        assert!(matches!(
            decode_unverified_header(&token),
            Err(AuthError::InvalidTokenFormat { .. })
        ));
    }

    #[test]
    fn test_decode_header_rejects_oversized_token() {
        let token = format!("{}.e30.sig", "a".repeat(MAX_TOKEN_LENGTH));
        assert!(decode_unverified_header(&token).is_err());
    }

    #[tokio::test]
    async fn test_verify_token_success() {
        let token = create_signed_token(&standard_claims("user-1", "chat:write"), TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let claims = verify_token(&token, &header, &key, &expectations()).unwrap();
        assert_eq!(claims, VerifiedClaims { sub: "user-1".into(), scope: "chat:write".into() });
    }

    #[tokio::test]
    async fn test_verify_token_scope_defaults_to_empty() {
        let mut claims = standard_claims("user-1", "");
        claims.as_object_mut().unwrap().remove("scope");
        let token = create_signed_token(&claims, TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        assert_eq!(verify_token(&token, &header, &key, &expectations()).unwrap().scope, "");
    }

    #[tokio::test]
    async fn test_verify_token_scope_list_is_joined() {
        let mut claims = standard_claims("user-1", "");
        claims["scope"] = json!(["chat:read", "chat:write"]);
        let token = create_signed_token(&claims, TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        assert_eq!(
            verify_token(&token, &header, &key, &expectations()).unwrap().scope,
            "chat:read chat:write"
        );
    }

    #[tokio::test]
    async fn test_verify_token_wrong_key_material() {
        // Signed by B, published as A.
        let token = create_signed_token(&standard_claims("user-1", ""), TEST_KID, TestKey::B);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, VerificationFailure::InvalidSignature);
    }

    #[tokio::test]
    async fn test_verify_token_refuses_key_for_other_kid() {
        let token = create_signed_token(&standard_claims("user-1", ""), TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(OTHER_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, VerificationFailure::KeyMismatch);
    }

    #[rstest]
    #[case::audience("aud", json!("other-app"), VerificationFailure::InvalidAudience)]
    #[case::issuer("iss", json!("https://evil.example/"), VerificationFailure::InvalidIssuer)]
    #[case::expired("exp", json!(Utc::now().timestamp() - 60), VerificationFailure::Expired)]
    #[case::not_yet_valid("nbf", json!(Utc::now().timestamp() + 3600), VerificationFailure::NotYetValid)]
    #[tokio::test]
    async fn test_verify_token_claim_mismatch(
        #[case] claim: &str,
        #[case] value: serde_json::Value,
        #[case] expected: VerificationFailure,
    ) {
        let mut claims = standard_claims("user-1", "chat:write");
        claims[claim] = value;
        let token = create_signed_token(&claims, TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, expected);
    }

    #[rstest]
    #[case::exp("exp")]
    #[case::sub("sub")]
    #[tokio::test]
    async fn test_verify_token_required_claims(#[case] claim: &str) {
        let mut claims = standard_claims("user-1", "chat:write");
        claims.as_object_mut().unwrap().remove(claim);
        let token = create_signed_token(&claims, TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, VerificationFailure::MissingClaim);
    }

    #[tokio::test]
    async fn test_verify_token_empty_sub() {
        let token = create_signed_token(&standard_claims("", "chat:write"), TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, VerificationFailure::MissingClaim);
    }

    #[tokio::test]
    async fn test_verify_token_leeway_accepts_recent_expiry() {
        let mut claims = standard_claims("user-1", "");
        claims["exp"] = json!(Utc::now().timestamp() - 10);
        let token = create_signed_token(&claims, TEST_KID, TestKey::A);
        let header = decode_unverified_header(&token).unwrap();
        let key = resolve(TEST_KID, TestKey::A).await;

        let lenient = expectations().with_leeway(Duration::from_secs(60));
        assert!(verify_token(&token, &header, &key, &lenient).is_ok());
    }

    #[tokio::test]
    async fn test_verify_token_pinned_algorithm_mismatch() {
        let token = create_signed_token_with_alg(
            &standard_claims("user-1", ""),
            TEST_KID,
            TestKey::A,
            Algorithm::RS384,
        );
        let header = decode_unverified_header(&token).unwrap();
        // The fixture JWK pins RS256.
        let key = resolve(TEST_KID, TestKey::A).await;

        let reason = verify_failure(verify_token(&token, &header, &key, &expectations()));
        assert_eq!(reason, VerificationFailure::AlgorithmMismatch);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;
        use crate::validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS};

        proptest! {
            /// Header decoding returns an error, never a panic, for any input.
            #[test]
            fn decode_header_never_panics(token in "\\PC{0,256}") {
                let _ = decode_unverified_header(&token);
            }

            /// Well-formed headers with an accepted algorithm decode to the
            /// same `kid` and `alg`.
            #[test]
            fn accepted_header_round_trips(
                kid in "[A-Za-z0-9._:-]{1,64}",
                alg in proptest::sample::select(ACCEPTED_ALGORITHMS),
            ) {
                let token = craft_raw_jwt(&json!({"alg": alg, "kid": kid}), &json!({"sub": "x"}));
                let header = decode_unverified_header(&token).expect("accepted header should decode");
                prop_assert_eq!(header.kid, kid);
                prop_assert_eq!(format!("{:?}", header.algorithm), alg);
            }

            /// Forbidden algorithms are refused whatever the key identifier.
            #[test]
            fn forbidden_algorithm_is_refused(
                kid in "[A-Za-z0-9._:-]{1,64}",
                alg in proptest::sample::select(FORBIDDEN_ALGORITHMS),
            ) {
                let token = craft_raw_jwt(&json!({"alg": alg, "kid": kid}), &json!({"sub": "x"}));
                let is_format_error =
                    matches!(decode_unverified_header(&token), Err(AuthError::InvalidTokenFormat { .. }));
                prop_assert!(is_format_error);
            }
        }
    }
}
