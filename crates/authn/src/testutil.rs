//! Shared test utilities for handshake authentication.
//!
//! Fixed RSA key pairs with their JWKs, token builders, a scriptable
//! in-memory [`KeySetSource`], and gateway event fixtures. Feature-gated
//! behind `testutil` so none of it reaches production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! wsgate-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use wsgate_authn::testutil::{TEST_KID, TestKey, create_signed_token, standard_claims};
//!
//! let token = create_signed_token(&standard_claims("user-1", "chat:write"), TEST_KID, TestKey::A);
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, EncodingKey, Header,
    jwk::{Jwk, JwkSet},
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::{
    config::AuthorizerConfig,
    jwks::{KeySetError, KeySetSource},
};

/// Key identifier of the primary fixture key.
pub const TEST_KID: &str = "test-key-a";

/// Key identifier of the secondary fixture key.
pub const OTHER_KID: &str = "test-key-b";

/// Audience the fixture config expects.
pub const TEST_AUDIENCE: &str = "my-app";

/// Issuer the fixture config expects.
pub const TEST_ISSUER: &str = "https://issuer.example/";

/// Region the fixture config is deployed in.
pub const TEST_REGION: &str = "eu-west-1";

/// Method ARN of the fixture handshake event.
pub const TEST_METHOD_ARN: &str =
    "arn:aws:execute-api:eu-west-1:123456789012:abc123/production/$connect";

/// Connection id of the fixture handshake event.
pub const TEST_CONNECTION_ID: &str = "L0SM9cOFvHcCIhw=";

const RSA_EXPONENT: &str = "AQAB";

/// One of two fixed 2048-bit RSA key pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKey {
    /// Primary key.
    A,
    /// Secondary key, unrelated to `A`.
    B,
}

impl TestKey {
    fn private_pem(self) -> &'static str {
        match self {
            Self::A => include_str!("../testdata/test_rsa_a.pem"),
            Self::B => include_str!("../testdata/test_rsa_b.pem"),
        }
    }

    /// Public modulus, base64url without padding.
    #[must_use]
    pub fn modulus(self) -> &'static str {
        match self {
            Self::A => {
                "najrksaj1-MGtfPfEcFvtAMezwz4mD7KxJkU_tohGajKrl6xQJz-byC6TKjbGbWYpk4rTrgUrPwcuFkz87PzTNlM7fCCPOgx9Pf5m2fI6iCk38U87SLoMVf6j86FXUWckUCXmnlukCWBrYLVZct6kv0_ABg83-BCPas_Ym0TjBDNgVytLWm04BtWStkhAhAtmlz8USUDDaOdHIuLoAqLmLAXVP_GAckn4mYoWMMBa-s2zOyEFxEQyFd8eqT_NdgVNk5wOw3fAfsM7RlaFUvGjfafdY_GHigqlFV_OwC6l1zfEAaO_9hUFCG3G8-_hT-cQfCIIEo3jyIbGkiEzfOQ3Q"
            },
            Self::B => {
                "w_Q87225uprrjB387PAYTYtTioz2IQ3mnnCoP6Y49mifOTFsXAalkzG_ahSphTcVw2l2Nsp-Qv_zxe4PKRGGhmfJ9W0Iy2WaIf5DReAdZx79ZaGPi7-4rfb-yDKVxXk6sej-5kS4OVPk41kxDe2XcGN2MEu3Ytw4h3fS0Mz5TMS4ssaelgarDLkZpT1a0zSMphNnWRPwPGD6AxhPHTArVGi_ZkKtadkQ3VQVOw-cJUwrdlD7oiLBBhFwC5zgukmITw8QhjssY4UNO3YVKfKEOwgGepZcBlgx0-idQcu_TxtqPVuITHlZHRBLcjAMb4MSntpIshK5w-wcvrT0oBsU8Q"
            },
        }
    }

    /// Signing key for this pair.
    ///
    /// # Panics
    ///
    /// Panics if the embedded PEM is unreadable.
    #[must_use]
    pub fn encoding_key(self) -> EncodingKey {
        EncodingKey::from_rsa_pem(self.private_pem().as_bytes()).expect("embedded test PEM")
    }
}

/// The public JWK for `key`, published under `kid` with `use: sig` and `alg: RS256`.
///
/// # Panics
///
/// Panics if the JWK JSON does not deserialize.
#[must_use]
pub fn rsa_jwk(kid: &str, key: TestKey) -> Jwk {
    serde_json::from_value(json!({
        "kty": "RSA",
        "kid": kid,
        "use": "sig",
        "alg": "RS256",
        "n": key.modulus(),
        "e": RSA_EXPONENT,
    }))
    .expect("fixture JWK")
}

/// A key set with one RSA JWK per `(kid, key)` entry.
#[must_use]
pub fn key_set(entries: &[(&str, TestKey)]) -> JwkSet {
    JwkSet { keys: entries.iter().map(|(kid, key)| rsa_jwk(kid, *key)).collect() }
}

/// Claims accepted by [`test_config`]: fixture `iss` and `aud`, one hour to live.
#[must_use]
pub fn standard_claims(sub: &str, scope: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "sub": sub,
        "scope": scope,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Signs `claims` with `key` using RS256, setting `kid` in the header.
///
/// # Panics
///
/// Panics if encoding fails.
#[must_use]
pub fn create_signed_token(claims: &Value, kid: &str, key: TestKey) -> String {
    create_signed_token_with_alg(claims, kid, key, Algorithm::RS256)
}

/// Signs `claims` with `key` using `algorithm`.
///
/// # Panics
///
/// Panics if encoding fails (for example, a non-RSA algorithm).
#[must_use]
pub fn create_signed_token_with_alg(
    claims: &Value,
    kid: &str,
    key: TestKey,
    algorithm: Algorithm,
) -> String {
    let mut header = Header::new(algorithm);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, &key.encoding_key()).expect("encode test token")
}

/// Builds `{header}.{payload}.` with an empty signature.
///
/// For forged tokens such as `alg: none` or algorithm confusion.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// A gateway handshake event; `token` goes into `queryStringParameters.auth`.
#[must_use]
pub fn handshake_event(token: Option<&str>) -> Value {
    let query = match token {
        Some(token) => json!({ "auth": token }),
        None => json!({}),
    };
    json!({
        "type": "REQUEST",
        "methodArn": TEST_METHOD_ARN,
        "queryStringParameters": query,
        "requestContext": {
            "domainName": "abc123.execute-api.eu-west-1.amazonaws.com",
            "stage": "production",
            "connectionId": TEST_CONNECTION_ID,
            "routeKey": "$connect",
            "apiId": "abc123",
        },
    })
}

/// Authorizer config matching the fixture claims and event.
///
/// # Panics
///
/// Panics if the fixture values fail validation.
#[must_use]
pub fn test_config() -> AuthorizerConfig {
    AuthorizerConfig::builder()
        .audience(TEST_AUDIENCE)
        .issuer(TEST_ISSUER)
        .region(TEST_REGION)
        .build()
        .expect("fixture config")
}

/// In-memory [`KeySetSource`] that counts fetches.
///
/// The served set can be swapped to simulate rotation, fetches can be
/// delayed to widen race windows, and failures can be injected.
pub struct StaticKeySetSource {
    set: RwLock<JwkSet>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
    failure: Mutex<Option<fn() -> KeySetError>>,
}

impl StaticKeySetSource {
    /// Serves `set` on every fetch.
    #[must_use]
    pub fn new(set: JwkSet) -> Self {
        Self { set: RwLock::new(set), fetches: AtomicUsize::new(0), delay: None, failure: Mutex::new(None) }
    }

    /// Sleeps for `delay` before answering each fetch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the served set.
    pub fn set_key_set(&self, set: JwkSet) {
        *self.set.write() = set;
    }

    /// Makes every subsequent fetch fail with `make_error()`.
    pub fn fail_with(&self, make_error: fn() -> KeySetError) {
        *self.failure.lock() = Some(make_error);
    }

    /// Stops injecting failures.
    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of fetches started so far.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetSource for StaticKeySetSource {
    async fn fetch_key_set(&self) -> Result<JwkSet, KeySetError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = *self.failure.lock();
        match failure {
            Some(make_error) => Err(make_error()),
            None => Ok(self.set.read().clone()),
        }
    }
}

/// Asserts that a [`Result<T, AuthError>`](crate::error::AuthError) is an
/// `Err` of the given variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use wsgate_authn::assert_auth_error;
/// use wsgate_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::missing_token());
/// assert_auth_error!(result, MissingToken);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        match &$result {
            Err($crate::error::AuthError::$variant { .. }) => {},
            other => panic!("expected AuthError::{}, got: {:?}", stringify!($variant), other),
        }
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        match &$result {
            Err($crate::error::AuthError::$variant { .. }) => {},
            other => {
                panic!("{}: expected AuthError::{}, got: {:?}", $msg, stringify!($variant), other)
            },
        }
    };
}
