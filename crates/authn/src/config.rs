//! Authorizer configuration.
//!
//! [`AuthorizerConfig`] is built once at process start, either through its
//! builder or from the environment via [`AuthorizerConfig::from_env`]. A
//! missing or invalid required setting is a [`ConfigError`] and the process
//! should not start.
//!
//! # Environment
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `AUDIENCE` | yes | |
//! | `ISSUER` | yes | |
//! | `AWS_REGION` | yes | |
//! | `JWKS_URI` | no | `<ISSUER>/.well-known/jwks.json` |
//! | `JWKS_REQUESTS_PER_MINUTE` | no | 10 |
//! | `JWKS_FETCH_TIMEOUT` | no | 5s |
//! | `KEY_CACHE_TTL` | no | 10m |
//! | `KEY_CACHE_CAPACITY` | no | 5 |
//! | `TOKEN_LEEWAY` | no | 0s |
//!
//! Durations use humantime syntax (`"30s"`, `"10m"`).
//!
//! # Example
//!
//! ```
//! use wsgate_authn::AuthorizerConfig;
//!
//! let config = AuthorizerConfig::builder()
//!     .audience("my-app")
//!     .issuer("https://issuer.example/")
//!     .region("eu-west-1")
//!     .build()?;
//!
//! assert_eq!(config.jwks_uri().as_str(), "https://issuer.example/.well-known/jwks.json");
//! # Ok::<(), wsgate_authn::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default number of key-set fetches admitted per minute.
pub const DEFAULT_JWKS_REQUESTS_PER_MINUTE: u32 = 10;

/// Default timeout for a single key-set fetch.
pub const DEFAULT_JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default lifetime of a cached signing key.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default maximum number of cached signing keys.
///
/// Key sets are small; a handful of entries covers a rotation overlap.
pub const DEFAULT_KEY_CACHE_CAPACITY: u64 = 5;

/// Default clock leeway applied to `exp` and `nbf`.
pub const DEFAULT_LEEWAY: Duration = Duration::ZERO;

/// Path of the key set relative to the issuer base URL.
pub const JWKS_PATH: &str = ".well-known/jwks.json";

/// Configuration for the handshake authorizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizerConfig {
    /// Expected `aud` claim.
    pub(crate) audience: String,

    /// Expected `iss` claim; also the base of the default key-set URL.
    pub(crate) issuer: String,

    /// Region the gateway API is deployed in.
    pub(crate) region: String,

    /// Key-set endpoint.
    pub(crate) jwks_uri: Url,

    /// Key-set fetches admitted per minute.
    pub(crate) jwks_requests_per_minute: u32,

    /// Timeout for a single key-set fetch.
    #[serde(with = "humantime_serde")]
    pub(crate) jwks_fetch_timeout: Duration,

    /// Lifetime of a cached signing key.
    #[serde(with = "humantime_serde")]
    pub(crate) key_cache_ttl: Duration,

    /// Maximum number of cached signing keys.
    pub(crate) key_cache_capacity: u64,

    /// Clock leeway for `exp`/`nbf`.
    #[serde(with = "humantime_serde", default)]
    pub(crate) leeway: Duration,
}

#[bon::bon]
impl AuthorizerConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `audience`, `issuer` or `region` is empty
    /// - `issuer` is not an absolute http(s) URL
    /// - `jwks_requests_per_minute`, `jwks_fetch_timeout` or `key_cache_capacity` is zero
    #[builder]
    pub fn new(
        #[builder(into)] audience: String,
        #[builder(into)] issuer: String,
        #[builder(into)] region: String,
        jwks_uri: Option<Url>,
        #[builder(default = DEFAULT_JWKS_REQUESTS_PER_MINUTE)] jwks_requests_per_minute: u32,
        #[builder(default = DEFAULT_JWKS_FETCH_TIMEOUT)] jwks_fetch_timeout: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] key_cache_ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_CAPACITY)] key_cache_capacity: u64,
        #[builder(default = DEFAULT_LEEWAY)] leeway: Duration,
    ) -> Result<Self, ConfigError> {
        let jwks_uri = match jwks_uri {
            Some(uri) => uri,
            None => {
                require("ISSUER", &issuer)?;
                derive_jwks_uri(&issuer)?
            },
        };

        let config = Self {
            audience,
            issuer,
            region,
            jwks_uri,
            jwks_requests_per_minute,
            jwks_fetch_timeout,
            key_cache_ttl,
            key_cache_capacity,
            leeway,
        };
        config.validate()?;
        Ok(config)
    }
}

impl AuthorizerConfig {
    /// Loads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or any
    /// variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as absent.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::missing(name));

        let jwks_uri = get("JWKS_URI")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| ConfigError::invalid("JWKS_URI", e.to_string()))
            })
            .transpose()?;

        Self::builder()
            .audience(required("AUDIENCE")?)
            .issuer(required("ISSUER")?)
            .region(required("AWS_REGION")?)
            .maybe_jwks_uri(jwks_uri)
            .maybe_jwks_requests_per_minute(parse_number(
                "JWKS_REQUESTS_PER_MINUTE",
                get("JWKS_REQUESTS_PER_MINUTE"),
            )?)
            .maybe_jwks_fetch_timeout(parse_duration(
                "JWKS_FETCH_TIMEOUT",
                get("JWKS_FETCH_TIMEOUT"),
            )?)
            .maybe_key_cache_ttl(parse_duration("KEY_CACHE_TTL", get("KEY_CACHE_TTL"))?)
            .maybe_key_cache_capacity(parse_number(
                "KEY_CACHE_CAPACITY",
                get("KEY_CACHE_CAPACITY"),
            )?)
            .maybe_leeway(parse_duration("TOKEN_LEEWAY", get("TOKEN_LEEWAY"))?)
            .build()
    }

    /// Re-checks invariants; call after deserializing from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `audience`, `issuer` or `region`
    /// is blank, otherwise [`ConfigError::Invalid`] for the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("AUDIENCE", &self.audience)?;
        require("ISSUER", &self.issuer)?;
        require("AWS_REGION", &self.region)?;
        parse_issuer(&self.issuer)?;
        if !matches!(self.jwks_uri.scheme(), "https" | "http") {
            return Err(ConfigError::invalid("JWKS_URI", "scheme must be http or https"));
        }
        if self.jwks_requests_per_minute == 0 {
            return Err(ConfigError::invalid("JWKS_REQUESTS_PER_MINUTE", "must be at least 1"));
        }
        if self.jwks_fetch_timeout.is_zero() {
            return Err(ConfigError::invalid("JWKS_FETCH_TIMEOUT", "must be non-zero"));
        }
        if self.key_cache_capacity == 0 {
            return Err(ConfigError::invalid("KEY_CACHE_CAPACITY", "must be at least 1"));
        }
        Ok(())
    }

    /// Expected `aud` claim.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Expected `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Deployment region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Key-set endpoint.
    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Key-set fetches admitted per minute.
    #[must_use]
    pub fn jwks_requests_per_minute(&self) -> u32 {
        self.jwks_requests_per_minute
    }

    /// Timeout for a single key-set fetch.
    #[must_use]
    pub fn jwks_fetch_timeout(&self) -> Duration {
        self.jwks_fetch_timeout
    }

    /// Lifetime of a cached signing key.
    #[must_use]
    pub fn key_cache_ttl(&self) -> Duration {
        self.key_cache_ttl
    }

    /// Maximum number of cached signing keys.
    #[must_use]
    pub fn key_cache_capacity(&self) -> u64 {
        self.key_cache_capacity
    }

    /// Clock leeway for `exp`/`nbf`.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }
}

fn require(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::missing(name));
    }
    Ok(())
}

fn parse_issuer(issuer: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(issuer).map_err(|e| ConfigError::invalid("ISSUER", e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(ConfigError::invalid("ISSUER", "scheme must be http or https"));
    }
    Ok(url)
}

/// `<issuer-base>/.well-known/jwks.json`, tolerating a trailing slash on the issuer.
fn derive_jwks_uri(issuer: &str) -> Result<Url, ConfigError> {
    parse_issuer(issuer)?;
    let base = issuer.trim_end_matches('/');
    Url::parse(&format!("{base}/{JWKS_PATH}"))
        .map_err(|e| ConfigError::invalid("ISSUER", e.to_string()))
}

fn parse_duration(name: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    raw.map(|v| humantime::parse_duration(v.trim()).map_err(|e| ConfigError::invalid(name, e.to_string())))
        .transpose()
}

fn parse_number<T>(name: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| v.trim().parse::<T>().map_err(|e| ConfigError::invalid(name, e.to_string())))
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("AUDIENCE", "my-app"),
        ("ISSUER", "https://issuer.example/"),
        ("AWS_REGION", "eu-west-1"),
    ];

    #[test]
    fn test_from_lookup_defaults() {
        let config = AuthorizerConfig::from_lookup(env(REQUIRED)).unwrap();

        assert_eq!(config.audience(), "my-app");
        assert_eq!(config.issuer(), "https://issuer.example/");
        assert_eq!(config.region(), "eu-west-1");
        assert_eq!(config.jwks_uri().as_str(), "https://issuer.example/.well-known/jwks.json");
        assert_eq!(config.jwks_requests_per_minute(), DEFAULT_JWKS_REQUESTS_PER_MINUTE);
        assert_eq!(config.jwks_fetch_timeout(), DEFAULT_JWKS_FETCH_TIMEOUT);
        assert_eq!(config.key_cache_ttl(), DEFAULT_KEY_CACHE_TTL);
        assert_eq!(config.leeway(), Duration::ZERO);
    }

    #[test]
    fn test_issuer_without_trailing_slash() {
        let config = AuthorizerConfig::builder()
            .audience("a")
            .issuer("https://tenant.auth.example")
            .region("us-east-1")
            .build()
            .unwrap();
        assert_eq!(config.jwks_uri().as_str(), "https://tenant.auth.example/.well-known/jwks.json");
    }

    #[rstest]
    #[case::audience("AUDIENCE")]
    #[case::issuer("ISSUER")]
    #[case::region("AWS_REGION")]
    fn test_missing_required_setting(#[case] missing: &str) {
        let pairs: Vec<(&str, &str)> =
            REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
        let err = AuthorizerConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name } if name == missing), "got {err:?}");
    }

    #[test]
    fn test_blank_required_setting_is_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs[0] = ("AUDIENCE", "   ");
        let err = AuthorizerConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "AUDIENCE" }));
    }

    #[test]
    fn test_optional_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("JWKS_URI", "https://keys.example/jwks"),
            ("JWKS_REQUESTS_PER_MINUTE", "3"),
            ("JWKS_FETCH_TIMEOUT", "750ms"),
            ("KEY_CACHE_TTL", "1h"),
            ("KEY_CACHE_CAPACITY", "16"),
            ("TOKEN_LEEWAY", "30s"),
        ]);
        let config = AuthorizerConfig::from_lookup(env(&pairs)).unwrap();

        assert_eq!(config.jwks_uri().as_str(), "https://keys.example/jwks");
        assert_eq!(config.jwks_requests_per_minute(), 3);
        assert_eq!(config.jwks_fetch_timeout(), Duration::from_millis(750));
        assert_eq!(config.key_cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.key_cache_capacity(), 16);
        assert_eq!(config.leeway(), Duration::from_secs(30));
    }

    #[rstest]
    #[case::bad_issuer("ISSUER", "not a url")]
    #[case::ftp_issuer("ISSUER", "ftp://issuer.example/")]
    #[case::zero_rate("JWKS_REQUESTS_PER_MINUTE", "0")]
    #[case::bad_rate("JWKS_REQUESTS_PER_MINUTE", "ten")]
    #[case::bad_timeout("JWKS_FETCH_TIMEOUT", "soon")]
    #[case::zero_capacity("KEY_CACHE_CAPACITY", "0")]
    fn test_invalid_setting(#[case] name: &str, #[case] value: &str) {
        let mut pairs: Vec<(&str, &str)> =
            REQUIRED.iter().copied().filter(|(k, _)| *k != name).collect();
        pairs.push((name, value));
        let err = AuthorizerConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: n, .. } if n == name), "got {err:?}");
    }

    #[test]
    fn test_deserialize_humantime() {
        let json = serde_json::json!({
            "audience": "my-app",
            "issuer": "https://issuer.example/",
            "region": "eu-west-1",
            "jwks_uri": "https://issuer.example/.well-known/jwks.json",
            "jwks_requests_per_minute": 10,
            "jwks_fetch_timeout": "5s",
            "key_cache_ttl": "10m",
            "key_cache_capacity": 5
        });
        let config: AuthorizerConfig = serde_json::from_value(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.key_cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.leeway(), Duration::ZERO);
    }

    #[rstest]
    #[case::audience("audience", "AUDIENCE")]
    #[case::issuer("issuer", "ISSUER")]
    #[case::region("region", "AWS_REGION")]
    fn test_validate_rejects_blank_deserialized_field(
        #[case] field: &str,
        #[case] expected: &str,
    ) {
        let mut json = serde_json::json!({
            "audience": "my-app",
            "issuer": "https://issuer.example/",
            "region": "eu-west-1",
            "jwks_uri": "https://issuer.example/.well-known/jwks.json",
            "jwks_requests_per_minute": 10,
            "jwks_fetch_timeout": "5s",
            "key_cache_ttl": "10m",
            "key_cache_capacity": 5
        });
        json[field] = serde_json::json!(" ");
        let config: AuthorizerConfig = serde_json::from_value(json).unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name } if name == expected), "got {err:?}");
    }

    #[test]
    fn test_builder_rejects_blank_region() {
        let err = AuthorizerConfig::builder()
            .audience("a")
            .issuer("https://issuer.example/")
            .region("")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "AWS_REGION" }));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = serde_json::json!({
            "audience": "my-app",
            "issuer": "https://issuer.example/",
            "region": "eu-west-1",
            "jwks_uri": "https://issuer.example/.well-known/jwks.json",
            "jwks_requests_per_minute": 10,
            "jwks_fetch_timeout": "5s",
            "key_cache_ttl": "10m",
            "key_cache_capacity": 5,
            "secret": "nope"
        });
        assert!(serde_json::from_value::<AuthorizerConfig>(json).is_err());
    }
}
