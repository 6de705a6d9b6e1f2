//! Key-set retrieval.
//!
//! A [`KeySetSource`] returns the issuer's current JSON Web Key Set. The
//! production implementation, [`HttpKeySetSource`], performs one HTTP GET
//! against the configured key-set URL per call; caching, coalescing and rate
//! limiting are the [`KeyResolver`](crate::key_resolver::KeyResolver)'s job.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors produced while fetching a key set.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeySetError {
    /// The request could not be sent or the response body could not be read.
    #[error("Key set request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("Key set endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body is not a JSON Web Key Set.
    #[error("Key set response is not a valid JWK set: {0}")]
    Decode(#[source] serde_json::Error),

    /// The fetch did not finish within the configured timeout.
    #[error("Key set fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure, typically from a test double or fail point.
    #[error("Key set fetch failed: {0}")]
    Other(String),
}

impl KeySetError {
    /// Creates an `Other` error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Source of the issuer's JSON Web Key Set.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetches the current key set.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError`] if the set cannot be retrieved or parsed.
    async fn fetch_key_set(&self) -> Result<JwkSet, KeySetError>;
}

/// Fetches the key set over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    client: reqwest::Client,
    uri: Url,
}

impl HttpKeySetSource {
    /// Creates a source for `uri` whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`KeySetError::Transport`] if the HTTP client cannot be built
    /// (for example, when no TLS backend is available).
    pub fn new(uri: Url, timeout: Duration) -> Result<Self, KeySetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(KeySetError::Transport)?;
        Ok(Self { client, uri })
    }

    /// The key-set URL.
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    #[tracing::instrument(skip(self), fields(uri = %self.uri))]
    async fn fetch_key_set(&self) -> Result<JwkSet, KeySetError> {
        let response =
            self.client.get(self.uri.clone()).send().await.map_err(KeySetError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "key set endpoint returned error status");
            return Err(KeySetError::Status { status: status.as_u16() });
        }

        let body = response.bytes().await.map_err(KeySetError::Transport)?;
        let set = parse_key_set(&body)?;
        tracing::debug!(keys = set.keys.len(), "fetched key set");
        Ok(set)
    }
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Parses a key-set document.
///
/// Entries that cannot be represented as a [`Jwk`] (unsupported curves or
/// algorithms, missing members) are skipped so that one odd key does not
/// hide the usable ones.
///
/// # Errors
///
/// Returns [`KeySetError::Decode`] if the body is not a JSON object with a
/// `keys` array.
pub fn parse_key_set(body: &[u8]) -> Result<JwkSet, KeySetError> {
    let raw: RawKeySet = serde_json::from_slice(body).map_err(KeySetError::Decode)?;
    let keys = raw
        .keys
        .into_iter()
        .filter_map(|entry| {
            let kid = entry.get("kid").and_then(serde_json::Value::as_str).map(str::to_owned);
            match serde_json::from_value::<Jwk>(entry) {
                Ok(jwk) => Some(jwk),
                Err(err) => {
                    tracing::debug!(
                        kid = kid.as_deref().unwrap_or("-"),
                        error = %err,
                        "skipping unusable key set entry"
                    );
                    None
                },
            }
        })
        .collect();
    Ok(JwkSet { keys })
}
