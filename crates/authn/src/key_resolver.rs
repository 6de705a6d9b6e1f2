//! Signing-key resolution with caching, coalescing and fetch rate limiting.
//!
//! [`KeyResolver`] maps a key identifier (`kid`) to verification key
//! material taken from the issuer's key set.
//!
//! # Architecture
//!
//! ```text
//! kid → check local cache
//!     → miss? acquire a fetch token (rate limiter)
//!     → fetch key set (timeout-bounded, one request per kid however many callers wait)
//!     → select the RSA signing key with this kid
//!     → cache the decoding key
//! ```
//!
//! # Cache Strategy
//!
//! - **TTL**: default 10 minutes; key rotation is picked up when an unknown `kid` appears or an
//!   entry expires
//! - **Capacity**: small and bounded; key sets only carry a handful of keys
//! - **Failures**: never cached, so the next caller retries (subject to the rate limit)
//!
//! Keys live only for the lifetime of the process.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use fail::fail_point;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
use moka::future::Cache;

use crate::{
    config::{
        AuthorizerConfig, DEFAULT_JWKS_FETCH_TIMEOUT, DEFAULT_JWKS_REQUESTS_PER_MINUTE,
        DEFAULT_KEY_CACHE_CAPACITY, DEFAULT_KEY_CACHE_TTL,
    },
    error::{AuthError, Result},
    jwks::{KeySetError, KeySetSource},
    rate_limiter::{FetchRateConfig, FetchRateLimiter, FetchRateMetrics},
};

/// Verification key material for one key identifier.
#[derive(Clone)]
pub struct ResolvedKey {
    kid: String,
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl ResolvedKey {
    /// The key identifier this material was published under.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm pinned by the key set entry, if it declares one.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Key for signature verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Snapshot of resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyResolverMetrics {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing cached.
    pub misses: u64,
    /// Outbound key-set fetches started.
    pub fetches: u64,
    /// Fetches or key selections that failed.
    pub fetch_failures: u64,
    /// Misses refused by the fetch rate limiter.
    pub rate_limited: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    rate_limited: AtomicU64,
}

/// Resolves signing keys by identifier.
///
/// Explicitly constructed and injected; there is no process-wide instance.
/// Cheap to share behind an `Arc`.
pub struct KeyResolver {
    cache: Cache<String, Arc<ResolvedKey>>,
    source: Arc<dyn KeySetSource>,
    limiter: FetchRateLimiter,
    fetch_timeout: Duration,
    counters: Counters,
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("entry_count", &self.cache.entry_count())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl KeyResolver {
    /// Creates a resolver over `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - Where key sets come from
    /// * `cache_ttl` - Lifetime of a cached key
    /// * `cache_capacity` - Maximum number of cached keys
    /// * `fetches_per_minute` - Outbound fetch budget
    /// * `fetch_timeout` - Upper bound on a single fetch
    #[builder]
    pub fn new(
        source: Arc<dyn KeySetSource>,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] cache_ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_CAPACITY)] cache_capacity: u64,
        #[builder(default = DEFAULT_JWKS_REQUESTS_PER_MINUTE)] fetches_per_minute: u32,
        #[builder(default = DEFAULT_JWKS_FETCH_TIMEOUT)] fetch_timeout: Duration,
    ) -> Self {
        let cache = Cache::builder().max_capacity(cache_capacity).time_to_live(cache_ttl).build();

        Self {
            cache,
            source,
            limiter: FetchRateLimiter::new(FetchRateConfig::per_minute(fetches_per_minute)),
            fetch_timeout,
            counters: Counters::default(),
        }
    }
}

impl KeyResolver {
    /// Creates a resolver with the cache and fetch settings from `config`.
    #[must_use]
    pub fn from_config(source: Arc<dyn KeySetSource>, config: &AuthorizerConfig) -> Self {
        Self::builder()
            .source(source)
            .cache_ttl(config.key_cache_ttl())
            .cache_capacity(config.key_cache_capacity())
            .fetches_per_minute(config.jwks_requests_per_minute())
            .fetch_timeout(config.jwks_fetch_timeout())
            .build()
    }

    /// Returns the verification key published under `kid`.
    ///
    /// Cache hits never touch the network. On a miss, exactly one fetch runs
    /// per identifier; concurrent callers for the same `kid` wait on it and
    /// receive the same key or the same error.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimitExceeded`] if the fetch budget is exhausted
    /// - [`AuthError::KeyFetch`] if the fetch fails, times out, or the set has no usable RSA
    ///   signing key for `kid`
    #[tracing::instrument(skip(self))]
    pub async fn resolve_key(&self, kid: &str) -> Result<Arc<ResolvedKey>> {
        if let Some(key) = self.cache.get(kid).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = "hit", "signing key served from cache");
            return Ok(key);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = "miss", "signing key not cached");

        self.cache
            .try_get_with(kid.to_owned(), self.fetch_and_select(kid))
            .await
            .map_err(|shared| (*shared).clone())
    }

    async fn fetch_and_select(&self, kid: &str) -> Result<Arc<ResolvedKey>> {
        if let Err(err) = self.limiter.check() {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "key set fetch refused by rate limiter");
            return Err(err);
        }

        fail_point!("key-set-before-fetch", |_| {
            self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
            Err(AuthError::key_fetch_with_source(
                kid,
                "key set unavailable",
                KeySetError::other("injected failure before key set fetch"),
            ))
        });

        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch_key_set()).await;
        let outcome = match fetched {
            Ok(Ok(set)) => select_key(&set, kid),
            Ok(Err(err)) => Err(AuthError::key_fetch_with_source(kid, "key set unavailable", err)),
            Err(_) => Err(AuthError::key_fetch_with_source(
                kid,
                "key set unavailable",
                KeySetError::Timeout(self.fetch_timeout),
            )),
        };

        match outcome {
            Ok(key) => {
                tracing::debug!(algorithm = ?key.algorithm, "signing key resolved from key set");
                Ok(Arc::new(key))
            },
            Err(err) => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "signing key resolution failed");
                Err(err)
            },
        }
    }

    /// Drops the cached key for `kid`.
    ///
    /// The next lookup fetches the key set again.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, kid: &str) {
        self.cache.invalidate(kid).await;
        tracing::info!(
            audit.action = "invalidate_key",
            audit.resource = %format_args!("kid:{kid}"),
            audit.result = "success",
            "audit_event"
        );
    }

    /// Drops every cached key.
    ///
    /// Use on a known rotation event; each distinct `kid` then costs one fetch.
    #[tracing::instrument(skip(self))]
    pub fn clear_all(&self) {
        let evicted = self.cache.entry_count();
        self.cache.invalidate_all();
        tracing::info!(
            audit.action = "clear_key_cache",
            audit.resource = "all_signing_keys",
            audit.result = "success",
            audit.evicted = evicted,
            "audit_event"
        );
    }

    /// Returns the current cache entry count.
    ///
    /// Eventually consistent; call `sync` first in tests.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Returns a snapshot of the resolver counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> KeyResolverMetrics {
        KeyResolverMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
        }
    }

    /// Returns a snapshot of the fetch rate limiter counters.
    #[must_use]
    pub fn rate_limit_metrics(&self) -> FetchRateMetrics {
        self.limiter.metrics_snapshot()
    }

    /// Flushes pending cache maintenance so counts are exact.
    #[cfg(any(test, feature = "testutil"))]
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Picks the RSA signing key published under `kid`.
fn select_key(set: &JwkSet, kid: &str) -> Result<ResolvedKey> {
    let jwk = set
        .find(kid)
        .ok_or_else(|| AuthError::key_fetch(kid, "no key with this identifier in key set"))?;

    if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
        return Err(AuthError::key_fetch(kid, "key is not an RSA key"));
    }

    match &jwk.common.public_key_use {
        None | Some(PublicKeyUse::Signature) => {},
        Some(_) => return Err(AuthError::key_fetch(kid, "key is not a signing key")),
    }

    let algorithm = pinned_algorithm(jwk, kid)?;
    let decoding_key = DecodingKey::from_jwk(jwk)
        .map_err(|e| AuthError::key_fetch_with_source(kid, "unusable key material", e))?;

    Ok(ResolvedKey { kid: kid.to_owned(), algorithm, decoding_key })
}

fn pinned_algorithm(jwk: &Jwk, kid: &str) -> Result<Option<Algorithm>> {
    let Some(declared) = jwk.common.key_algorithm.as_ref() else {
        return Ok(None);
    };
    let algorithm = match declared {
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        _ => return Err(AuthError::key_fetch(kid, "key declares a non-RSA-signature algorithm")),
    };
    Ok(Some(algorithm))
}
