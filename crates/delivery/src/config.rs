//! Delivery configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DELIVERY_SEND_TIMEOUT` | 10s |
//! | `DELIVERY_MAX_CONCURRENCY` | 64 |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default upper bound on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of sends a batch keeps in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// Configuration for the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Upper bound on a single send, on top of the transport's own timeout.
    #[serde(with = "humantime_serde", default = "default_send_timeout")]
    pub(crate) send_timeout: Duration,

    /// Sends a batch keeps in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub(crate) max_concurrency: usize,
}

fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { send_timeout: DEFAULT_SEND_TIMEOUT, max_concurrency: DEFAULT_MAX_CONCURRENCY }
    }
}

#[bon::bon]
impl DeliveryConfig {
    /// Creates a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `send_timeout` or `max_concurrency` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_SEND_TIMEOUT)] send_timeout: Duration,
        #[builder(default = DEFAULT_MAX_CONCURRENCY)] max_concurrency: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { send_timeout, max_concurrency };
        config.validate()?;
        Ok(config)
    }
}

impl DeliveryConfig {
    /// Loads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let send_timeout = get("DELIVERY_SEND_TIMEOUT")
            .map(|raw| {
                humantime::parse_duration(raw.trim())
                    .map_err(|e| ConfigError::invalid("DELIVERY_SEND_TIMEOUT", e.to_string()))
            })
            .transpose()?;
        let max_concurrency = get("DELIVERY_MAX_CONCURRENCY")
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| ConfigError::invalid("DELIVERY_MAX_CONCURRENCY", e.to_string()))
            })
            .transpose()?;

        Self::builder()
            .maybe_send_timeout(send_timeout)
            .maybe_max_concurrency(max_concurrency)
            .build()
    }

    /// Re-checks invariants; call after deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_timeout.is_zero() {
            return Err(ConfigError::invalid("DELIVERY_SEND_TIMEOUT", "must be non-zero"));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("DELIVERY_MAX_CONCURRENCY", "must be at least 1"));
        }
        Ok(())
    }

    /// Upper bound on a single send.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Sends a batch keeps in flight at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}
