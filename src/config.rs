//! Client configuration.
//!
//! Controls gateway retry behavior, cache bounds, change-monitor cadence,
//! and optional on-disk cache snapshots. Loadable from TOML.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

// Default values for client configuration
const DEFAULT_API_VERSION: &str = "2022-06-28";
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
const DEFAULT_FETCH_LIMIT: usize = 100;
const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the remote authority's RPC endpoints. Required by the
    /// HTTP gateway; unused with custom gateway implementations.
    pub base_url: String,
    /// Protocol version header value sent with every request.
    pub api_version: String,
    /// Maximum request attempts per gateway call (first try included).
    pub retry_attempts: u32,
    /// Base backoff between retries; doubles after each failed attempt.
    pub retry_base_backoff_ms: u64,
    /// Change monitor poll cadence.
    pub poll_interval_ms: u64,
    /// Bound on related records a single fetch may resolve at once.
    pub fetch_limit: usize,
    /// Maximum cached records before least-recently-accessed eviction.
    pub max_records: usize,
    /// Directory for on-disk cache snapshots; disabled when unset.
    pub persist_dir: Option<PathBuf>,
    /// Snapshot fingerprint. Derived from the session credential when unset
    /// and the HTTP gateway is used.
    pub cache_fingerprint: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_backoff_ms: DEFAULT_RETRY_BASE_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            max_records: DEFAULT_MAX_RECORDS,
            persist_dir: None,
            cache_fingerprint: None,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| Error::configuration(format!("invalid config: {err}")))
    }

    pub fn from_toml_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::configuration(format!("cannot read `{}`: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_base_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_base_backoff_ms)
    }

    /// Returns the retry budget, clamping to at least one attempt.
    pub fn retry_attempts_non_zero(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    /// Returns the record limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_records_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_records).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ClientConfig::default();
        assert!(config.base_url.is_empty());
        assert_eq!(config.api_version, "2022-06-28");
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_base_backoff_ms, 300);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.fetch_limit, 100);
        assert_eq!(config.max_records, 10_000);
        assert!(config.persist_dir.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://records.example/api/v3/"
            poll_interval_ms = 2500
            persist_dir = "/tmp/quaderno"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.base_url, "https://records.example/api/v3/");
        assert_eq!(config.poll_interval_ms, 2500);
        assert_eq!(config.persist_dir, Some(PathBuf::from("/tmp/quaderno")));
        // untouched fields keep their defaults
        assert_eq!(config.retry_attempts, 5);
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = ClientConfig::from_toml_str("base_url = [").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = ClientConfig {
            max_records: 0,
            retry_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.max_records_non_zero().get(), 1);
        assert_eq!(config.retry_attempts_non_zero(), 1);
    }
}
