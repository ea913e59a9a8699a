//! Configuration Module
//!
//! Handles loading and validating cache and gateway configuration from
//! environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{FreshnessWindow, DEFAULT_PREFIX};
use crate::error::ConfigError;
use crate::remote::RetryPolicy;

/// Runtime configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Age below which an entry is served without revalidation
    pub fresh_for_secs: u64,
    /// Age at which an entry is discarded
    pub stale_for_secs: u64,
    /// Lifetime of a cached profile or session identity
    pub profile_ttl_secs: u64,
    /// Ceiling for a single remote attempt
    pub fetch_timeout_ms: u64,
    /// Total attempts for transient failures
    pub fetch_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Quiet period before a filter change triggers a query
    pub debounce_ms: u64,
    /// Maximum number of entries the memory tier holds
    pub max_entries: usize,
    /// Expiry sweep interval in seconds
    pub cleanup_interval: u64,
    pub cache_dir: PathBuf,
    pub cache_prefix: String,
    /// HTTP server port
    pub server_port: u16,
    /// Remote store URL; in-memory backend when unset
    pub backend_url: Option<String>,
    pub backend_api_key: Option<String>,
}

fn parse_var<T: FromStr>(
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Unparsable {
            name,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `FRESH_FOR_SECS` - Fresh window (default: 300)
    /// - `STALE_FOR_SECS` - Stale window, must exceed the fresh window (default: 900)
    /// - `PROFILE_TTL_SECS` - Profile cache lifetime (default: 300)
    /// - `FETCH_TIMEOUT_MS` - Per-attempt ceiling (default: 8000)
    /// - `FETCH_MAX_ATTEMPTS` - Attempts for transient failures (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - Backoff base (default: 500)
    /// - `DEBOUNCE_MS` - Filter-change debounce (default: 500)
    /// - `MAX_ENTRIES` - Memory-tier capacity (default: 1000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 60)
    /// - `CACHE_DIR` - Durable tier directory (default: .cache/indicators)
    /// - `CACHE_PREFIX` - Durable entry namespace (default: sci-historico-cache-)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `BACKEND_URL`, `BACKEND_API_KEY` - Remote store (default: unset)
    ///
    /// Unparsable values and an inverted freshness window are errors rather
    /// than silent fallbacks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            fresh_for_secs: parse_var("FRESH_FOR_SECS", "integer", defaults.fresh_for_secs)?,
            stale_for_secs: parse_var("STALE_FOR_SECS", "integer", defaults.stale_for_secs)?,
            profile_ttl_secs: parse_var("PROFILE_TTL_SECS", "integer", defaults.profile_ttl_secs)?,
            fetch_timeout_ms: parse_var("FETCH_TIMEOUT_MS", "integer", defaults.fetch_timeout_ms)?,
            fetch_max_attempts: parse_var(
                "FETCH_MAX_ATTEMPTS",
                "integer",
                defaults.fetch_max_attempts,
            )?,
            retry_base_delay_ms: parse_var(
                "RETRY_BASE_DELAY_MS",
                "integer",
                defaults.retry_base_delay_ms,
            )?,
            debounce_ms: parse_var("DEBOUNCE_MS", "integer", defaults.debounce_ms)?,
            max_entries: parse_var("MAX_ENTRIES", "integer", defaults.max_entries)?,
            cleanup_interval: parse_var("CLEANUP_INTERVAL", "integer", defaults.cleanup_interval)?,
            cache_dir: optional_var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_prefix: optional_var("CACHE_PREFIX").unwrap_or(defaults.cache_prefix),
            server_port: parse_var("SERVER_PORT", "port number", defaults.server_port)?,
            backend_url: optional_var("BACKEND_URL"),
            backend_api_key: optional_var("BACKEND_API_KEY"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fresh_for_secs >= self.stale_for_secs {
            return Err(ConfigError::InvertedWindow {
                fresh: self.fresh_for_secs,
                stale: self.stale_for_secs,
            });
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Zero("MAX_ENTRIES"));
        }
        if self.fetch_max_attempts == 0 {
            return Err(ConfigError::Zero("FETCH_MAX_ATTEMPTS"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Zero("FETCH_TIMEOUT_MS"));
        }
        if self.cleanup_interval == 0 {
            return Err(ConfigError::Zero("CLEANUP_INTERVAL"));
        }
        Ok(())
    }

    pub fn freshness_window(&self) -> Result<FreshnessWindow, ConfigError> {
        FreshnessWindow::new(
            Duration::from_secs(self.fresh_for_secs),
            Duration::from_secs(self.stale_for_secs),
        )
        .map_err(|_| ConfigError::InvertedWindow {
            fresh: self.fresh_for_secs,
            stale: self.stale_for_secs,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            timeout: Duration::from_millis(self.fetch_timeout_ms),
        }
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fresh_for_secs: 300,
            stale_for_secs: 900,
            profile_ttl_secs: 300,
            fetch_timeout_ms: 8000,
            fetch_max_attempts: 3,
            retry_base_delay_ms: 500,
            debounce_ms: 500,
            max_entries: 1000,
            cleanup_interval: 60,
            cache_dir: PathBuf::from(".cache/indicators"),
            cache_prefix: DEFAULT_PREFIX.to_string(),
            server_port: 3000,
            backend_url: None,
            backend_api_key: None,
        }
    }
}
