//! Configuration for the read-through cache

use crate::config::{parse_number, parse_secs};
use crate::error::{Result, WarehouseError};
use crate::gateway::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`ReadThroughCache`](crate::cache::ReadThroughCache)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window used by `get_default` and for `ttl = 0` fetches
    pub default_ttl: Duration,

    /// Maximum number of entries before least recently used ones are evicted
    pub max_entries: usize,

    /// Upper bound for one gateway call, per attempt
    pub fetch_timeout: Duration,

    /// Retries for transient gateway failures inside one fetch
    pub retry: RetryPolicy,

    /// How long an entry is kept past its ttl before `purge_expired` drops it
    ///
    /// Stale entries remain reachable through `get_cached_if_present` until
    /// then.
    pub max_stale: Duration,

    /// Interval of the background purge; `None` disables it
    pub cleanup_interval: Option<Duration>,

    /// Enable metrics collection
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            max_entries: 1_000,
            fetch_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            max_stale: Duration::from_secs(3600),
            cleanup_interval: Some(Duration::from_secs(300)),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(WarehouseError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if self.max_entries == 0 {
            return Err(WarehouseError::ConfigError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(WarehouseError::ConfigError(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(WarehouseError::ConfigError(
                "retry jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if matches!(self.cleanup_interval, Some(interval) if interval.is_zero()) {
            return Err(WarehouseError::ConfigError(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Read overrides from the process environment on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = CacheConfig::builder();
        if let Some(ttl) = parse_secs(&lookup, "FRAUDBOARD_CACHE_TTL_SECS")? {
            builder = builder.default_ttl(ttl);
        }
        if let Some(max) = parse_number::<usize, _>(&lookup, "FRAUDBOARD_CACHE_MAX_ENTRIES")? {
            builder = builder.max_entries(max);
        }
        if let Some(timeout) = parse_secs(&lookup, "FRAUDBOARD_FETCH_TIMEOUT_SECS")? {
            builder = builder.fetch_timeout(timeout);
        }
        if let Some(retries) = parse_number::<u32, _>(&lookup, "FRAUDBOARD_FETCH_RETRIES")? {
            builder = builder.retry(RetryPolicy::default().with_max_retries(retries));
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
    fetch_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    max_stale: Option<Duration>,
    cleanup_interval: Option<Option<Duration>>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set the per-attempt gateway timeout
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set how long entries outlive their ttl before being purged
    pub fn max_stale(mut self, max_stale: Duration) -> Self {
        self.max_stale = Some(max_stale);
        self
    }

    /// Set the background purge interval, `None` to disable it
    pub fn cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            max_stale: self.max_stale.unwrap_or(defaults.max_stale),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations for common use cases
impl CacheConfig {
    /// Near-live monitoring views: one minute freshness, fail fast
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default().with_max_retries(1),
            max_stale: Duration::from_secs(600),
            cleanup_interval: Some(Duration::from_secs(60)),
            ..Default::default()
        }
    }

    /// Dashboards over daily-loaded reporting views
    pub fn daily() -> Self {
        Self {
            default_ttl: Duration::from_secs(23 * 3600),
            max_stale: Duration::from_secs(24 * 3600),
            cleanup_interval: Some(Duration::from_secs(3600)),
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            max_entries: 64,
            max_stale: Duration::from_secs(600),
            ..Default::default()
        }
    }
}
