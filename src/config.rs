//! Service-wide configuration and per-operation overrides.

use crate::error::{Error, Result};
use crate::strategy::FetchPolicy;
use std::time::Duration;

/// Service-wide settings.
///
/// # Example
///
/// ```
/// use resource_sync::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::default()
///     .with_stale_after(Duration::from_secs(60))
///     .with_page_size(20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long fetched data is served without refetching.
    pub stale_after: Duration,
    /// Upper bound for every remote call; exceeding it is a network error.
    pub request_timeout: Duration,
    /// `limit` sent to list endpoints.
    pub page_size: u32,
}

impl SyncConfig {
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    /// Read settings from the environment, falling back to defaults.
    ///
    /// - `RESOURCE_SYNC_STALE_AFTER_MS`
    /// - `RESOURCE_SYNC_REQUEST_TIMEOUT_MS`
    /// - `RESOURCE_SYNC_PAGE_SIZE`
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();
        SyncConfig {
            stale_after: env_u64("RESOURCE_SYNC_STALE_AFTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stale_after),
            request_timeout: env_u64("RESOURCE_SYNC_REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            page_size: env_u64("RESOURCE_SYNC_PAGE_SIZE")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.page_size),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// # Errors
    /// Returns `Error::ConfigError` for a zero timeout or page size.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::ConfigError(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::ConfigError(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            stale_after: Self::DEFAULT_STALE_AFTER,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{} is not a number ({:?}), using default", name, raw);
            None
        }
    }
}

/// Per-operation overrides.
///
/// Unset fields fall back to the service configuration.
///
/// ```
/// use resource_sync::{FetchPolicy, QueryOptions};
/// use std::time::Duration;
///
/// let options = QueryOptions::default()
///     .with_stale_after(Duration::from_secs(30))
///     .with_policy(FetchPolicy::NetworkOnly);
/// assert_eq!(options.policy, FetchPolicy::NetworkOnly);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Freshness window for this query only (takes precedence over the
    /// service's stale policy).
    pub stale_after: Option<Duration>,
    /// Timeout for this request only.
    pub timeout: Option<Duration>,
    /// Cache/network decision.
    pub policy: FetchPolicy,
}

impl QueryOptions {
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }
}
