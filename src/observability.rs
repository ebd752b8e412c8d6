//! Metrics hooks and freshness policies.
//!
//! # Metrics
//!
//! Implement [`SyncMetrics`] to feed hit/miss/coalesce counts into your
//! monitoring system:
//!
//! ```ignore
//! use resource_sync::observability::SyncMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl SyncMetrics for PrometheusMetrics {
//!     fn record_fetch(&self, _key: &str, _duration: Duration) {
//!         // histogram!("fetch_latency").record(duration);
//!     }
//! }
//!
//! // let service = SyncService::with_metrics(api, config, Arc::new(PrometheusMetrics))?;
//! ```
//!
//! Methods left unimplemented log through the `log` crate. [`NoOpMetrics`]
//! (the default) discards everything.
//!
//! # Stale Policies
//!
//! ```
//! use resource_sync::observability::StalePolicy;
//! use std::time::Duration;
//!
//! // Same window for every resource
//! let _policy = StalePolicy::Fixed(Duration::from_secs(60));
//!
//! // Per resource
//! let _policy = StalePolicy::PerResource(|resource| match resource {
//!     "auth" => Duration::from_secs(30),
//!     _ => Duration::from_secs(300),
//! });
//! ```

use std::time::Duration;

/// Trait for sync metrics collection.
pub trait SyncMetrics: Send + Sync {
    /// Read answered from cache.
    fn record_hit(&self, key: &str) {
        debug!("Query HIT: {}", key);
    }

    /// Network fetch completed.
    fn record_fetch(&self, key: &str, duration: Duration) {
        debug!("Query FETCH: {} took {:?}", key, duration);
    }

    /// Read joined a request already in flight.
    fn record_coalesced(&self, key: &str) {
        debug!("Query COALESCED: {}", key);
    }

    /// Fetch or mutation failed.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Query ERROR for {}: {}", key, error);
    }

    /// Entries marked stale.
    fn record_invalidate(&self, count: usize) {
        debug!("Query INVALIDATE: {} entries", count);
    }

    /// Mutation completed successfully.
    fn record_mutation(&self, duration: Duration) {
        debug!("Mutation took {:?}", duration);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl SyncMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str) {}
    fn record_fetch(&self, _key: &str, _duration: Duration) {}
    fn record_coalesced(&self, _key: &str) {}
    fn record_error(&self, _key: &str, _error: &str) {}
    fn record_invalidate(&self, _count: usize) {}
    fn record_mutation(&self, _duration: Duration) {}
}

/// How long fetched data stays fresh.
#[derive(Clone, Debug, Default)]
pub enum StalePolicy {
    /// Use the configured `stale_after`
    #[default]
    Default,

    /// Fixed window for all resources
    Fixed(Duration),

    /// Never stale; only invalidation forces a refetch
    Infinite,

    /// Custom per-resource window
    PerResource(fn(&str) -> Duration),
}

impl StalePolicy {
    /// Freshness window for a resource.
    pub fn stale_after(&self, resource: &str, default: Duration) -> Duration {
        match self {
            StalePolicy::Default => default,
            StalePolicy::Fixed(d) => *d,
            StalePolicy::Infinite => Duration::MAX,
            StalePolicy::PerResource(f) => f(resource),
        }
    }
}
