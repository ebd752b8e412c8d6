//! Fetch policies deciding when a read goes to the network.
//!
//! # The Three Policies
//!
//! ```
//! use resource_sync::strategy::FetchPolicy;
//!
//! // 1. CacheFirst - serve fresh cache, otherwise fetch (default)
//! let _p = FetchPolicy::CacheFirst;
//!
//! // 2. CacheOnly - serve whatever is cached, never fetch
//! let _p = FetchPolicy::CacheOnly;
//!
//! // 3. NetworkOnly - always issue a new request
//! let _p = FetchPolicy::NetworkOnly;
//! ```
//!
//! | Policy | Fresh entry | Stale / invalidated entry | No entry |
//! |--------|-------------|---------------------------|----------|
//! | **CacheFirst** | Return | Fetch (coalesced) | Fetch (coalesced) |
//! | **CacheOnly** | Return | Return stale data | `Error::CacheMiss` |
//! | **NetworkOnly** | Fetch (new request) | Fetch (new request) | Fetch (new request) |
//!
//! `NetworkOnly` is what pull-to-refresh uses: it starts a newer request even
//! while an older one is in flight, and only the newer response is kept.

/// Policy controlling whether a read is answered from cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Serve fresh cached data, otherwise join or start a request.
    #[default]
    CacheFirst,

    /// Serve cached data regardless of freshness; never touch the network.
    CacheOnly,

    /// Always start a new request, superseding any in-flight one.
    NetworkOnly,
}

impl std::fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchPolicy::CacheFirst => write!(f, "CacheFirst"),
            FetchPolicy::CacheOnly => write!(f, "CacheOnly"),
            FetchPolicy::NetworkOnly => write!(f, "NetworkOnly"),
        }
    }
}
