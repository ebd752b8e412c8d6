//! # resource-sync
//!
//! Client-side data sync for a marketplace app: products, shops, engineers
//! and the signed-in user, fetched from a REST API and kept in a shared
//! in-memory cache.
//!
//! ## Features
//!
//! - **Cache-first reads:** fresh data is served without a network call
//! - **Request coalescing:** concurrent reads of one key share one request
//! - **Out-of-order safety:** a slow, superseded response never overwrites newer data
//! - **Pagination:** contiguous page collections with "load more" and refresh
//! - **Invalidation:** writes mark affected entries stale only after they succeed
//! - **Session aware:** logout clears the cache and discards in-flight responses
//!
//! ## Quick Start
//!
//! ```ignore
//! use resource_sync::{Filters, ResourceId, SyncConfig, SyncService};
//! use resource_sync::remote::HttpApi;
//!
//! let config = SyncConfig::from_env();
//! let api = HttpApi::new("https://api.example.com", config.request_timeout)?;
//! let sync = SyncService::new(api, config)?;
//!
//! // Lists
//! let filters = Filters::new().with("city", "Lagos");
//! let engineers = sync.engineers();
//! engineers.load_page(&filters, 1).await?;
//! while engineers.collection(&filters)?.has_next_page() {
//!     if engineers.fetch_next(&filters).await?.is_none() {
//!         break;
//!     }
//! }
//!
//! // Writes invalidate every cached "products" entry on success
//! let products = sync.products();
//! products.action(&ResourceId::new("p1"), "like").await?;
//!
//! // Session
//! if sync.auth().profile().await?.is_none() {
//!     sync.auth().request_otp("+2348000000000").await?;
//! }
//! ```
//!
//! ## Lower-level API
//!
//! [`QueryExecutor`], [`Paginator`] and [`MutationRunner`] work with any
//! async fetch function, not only the REST client:
//!
//! ```ignore
//! use resource_sync::{CacheStore, QueryExecutor, QueryKey, SyncConfig};
//!
//! let executor = QueryExecutor::new(CacheStore::new(), &SyncConfig::default());
//! let key = QueryKey::new("rates").push("usd");
//! let rate: f64 = executor.run(&key, || async { Ok(1530.5) }).await?;
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod key;
pub mod mutation;
pub mod normalize;
pub mod observability;
pub mod paginate;
pub mod remote;
pub mod resource;
pub mod service;
pub mod state;
pub mod store;
pub mod strategy;

// Re-exports for convenience
pub use config::{QueryOptions, SyncConfig};
pub use error::{Error, Result};
pub use executor::QueryExecutor;
pub use hooks::{AuthClient, Endpoint, ResourceClient};
pub use key::{Filters, KeyPredicate, QueryKey};
pub use mutation::{Mutation, MutationRunner, MutationState};
pub use normalize::{normalize_item_response, normalize_list_response};
pub use observability::{NoOpMetrics, StalePolicy, SyncMetrics};
pub use paginate::{Page, PageCountPolicy, PagedCollection, Paginator};
pub use remote::{Method, RemoteApi};
pub use resource::{Identified, Resource, ResourceId};
pub use service::SyncService;
pub use state::{Freshness, QueryState};
pub use store::{CacheStore, QueryEntry, QueryStatus, Subscription};
pub use strategy::FetchPolicy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
