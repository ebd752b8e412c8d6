//! Root object shared by every screen.
//!
//! Owns the remote API, the cache store, the query executor and the mutation
//! runner. Construct one at startup and clone it wherever it is needed.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::hooks::{AuthClient, Endpoint, ResourceClient};
use crate::mutation::MutationRunner;
use crate::observability::{StalePolicy, SyncMetrics};
use crate::remote::RemoteApi;
use crate::store::{CacheStore, StoreStats};
use std::sync::Arc;

/// The sync layer for one signed-in app session.
///
/// # Example
///
/// ```ignore
/// use resource_sync::{Filters, SyncConfig, SyncService};
/// use resource_sync::remote::HttpApi;
///
/// let config = SyncConfig::from_env();
/// let api = HttpApi::new("https://api.example.com", config.request_timeout)?;
/// let sync = SyncService::new(api, config)?;
///
/// let shops = sync.shops();
/// let first = shops.load_page(&Filters::new(), 1).await?;
/// if shops.collection(&Filters::new())?.has_next_page() {
///     shops.fetch_next(&Filters::new()).await?;
/// }
///
/// // Sign-out wipes every cached entry.
/// sync.auth().logout().await?;
/// ```
pub struct SyncService<A> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    api: Arc<A>,
    config: SyncConfig,
    executor: QueryExecutor,
    mutations: MutationRunner,
}

impl<A> Clone for SyncService<A> {
    fn clone(&self) -> Self {
        SyncService {
            inner: self.inner.clone(),
        }
    }
}

impl<A: RemoteApi> SyncService<A> {
    /// Create a service over `api`.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if `config` is invalid.
    pub fn new(api: A, config: SyncConfig) -> Result<Self> {
        Self::build(api, config, None, StalePolicy::default())
    }

    /// Create a service that reports to `metrics`.
    pub fn with_metrics(api: A, config: SyncConfig, metrics: Arc<dyn SyncMetrics>) -> Result<Self> {
        Self::build(api, config, Some(metrics), StalePolicy::default())
    }

    /// Create a service with per-resource freshness windows.
    pub fn with_stale_policy(api: A, config: SyncConfig, policy: StalePolicy) -> Result<Self> {
        Self::build(api, config, None, policy)
    }

    fn build(
        api: A,
        config: SyncConfig,
        metrics: Option<Arc<dyn SyncMetrics>>,
        stale_policy: StalePolicy,
    ) -> Result<Self> {
        config.validate()?;

        let mut executor = QueryExecutor::new(CacheStore::new(), &config)
            .with_stale_policy(stale_policy)
            .with_session_key(AuthClient::<A>::profile_key());
        if let Some(metrics) = &metrics {
            executor = executor.with_metrics(metrics.clone());
        }
        let mut mutations = MutationRunner::new(executor.clone(), config.request_timeout);
        if let Some(metrics) = metrics {
            mutations = mutations.with_metrics(metrics);
        }

        info!(
            "Sync service ready (stale after {:?}, timeout {:?}, page size {})",
            config.stale_after, config.request_timeout, config.page_size
        );

        Ok(SyncService {
            inner: Arc::new(Inner {
                api: Arc::new(api),
                config,
                executor,
                mutations,
            }),
        })
    }

    pub fn products(&self) -> ResourceClient<A> {
        self.resource(Endpoint::products())
    }

    pub fn shops(&self) -> ResourceClient<A> {
        self.resource(Endpoint::shops())
    }

    pub fn engineers(&self) -> ResourceClient<A> {
        self.resource(Endpoint::engineers())
    }

    /// Client for any other collection.
    pub fn resource(&self, endpoint: Endpoint) -> ResourceClient<A> {
        ResourceClient::new(
            self.inner.api.clone(),
            endpoint,
            self.inner.executor.clone(),
            self.inner.mutations.clone(),
            self.inner.config.page_size,
        )
    }

    pub fn auth(&self) -> AuthClient<A> {
        AuthClient::new(
            self.inner.api.clone(),
            self.inner.executor.clone(),
            self.inner.mutations.clone(),
        )
    }

    pub fn api(&self) -> &A {
        &self.inner.api
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CacheStore {
        self.inner.executor.store()
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.inner.executor
    }

    pub fn mutations(&self) -> &MutationRunner {
        &self.inner.mutations
    }

    pub fn stats(&self) -> StoreStats {
        self.store().stats()
    }

    /// Drop every cached entry and forget in-flight requests.
    pub fn clear(&self) {
        self.inner.executor.reset();
        self.inner.executor.store().clear();
    }
}
