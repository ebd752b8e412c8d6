//! Per-resource clients used by screens.
//!
//! A [`ResourceClient`] binds one REST collection to the cache: list pages,
//! item reads, and writes that invalidate everything cached for the resource.

use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::key::{Filters, KeyPredicate, QueryKey};
use crate::mutation::MutationRunner;
use crate::normalize::{normalize_item_response, normalize_list_response};
use crate::paginate::{Page, PageCountPolicy, PagedCollection, Paginator};
use crate::remote::{Method, RemoteApi};
use crate::resource::{Resource, ResourceId};
use crate::state::QueryState;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;

pub mod auth;

pub use auth::AuthClient;

/// A REST collection and how its lists are paged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// First key segment; also the invalidation scope of writes.
    pub resource: String,
    /// Collection path, e.g. `/products`.
    pub path: String,
    /// `limit` override; `None` uses the service's page size.
    pub page_size: Option<u32>,
    pub page_count: PageCountPolicy,
}

impl Endpoint {
    pub fn new(resource: &str, path: &str) -> Self {
        Endpoint {
            resource: resource.to_string(),
            path: path.trim_end_matches('/').to_string(),
            page_size: None,
            page_count: PageCountPolicy::ServerReported,
        }
    }

    /// Product lists are treated as a single page: "load more" never
    /// requests page 2. Use [`with_page_count`](Self::with_page_count) to
    /// follow the server's count instead.
    pub fn products() -> Self {
        Endpoint::new("products", "/products").with_page_count(PageCountPolicy::SinglePage)
    }

    pub fn shops() -> Self {
        Endpoint::new("shops", "/shops")
    }

    pub fn engineers() -> Self {
        Endpoint::new("engineers", "/engineers")
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_page_count(mut self, policy: PageCountPolicy) -> Self {
        self.page_count = policy;
        self
    }
}

/// Reads and writes for one resource.
pub struct ResourceClient<A> {
    api: Arc<A>,
    endpoint: Endpoint,
    executor: QueryExecutor,
    paginator: Paginator,
    mutations: MutationRunner,
    page_size: u32,
}

impl<A> Clone for ResourceClient<A> {
    fn clone(&self) -> Self {
        ResourceClient {
            api: self.api.clone(),
            endpoint: self.endpoint.clone(),
            executor: self.executor.clone(),
            paginator: self.paginator.clone(),
            mutations: self.mutations.clone(),
            page_size: self.page_size,
        }
    }
}

impl<A: RemoteApi> ResourceClient<A> {
    pub fn new(
        api: Arc<A>,
        endpoint: Endpoint,
        executor: QueryExecutor,
        mutations: MutationRunner,
        default_page_size: u32,
    ) -> Self {
        let paginator = Paginator::new(executor.clone()).with_page_count(endpoint.page_count);
        let page_size = endpoint.page_size.unwrap_or(default_page_size);
        ResourceClient {
            api,
            endpoint,
            executor,
            paginator,
            mutations,
            page_size,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Base key of every list of this resource.
    pub fn list_key(&self) -> QueryKey {
        QueryKey::new(&self.endpoint.resource).push("list")
    }

    pub fn item_key(&self, id: &ResourceId) -> QueryKey {
        QueryKey::new(&self.endpoint.resource)
            .push("detail")
            .push(id.as_str())
    }

    /// Load one page of the list for `filters`.
    pub async fn load_page(&self, filters: &Filters, page: u32) -> Result<Page<Resource>> {
        self.paginator
            .load_page(&self.list_key(), filters, page, self.page_fetcher(filters))
            .await
    }

    /// Pages loaded so far for `filters`.
    pub fn collection(&self, filters: &Filters) -> Result<PagedCollection<Resource>> {
        self.paginator.collection(&self.list_key(), filters)
    }

    /// "Load more". `Ok(None)` when there is nothing more to load.
    pub async fn fetch_next(&self, filters: &Filters) -> Result<Option<Page<Resource>>> {
        self.paginator
            .fetch_next(&self.list_key(), filters, self.page_fetcher(filters))
            .await
    }

    /// Pull-to-refresh.
    pub async fn refresh(&self, filters: &Filters) -> Result<PagedCollection<Resource>> {
        self.paginator
            .refresh(&self.list_key(), filters, self.page_fetcher(filters))
            .await
    }

    /// Render state of the list: status from page 1, data from every
    /// loaded page.
    pub fn list_state(&self, filters: &Filters) -> Result<QueryState<PagedCollection<Resource>>> {
        let first = Paginator::page_key(&self.list_key(), filters, 1);
        Ok(match self.executor.state::<Page<Resource>>(&first)? {
            QueryState::Idle => QueryState::Idle,
            QueryState::Loading => QueryState::Loading,
            QueryState::Error(e) => QueryState::Error(e),
            QueryState::Success {
                freshness,
                is_fetching,
                last_error,
                ..
            } => QueryState::Success {
                data: self.collection(filters)?,
                freshness,
                is_fetching,
                last_error,
            },
        })
    }

    /// One item by id (`GET <path>/<id>`).
    pub async fn item(&self, id: &ResourceId) -> Result<Resource> {
        let api = self.api.clone();
        let path = self.item_path(id);
        self.executor
            .run(&self.item_key(id), move || async move {
                normalize_item_response(api.get(&path, &[]).await?)
            })
            .await
    }

    /// Refetch one item even if a request for it is running; only the
    /// newest response is kept.
    pub async fn refresh_item(&self, id: &ResourceId) -> Result<Resource> {
        let api = self.api.clone();
        let path = self.item_path(id);
        self.executor
            .refetch(&self.item_key(id), move || async move {
                normalize_item_response(api.get(&path, &[]).await?)
            })
            .await
    }

    pub fn item_state(&self, id: &ResourceId) -> Result<QueryState<Resource>> {
        self.executor.state(&self.item_key(id))
    }

    /// `POST <path>`.
    pub async fn create(&self, body: Value) -> Result<Value> {
        let path = self.endpoint.path.clone();
        self.write(Method::Post, path, Some(body)).await
    }

    /// `PATCH <path>/<id>`.
    pub async fn update(&self, id: &ResourceId, body: Value) -> Result<Value> {
        self.write(Method::Patch, self.item_path(id), Some(body)).await
    }

    /// `DELETE <path>/<id>`.
    pub async fn delete(&self, id: &ResourceId) -> Result<Value> {
        self.write(Method::Delete, self.item_path(id), None).await
    }

    /// `POST <path>/<id>/<name>`, e.g. `like`.
    pub async fn action(&self, id: &ResourceId, name: &str) -> Result<Value> {
        let path = format!("{}/{}", self.item_path(id), name.trim_matches('/'));
        self.write(Method::Post, path, None).await
    }

    /// Mark everything cached for this resource stale.
    pub fn invalidate(&self) -> usize {
        self.executor
            .invalidate(&KeyPredicate::resource(&self.endpoint.resource))
    }

    async fn write(&self, method: Method, path: String, body: Option<Value>) -> Result<Value> {
        let api = self.api.clone();
        self.mutations
            .run(
                move |body| async move { api.send(method, &path, body).await },
                body,
                &KeyPredicate::resource(&self.endpoint.resource),
            )
            .await
    }

    fn item_path(&self, id: &ResourceId) -> String {
        format!("{}/{}", self.endpoint.path, id)
    }

    /// `GET <path>?<filters>&page=<n>&limit=<size>`, normalized.
    fn page_fetcher(
        &self,
        filters: &Filters,
    ) -> impl Fn(u32) -> BoxFuture<'static, Result<Page<Resource>>> + Send + Sync + 'static {
        let api = self.api.clone();
        let path = self.endpoint.path.clone();
        let base_query = filters.to_query();
        let limit = self.page_size;

        move |page| {
            let api = api.clone();
            let path = path.clone();
            let mut query = base_query.clone();
            query.push(("page".to_string(), page.to_string()));
            query.push(("limit".to_string(), limit.to_string()));

            async move { normalize_list_response(api.get(&path, &query).await?) }.boxed()
        }
    }
}
