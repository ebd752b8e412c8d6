//! Page-by-page loading of list collections.
//!
//! Each page is cached under its own key: `base + filters + page`. The
//! collection view is rebuilt from the store on demand by walking pages
//! 1, 2, 3... until the first page with no data, so it is always contiguous
//! and a failed "load more" never hides the pages already shown.

use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::key::{Filters, KeyPredicate, QueryKey};
use crate::resource::{dedup_by_id, Identified, ResourceId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// One fetched page of a list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based
    pub page_number: u32,
    /// Always at least 1
    pub total_pages: u32,
    /// Total item count, when the server reports it
    #[serde(default)]
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page_number: u32, total_pages: u32) -> Self {
        Page {
            items,
            page_number: page_number.max(1),
            total_pages: total_pages.max(1),
            total: None,
        }
    }

    /// A complete, non-paginated result.
    pub fn single(items: Vec<T>) -> Self {
        Page::new(items, 1, 1)
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.total_pages
    }
}

/// How a resource's reported page count is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PageCountPolicy {
    /// Trust the server's `totalPages`.
    #[default]
    ServerReported,
    /// Treat every list as a single page; "load more" never fetches page 2.
    SinglePage,
}

impl PageCountPolicy {
    pub fn apply<T>(self, mut page: Page<T>) -> Page<T> {
        if self == PageCountPolicy::SinglePage {
            page.total_pages = page.page_number;
        }
        page
    }
}

/// Ordered, contiguous pages loaded so far for one filter set.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedCollection<T> {
    pages: Vec<Page<T>>,
    total_pages: u32,
}

impl<T> PagedCollection<T> {
    /// Nothing loaded yet. `has_next_page()` is true because page 1 has not
    /// been attempted.
    pub fn empty() -> Self {
        PagedCollection {
            pages: Vec::new(),
            total_pages: 1,
        }
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    pub fn last_page(&self) -> Option<&Page<T>> {
        self.pages.last()
    }

    /// False until page 1 has data; distinguishes "not loaded" from "empty".
    pub fn is_loaded(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Page count reported by the most recently fetched page.
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn has_next_page(&self) -> bool {
        match self.pages.last() {
            Some(last) => last.page_number < self.total_pages,
            None => true,
        }
    }

    pub fn next_page_number(&self) -> Option<u32> {
        if !self.has_next_page() {
            return None;
        }
        Some(self.pages.last().map_or(1, |p| p.page_number + 1))
    }

    /// Items of every page, in page order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn into_items(self) -> Vec<T> {
        self.pages.into_iter().flat_map(|p| p.items).collect()
    }

    /// Number of items across all pages.
    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Identified + Clone> PagedCollection<T> {
    /// Items with repeated identities removed. Pages can overlap when the
    /// list changes between page requests.
    pub fn unique_items(&self) -> Vec<T> {
        dedup_by_id(self.items().cloned().collect())
    }

    pub fn find(&self, id: &ResourceId) -> Option<&T> {
        self.items()
            .find(|item| item.resource_id().as_ref() == Some(id))
    }
}

/// Loads list pages through the query executor.
#[derive(Clone)]
pub struct Paginator {
    executor: QueryExecutor,
    policy: PageCountPolicy,
}

impl Paginator {
    pub fn new(executor: QueryExecutor) -> Self {
        Paginator {
            executor,
            policy: PageCountPolicy::default(),
        }
    }

    pub fn with_page_count(mut self, policy: PageCountPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn page_count(&self) -> PageCountPolicy {
        self.policy
    }

    /// Key shared by every page of one filter set.
    pub fn collection_key(base: &QueryKey, filters: &Filters) -> QueryKey {
        base.clone().with_filters(filters)
    }

    pub fn page_key(base: &QueryKey, filters: &Filters, page: u32) -> QueryKey {
        Self::collection_key(base, filters).page(page)
    }

    /// Load one page (cache-first).
    ///
    /// The stored page is numbered by the page requested, whatever the server
    /// echoed back, and the page-count policy is applied before caching.
    ///
    /// # Errors
    /// Returns `Error::Other` for page 0, otherwise whatever the fetch returns.
    pub async fn load_page<T, F, Fut>(
        &self,
        base: &QueryKey,
        filters: &Filters,
        page: u32,
        fetch: F,
    ) -> Result<Page<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    {
        if page == 0 {
            return Err(Error::Other("page numbers start at 1".to_string()));
        }

        let key = Self::page_key(base, filters, page);
        let policy = self.policy;
        self.executor
            .run(&key, move || {
                let pending = fetch(page);
                async move { pending.await.map(|p| settle(p, page, policy)) }
            })
            .await
    }

    /// Contiguous pages currently cached for the filter set.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` if a cached page does not fit `T`.
    pub fn collection<T: DeserializeOwned>(
        &self,
        base: &QueryKey,
        filters: &Filters,
    ) -> Result<PagedCollection<T>> {
        let store = self.executor.store();
        let mut pages: Vec<Page<T>> = Vec::new();
        let mut newest: Option<(Instant, u32)> = None;

        for page_number in 1..=u32::MAX {
            let key = Self::page_key(base, filters, page_number);
            let Some(entry) = store.get(&key) else { break };
            let Some(data) = entry.data else { break };

            let page: Page<T> = serde_json::from_value(data.as_ref().clone())
                .map_err(|e| Error::DeserializationError(e.to_string()))?;

            if let Some(at) = entry.last_fetched_at {
                if newest.map_or(true, |(t, _)| at >= t) {
                    newest = Some((at, page.total_pages));
                }
            }
            pages.push(page);
        }

        if pages.is_empty() {
            return Ok(PagedCollection::empty());
        }

        let total_pages = newest
            .map(|(_, total)| total)
            .or_else(|| pages.last().map(|p| p.total_pages))
            .unwrap_or(1);
        // Pages past the trusted count are left over from a longer list.
        pages.truncate(total_pages as usize);
        Ok(PagedCollection { pages, total_pages })
    }

    /// Load the page after the last loaded one.
    ///
    /// Returns `Ok(None)` without fetching when there is no next page or the
    /// next page is already being fetched.
    pub async fn fetch_next<T, F, Fut>(
        &self,
        base: &QueryKey,
        filters: &Filters,
        fetch: F,
    ) -> Result<Option<Page<T>>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(u32) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    {
        let collection = self.collection::<T>(base, filters)?;
        let Some(next) = collection.next_page_number() else {
            debug!(
                "No further pages for {}",
                Self::collection_key(base, filters)
            );
            return Ok(None);
        };

        let key = Self::page_key(base, filters, next);
        if self.executor.is_in_flight(&key) {
            debug!("Page already loading: {}", key);
            return Ok(None);
        }

        self.load_page(base, filters, next, fetch).await.map(Some)
    }

    /// Refetch every loaded page in order (pull-to-refresh).
    ///
    /// Stops early when a refreshed page reports it is now the last one, and
    /// drops the cached pages after it.
    pub async fn refresh<T, F, Fut>(
        &self,
        base: &QueryKey,
        filters: &Filters,
        fetch: F,
    ) -> Result<PagedCollection<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Page<T>>> + Send + 'static,
    {
        let loaded = self.collection::<T>(base, filters)?.pages().len().max(1) as u32;
        let fetch = Arc::new(fetch);
        let policy = self.policy;

        for page in 1..=loaded {
            let key = Self::page_key(base, filters, page);
            let fetch = fetch.clone();
            let fresh: Page<T> = self
                .executor
                .refetch(&key, move || {
                    let pending = fetch(page);
                    async move { pending.await.map(|p| settle(p, page, policy)) }
                })
                .await?;

            if !fresh.has_next() {
                self.drop_pages_after(base, filters, page);
                break;
            }
        }

        self.collection(base, filters)
    }

    /// Remove cached pages numbered above `last`.
    fn drop_pages_after(&self, base: &QueryKey, filters: &Filters, last: u32) {
        let Some(first) = last.checked_add(1) else { return };
        let store = self.executor.store();
        let mut dropped = 0;
        for page in first..=u32::MAX {
            if store.remove(&Self::page_key(base, filters, page)).is_none() {
                break;
            }
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "Dropped {} pages past page {} of {}",
                dropped,
                last,
                Self::collection_key(base, filters)
            );
        }
    }

    /// Mark every page of the filter set stale.
    pub fn invalidate(&self, base: &QueryKey, filters: &Filters) -> usize {
        self.executor
            .invalidate(&KeyPredicate::Prefix(Self::collection_key(base, filters)))
    }
}

/// Number the page by what was requested and apply the count policy.
fn settle<T>(mut page: Page<T>, requested: u32, policy: PageCountPolicy) -> Page<T> {
    if page.page_number != requested {
        warn!(
            "Server answered page {} for a request of page {}",
            page.page_number, requested
        );
        page.page_number = requested;
    }
    page.total_pages = page.total_pages.max(1);
    policy.apply(page)
}
