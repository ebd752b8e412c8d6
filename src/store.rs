//! Cache store: the single owner of every query entry.
//!
//! Uses DashMap for concurrent access with per-key sharding. A `set` for one
//! key holds that key's shard lock while the patch is merged, so two
//! competing writes never interleave into a corrupted entry. Subscribers are
//! notified after the lock is released, with an immutable snapshot.

use crate::error::Error;
use crate::key::{KeyPredicate, QueryKey};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle status of one query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Entry exists but nothing was requested yet
    #[default]
    Idle,
    /// A request is in flight (previous data, if any, is kept)
    Loading,
    /// Last request succeeded
    Success,
    /// Last request failed (previous data, if any, is kept)
    Error,
}

/// Snapshot of one cached query.
#[derive(Clone, Debug)]
pub struct QueryEntry {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<Arc<Value>>,
    pub error: Option<Error>,
    pub last_fetched_at: Option<Instant>,
    pub stale_after: Duration,
    /// Set by `invalidate`; cleared by the next successful fetch.
    pub invalidated: bool,
}

impl QueryEntry {
    fn new(key: QueryKey) -> Self {
        QueryEntry {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            last_fetched_at: None,
            stale_after: Duration::ZERO,
            invalidated: false,
        }
    }

    /// True when the data may be served without a fetch.
    pub fn is_fresh(&self, now: Instant) -> bool {
        if self.status != QueryStatus::Success || self.invalidated || self.data.is_none() {
            return false;
        }
        self.last_fetched_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.stale_after)
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    fn apply(&mut self, patch: EntryPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(data) = patch.data {
            self.data = Some(data);
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        if let Some(at) = patch.last_fetched_at {
            self.last_fetched_at = Some(at);
        }
        if let Some(stale_after) = patch.stale_after {
            self.stale_after = stale_after;
        }
        if let Some(invalidated) = patch.invalidated {
            self.invalidated = invalidated;
        }
    }
}

/// Partial update merged into an entry by [`CacheStore::set`].
///
/// Fields left as `None` keep their current value.
#[derive(Clone, Debug, Default)]
pub struct EntryPatch {
    pub status: Option<QueryStatus>,
    pub data: Option<Arc<Value>>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<Error>>,
    pub last_fetched_at: Option<Instant>,
    pub stale_after: Option<Duration>,
    pub invalidated: Option<bool>,
}

impl EntryPatch {
    pub fn loading() -> Self {
        EntryPatch {
            status: Some(QueryStatus::Loading),
            ..Default::default()
        }
    }

    pub fn success(data: Arc<Value>, fetched_at: Instant, stale_after: Duration) -> Self {
        EntryPatch {
            status: Some(QueryStatus::Success),
            data: Some(data),
            error: Some(None),
            last_fetched_at: Some(fetched_at),
            stale_after: Some(stale_after),
            invalidated: Some(false),
        }
    }

    pub fn failure(error: Error) -> Self {
        EntryPatch {
            status: Some(QueryStatus::Error),
            error: Some(Some(error)),
            ..Default::default()
        }
    }
}

/// Type alias for subscription callbacks.
type Callback = dyn Fn(&QueryEntry) + Send + Sync;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Arc<Callback>,
}

struct StoreInner {
    entries: DashMap<QueryKey, QueryEntry>,
    subscribers: DashMap<QueryKey, Vec<Subscriber>>,
    next_subscriber: AtomicU64,
}

/// Thread-safe store of query entries.
///
/// Cloning is cheap and every clone shares the same entries.
///
/// # Example
///
/// ```
/// use resource_sync::key::QueryKey;
/// use resource_sync::store::{CacheStore, EntryPatch, QueryStatus};
///
/// let store = CacheStore::new();
/// let key = QueryKey::new("shops").push("list");
///
/// store.set(&key, EntryPatch::loading());
/// assert_eq!(store.get(&key).map(|e| e.status), Some(QueryStatus::Loading));
/// ```
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new() -> Self {
        CacheStore {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of the entry for `key`.
    pub fn get(&self, key: &QueryKey) -> Option<QueryEntry> {
        self.inner.entries.get(key).map(|e| e.clone())
    }

    /// Merge `patch` into the entry (creating it), then notify subscribers.
    pub fn set(&self, key: &QueryKey, patch: EntryPatch) -> QueryEntry {
        let snapshot = self.set_silent(key, patch);
        self.notify(&snapshot);
        snapshot
    }

    /// Merge without notifying. Callers must follow up with `notify_key`.
    pub(crate) fn set_silent(&self, key: &QueryKey, patch: EntryPatch) -> QueryEntry {
        let mut entry = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| QueryEntry::new(key.clone()));
        entry.apply(patch);

        debug!("✓ Store SET {} -> {:?}", key, entry.status);
        entry.clone()
    }

    /// Notify subscribers of `key` with its current entry.
    pub(crate) fn notify_key(&self, key: &QueryKey) {
        if let Some(snapshot) = self.get(key) {
            self.notify(&snapshot);
        }
    }

    /// Mark matching entries stale without dropping their data.
    ///
    /// Returns the number of entries marked.
    pub fn invalidate(&self, predicate: &KeyPredicate) -> usize {
        let mut touched = Vec::new();
        for mut entry in self.inner.entries.iter_mut() {
            if predicate.matches(entry.key()) {
                entry.invalidated = true;
                touched.push(entry.clone());
            }
        }

        debug!("✓ Store INVALIDATE {:?} ({} entries)", predicate, touched.len());
        for snapshot in &touched {
            self.notify(snapshot);
        }
        touched.len()
    }

    /// Remove one entry.
    pub fn remove(&self, key: &QueryKey) -> Option<QueryEntry> {
        let removed = self.inner.entries.remove(key).map(|(_, e)| e);
        debug!("✓ Store REMOVE {}", key);
        removed
    }

    /// Remove every entry. Subscriptions stay registered.
    pub fn clear(&self) {
        self.inner.entries.clear();
        warn!("⚠ Store CLEAR executed - all cached queries dropped");
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Entry counts by status.
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for entry in self.inner.entries.iter() {
            stats.total_entries += 1;
            if entry.invalidated {
                stats.invalidated_entries += 1;
            }
            match entry.status {
                QueryStatus::Idle => {}
                QueryStatus::Loading => stats.loading_entries += 1,
                QueryStatus::Success => stats.success_entries += 1,
                QueryStatus::Error => stats.error_entries += 1,
            }
        }
        stats
    }

    /// Register `callback` for changes to `key`.
    ///
    /// The callback runs synchronously after every `set`/`invalidate` that
    /// touches the key, until the returned guard is dropped.
    pub fn subscribe<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&QueryEntry) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                active: active.clone(),
                callback: Arc::new(callback),
            });

        Subscription {
            id,
            key: key.clone(),
            active,
            store: self.clone(),
        }
    }

    /// Number of live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    fn notify(&self, snapshot: &QueryEntry) {
        // Copy the callbacks out so none runs under the shard lock.
        let targets: Vec<(Arc<AtomicBool>, Arc<Callback>)> =
            match self.inner.subscribers.get(&snapshot.key) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.active.clone(), s.callback.clone()))
                    .collect(),
                None => return,
            };

        for (active, callback) in targets {
            if active.load(Ordering::Acquire) {
                callback(snapshot);
            }
        }
    }

    fn unsubscribe(&self, key: &QueryKey, id: u64) {
        if let Some(mut subs) = self.inner.subscribers.get_mut(key) {
            subs.retain(|s| s.id != id);
        }
        self.inner.subscribers.remove_if(key, |_, subs| subs.is_empty());
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Live registration of a change callback.
///
/// Dropping it (e.g. when the owning screen is torn down) unregisters the
/// callback; notifications already being dispatched skip it.
pub struct Subscription {
    id: u64,
    key: QueryKey,
    active: Arc<AtomicBool>,
    store: CacheStore,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Stop receiving callbacks now.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.store.unsubscribe(&self.key, self.id);
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_entries: usize,
    pub loading_entries: usize,
    pub success_entries: usize,
    pub error_entries: usize,
    pub invalidated_entries: usize,
}
