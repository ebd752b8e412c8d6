//! Query executor - resolves one key to data, deduplicating requests.
//!
//! Every request gets a generation number. Only the most recently issued
//! request for a key may write to the store, so a slow response that was
//! superseded by a refetch is dropped instead of overwriting newer data. Its
//! callers are handed the newer result instead.
//!
//! An invalidation that lands while a request is in flight marks that request
//! stale: later reads start a new request instead of joining it, and if its
//! response is still the latest one it is stored already invalidated.
//!
//! Fetches run on spawned tasks. A caller that goes away (its screen was torn
//! down) simply stops waiting; the task still finishes and updates the store,
//! but only live subscriptions hear about it.

use crate::config::{QueryOptions, SyncConfig};
use crate::error::{Error, Result};
use crate::key::{KeyPredicate, QueryKey};
use crate::observability::{NoOpMetrics, StalePolicy, SyncMetrics};
use crate::state::QueryState;
use crate::store::{CacheStore, EntryPatch, QueryStatus};
use crate::strategy::FetchPolicy;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of one request, shared by every caller that joined it.
type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>>>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
    /// Issued before the latest invalidation of its key.
    stale: bool,
}

/// Resolves query keys through the cache store.
///
/// # Example
///
/// ```ignore
/// let executor = QueryExecutor::new(CacheStore::new(), &SyncConfig::default());
/// let key = QueryKey::new("shops").push("detail").push("s1");
///
/// let shop: Resource = executor
///     .run(&key, move || async move { api.get("/shops/s1", &[]).await.map(Resource::new) })
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryExecutor {
    store: CacheStore,
    inflight: Arc<DashMap<QueryKey, InFlight>>,
    latest: Arc<DashMap<QueryKey, u64>>,
    next_generation: Arc<AtomicU64>,
    metrics: Arc<dyn SyncMetrics>,
    stale_policy: StalePolicy,
    stale_after: Duration,
    timeout: Duration,
    session_key: Option<QueryKey>,
}

impl QueryExecutor {
    /// Create an executor over `store`.
    pub fn new(store: CacheStore, config: &SyncConfig) -> Self {
        QueryExecutor {
            store,
            inflight: Arc::new(DashMap::new()),
            latest: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            metrics: Arc::new(NoOpMetrics),
            stale_policy: StalePolicy::default(),
            stale_after: config.stale_after,
            timeout: config.request_timeout,
            session_key: None,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set custom stale policy.
    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Key holding the signed-in user. A 401 from any other query resets it
    /// to "nobody signed in".
    pub fn with_session_key(mut self, key: QueryKey) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Cache-first read.
    ///
    /// Returns fresh cached data without calling `fetch`; otherwise joins the
    /// request already in flight for `key`, or starts one.
    ///
    /// # Errors
    /// Returns the fetch error (also recorded on the entry), a
    /// `Error::Network` on timeout, or `Error::DeserializationError` if the
    /// cached payload does not fit `T`.
    pub async fn run<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run_with(key, QueryOptions::default(), fetch).await
    }

    /// Read with per-call options.
    pub async fn run_with<T, F, Fut>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        debug!("» Query {} (policy: {})", key, options.policy);

        let pending = match options.policy {
            FetchPolicy::CacheOnly => {
                return match self.store.get(key).and_then(|e| e.data) {
                    Some(data) => {
                        self.metrics.record_hit(&key.to_string());
                        decode(&data)
                    }
                    None => Err(Error::CacheMiss),
                };
            }
            FetchPolicy::CacheFirst => {
                if let Some(entry) = self.store.get(key) {
                    if entry.is_fresh(Instant::now()) {
                        if let Some(data) = entry.data {
                            debug!("✓ Cache hit for {}", key);
                            self.metrics.record_hit(&key.to_string());
                            return decode(&data);
                        }
                    }
                }
                self.join_or_start(key, &options, fetch)
            }
            FetchPolicy::NetworkOnly => self.start_new(key, &options, fetch),
        };

        let data = pending.await?;
        decode(&data)
    }

    /// Issue a new request even if one is in flight.
    ///
    /// The older request's response will be discarded when it arrives.
    pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let options = QueryOptions::default().with_policy(FetchPolicy::NetworkOnly);
        self.run_with(key, options, fetch).await
    }

    /// Mark matching entries stale; their data stays visible.
    ///
    /// Requests already in flight for matching keys are marked too, so their
    /// responses cannot make pre-invalidation data look fresh.
    pub fn invalidate(&self, predicate: &KeyPredicate) -> usize {
        for mut pending in self.inflight.iter_mut() {
            if predicate.matches(pending.key()) {
                pending.stale = true;
            }
        }
        let count = self.store.invalidate(predicate);
        self.metrics.record_invalidate(count);
        count
    }

    /// Typed render state for `key`.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` if cached data does not fit `T`.
    pub fn state<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<QueryState<T>> {
        QueryState::from_entry(self.store.get(key).as_ref(), Instant::now())
    }

    /// True while a request for `key` is running.
    pub fn is_in_flight(&self, key: &QueryKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Forget every in-flight request.
    ///
    /// Responses to requests issued before the reset are discarded. Used
    /// together with `CacheStore::clear` on logout.
    pub fn reset(&self) {
        self.latest.clear();
        self.inflight.clear();
        info!("Query executor reset - pending responses will be discarded");
    }

    /// Record that the session is gone: the session entry becomes a fresh
    /// "nobody signed in" (`null`) and any profile request in flight is
    /// superseded. No-op without a session key.
    pub fn expire_session(&self) {
        let Some(key) = &self.session_key else { return };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.insert(key.clone(), generation);
        let stale_after = self.stale_policy.stale_after(key.resource(), self.stale_after);
        self.store.set(
            key,
            EntryPatch::success(Arc::new(Value::Null), Instant::now(), stale_after),
        );
        warn!("Session expired - cached {} cleared", key);
    }

    fn join_or_start<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetch: F) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) if !occupied.get().stale => {
                debug!("Joining in-flight request for {}", key);
                self.metrics.record_coalesced(&key.to_string());
                return occupied.get().fetch.clone();
            }
            Entry::Occupied(mut occupied) => {
                debug!("In-flight request for {} predates an invalidation", key);
                let flight = self.spawn_fetch(key, options, fetch);
                let pending = flight.fetch.clone();
                occupied.insert(flight);
                pending
            }
            Entry::Vacant(vacant) => {
                let flight = self.spawn_fetch(key, options, fetch);
                let pending = flight.fetch.clone();
                vacant.insert(flight);
                pending
            }
        };
        self.store.notify_key(key);
        pending
    }

    fn start_new<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetch: F) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // Held across the spawn so the task cannot finish and clean up
        // before its in-flight record exists.
        let pending = match self.inflight.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                debug!("Superseding in-flight request for {}", key);
                let flight = self.spawn_fetch(key, options, fetch);
                let pending = flight.fetch.clone();
                occupied.insert(flight);
                pending
            }
            Entry::Vacant(vacant) => {
                let flight = self.spawn_fetch(key, options, fetch);
                let pending = flight.fetch.clone();
                vacant.insert(flight);
                pending
            }
        };
        self.store.notify_key(key);
        pending
    }

    /// Issue a request. The entry is `Loading` before this returns; callers
    /// notify subscribers once the in-flight record is released.
    fn spawn_fetch<T, F, Fut>(&self, key: &QueryKey, options: &QueryOptions, fetch: F) -> InFlight
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest.insert(key.clone(), generation);
        self.store.set_silent(key, EntryPatch::loading());

        let stale_after = options
            .stale_after
            .unwrap_or_else(|| self.stale_policy.stale_after(key.resource(), self.stale_after));
        let timeout = options.timeout.unwrap_or(self.timeout);

        let executor = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            executor
                .execute(task_key, generation, stale_after, timeout, fetch)
                .await
        });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Error::Other(format!("fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        InFlight {
            generation,
            fetch,
            stale: false,
        }
    }

    async fn execute<T, F, Fut>(
        self,
        key: QueryKey,
        generation: u64,
        stale_after: Duration,
        timeout: Duration,
        fetch: F,
    ) -> Result<Arc<Value>>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, fetch()).await {
            Ok(Ok(data)) => serde_json::to_value(&data)
                .map(Arc::new)
                .map_err(|e| Error::SerializationError(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Network(format!(
                "request timed out after {:?}",
                timeout
            ))),
        };

        let patch = match &result {
            Ok(data) => EntryPatch::success(data.clone(), Instant::now(), stale_after),
            Err(e) => EntryPatch::failure(e.clone()),
        };

        let applied = self.apply_if_current(&key, generation, patch);
        if applied {
            match &result {
                Ok(_) => {
                    info!("✓ Fetched {} in {:?}", key, started.elapsed());
                    self.metrics
                        .record_fetch(&key.to_string(), started.elapsed());
                }
                Err(e) => self.metrics.record_error(&key.to_string(), &e.to_string()),
            }
        } else {
            warn!(
                "Discarding response for {} (request {} was superseded)",
                key, generation
            );
        }

        if let Err(e) = &result {
            if e.is_unauthorized() && self.session_key.as_ref() != Some(&key) {
                self.expire_session();
            }
        }

        self.inflight
            .remove_if(&key, |_, pending| pending.generation == generation);

        if applied {
            result
        } else {
            self.superseding_result(&key, generation, result).await
        }
    }

    /// What a superseded request's callers receive: the newer request's
    /// result if it is still running, otherwise the data it stored.
    async fn superseding_result(
        &self,
        key: &QueryKey,
        generation: u64,
        own: Result<Arc<Value>>,
    ) -> Result<Arc<Value>> {
        let newer = self
            .inflight
            .get(key)
            .filter(|pending| pending.generation > generation)
            .map(|pending| pending.fetch.clone());
        if let Some(newer) = newer {
            return newer.await;
        }

        match self.store.get(key) {
            Some(entry) if entry.status == QueryStatus::Success => match entry.data {
                Some(data) => Ok(data),
                None => own,
            },
            _ => own,
        }
    }

    /// Write `patch` only if `generation` is still the latest request for
    /// `key`. The check and the write happen under the generation lock, and
    /// under the in-flight record so a concurrent invalidation is not lost.
    fn apply_if_current(&self, key: &QueryKey, generation: u64, mut patch: EntryPatch) -> bool {
        let applied = {
            let pending = self.inflight.get(key);
            let invalidated_meanwhile = pending
                .as_ref()
                .is_some_and(|p| p.generation == generation && p.stale);
            if invalidated_meanwhile && patch.invalidated.is_some() {
                patch.invalidated = Some(true);
            }

            match self.latest.get(key) {
                Some(latest) if *latest == generation => {
                    self.store.set_silent(key, patch);
                    true
                }
                _ => false,
            }
        };

        if applied {
            self.store.notify_key(key);
        }
        applied
    }
}

fn decode<T: DeserializeOwned>(data: &Value) -> Result<T> {
    serde_json::from_value(data.clone()).map_err(|e| Error::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn executor() -> QueryExecutor {
        QueryExecutor::new(
            CacheStore::new(),
            &SyncConfig::default().with_stale_after(Duration::from_secs(60)),
        )
    }

    fn key() -> QueryKey {
        QueryKey::new("products").push("list")
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let exec = executor();
        let value: Vec<u32> = exec
            .run(&key(), || async { Ok(vec![1, 2, 3]) })
            .await
            .expect("fetch failed");
        assert_eq!(value, vec![1, 2, 3]);

        let entry = exec.store().get(&key()).expect("entry missing");
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data.as_deref(), Some(&json!([1, 2, 3])));
        assert!(!exec.is_in_flight(&key()));
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let exec = executor();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = exec
                .run(&key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let exec = executor();
        let _: u32 = exec.run(&key(), || async { Ok(1) }).await.unwrap();
        exec.invalidate(&KeyPredicate::All);

        let result: Result<u32> = exec
            .run(&key(), || async { Err(Error::Network("offline".into())) })
            .await;
        assert_eq!(result, Err(Error::Network("offline".into())));

        let entry = exec.store().get(&key()).unwrap();
        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.data.as_deref(), Some(&json!(1)));
        assert_eq!(entry.error, Some(Error::Network("offline".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_network_error() {
        let exec = QueryExecutor::new(
            CacheStore::new(),
            &SyncConfig::default().with_request_timeout(Duration::from_secs(10)),
        );

        let result: Result<u32> = exec
            .run(&key(), || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(
            exec.store().get(&key()).map(|e| e.status),
            Some(QueryStatus::Error)
        );
    }

    #[tokio::test]
    async fn test_cache_only() {
        let exec = executor();
        let miss: Result<u32> = exec
            .run_with(
                &key(),
                QueryOptions::default().with_policy(FetchPolicy::CacheOnly),
                || async { Ok(1) },
            )
            .await;
        assert_eq!(miss, Err(Error::CacheMiss));
        assert!(exec.store().get(&key()).is_none());

        let _: u32 = exec.run(&key(), || async { Ok(5) }).await.unwrap();
        exec.invalidate(&KeyPredicate::All);

        let stale: u32 = exec
            .run_with(
                &key(),
                QueryOptions::default().with_policy(FetchPolicy::CacheOnly),
                || async { Ok(1) },
            )
            .await
            .unwrap();
        assert_eq!(stale, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_after_override() {
        let exec = executor();
        let options = QueryOptions::default().with_stale_after(Duration::from_secs(1));
        let _: u32 = exec
            .run_with(&key(), options.clone(), || async { Ok(1) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let value: u32 = exec
            .run_with(&key(), options, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let exec = executor();
        let _: String = exec
            .run(&key(), || async { Ok("text".to_string()) })
            .await
            .unwrap();

        let result: Result<Vec<u32>> = exec.run(&key(), || async { Ok(vec![]) }).await;
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_pending_response() {
        let exec = executor();
        let background = exec.clone();
        let handle = tokio::spawn(async move {
            background
                .run(&key(), || async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(json!({ "user": "old session" }))
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(exec.is_in_flight(&key()));

        exec.reset();
        exec.store().clear();

        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert!(exec.store().get(&key()).is_none());
    }

    #[tokio::test]
    async fn test_loading_is_recorded_when_request_is_issued() {
        let exec = executor();
        let k = key();
        let mut pending = Box::pin(exec.run(&k, || async { Ok(1u32) }));
        assert!(futures::poll!(&mut pending).is_pending());

        assert_eq!(exec.state::<u32>(&k).unwrap(), QueryState::Loading);
        assert_eq!(pending.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_fetch_forces_new_request() {
        let exec = executor();
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = {
            let exec = exec.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                exec.run(&key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok("before".to_string())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A write was acknowledged while the read was still running.
        exec.invalidate(&KeyPredicate::All);

        let counter = calls.clone();
        let read: String = exec
            .run(&key(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("after".to_string())
            })
            .await
            .unwrap();
        assert_eq!(read, "after");

        assert_eq!(slow.await.unwrap().unwrap(), "after");
        let again: String = exec
            .run(&key(), || async { Ok("unexpected".to_string()) })
            .await
            .unwrap();
        assert_eq!(again, "after");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_older_than_invalidation_stays_stale() {
        let exec = executor();
        let slow = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.run(&key(), || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(1u32)
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        exec.invalidate(&KeyPredicate::resource("products"));

        assert_eq!(slow.await.unwrap().unwrap(), 1);
        let entry = exec.store().get(&key()).unwrap();
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(entry.invalidated);
        assert!(!entry.is_fresh(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_caller_receives_newer_result() {
        let exec = executor();
        let slow = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.run(&key(), || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(1u32)
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let newer: u32 = exec
            .refetch(&key(), || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(2)
            })
            .await
            .unwrap();
        assert_eq!(newer, 2);
        assert_eq!(slow.await.unwrap().unwrap(), 2);
        assert_eq!(exec.state::<u32>(&key()).unwrap().data(), Some(&2));
    }

    #[tokio::test]
    async fn test_unauthorized_expires_session() {
        let session = QueryKey::new("auth").push("profile");
        let exec = executor().with_session_key(session.clone());
        let _: Option<String> = exec
            .run(&session, || async { Ok(Some("u1".to_string())) })
            .await
            .unwrap();

        let result: Result<u32> = exec
            .run(&key(), || async { Err(Error::Unauthorized("session expired".into())) })
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        let user: Option<String> = exec
            .run(&session, || async { Ok(Some("unexpected".to_string())) })
            .await
            .unwrap();
        assert_eq!(user, None);
    }

    #[tokio::test]
    async fn test_state() {
        let exec = executor();
        assert_eq!(exec.state::<u32>(&key()).unwrap(), QueryState::Idle);

        let _: u32 = exec.run(&key(), || async { Ok(3) }).await.unwrap();
        assert_eq!(exec.state::<u32>(&key()).unwrap().data(), Some(&3));
    }
}
