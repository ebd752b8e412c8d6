//! Typed render state derived from a cache entry.

use crate::error::{Error, Result};
use crate::store::{QueryEntry, QueryStatus};
use serde::de::DeserializeOwned;
use tokio::time::Instant;

/// Whether served data is within its freshness window.
///
/// A stale read is not an error; screens use it to decide whether to show a
/// subtle "refreshing" indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// What a screen should render for one query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryState<T> {
    /// Nothing requested yet
    Idle,
    /// First load in progress, no data yet
    Loading,
    /// Last attempt failed and there is no data to show
    Error(Error),
    /// Data to show, possibly stale and possibly being refreshed
    Success {
        data: T,
        freshness: Freshness,
        /// A background refetch is running
        is_fetching: bool,
        /// Error from the most recent attempt, if it failed
        last_error: Option<Error>,
    },
}

impl<T> QueryState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryState::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryState::Error(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            QueryState::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            QueryState::Error(e) => Some(e),
            QueryState::Success { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }
}

impl<T: DeserializeOwned> QueryState<T> {
    /// Build the render state for an entry (or its absence).
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` if cached data does not fit `T`.
    pub fn from_entry(entry: Option<&QueryEntry>, now: Instant) -> Result<Self> {
        let Some(entry) = entry else {
            return Ok(QueryState::Idle);
        };

        match (&entry.data, entry.status) {
            (Some(data), status) => Ok(QueryState::Success {
                data: serde_json::from_value(data.as_ref().clone())?,
                freshness: if entry.is_fresh(now) {
                    Freshness::Fresh
                } else {
                    Freshness::Stale
                },
                is_fetching: status == QueryStatus::Loading,
                last_error: entry.error.clone(),
            }),
            (None, QueryStatus::Idle) => Ok(QueryState::Idle),
            (None, QueryStatus::Loading) => Ok(QueryState::Loading),
            (None, QueryStatus::Error) => Ok(QueryState::Error(
                entry
                    .error
                    .clone()
                    .unwrap_or_else(|| Error::Other("unknown failure".to_string())),
            )),
            // Success always carries data; treat a bare success as not loaded.
            (None, QueryStatus::Success) => Ok(QueryState::Idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryKey;
    use crate::store::{CacheStore, EntryPatch};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_three_renderable_states() {
        let store = CacheStore::new();
        let key = QueryKey::new("engineers").push("list");
        let now = Instant::now();

        let state = QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now).unwrap();
        assert_eq!(state, QueryState::Idle);

        store.set(&key, EntryPatch::loading());
        let state = QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now).unwrap();
        assert!(state.is_loading());

        store.set(&key, EntryPatch::failure(Error::Network("offline".into())));
        let state = QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now).unwrap();
        assert_eq!(state, QueryState::Error(Error::Network("offline".into())));

        store.set(
            &key,
            EntryPatch::success(Arc::new(json!([1, 2])), now, Duration::from_secs(60)),
        );
        let state = QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now).unwrap();
        assert_eq!(state.data(), Some(&vec![1, 2]));
    }

    #[tokio::test]
    async fn test_refreshing_stale_data_is_still_success() {
        let store = CacheStore::new();
        let key = QueryKey::new("engineers").push("list");
        let now = Instant::now();

        store.set(
            &key,
            EntryPatch::success(Arc::new(json!([1])), now, Duration::from_secs(60)),
        );
        store.invalidate(&crate::key::KeyPredicate::All);
        store.set(&key, EntryPatch::loading());

        match QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now).unwrap() {
            QueryState::Success {
                data,
                freshness,
                is_fetching,
                last_error,
            } => {
                assert_eq!(data, vec![1]);
                assert_eq!(freshness, Freshness::Stale);
                assert!(is_fetching);
                assert!(last_error.is_none());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let store = CacheStore::new();
        let key = QueryKey::new("engineers").push("list");
        let now = Instant::now();
        store.set(
            &key,
            EntryPatch::success(Arc::new(json!("text")), now, Duration::from_secs(60)),
        );

        let result = QueryState::<Vec<u32>>::from_entry(store.get(&key).as_ref(), now);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }
}
