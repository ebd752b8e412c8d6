//! Remote writes followed by cache invalidation.
//!
//! Invalidation happens strictly after the write is acknowledged and goes
//! through the query executor, so reads already in flight cannot bring back
//! pre-write data. A failed write leaves every entry exactly as it was, so the
//! screen keeps showing the last known-good server state.

use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::key::KeyPredicate;
use crate::observability::{NoOpMetrics, SyncMetrics};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Runs writes and invalidates the entries they affect.
#[derive(Clone)]
pub struct MutationRunner {
    executor: QueryExecutor,
    metrics: Arc<dyn SyncMetrics>,
    timeout: Duration,
}

impl MutationRunner {
    pub fn new(executor: QueryExecutor, timeout: Duration) -> Self {
        MutationRunner {
            executor,
            metrics: Arc::new(NoOpMetrics),
            timeout,
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Call `mutation(args)` once; on success invalidate `affected`.
    ///
    /// # Errors
    /// Propagates the mutation's error unchanged (timeouts become
    /// `Error::Network`). Nothing is invalidated on failure; a 401 expires
    /// the cached session.
    pub async fn run<A, R, F, Fut>(&self, mutation: F, args: A, affected: &KeyPredicate) -> Result<R>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, mutation(args)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Network(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        };

        match result {
            Ok(value) => {
                let count = self.executor.invalidate(affected);
                self.metrics.record_mutation(started.elapsed());
                info!(
                    "✓ Mutation succeeded in {:?}, invalidated {} entries ({:?})",
                    started.elapsed(),
                    count,
                    affected
                );
                Ok(value)
            }
            Err(e) => {
                self.metrics
                    .record_error(&format!("mutation {:?}", affected), &e.to_string());
                if e.is_unauthorized() {
                    self.executor.expire_session();
                }
                Err(e)
            }
        }
    }

    /// Handle that also tracks the mutation's status for a screen.
    pub fn tracked<R>(&self) -> Mutation<R> {
        Mutation {
            runner: self.clone(),
            state: Arc::new(Mutex::new(MutationState::Idle)),
        }
    }
}

/// Status of the most recent call on a [`Mutation`].
#[derive(Clone, Debug, PartialEq)]
pub enum MutationState<R> {
    Idle,
    Pending,
    Success(R),
    Error(Error),
}

impl<R> MutationState<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Pending)
    }
}

/// Mutation runner plus the status of its last call.
///
/// Cloning shares the status.
#[derive(Clone)]
pub struct Mutation<R> {
    runner: MutationRunner,
    state: Arc<Mutex<MutationState<R>>>,
}

impl<R: Clone> Mutation<R> {
    pub fn state(&self) -> MutationState<R> {
        self.lock().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_pending()
    }

    /// Back to `Idle` (e.g. when a form is dismissed).
    pub fn reset(&self) {
        *self.lock() = MutationState::Idle;
    }

    /// Same as [`MutationRunner::run`], recording the outcome.
    pub async fn run<A, F, Fut>(&self, mutation: F, args: A, affected: &KeyPredicate) -> Result<R>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        *self.lock() = MutationState::Pending;
        let result = self.runner.run(mutation, args, affected).await;
        *self.lock() = match &result {
            Ok(value) => MutationState::Success(value.clone()),
            Err(e) => MutationState::Error(e.clone()),
        };
        result
    }

    fn lock(&self) -> MutexGuard<'_, MutationState<R>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
