//! Bounded concurrent fan-out over independent jobs.
//!
//! The dispatcher runs a worker over a batch of jobs with at most
//! `max_parallel` in flight, delivering `(job, outcome)` pairs either in
//! submission order or as they complete. One job's failure is its own
//! outcome; it never affects its siblings. Cancellation is cooperative:
//! jobs that have not started are dropped, jobs already past their first
//! suspension point run to completion.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::debug;

/// Lowest accepted parallelism bound.
pub const MIN_PARALLEL: usize = 1;

/// Highest accepted parallelism bound.
pub const MAX_PARALLEL: usize = 100;

/// How batch results are delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Results arrive in submission order, head-of-line blocking included.
    Ordered,
    /// Results arrive as jobs finish.
    Unordered,
}

/// Errors raised before any job starts.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Parallelism outside the accepted range.
    #[error("parallelism must be between {MIN_PARALLEL} and {MAX_PARALLEL}, got {value}")]
    InvalidParallelism {
        /// The rejected value.
        value: usize,
    },
}

/// Cooperative cancellation flag shared between a batch and its caller.
///
/// Cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Jobs not yet started will be dropped.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounded batch executor.
pub struct Dispatcher;

impl Dispatcher {
    /// Streams `(job, outcome)` pairs for the batch.
    ///
    /// The worker owns its job for the duration of the call and hands it back
    /// alongside the outcome, so unordered delivery stays attributable.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidParallelism`] when `max_parallel` is
    /// outside `MIN_PARALLEL..=MAX_PARALLEL`; no job is started in that case.
    pub fn run<T, R, F, Fut>(
        jobs: Vec<T>,
        worker: F,
        max_parallel: usize,
        mode: DeliveryMode,
        cancel: &CancelHandle,
    ) -> Result<BoxStream<'static, (T, R)>, DispatchError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (T, R)> + Send + 'static,
    {
        if !(MIN_PARALLEL..=MAX_PARALLEL).contains(&max_parallel) {
            return Err(DispatchError::InvalidParallelism {
                value: max_parallel,
            });
        }

        debug!(jobs = jobs.len(), max_parallel, ?mode, "dispatching batch");
        let worker = Arc::new(worker);
        let cancel = cancel.clone();
        let futures = stream::iter(jobs.into_iter().map(move |job| {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            async move {
                // Checked when the job is first polled: a cancelled batch
                // drops jobs that were still queued behind the bound.
                if cancel.is_cancelled() {
                    return None;
                }
                Some(worker(job).await)
            }
        }));

        let results = match mode {
            DeliveryMode::Ordered => futures.buffered(max_parallel).boxed(),
            DeliveryMode::Unordered => futures.buffer_unordered(max_parallel).boxed(),
        };
        Ok(results.filter_map(|item| async move { item }).boxed())
    }

    /// Runs the batch to completion and collects every delivered pair.
    ///
    /// # Errors
    ///
    /// Same validation as [`Dispatcher::run`].
    pub async fn run_collect<T, R, F, Fut>(
        jobs: Vec<T>,
        worker: F,
        max_parallel: usize,
        mode: DeliveryMode,
        cancel: &CancelHandle,
    ) -> Result<Vec<(T, R)>, DispatchError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (T, R)> + Send + 'static,
    {
        let stream = Self::run(jobs, worker, max_parallel, mode, cancel)?;
        Ok(stream.collect().await)
    }
}
