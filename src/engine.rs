//! The public engine facade.
//!
//! A [`ScanEngine`] is built once from validated configuration plus a set of
//! mangle plugins, and is then shared freely: every method takes `&self` and
//! the engine is cheap to clone. Material configuration changes (new proxy,
//! new credentials) are handled by building a new engine; exchanges in flight
//! keep the snapshot they started with.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use tracing::info;

use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::{CancelHandle, DeliveryMode, DispatchError, Dispatcher};
use crate::transport::cookies::Cookie;
use crate::transport::error::TransportError;
use crate::transport::mangle::ManglePlugin;
use crate::transport::message::{Request, Response};
use crate::transport::pipeline::RequestPipeline;

/// The transport engine: sends single requests and bounded concurrent
/// batches through one shared pool, cache, cookie jar, and mangle chain.
#[derive(Clone)]
pub struct ScanEngine {
    pipeline: Arc<RequestPipeline>,
}

impl ScanEngine {
    /// Builds an engine from configuration and mangle plugins.
    ///
    /// The plugin chain is sorted here, once; it is never re-sorted while
    /// exchanges are in flight.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration fails validation.
    pub fn new(
        config: EngineConfig,
        plugins: Vec<Arc<dyn ManglePlugin>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            timeout_secs = config.timeout_secs,
            max_retries = config.max_retries,
            proxied = config.proxy.is_some(),
            plugins = plugins.len(),
            "transport engine ready"
        );
        Ok(Self {
            pipeline: Arc::new(RequestPipeline::new(config, plugins)),
        })
    }

    /// Sends one request through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for transport-level failures. HTTP error
    /// statuses (4xx/5xx) are ordinary responses.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        self.pipeline.execute(request).await
    }

    /// Runs a batch of jobs with bounded parallelism and collects every
    /// `(job, outcome)` pair. The mapper turns each job into the request to
    /// send; the job value rides along so unordered results stay
    /// attributable.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when `max_parallel` is out of range; no
    /// request is sent in that case.
    pub async fn send_many<T>(
        &self,
        jobs: Vec<T>,
        mapper: impl Fn(&T) -> Request + Send + Sync + 'static,
        max_parallel: usize,
        mode: DeliveryMode,
    ) -> Result<Vec<(T, Result<Response, TransportError>)>, DispatchError>
    where
        T: Send + 'static,
    {
        let stream = self.send_stream(jobs, mapper, max_parallel, mode, &CancelHandle::new())?;
        Ok(futures_util::StreamExt::collect(stream).await)
    }

    /// Streaming variant of [`send_many`](Self::send_many), with cooperative
    /// cancellation: jobs not yet started when the handle fires are dropped,
    /// in-flight jobs finish and are delivered.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when `max_parallel` is out of range.
    pub fn send_stream<T>(
        &self,
        jobs: Vec<T>,
        mapper: impl Fn(&T) -> Request + Send + Sync + 'static,
        max_parallel: usize,
        mode: DeliveryMode,
        cancel: &CancelHandle,
    ) -> Result<BoxStream<'static, (T, Result<Response, TransportError>)>, DispatchError>
    where
        T: Send + 'static,
    {
        let pipeline = Arc::clone(&self.pipeline);
        let mapper = Arc::new(mapper);
        Dispatcher::run(
            jobs,
            move |job: T| {
                let pipeline = Arc::clone(&pipeline);
                let mapper = Arc::clone(&mapper);
                async move {
                    let request = mapper(&job);
                    let result = pipeline.execute(request).await;
                    (job, result)
                }
            },
            max_parallel,
            mode,
            cancel,
        )
    }

    /// Snapshot of the session cookie jar accumulated so far.
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        self.pipeline.cookies().cookies()
    }

    /// Drops every cached response; subsequent sends hit the wire again.
    pub fn clear_cache(&self) {
        self.pipeline.clear_cache();
    }
}
