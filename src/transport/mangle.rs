//! Interceptor plugins that rewrite requests and responses in flight.
//!
//! Plugins are ordered by a 0–100 priority, highest first; ties run in
//! registration order. The chain is sorted exactly once when built and is
//! shared immutably afterwards, so a batch in flight never observes a
//! re-sort. A plugin that fails is logged and skipped for that message; the
//! remaining plugins still run.

use std::sync::Arc;

use tracing::warn;

use crate::transport::error::MangleError;
use crate::transport::message::{Request, Response};

/// An interceptor that may rewrite requests before the wire and responses
/// after it.
///
/// Both hooks default to identity, so a plugin implements only the direction
/// it cares about. Implementations must be idempotent per message: the engine
/// may re-run the request hook on the request it builds for a redirect hop.
pub trait ManglePlugin: Send + Sync {
    /// Plugin name, used in diagnostics.
    fn name(&self) -> &str;

    /// Execution priority, 0–100. Higher runs earlier.
    fn priority(&self) -> u8 {
        50
    }

    /// Rewrites an outgoing request.
    ///
    /// # Errors
    ///
    /// A [`MangleError`] skips this plugin's transform for the message.
    fn mangle_request(&self, request: Request) -> Result<Request, MangleError> {
        Ok(request)
    }

    /// Rewrites an incoming response.
    ///
    /// # Errors
    ///
    /// A [`MangleError`] skips this plugin's transform for the message.
    fn mangle_response(&self, response: Response) -> Result<Response, MangleError> {
        Ok(response)
    }
}

/// Sorts plugins by descending priority, preserving registration order among
/// equal priorities.
pub fn sort_by_priority(plugins: &mut [Arc<dyn ManglePlugin>]) {
    // sort_by is stable, which is what keeps ties in registration order.
    plugins.sort_by(|a, b| b.priority().cmp(&a.priority()));
}

/// An immutable, pre-sorted snapshot of the plugin chain.
///
/// Cloning is cheap; exchanges hold the snapshot they started with even if
/// the engine is rebuilt mid-batch.
#[derive(Clone, Default)]
pub(crate) struct MangleChain {
    plugins: Arc<[Arc<dyn ManglePlugin>]>,
}

impl MangleChain {
    /// Builds the chain, sorting once.
    pub(crate) fn new(mut plugins: Vec<Arc<dyn ManglePlugin>>) -> Self {
        sort_by_priority(&mut plugins);
        Self {
            plugins: plugins.into(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs every request hook in order. A failing plugin contributes no
    /// transform; the message continues through the rest of the chain.
    pub(crate) fn apply_request(&self, request: Request) -> Request {
        let mut current = request;
        for plugin in self.plugins.iter() {
            match plugin.mangle_request(current.clone()) {
                Ok(next) => current = next,
                Err(error) => {
                    warn!(plugin = plugin.name(), %error, "request mangler failed, skipping");
                }
            }
        }
        current
    }

    /// Runs every response hook in order, with the same failure policy.
    pub(crate) fn apply_response(&self, response: Response) -> Response {
        let mut current = response;
        for plugin in self.plugins.iter() {
            match plugin.mangle_response(current.clone()) {
                Ok(next) => current = next,
                Err(error) => {
                    warn!(plugin = plugin.name(), %error, "response mangler failed, skipping");
                }
            }
        }
        current
    }
}

/// Recomputes a request's `Content-Length` from its body. Called exactly once
/// after the full request chain has run.
pub(crate) fn fix_request_content_length(request: &mut Request) {
    match &request.body {
        Some(body) => {
            let len = body.len().to_string();
            request.headers.insert("Content-Length", &len);
        }
        None => request.headers.remove("Content-Length"),
    }
}

/// Recomputes a response's `Content-Length` from its body. Called exactly
/// once after decompression and the full response chain.
pub(crate) fn fix_response_content_length(response: &mut Response) {
    if response.body.is_empty() && !response.headers.contains("Content-Length") {
        return;
    }
    let len = response.body.len().to_string();
    response.headers.insert("Content-Length", &len);
}
