//! The ordered request execution chain.
//!
//! `execute` runs one logical request through a fixed sequence: cache lookup,
//! credential resolution, request mangling, pooled wire exchange (with a
//! single fresh-connection retry when a reused stream turns out stale),
//! bounded idempotent retry, redirect following, decompression, response
//! mangling, and cache store. HTTP error statuses are responses, never
//! errors; only transport-level trouble surfaces as `Err`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::transport::auth::AuthManager;
use crate::transport::cache::{CacheKey, ResponseCache};
use crate::transport::cookies::CookieJar;
use crate::transport::error::{TransportError, TransportErrorKind};
use crate::transport::limiter::HostPacer;
use crate::transport::mangle::{
    MangleChain, ManglePlugin, fix_request_content_length, fix_response_content_length,
};
use crate::transport::message::{Request, Response};
use crate::transport::pool::{Connection, ConnectionKey, ConnectionPool};
use crate::transport::retry::{RetryDecision, RetryPolicy};
use crate::transport::wire::{self, Target};

/// Executes logical requests as wire exchanges. Shared by all workers of an
/// engine; all state inside is safe for concurrent use.
pub(crate) struct RequestPipeline {
    config: EngineConfig,
    pool: ConnectionPool,
    auth: AuthManager,
    manglers: MangleChain,
    cache: ResponseCache,
    cookies: CookieJar,
    pacer: HostPacer,
    retry: RetryPolicy,
}

impl RequestPipeline {
    /// Builds the pipeline from validated configuration.
    pub(crate) fn new(config: EngineConfig, plugins: Vec<Arc<dyn ManglePlugin>>) -> Self {
        let auth = AuthManager::from_config(config.basic_auth.as_ref(), config.ntlm_auth.as_ref());
        let cookies = CookieJar::new(config.ignore_session_cookies);
        cookies.seed(config.seed_cookies.clone());

        Self {
            pool: ConnectionPool::new(Duration::from_secs(config.idle_timeout_secs)),
            auth,
            manglers: MangleChain::new(plugins),
            cache: ResponseCache::new(),
            cookies,
            pacer: HostPacer::new(config.host_delay_ms),
            retry: RetryPolicy::new(config.max_retries),
            config,
        }
    }

    /// The session cookie jar, exposed for the engine's public accessor.
    pub(crate) fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Drops every cached response.
    pub(crate) fn clear_cache(&self) {
        debug!(entries = self.cache.len(), "clearing response cache");
        self.cache.clear();
    }

    /// Runs one request to completion.
    #[instrument(
        skip_all,
        fields(request_id = request.id(), method = %request.method, url = %request.url)
    )]
    pub(crate) async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let request_id = request.id();
        self.execute_inner(request)
            .await
            .map_err(|kind| TransportError::new(request_id, kind))
    }

    async fn execute_inner(&self, request: Request) -> Result<Response, TransportErrorKind> {
        let cache_key = self.cacheable(&request).then(|| {
            CacheKey::derive(&request, &self.config.cache_policy)
        });
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key, request.id()) {
                return Ok(hit);
            }
        }

        let original_url = request.url.clone();
        let mut current = request;
        let mut hops = 0u32;

        let mut response = loop {
            let (prepared, target) = self.prepare(current.clone())?;
            let response = self.exchange_with_retry(&prepared, &target).await?;

            // Cookies accumulate from every hop, not just the final response.
            let path = target
                .path_and_query
                .split('?')
                .next()
                .unwrap_or("/")
                .to_string();
            self.cookies
                .store_response_cookies(&response.headers, &target.host, &path);

            if response.is_redirect() && response.headers.contains("location") {
                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(TransportErrorKind::RedirectLimitExceeded {
                        url: original_url,
                        limit: self.config.max_redirects,
                    });
                }
                apply_redirect(&mut current, &response)?;
                debug!(hop = hops, next = %current.url, "following redirect");
                continue;
            }
            break response;
        };

        if let Some(encoding) = response.headers.get("content-encoding").map(str::to_string) {
            match wire::decompress_body(&encoding, &response.body) {
                Ok(Some(decompressed)) => {
                    response.body = decompressed;
                    response.headers.remove("Content-Encoding");
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%encoding, %error, "decompression failed, passing body through");
                }
            }
        }

        if !self.manglers.is_empty() {
            response = self.manglers.apply_response(response);
        }
        fix_response_content_length(&mut response);

        if let Some(key) = cache_key {
            self.cache.store(key, &response);
        }
        Ok(response)
    }

    fn cacheable(&self, request: &Request) -> bool {
        request.is_idempotent() && !self.config.bypass_cache
    }

    /// Builds the wire-ready request for one hop: URL-parameter injection,
    /// default headers, cookies, credentials, the mangle chain, and the
    /// single `Content-Length` recomputation.
    fn prepare(&self, mut request: Request) -> Result<(Request, Target), TransportErrorKind> {
        if let Some(param) = &self.config.url_parameter {
            request.url = inject_url_parameter(&request.url, param);
        }

        for (name, value) in &self.config.extra_headers {
            if !request.headers.contains(name) {
                request.headers.insert(name, value);
            }
        }
        if !request.headers.contains("user-agent") {
            request.headers.insert("User-Agent", &self.config.user_agent);
        }
        if !request.headers.contains("accept-encoding") {
            request.headers.insert("Accept-Encoding", "gzip, deflate");
        }

        let target = Target::parse(&request.url)?;
        if !request.headers.contains("cookie") {
            let path = target.path_and_query.split('?').next().unwrap_or("/");
            if let Some(header) =
                self.cookies
                    .header_for(&target.host, path, target.scheme.is_tls())
            {
                request.headers.insert("Cookie", &header);
            }
        }
        if !request.headers.contains("authorization") {
            if let Some((_, value)) = self.auth.resolve(&request.url) {
                request.headers.insert("Authorization", value);
            }
        }

        let mut request = if self.manglers.is_empty() {
            request
        } else {
            self.manglers.apply_request(request)
        };
        fix_request_content_length(&mut request);

        // Manglers may rewrite the URL, so the target parses last.
        let target = Target::parse(&request.url)?;
        Ok((request, target))
    }

    /// The bounded transparent retry of step five. Non-idempotent methods
    /// never re-enter the wire; their first failure is final.
    async fn exchange_with_retry(
        &self,
        request: &Request,
        target: &Target,
    ) -> Result<Response, TransportErrorKind> {
        let mut attempt = 0u32;
        loop {
            match self.exchange(request, target).await {
                Ok(response) => return Ok(response),
                Err(kind) if request.is_idempotent() => match self.retry.decide(attempt, &kind) {
                    RetryDecision::Retry(delay) => {
                        warn!(attempt, %kind, delay_ms = delay.as_millis() as u64, "retrying exchange");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(kind),
                },
                Err(kind) => return Err(kind),
            }
        }
    }

    /// One attempt: pace, acquire, exchange, all under the configured
    /// per-exchange timeout. Connection setup (DNS, TCP connect, CONNECT
    /// handshake, TLS handshake) counts against the same budget as the
    /// write and read, so a black-holed host or silent proxy fails at
    /// `timeout_secs` instead of stalling a worker.
    ///
    /// A connection-level failure on a reused stream means the server closed
    /// it while idle; that gets exactly one transparent rerun on a fresh
    /// connection, inside the same timeout budget.
    async fn exchange(
        &self,
        request: &Request,
        target: &Target,
    ) -> Result<Response, TransportErrorKind> {
        self.pacer.pace(&target.host).await;

        let key = ConnectionKey::for_target(target, self.config.proxy.as_ref());
        let absolute_form = self.config.proxy.is_some() && !target.scheme.is_tls();

        let attempt = async {
            let (conn, reused) = self.pool.acquire(&key).await?;
            match self.exchange_on(conn, request, target, absolute_form).await {
                Err(kind) if reused && kind.is_connection_level() => {
                    debug!(%kind, "reused connection was stale, rerunning on a fresh one");
                    let conn = self.pool.open_fresh(&key).await?;
                    self.exchange_on(conn, request, target, absolute_form).await
                }
                other => other,
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportErrorKind::Timeout {
                url: request.url.clone(),
                seconds: self.config.timeout_secs,
            }),
        }
    }

    /// Writes the request and reads the response on one connection. The
    /// connection goes back to the pool only when the response framing left
    /// it reusable.
    async fn exchange_on(
        &self,
        mut conn: Connection,
        request: &Request,
        target: &Target,
        absolute_form: bool,
    ) -> Result<Response, TransportErrorKind> {
        let bytes = wire::serialize_request(request, target, absolute_form);
        let head = request.method == "HEAD";

        conn.stream.write_all(&bytes).await.map_err(|e| {
            TransportErrorKind::from_io(&e, &request.url, &target.host, target.port)
        })?;
        conn.stream.flush().await.map_err(|e| {
            TransportErrorKind::from_io(&e, &request.url, &target.host, target.port)
        })?;
        let raw = wire::read_response(
            &mut conn.stream,
            &request.url,
            head,
            self.config.max_body_size,
        )
        .await?;

        let reusable = raw.reusable;
        let response = Response::new(request.id(), raw.status, raw.reason, raw.headers, raw.body);
        self.pool.release(conn, reusable);
        Ok(response)
    }
}

/// Appends `;param` to the URL path, ahead of any query string. Already
/// injected URLs (redirect hops re-enter preparation) are left alone.
fn inject_url_parameter(url: &str, param: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let suffix = format!(";{param}");
    if parsed.path().ends_with(&suffix) {
        return url.to_string();
    }
    let new_path = format!("{}{suffix}", parsed.path());
    parsed.set_path(&new_path);
    parsed.to_string()
}

/// Rewrites the request in place for a redirect hop. 301/302/303 downgrade
/// non-idempotent methods to a bodyless GET; 307/308 preserve everything.
fn apply_redirect(current: &mut Request, response: &Response) -> Result<(), TransportErrorKind> {
    let location =
        response
            .headers
            .get("location")
            .ok_or_else(|| TransportErrorKind::MalformedResponse {
                url: current.url.clone(),
                reason: "redirect without a Location header".to_string(),
            })?;

    let base = Url::parse(&current.url).map_err(|_| TransportErrorKind::InvalidUrl {
        url: current.url.clone(),
    })?;
    let next = base
        .join(location)
        .map_err(|_| TransportErrorKind::InvalidUrl {
            url: location.to_string(),
        })?;

    current.url = next.to_string();
    if matches!(response.status, 301 | 302 | 303) && !current.is_idempotent() {
        current.method = "GET".to_string();
        current.body = None;
        current.headers.remove("Content-Type");
        current.headers.remove("Content-Length");
    }
    Ok(())
}
