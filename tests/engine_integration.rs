//! End-to-end engine scenarios against mock HTTP servers.

#![allow(clippy::unwrap_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wirescan::{
    DeliveryMode, EngineConfig, MangleError, ManglePlugin, ProxyConfig, Request, Response,
    ScanEngine, TransportErrorKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(config: EngineConfig) -> ScanEngine {
    init_tracing();
    ScanEngine::new(config, vec![]).unwrap()
}

fn engine() -> ScanEngine {
    engine_with(EngineConfig::default())
}

#[tokio::test]
async fn test_simple_get_roundtrip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&server)
        .await;

    let response = engine()
        .send(Request::get(&format!("{}/page", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "welcome");
}

#[tokio::test]
async fn test_http_error_status_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let response = engine()
        .send(Request::get(&format!("{}/missing", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.body_text(), "not here");
}

#[tokio::test]
async fn test_repeated_get_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("cacheable"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine();
    let url = format!("{}/cached", server.uri());
    let first = engine.send(Request::get(&url)).await.unwrap();
    let second = engine.send(Request::get(&url)).await.unwrap();

    assert_eq!(first.status, 200);
    assert_eq!(second.status, 200);
    assert_eq!(second.body_text(), "cacheable");
    // expect(1) on the mock verifies the second send never hit the wire.
}

#[tokio::test]
async fn test_cache_bypass_hits_the_wire_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.bypass_cache = true;
    let engine = engine_with(config);

    let url = format!("{}/fresh", server.uri());
    engine.send(Request::get(&url)).await.unwrap();
    engine.send(Request::get(&url)).await.unwrap();
}

#[tokio::test]
async fn test_post_is_never_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine();
    let url = format!("{}/submit", server.uri());
    for _ in 0..2 {
        let request = Request::builder("POST", &url).body(&b"a=1"[..]).build();
        engine.send(request).await.unwrap();
    }
}

#[tokio::test]
async fn test_redirect_chain_followed_to_final_response() {
    let server = MockServer::start().await;
    for hop in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/hop{hop}")))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/hop{}", server.uri(), hop + 1)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/hop5"))
        .respond_with(ResponseTemplate::new(200).set_body_string("arrived"))
        .mount(&server)
        .await;

    let response = engine()
        .send(Request::get(&format!("{}/hop0", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "arrived");
}

#[tokio::test]
async fn test_redirect_limit_exceeded() {
    let server = MockServer::start().await;
    for hop in 0..12 {
        Mock::given(method("GET"))
            .and(path(format!("/loop{hop}")))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/loop{}", server.uri(), hop + 1)),
            )
            .mount(&server)
            .await;
    }

    let error = engine()
        .send(Request::get(&format!("{}/loop0", server.uri())))
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind,
        TransportErrorKind::RedirectLimitExceeded { limit: 10, .. }
    ));
}

#[tokio::test]
async fn test_redirect_downgrades_post_to_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/landing", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::builder("POST", &format!("{}/form", server.uri()))
        .body(&b"field=value"[..])
        .build();
    let response = engine().send(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "landed");
}

#[tokio::test]
async fn test_gzip_response_transparently_decompressed() {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"<html>compressed page</html>").unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/zipped"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(compressed),
        )
        .mount(&server)
        .await;

    let response = engine()
        .send(Request::get(&format!("{}/zipped", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.body_text(), "<html>compressed page</html>");
    assert!(!response.headers.contains("Content-Encoding"));
    assert_eq!(
        response.headers.get("Content-Length"),
        Some("28"),
        "Content-Length must describe the decompressed body"
    );
}

#[tokio::test]
async fn test_basic_auth_header_attached_within_scope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/panel"))
        .and(header(
            "Authorization",
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==",
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.basic_auth = Some(wirescan::BasicCredentials {
        url_prefix: format!("{}/admin/", server.uri()),
        username: "Aladdin".into(),
        password: "open sesame".into(),
    });
    let engine = engine_with(config);

    let inside = engine
        .send(Request::get(&format!("{}/admin/panel", server.uri())))
        .await
        .unwrap();
    assert_eq!(inside.status, 200);

    // Outside the scope the request goes out unauthenticated; the mock for
    // /public carries no Authorization matcher and still matches.
    let outside = engine
        .send(Request::get(&format!("{}/public", server.uri())))
        .await
        .unwrap();
    assert_eq!(outside.status, 200);
}

#[tokio::test]
async fn test_configured_headers_and_user_agent_applied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/probe"))
        .and(header("User-Agent", "scanner-ua/1.0"))
        .and(header("X-Forwarded-For", "127.0.0.2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.user_agent = "scanner-ua/1.0".into();
    config.extra_headers = vec![("X-Forwarded-For".into(), "127.0.0.2".into())];

    engine_with(config)
        .send(Request::get(&format!("{}/probe", server.uri())))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cookies_accumulate_and_replay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Set-Cookie", "sid=abc123; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("Cookie", "sid=abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine();
    engine
        .send(Request::get(&format!("{}/login", server.uri())))
        .await
        .unwrap();

    let cookies = engine.cookies();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "sid");

    engine
        .send(Request::get(&format!("{}/private", server.uri())))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_url_parameter_injected_into_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.jsp;jsessionid=TEST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.url_parameter = Some("jsessionid=TEST".into());

    engine_with(config)
        .send(Request::get(&format!("{}/index.jsp", server.uri())))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.timeout_secs = 1;
    config.max_retries = 0;

    let error = engine_with(config)
        .send(Request::get(&format!("{}/slow", server.uri())))
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind,
        TransportErrorKind::Timeout { seconds: 1, .. }
    ));
}

#[tokio::test]
async fn test_silent_proxy_connect_fails_at_the_configured_timeout() {
    // The proxy accepts the TCP connection but never answers the CONNECT
    // handshake. Connection setup counts against the per-exchange timeout,
    // so the send must fail as a Timeout instead of stalling the worker.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (sock, _) = listener.accept().await.unwrap();
            held.push(sock);
        }
    });

    let mut config = EngineConfig::default();
    config.timeout_secs = 1;
    config.max_retries = 0;
    config.proxy = Some(ProxyConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
    });

    let started = std::time::Instant::now();
    let error = engine_with(config)
        .send(Request::get("https://unreachable.example/"))
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind,
        TransportErrorKind::Timeout { seconds: 1, .. }
    ));
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "connection setup must be bounded by the exchange timeout"
    );
}

#[tokio::test]
async fn test_connection_refused_surfaces_with_request_id() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = EngineConfig::default();
    config.max_retries = 0;

    let request = Request::get(&format!("http://127.0.0.1:{port}/"));
    let request_id = request.id();
    let error = engine_with(config).send(request).await.unwrap_err();

    assert_eq!(error.request_id, request_id);
    assert!(matches!(
        error.kind,
        TransportErrorKind::ConnectionRefused { .. }
    ));
}

/// The classic scan shape: probe a list of candidate paths concurrently and
/// find the one that answers 200.
#[tokio::test]
async fn test_concurrent_path_scan_finds_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jmx-console/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("JBoss JMX Console"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let paths = vec![
        "/admin/", "/manager/", "/jmx-console/", "/console/", "/web-console/", "/phpmyadmin/",
        "/cgi-bin/", "/backup/",
    ];
    let base = server.uri();

    let results = engine()
        .send_many(
            paths,
            move |probe: &&str| Request::get(&format!("{base}{probe}")),
            3,
            DeliveryMode::Unordered,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 8);
    let hits: Vec<_> = results
        .iter()
        .filter(|(_, outcome)| outcome.as_ref().is_ok_and(|r| r.status == 200))
        .map(|(probe, _)| *probe)
        .collect();
    assert_eq!(hits, vec!["/jmx-console/"]);
}

#[tokio::test]
async fn test_ordered_batch_results_match_submission_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let jobs: Vec<u32> = (0..6).collect();
    let base = server.uri();
    let results = engine()
        .send_many(
            jobs,
            move |n: &u32| Request::get(&format!("{base}/item/{n}")),
            2,
            DeliveryMode::Ordered,
        )
        .await
        .unwrap();

    let order: Vec<u32> = results.iter().map(|(n, _)| *n).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
}

/// Adds a marker header so the server can verify the chain ran; sits below
/// a deliberately broken plugin.
struct MarkRequests;

impl ManglePlugin for MarkRequests {
    fn name(&self) -> &str {
        "mark_requests"
    }

    fn priority(&self) -> u8 {
        40
    }

    fn mangle_request(&self, request: Request) -> Result<Request, MangleError> {
        let mut request = request;
        request.headers.insert("X-Probe", "1");
        Ok(request)
    }
}

struct AlwaysFails;

impl ManglePlugin for AlwaysFails {
    fn name(&self) -> &str {
        "always_fails"
    }

    fn priority(&self) -> u8 {
        90
    }

    fn mangle_request(&self, _request: Request) -> Result<Request, MangleError> {
        Err(MangleError::new("always_fails", "simulated plugin defect"))
    }
}

#[tokio::test]
async fn test_failing_mangler_does_not_break_the_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/mangled"))
        .and(header("X-Probe", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = ScanEngine::new(
        EngineConfig::default(),
        vec![Arc::new(AlwaysFails), Arc::new(MarkRequests)],
    )
    .unwrap();

    let response = engine
        .send(Request::get(&format!("{}/mangled", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

/// Rewrites response bodies, forcing the post-chain length recomputation.
struct ExpandBody;

impl ManglePlugin for ExpandBody {
    fn name(&self) -> &str {
        "expand_body"
    }

    fn mangle_response(&self, response: Response) -> Result<Response, MangleError> {
        let mut response = response;
        response.body = b"rewritten to a longer body".to_vec();
        Ok(response)
    }
}

#[tokio::test]
async fn test_content_length_recomputed_after_response_mangling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/short"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let engine = ScanEngine::new(EngineConfig::default(), vec![Arc::new(ExpandBody)]).unwrap();
    let response = engine
        .send(Request::get(&format!("{}/short", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.body, b"rewritten to a longer body");
    assert_eq!(response.headers.get("Content-Length"), Some("26"));
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/huge"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
        .mount(&server)
        .await;

    let mut config = EngineConfig::default();
    config.max_body_size = 1024;
    config.max_retries = 0;

    let error = engine_with(config)
        .send(Request::get(&format!("{}/huge", server.uri())))
        .await
        .unwrap_err();

    assert!(matches!(
        error.kind,
        TransportErrorKind::ResponseTooLarge { limit: 1024, .. }
    ));
}

#[tokio::test]
async fn test_clear_cache_forces_revalidation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/volatile"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine();
    let url = format!("{}/volatile", server.uri());
    engine.send(Request::get(&url)).await.unwrap();
    engine.clear_cache();
    engine.send(Request::get(&url)).await.unwrap();
}
