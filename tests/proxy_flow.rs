//! End-to-end forwarding through a running proxy.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use session_proxy::config::ProxyConfig;

mod common;

fn png_bytes() -> Vec<u8> {
    (0..=255u8).cycle().take(4096).collect()
}

async fn count_hits(State(hits): State<Arc<AtomicUsize>>, req: Request, next: Next) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    next.run(req).await
}

async fn dash(headers: HeaderMap, uri: Uri) -> impl IntoResponse {
    let value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    let body = format!(
        "auth={};ua={};accept={};referer={};x-custom={};q={}",
        value(header::AUTHORIZATION),
        value(header::USER_AGENT),
        value(header::ACCEPT),
        value(header::REFERER),
        headers.get("x-custom").and_then(|v| v.to_str().ok()).unwrap_or("-"),
        uri.query().unwrap_or("")
    );
    ([(header::CONTENT_TYPE, "text/plain")], body)
}

async fn page(headers: HeaderMap) -> impl IntoResponse {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let html = format!(
        r#"<html><head><title>t</title><link rel="stylesheet" href="/style.css"></head><body><a href="/a">a</a><a href="http://{host}/abs">abs</a><img src="//cdn.example/x.png"></body></html>"#
    );
    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
            (header::X_FRAME_OPTIONS, "DENY"),
        ],
        html,
    )
}

async fn start_backend(hits: Arc<AtomicUsize>) -> SocketAddr {
    let router = Router::new()
        .route("/dash", get(dash))
        .route("/page", get(page))
        .route(
            "/style.css",
            get(|| async { ([(header::CONTENT_TYPE, "text/css")], "body{background:url(/bg.png)}") }),
        )
        .route(
            "/img",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], png_bytes()) }),
        )
        .route(
            "/old",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/new?a=1")]) }),
        )
        .route(
            "/away",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "https://sso.example/login")]) }),
        )
        .route("/echo", post(|body: String| async move { format!("echo:{body}") }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "late"
            }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "backend 404") }),
        )
        .layer(middleware::from_fn_with_state(hits, count_hits));
    common::start_backend(router).await
}

#[tokio::test]
async fn injects_credential_and_forwards_query() {
    let hits = Arc::new(AtomicUsize::new(0));
    let backend = start_backend(hits.clone()).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/dash?x=1")))
        .header(header::AUTHORIZATION, "Bearer client-supplied")
        .header(header::REFERER, "http://somewhere/else")
        .header("x-custom", "dropped")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = res.text().await.unwrap();
    assert_eq!(
        body,
        format!("auth=Bearer X;ua=Mozilla/5.0;accept=*/*;referer=http://{backend};x-custom=-;q=x=1")
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rewrites_same_origin_redirects() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/old")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], format!("/p/{sid}/new?a=1").as_str());

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/away")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()[header::LOCATION], "https://sso.example/login");
}

#[tokio::test]
async fn binary_bodies_are_byte_exact() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/img")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(res.bytes().await.unwrap().as_ref(), png_bytes().as_slice());
}

#[tokio::test]
async fn html_is_rewritten_into_proxy_space() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");
    let prefix = proxy.url(&format!("/p/{sid}"));

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/page")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get(header::CONTENT_SECURITY_POLICY).is_none());
    assert!(res.headers().get(header::X_FRAME_OPTIONS).is_none());
    assert_eq!(res.headers()["cross-origin-embedder-policy"], "unsafe-none");

    let html = res.text().await.unwrap();
    assert!(html.contains(&format!(r#"href="{prefix}/a""#)));
    assert!(html.contains(&format!(r#"href="{prefix}/abs""#)));
    assert!(html.contains(&format!(r#"href="{prefix}/style.css""#)));
    assert!(html.contains(r#"src="//cdn.example/x.png""#));
    assert!(html.contains(&format!(r#"<base href="{prefix}/">"#)));
    assert!(html.contains("XMLHttpRequest.prototype.open"));
    assert!(!html.contains(&format!("http://{backend}")));
}

#[tokio::test]
async fn css_urls_are_rewritten() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let css = common::client()
        .get(proxy.url(&format!("/p/{sid}/style.css")))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(css, format!("body{{background:url({})}}", proxy.url(&format!("/p/{sid}/bg.png"))));
}

#[tokio::test]
async fn request_bodies_are_forwarded() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .post(proxy.url(&format!("/p/{sid}/echo")))
        .header(header::CONTENT_TYPE, "text/plain")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "echo:payload");
}

#[tokio::test]
async fn upstream_errors_are_relayed() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/missing")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "backend 404");
}

#[tokio::test]
async fn unknown_session_never_reaches_upstream() {
    let hits = Arc::new(AtomicUsize::new(0));
    let backend = start_backend(hits.clone()).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let _sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url("/p/0123456789abcdef0123456789abcdef/dash"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.text().await.unwrap().contains("Session not found"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn preflight_is_answered_locally() {
    let hits = Arc::new(AtomicUsize::new(0));
    let backend = start_backend(hits.clone()).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .request(reqwest::Method::OPTIONS, proxy.url(&format!("/p/{sid}/dash")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()[header::ACCESS_CONTROL_MAX_AGE], "86400");
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE, OPTIONS, PATCH"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_backend_yields_gateway_error() {
    let dead = common::closed_port().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(dead, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(res.text().await.unwrap().contains("Gateway error"));
}

#[tokio::test]
async fn slow_backend_yields_gateway_timeout() {
    let backend = start_backend(Arc::new(AtomicUsize::new(0))).await;
    let mut config = ProxyConfig::default();
    config.timeouts.request_secs = 1;
    let proxy = common::start_proxy(config).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let res = common::client()
        .get(proxy.url(&format!("/p/{sid}/slow")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn responses_carry_request_id() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let res = common::client().get(proxy.url("/nowhere")).send().await.unwrap();
    assert!(res.headers().get("x-request-id").is_some());
}
