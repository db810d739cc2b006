//! Response construction and header policy.
//!
//! # Responsibilities
//! - Error pages (session not found, gateway errors, no active session)
//! - Filter upstream response headers for the client
//! - CORS and cross-origin isolation headers on proxied responses
//!
//! # Design Decisions
//! - Hop-by-hop and framing headers are never copied; the body is re-framed
//! - Headers that would block embedding the proxied app (CSP, X-Frame-Options)
//!   are dropped
//! - Transport timeouts map to 504, every other transport failure to 502

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};

/// Upstream response headers never copied to the client.
const SKIPPED_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS, PATCH";

/// Copy upstream headers, dropping the skip list and, when the body is
/// rewritten, `content-length`.
pub fn copy_upstream_headers(upstream: &HeaderMap, body_rewritten: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len() + 5);
    for (name, value) in upstream {
        let lower = name.as_str();
        if SKIPPED_HEADERS.contains(&lower) {
            continue;
        }
        if body_rewritten && name == header::CONTENT_LENGTH {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    add_cors_headers(&mut out);
    out
}

/// CORS and cross-origin headers added to every proxied response.
pub fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-embedder-policy"),
        HeaderValue::from_static("unsafe-none"),
    );
}

/// `204` answer to a CORS preflight.
pub fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

pub fn session_not_found() -> Response {
    page(StatusCode::NOT_FOUND, "Session not found", "The session is unknown or has expired.")
}

pub fn no_active_session() -> Response {
    page(
        StatusCode::NOT_FOUND,
        "No active session",
        "Create a session before browsing through the proxy.",
    )
}

/// 502 or 504 page carrying the human-readable transport failure.
pub fn gateway_error(status: StatusCode, cause: &str) -> Response {
    page(status, "Gateway error", &escape_html(cause))
}

/// Plain 500 for responses that could not be assembled.
pub fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal proxy error").into_response()
}

fn page(status: StatusCode, title: &str, message: &str) -> Response {
    let body = format!(
        "<html>\n  <body style=\"font-family: Arial; text-align: center; padding: 50px;\">\n    \
         <h1>{title}</h1>\n    <p>{message}</p>\n    <p><a href=\"/\">Back to start</a></p>\n  \
         </body>\n</html>\n"
    );
    let mut response = (status, Html(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Assemble a response from parts, falling back to a 500 when the builder
/// rejects them.
pub fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut builder = Response::builder().status(status);
    if let Some(map) = builder.headers_mut() {
        *map = headers;
    }
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build response");
        internal_error()
    })
}
