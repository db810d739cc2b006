//! Request inspection helpers.
//!
//! # Responsibilities
//! - Request ID header name and lookup (IDs are minted by tower-http)
//! - Derive the externally visible proxy base from forwarding headers
//! - Read the session cookie
//!
//! # Design Decisions
//! - Forwarding headers are untrusted input: only `http`/`https` schemes and
//!   hosts that parse as a URI authority are accepted, anything else falls
//!   back to `Host` and then to the configured host

use std::str::FromStr;

use axum::http::{header, uri::Authority, HeaderMap, HeaderName};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Name of the cookie that remembers the caller's last session.
pub const SESSION_COOKIE: &str = "proxy-sid";

/// The request id assigned by `SetRequestIdLayer`, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// `scheme://host[:port]` as the client sees the proxy.
pub fn proxy_base(headers: &HeaderMap, fallback_host: &str) -> String {
    let scheme = first_value(headers, &X_FORWARDED_PROTO)
        .map(|v| v.to_ascii_lowercase())
        .filter(|v| v == "http" || v == "https")
        .unwrap_or_else(|| "http".to_string());

    let host = first_value(headers, &X_FORWARDED_HOST)
        .filter(|v| is_authority(v))
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| is_authority(v))
                .map(str::to_string)
        })
        .unwrap_or_else(|| fallback_host.to_string());

    format!("{scheme}://{host}")
}

/// Value of the `proxy-sid` cookie, if present and non-empty.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name.trim() == SESSION_COOKIE)
                .then(|| value.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

/// First entry of a comma-separated forwarding header.
fn first_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A bare `host[:port]`: no userinfo, path or other URL syntax.
fn is_authority(value: &str) -> bool {
    !value.contains('@') && Authority::from_str(value).is_ok()
}
