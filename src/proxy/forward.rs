//! Request forwarding.
//!
//! # Responsibilities
//! - Build and send the upstream request for a resolved session
//! - Rewrite same-origin redirects into proxy space
//! - Rewrite textual bodies, stream everything else byte-exact
//!
//! # Design Decisions
//! - Redirects are never followed; the client follows the rewritten Location
//! - Request bodies are buffered up to `max_body_size` before forwarding
//! - The request timeout bounds the wait for the response head and, for
//!   rewritten content, the full body read
//! - No retries: a failed call becomes a gateway error page

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::Response,
};

use crate::config::{ForwardingConfig, TimeoutConfig};
use crate::http::response::{build, copy_upstream_headers};
use crate::proxy::error::UpstreamError;
use crate::proxy::redirect::rewrite_location;
use crate::proxy::upstream::{sub_path, upstream_headers, upstream_url};
use crate::rewrite::{rewrite_body, ContentKind, RewriteContext};
use crate::session::Session;

/// Shared upstream HTTP client plus forwarding policy.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    request_timeout: Duration,
    fallback_user_agent: String,
    max_body_size: usize,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig, proxy: &ForwardingConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()?;

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            fallback_user_agent: proxy.fallback_user_agent.clone(),
            max_body_size: proxy.max_body_size,
        })
    }

    /// Forward `request` (addressed as `/p/<sid>/...`) to the session's
    /// backend and translate the answer for the client.
    pub async fn forward(
        &self,
        session: &Session,
        ctx: &RewriteContext,
        request: Request<Body>,
    ) -> Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();
        let path = sub_path(parts.uri.path(), &ctx.path_prefix()).to_string();
        let url = upstream_url(&session.target_url, &path, parts.uri.query());
        let headers = upstream_headers(&parts.headers, session, &self.fallback_user_agent)?;
        let method = parts.method;

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if method != Method::GET && method != Method::HEAD {
            let bytes = axum::body::to_bytes(body, self.max_body_size)
                .await
                .map_err(|e| UpstreamError::InvalidRequest(format!("unreadable request body: {e}")))?;
            builder = builder.body(bytes);
        }

        tracing::debug!(method = %method, upstream = %url, "Forwarding request");

        let timeout_secs = self.request_timeout.as_secs();
        let upstream = match tokio::time::timeout(self.request_timeout, builder.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(UpstreamError::from_reqwest(e, timeout_secs)),
            Err(_) => return Err(UpstreamError::Timeout(timeout_secs)),
        };

        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let kind = ContentKind::from_content_type(content_type);
        let rewrite = kind.is_rewritten() && has_body(&method, status);

        let mut headers = copy_upstream_headers(upstream.headers(), rewrite);
        if status.is_redirection() {
            if let Some(location) = self.proxied_location(upstream.headers(), session, &path, ctx) {
                headers.insert(header::LOCATION, location);
            }
        }

        tracing::debug!(
            upstream = %url,
            status = status.as_u16(),
            content_kind = ?kind,
            "Upstream responded"
        );

        if !rewrite {
            let body = Body::from_stream(upstream.bytes_stream());
            return Ok(build(status, headers, body));
        }

        let bytes = match tokio::time::timeout(self.request_timeout, upstream.bytes()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(UpstreamError::from_reqwest(e, timeout_secs)),
            Err(_) => return Err(UpstreamError::Timeout(timeout_secs)),
        };

        let rewritten = match std::str::from_utf8(&bytes) {
            Ok(text) => rewrite_body(kind, text, ctx, &path),
            Err(_) => {
                tracing::debug!(upstream = %url, "Body is not UTF-8, passing through unmodified");
                None
            }
        };
        let body = match rewritten {
            Some(text) => Body::from(text),
            None => Body::from(bytes),
        };

        Ok(build(status, headers, body))
    }

    fn proxied_location(
        &self,
        upstream_headers: &axum::http::HeaderMap,
        session: &Session,
        request_path: &str,
        ctx: &RewriteContext,
    ) -> Option<HeaderValue> {
        let location = upstream_headers.get(header::LOCATION)?.to_str().ok()?;
        let rewritten =
            rewrite_location(location, &session.target_url, request_path, &ctx.path_prefix())?;
        tracing::debug!(from = %location, to = %rewritten, "Rewrote redirect");
        HeaderValue::from_str(&rewritten).ok()
    }
}

/// HEAD answers and 204/304 carry no body to rewrite.
fn has_body(method: &Method, status: StatusCode) -> bool {
    method != Method::HEAD && status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED
}
