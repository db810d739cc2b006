//! Upstream transport failures.

use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::gateway_error;

/// Why a proxied request produced no upstream response.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream did not respond within {0} seconds")]
    Timeout(u64),

    #[error("could not connect to upstream: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(timeout_secs)
        } else if err.is_connect() {
            UpstreamError::Connect(error_chain(&err))
        } else if err.is_builder() {
            UpstreamError::InvalidRequest(error_chain(&err))
        } else {
            UpstreamError::Transport(error_chain(&err))
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        gateway_error(self.status(), &self.to_string())
    }
}

/// `err: cause: cause` so DNS and TLS details reach the error page.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
