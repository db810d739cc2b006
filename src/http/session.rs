//! Session creation endpoint and cookie-based fallback.
//!
//! # Responsibilities
//! - `POST /create-session`: validate against the directory (or a direct
//!   `{url, credential}` pair), create the session, set the `proxy-sid` cookie
//! - Fallback: requests outside every known route that carry a live
//!   `proxy-sid` cookie are redirected under that session's prefix

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::DirectoryError;
use crate::http::request::{proxy_base, session_cookie, SESSION_COOKIE};
use crate::http::response::no_active_session;
use crate::http::server::AppState;
use crate::rewrite::context::PROXY_PATH_SEGMENT;
use crate::session::{SessionError, SessionMetadata};

/// Body of `POST /create-session`. Directory mode uses the first three
/// fields, direct mode the last two.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, alias = "stand")]
    pub backend_key: Option<String>,
    #[serde(default, alias = "user")]
    pub user_id: Option<String>,
    #[serde(default, alias = "role")]
    pub role_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub proxy_url: String,
    pub session_id: String,
}

#[derive(Debug, Error)]
pub enum CreateSessionError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("direct sessions are disabled")]
    DirectDisabled,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for CreateSessionError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Response, CreateSessionError> {
    let Json(req) = body.map_err(|e| CreateSessionError::InvalidBody(e.body_text()))?;

    let (target_url, credential, metadata) = if req.url.is_some() || req.credential.is_some() {
        if !state.config.sessions.allow_direct {
            return Err(CreateSessionError::DirectDisabled);
        }
        let url = required(req.url, "url")?;
        let credential = required(req.credential, "credential")?;
        (url, credential, SessionMetadata::default())
    } else {
        let backend = required(req.backend_key, "backendKey")?;
        let user = required(req.user_id, "userId")?;
        let role = required(req.role_id, "roleId")?;
        let grant = state.directory.resolve(&backend, &user, &role)?;
        (grant.target_url, grant.credential, grant.metadata)
    };

    let sid = state.sessions.create(&target_url, &credential, metadata.clone())?;

    tracing::info!(
        session_id = %sid,
        user = metadata.user.as_deref().unwrap_or("-"),
        role = metadata.role.as_deref().unwrap_or("-"),
        stand = metadata.stand.as_deref().unwrap_or("-"),
        target = %target_url,
        "Session created"
    );

    let base = proxy_base(&headers, &state.config.listener.fallback_host());
    let body = CreateSessionResponse {
        proxy_url: format!("{base}{PROXY_PATH_SEGMENT}{sid}/"),
        session_id: sid.to_string(),
    };

    let mut response = Json(body).into_response();
    let cookie = session_cookie_header(sid.as_str(), state.sessions.ttl().as_secs());
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// Catch-all: recover URLs that escaped rewriting using the session cookie.
pub async fn fallback_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    if let Some(sid) = session_cookie(&headers) {
        if state.sessions.lookup(&sid).is_some() {
            let location = format!("{PROXY_PATH_SEGMENT}{sid}{path_and_query}");
            if let Ok(value) = HeaderValue::from_str(&location) {
                tracing::debug!(from = %path_and_query, to = %location, "Redirecting via session cookie");
                return (StatusCode::FOUND, [(header::LOCATION, value)]).into_response();
            }
        }
    }

    tracing::debug!(path = %path_and_query, "No route and no active session");
    no_active_session()
}

fn required(value: Option<String>, field: &'static str) -> Result<String, CreateSessionError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(CreateSessionError::MissingField(field))
}

fn session_cookie_header(sid: &str, max_age_secs: u64) -> String {
    format!("{SESSION_COOKIE}={sid}; Path=/; Max-Age={max_age_secs}; SameSite=Lax")
}
