//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, body limit, request ID)
//! - Bind server to listener
//! - Dispatch `/p/<sid>/...` to the forwarder or the tunnel
//! - Observability (metrics, correlation IDs)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{FromRequestParts, Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::ProxyConfig;
use crate::directory::{CredentialSource, StaticDirectory};
use crate::http::request::{proxy_base, request_id};
use crate::http::response::{preflight, session_not_found};
use crate::http::session::{create_session, fallback_handler};
use crate::http::websocket::{open_tunnel, tunnel_handler};
use crate::observability::metrics;
use crate::proxy::Forwarder;
use crate::rewrite::context::PROXY_PATH_SEGMENT;
use crate::rewrite::RewriteContext;
use crate::session::{JsonFileStore, SessionRegistry};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub directory: Arc<dyn CredentialSource>,
    pub forwarder: Forwarder,
    pub config: Arc<ProxyConfig>,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        sessions: Arc<SessionRegistry>,
        directory: Arc<dyn CredentialSource>,
    ) -> Result<Self, ServerError> {
        let forwarder = Forwarder::new(&config.timeouts, &config.proxy)?;
        Ok(Self {
            sessions,
            directory,
            forwarder,
            config: Arc::new(config),
        })
    }

    /// State built from configuration alone: static directory, and a
    /// snapshot-backed registry when `sessions.snapshot_path` is set.
    pub fn from_config(config: ProxyConfig) -> Result<Self, ServerError> {
        let ttl = Duration::from_secs(config.sessions.ttl_secs);
        let sessions = match &config.sessions.snapshot_path {
            Some(path) => SessionRegistry::with_store(ttl, Box::new(JsonFileStore::new(path))),
            None => SessionRegistry::new(ttl),
        };
        let directory = StaticDirectory::from_config(&config.directory);
        tracing::info!(
            stands = directory.stand_count(),
            users = directory.user_count(),
            sessions = sessions.len(),
            "Directory loaded"
        );
        Self::new(config, Arc::new(sessions), Arc::new(directory))
    }
}

/// HTTP server for the session proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        Ok(Self::with_state(AppState::from_config(config)?))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        let config = Arc::clone(&state.config);

        let mut router = Router::new()
            .route("/create-session", post(create_session))
            .route("/p/{sid}", any(proxy_handler))
            .route("/p/{sid}/", any(proxy_handler))
            .route("/p/{sid}/{*path}", any(proxy_handler))
            .route("/ws/{sid}", get(tunnel_handler))
            .route("/ws/{sid}/", get(tunnel_handler))
            .route("/ws/{sid}/{*path}", get(tunnel_handler));

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
        }

        router
            .fallback(fallback_handler)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.proxy.max_body_size))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    path = %req.uri().path(),
                    request_id = %request_id(req.headers()),
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            sessions = self.state.sessions.len(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The assembled router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Main proxy handler.
/// Answers preflights, hands upgrades to the tunnel, forwards everything else.
async fn proxy_handler(
    State(state): State<AppState>,
    Path(params): Path<Vec<(String, String)>>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    if method == Method::OPTIONS {
        return preflight();
    }

    let Some(sid) = params.into_iter().find(|(k, _)| k == "sid").map(|(_, v)| v) else {
        return session_not_found();
    };
    let path_prefix = format!("{PROXY_PATH_SEGMENT}{sid}");

    if is_websocket_upgrade(request.headers()) {
        let (mut parts, _body) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => open_tunnel(&state, &sid, &path_prefix, &parts.uri, &parts.headers, ws).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    let request_id = request_id(request.headers()).to_string();

    let Some(session) = state.sessions.lookup(&sid) else {
        tracing::debug!(request_id = %request_id, session_id = %sid, "Session not found");
        metrics::record_request(method.as_str(), StatusCode::NOT_FOUND.as_u16(), start);
        return session_not_found();
    };

    let base = proxy_base(request.headers(), &state.config.listener.fallback_host());
    let ctx = RewriteContext::new(session.target_url.as_str(), base, sid.as_str());

    match state.forwarder.forward(&session, &ctx, request).await {
        Ok(response) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), start);
            response
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                session_id = %sid,
                target = %session.target_url,
                error = %e,
                "Upstream request failed"
            );
            metrics::record_upstream_error(e.kind());
            metrics::record_request(method.as_str(), e.status().as_u16(), start);
            e.into_response()
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}
