//! WebSocket tunnel.
//!
//! # Responsibilities
//! - Resolve the session before accepting the upgrade
//! - Complete the upgrade handshake with the client
//! - Open the matching upstream WebSocket with the session credential
//! - Relay frames in both directions until either side closes
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The upstream is connected before the client upgrade completes, so the
//!   client is answered with the subprotocol the backend chose
//! - Frames are relayed verbatim; nothing inside a tunnel is rewritten
//! - Close frames propagated in both directions
//! - Ping/pong forwarded as ordinary frames
//! - Upstream connect failure closes the client with 1011

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, MaybeTlsStream, WebSocketStream,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame as UpstreamCloseFrame},
        Message as UpstreamMessage,
    },
};
use uuid::Uuid;

use crate::http::response::{gateway_error, session_not_found};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::proxy::upstream::{sub_path, upstream_url};
use crate::rewrite::context::to_ws_scheme;
use crate::session::Session;

/// Close code sent to the client when the backend cannot be reached.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Path segment of the explicit tunnel entry point.
pub const TUNNEL_PATH_SEGMENT: &str = "/ws/";

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid upstream handshake request: {0}")]
    Request(String),

    #[error("upstream connect failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("upstream connect timed out after {0} seconds")]
    ConnectTimeout(u64),

    #[error("client socket error: {0}")]
    Client(#[source] axum::Error),

    #[error("upstream socket error: {0}")]
    Upstream(#[source] tokio_tungstenite::tungstenite::Error),
}

/// `GET /ws/{sid}` and `GET /ws/{sid}/{*path}`.
pub async fn tunnel_handler(
    State(state): State<AppState>,
    Path(params): Path<Vec<(String, String)>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(sid) = params.into_iter().find(|(k, _)| k == "sid").map(|(_, v)| v) else {
        return session_not_found();
    };
    let prefix = format!("{TUNNEL_PATH_SEGMENT}{sid}");
    open_tunnel(&state, &sid, &prefix, &uri, &headers, ws).await
}

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect the backend for `sid`, then accept the client upgrade and spawn
/// the relay. `path_prefix` is the part of the request path that addresses
/// the session.
pub async fn open_tunnel(
    state: &AppState,
    sid: &str,
    path_prefix: &str,
    uri: &Uri,
    headers: &HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(session) = state.sessions.lookup(sid) else {
        tracing::debug!(session_id = %sid, "Tunnel refused: session not found");
        return session_not_found();
    };

    let path = sub_path(uri.path(), path_prefix);
    let target = upstream_url(&to_ws_scheme(&session.target_url), path, uri.query());

    let request = match upstream_request(&target, &session, headers) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(session_id = %sid, error = %e, "Tunnel refused");
            return gateway_error(StatusCode::BAD_GATEWAY, &e.to_string());
        }
    };

    let tunnel_id = Uuid::new_v4();
    let sid = sid.to_string();
    tracing::debug!(tunnel_id = %tunnel_id, session_id = %sid, upstream = %target, "Connecting tunnel upstream");

    let connect_timeout = Duration::from_secs(state.config.timeouts.connect_secs);
    let upstream = connect_upstream(request, connect_timeout).await;

    // a failed connect still upgrades, so the client gets a 1011 close
    let ws = match upstream.as_ref().ok().and_then(|(_, protocol)| protocol.clone()) {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };

    ws.on_upgrade(move |socket| async move {
        match upstream {
            Ok((stream, _)) => run_tunnel(socket, stream, tunnel_id, sid, target).await,
            Err(e) => refuse_tunnel(socket, e, tunnel_id, sid, target).await,
        }
    })
    .into_response()
}

async fn connect_upstream(
    request: axum::http::Request<()>,
    timeout: Duration,
) -> Result<(UpstreamSocket, Option<String>), TunnelError> {
    let (stream, response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| TunnelError::ConnectTimeout(timeout.as_secs()))?
        .map_err(TunnelError::Connect)?;
    Ok((stream, negotiated_protocol(response.headers())))
}

/// Subprotocol the backend selected in its handshake response.
fn negotiated_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

async fn refuse_tunnel(
    mut client: WebSocket,
    error: TunnelError,
    tunnel_id: Uuid,
    sid: String,
    target: String,
) {
    tracing::warn!(tunnel_id = %tunnel_id, session_id = %sid, upstream = %target, error = %error, "Tunnel upstream unavailable");
    let _ = client
        .send(AxumMessage::Close(Some(AxumCloseFrame {
            code: CLOSE_INTERNAL_ERROR,
            reason: "upstream connection failed".to_string().into(),
        })))
        .await;
}

fn upstream_request(
    target: &str,
    session: &Session,
    headers: &HeaderMap,
) -> Result<axum::http::Request<()>, TunnelError> {
    let mut request = target
        .into_client_request()
        .map_err(|e| TunnelError::Request(e.to_string()))?;

    let credential = HeaderValue::from_str(&session.credential)
        .map_err(|_| TunnelError::Request("credential is not a valid header value".into()))?;
    let origin = HeaderValue::from_str(&session.target_url)
        .map_err(|_| TunnelError::Request("backend origin is not a valid header value".into()))?;

    let upstream_headers = request.headers_mut();
    upstream_headers.insert(header::AUTHORIZATION, credential);
    upstream_headers.insert(header::ORIGIN, origin);
    if let Some(protocol) = headers.get(header::SEC_WEBSOCKET_PROTOCOL) {
        upstream_headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }
    Ok(request)
}

async fn run_tunnel(
    client: WebSocket,
    upstream: UpstreamSocket,
    tunnel_id: Uuid,
    sid: String,
    target: String,
) {
    metrics::record_tunnel_opened();
    tracing::info!(tunnel_id = %tunnel_id, session_id = %sid, upstream = %target, "Tunnel opened");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(msg) = client_rx.next().await {
            let msg = msg.map_err(TunnelError::Client)?;
            let closing = matches!(msg, AxumMessage::Close(_));
            upstream_tx
                .send(to_upstream(msg))
                .await
                .map_err(TunnelError::Upstream)?;
            if closing {
                break;
            }
        }
        Ok::<&'static str, TunnelError>("client")
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            let msg = msg.map_err(TunnelError::Upstream)?;
            let closing = matches!(msg, UpstreamMessage::Close(_));
            let Some(forward) = to_client(msg) else {
                continue;
            };
            client_tx.send(forward).await.map_err(TunnelError::Client)?;
            if closing {
                break;
            }
        }
        Ok::<&'static str, TunnelError>("upstream")
    };

    let outcome = tokio::select! {
        result = client_to_upstream => result,
        result = upstream_to_client => result,
    };

    // whichever side is still open gets closed now
    let _ = upstream_tx.close().await;
    let _ = client_tx.close().await;

    match outcome {
        Ok(side) => tracing::info!(tunnel_id = %tunnel_id, session_id = %sid, closed_by = side, "Tunnel closed"),
        Err(e) => tracing::warn!(tunnel_id = %tunnel_id, session_id = %sid, error = %e, "Tunnel closed with error"),
    }
    metrics::record_tunnel_closed();
}

fn to_upstream(msg: AxumMessage) -> UpstreamMessage {
    match msg {
        AxumMessage::Text(text) => UpstreamMessage::Text(text.to_string().into()),
        AxumMessage::Binary(data) => UpstreamMessage::Binary(data),
        AxumMessage::Ping(data) => UpstreamMessage::Ping(data),
        AxumMessage::Pong(data) => UpstreamMessage::Pong(data),
        AxumMessage::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.to_string().into(),
        })),
    }
}

fn to_client(msg: UpstreamMessage) -> Option<AxumMessage> {
    let forward = match msg {
        UpstreamMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
        UpstreamMessage::Binary(data) => AxumMessage::Binary(data),
        UpstreamMessage::Ping(data) => AxumMessage::Ping(data),
        UpstreamMessage::Pong(data) => AxumMessage::Pong(data),
        UpstreamMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: u16::from(f.code),
            reason: f.reason.to_string().into(),
        })),
        UpstreamMessage::Frame(_) => return None,
    };
    Some(forward)
}
