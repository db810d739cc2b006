//! WebSocket tunnel relay against a mock backend.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::ws::{CloseFrame as ServerCloseFrame, Message as ServerMessage, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue},
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, Stream, StreamExt};
use session_proxy::config::ProxyConfig;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest, protocol::frame::coding::CloseCode, Error as WsError, Message,
    },
};

mod common;

/// Greets with the handshake's `Authorization`, then echoes text frames.
async fn echo(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    ws.on_upgrade(move |mut socket| async move {
        let greeting = format!("auth={auth};origin={origin}");
        if socket.send(ServerMessage::Text(greeting.into())).await.is_err() {
            return;
        }
        while let Some(Ok(msg)) = socket.recv().await {
            match msg {
                ServerMessage::Text(text) => {
                    let reply = format!("echo:{}", text.as_str());
                    if socket.send(ServerMessage::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
                ServerMessage::Close(_) => break,
                _ => {}
            }
        }
    })
}

async fn start_ws_backend() -> SocketAddr {
    common::start_backend(Router::new().route("/live", get(echo))).await
}

async fn next_text<S>(stream: &mut S) -> String
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

#[tokio::test]
async fn relays_frames_through_proxy_path() {
    let backend = start_ws_backend().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let (mut ws, _) = connect_async(proxy.ws_url(&format!("/p/{sid}/live"))).await.unwrap();

    assert_eq!(
        next_text(&mut ws).await,
        format!("auth=Bearer X;origin=http://{backend}")
    );

    ws.send(Message::Text("hello".to_string().into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "echo:hello");

    ws.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();
    let pong = loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for pong")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Pong(payload) = msg {
            break payload;
        }
    };
    assert_eq!(&pong[..], b"hb");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn explicit_tunnel_route_works() {
    let backend = start_ws_backend().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let (mut ws, _) = connect_async(proxy.ws_url(&format!("/ws/{sid}/live"))).await.unwrap();
    assert!(next_text(&mut ws).await.starts_with("auth=Bearer X"));

    ws.send(Message::Text("again".to_string().into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "echo:again");
}

#[tokio::test]
async fn unknown_session_refuses_upgrade() {
    let proxy = common::start_proxy(ProxyConfig::default()).await;

    match connect_async(proxy.ws_url("/p/00000000000000000000000000000000/live")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected 404 handshake failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_backend_closes_with_1011() {
    let dead = common::closed_port().await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(dead, "Bearer X");

    let (mut ws, _) = connect_async(proxy.ws_url(&format!("/p/{sid}/live"))).await.unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("websocket error");

    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Error),
        other => panic!("expected close frame, got {other:?}"),
    }
}

/// Closes with 4001 as soon as the upgrade completes.
async fn hang_up(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let frame = ServerCloseFrame {
            code: 4001,
            reason: "bye".to_string().into(),
        };
        if socket.send(ServerMessage::Close(Some(frame))).await.is_err() {
            return;
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

#[tokio::test]
async fn backend_close_reaches_client() {
    let backend = common::start_backend(Router::new().route("/bye", get(hang_up))).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let (mut ws, _) = connect_async(proxy.ws_url(&format!("/p/{sid}/bye"))).await.unwrap();
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("stream ended")
        .expect("websocket error");

    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4001);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn client_drop_closes_backend() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
    let router = Router::new().route(
        "/watch",
        get(move |ws: WebSocketUpgrade| {
            let closed_tx = closed_tx.clone();
            async move {
                ws.on_upgrade(move |mut socket| async move {
                    let ready = ServerMessage::Text("ready".to_string().into());
                    if socket.send(ready).await.is_ok() {
                        while let Some(Ok(_)) = socket.recv().await {}
                    }
                    let _ = closed_tx.send(());
                })
            }
        }),
    );
    let backend = common::start_backend(router).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let (mut ws, _) = connect_async(proxy.ws_url(&format!("/p/{sid}/watch"))).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "ready");

    // no close frame: the TCP connection just goes away
    drop(ws);

    let closed = tokio::time::timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .expect("backend socket still open");
    assert!(closed.is_some());
}

#[tokio::test]
async fn client_gets_backend_selected_protocol() {
    let router = Router::new().route(
        "/chat",
        get(|ws: WebSocketUpgrade| async move {
            ws.protocols(["chat.v2"]).on_upgrade(|mut socket| async move {
                let selected = socket
                    .protocol()
                    .and_then(|p| p.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                let greeting = ServerMessage::Text(format!("proto={selected}").into());
                if socket.send(greeting).await.is_ok() {
                    while let Some(Ok(_)) = socket.recv().await {}
                }
            })
        }),
    );
    let backend = common::start_backend(router).await;
    let proxy = common::start_proxy(ProxyConfig::default()).await;
    let sid = proxy.session_for(backend, "Bearer X");

    let mut request = proxy
        .ws_url(&format!("/p/{sid}/chat"))
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static("chat.v1, chat.v2"),
    );

    let (mut ws, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()[header::SEC_WEBSOCKET_PROTOCOL], "chat.v2");
    assert_eq!(next_text(&mut ws).await, "proto=chat.v2");
}
