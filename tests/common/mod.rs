//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use session_proxy::config::ProxyConfig;
use session_proxy::http::{AppState, HttpServer};
use session_proxy::lifecycle::Shutdown;
use session_proxy::session::SessionMetadata;

/// Serve `router` on an ephemeral port as a mock backend.
pub async fn start_backend(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Register a session for `backend` directly in the registry.
    pub fn session_for(&self, backend: SocketAddr, credential: &str) -> String {
        self.state
            .sessions
            .create(&format!("http://{}", backend), credential, SessionMetadata::default())
            .unwrap()
            .to_string()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let state = AppState::from_config(config).unwrap();
    let server = HttpServer::with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });

    TestProxy { addr, state, shutdown }
}

/// Client that neither follows redirects nor uses a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Config with a directory containing one stand and one user.
pub fn directory_config(stand_url: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config
        .directory
        .stands
        .insert("mock".to_string(), stand_url.to_string());
    let mut roles = std::collections::BTreeMap::new();
    roles.insert("admin".to_string(), "Bearer token_alice_admin".to_string());
    config.directory.users.insert("alice".to_string(), roles);
    config
}
