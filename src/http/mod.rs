//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, body limit)
//!     → /create-session          → session.rs
//!     → /p/<sid>/... (upgrade)   → websocket.rs
//!     → /p/<sid>/...             → proxy::Forwarder
//!     → /ws/<sid>/...            → websocket.rs
//!     → /admin/*                 → admin
//!     → anything else            → session.rs fallback (cookie redirect)
//!     → response.rs (error pages, header policy)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod websocket;

pub use request::{proxy_base, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
