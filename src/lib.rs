//! Session-scoped authenticating reverse proxy.

pub mod admin;
pub mod config;
pub mod directory;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod rewrite;
pub mod session;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
