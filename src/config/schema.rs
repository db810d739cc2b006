//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the session proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, public host).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Session lifetime and persistence.
    pub sessions: SessionConfig,

    /// Forwarding behaviour.
    pub proxy: ForwardingConfig,

    /// Static backend/credential directory.
    pub directory: DirectoryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Host (and port) clients use to reach the proxy when the request
    /// carries neither `X-Forwarded-Host` nor `Host`.
    pub public_host: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            public_host: None,
        }
    }
}

impl ListenerConfig {
    /// Host used for rewrite contexts when the request gives none.
    pub fn fallback_host(&self) -> String {
        if let Some(host) = &self.public_host {
            return host.clone();
        }
        match self.bind_address.rsplit_once(':') {
            Some((_, port)) => format!("localhost:{}", port),
            None => "localhost".to_string(),
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (until the upstream response head arrives, or until
    /// a buffered body is fully read) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Session lifetime and snapshot settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session time-to-live in seconds (default: 10 days).
    pub ttl_secs: u64,

    /// Optional JSON snapshot file. Loaded at startup, rewritten after
    /// every mutation.
    pub snapshot_path: Option<String>,

    /// Accept `{ url, credential }` bodies on `/create-session`.
    pub allow_direct: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 10 * 24 * 60 * 60,
            snapshot_path: None,
            allow_direct: false,
        }
    }
}

/// Forwarding engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// `User-Agent` sent upstream when the client sent none.
    pub fallback_user_agent: String,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            fallback_user_agent: "Mozilla/5.0".to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Static directory of backends ("stands") and per-user role credentials.
///
/// ```toml
/// [directory.stands]
/// mock = "http://localhost:4000"
///
/// [directory.users.alice]
/// admin = "Bearer token_alice_admin"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Backend key → backend base URL.
    pub stands: BTreeMap<String, String>,

    /// User → role → bearer credential.
    pub users: BTreeMap<String, BTreeMap<String, String>>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
        }
    }
}
