//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every stand is an absolute http(s) origin
//! - Validate value ranges (timeouts > 0, ttl > 0, bind address parses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("sessions.ttl_secs must be greater than zero")]
    ZeroTtl,

    #[error("stand '{stand}' has invalid url '{url}': {reason}")]
    StandUrl {
        stand: String,
        url: String,
        reason: String,
    },

    #[error("user '{0}' has an empty credential for role '{1}'")]
    EmptyCredential(String, String),

    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),
}

/// Check a loaded configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }
    if config.sessions.ttl_secs == 0 {
        errors.push(ValidationError::ZeroTtl);
    }

    for (stand, raw) in &config.directory.stands {
        if let Err(reason) = check_origin_url(raw) {
            errors.push(ValidationError::StandUrl {
                stand: stand.clone(),
                url: raw.clone(),
                reason,
            });
        }
    }

    for (user, roles) in &config.directory.users {
        for (role, credential) in roles {
            if credential.trim().is_empty() {
                errors.push(ValidationError::EmptyCredential(user.clone(), role.clone()));
            }
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::MissingAdminKey);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_origin_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
