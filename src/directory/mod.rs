//! Static backend/credential directory.
//!
//! Maps a backend key ("stand") to a base URL and a (user, role) pair to a
//! bearer credential. Loaded once from configuration; session creation only
//! reads it through the [`CredentialSource`] trait so deployments can swap in
//! another source.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::DirectoryConfig;
use crate::session::SessionMetadata;

/// Why a directory lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("no credential for role '{role}' of user '{user}'")]
    NoCredentialForRole { user: String, role: String },
}

/// Everything needed to create a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub target_url: String,
    pub credential: String,
    pub metadata: SessionMetadata,
}

/// Source of backend URLs and credentials.
pub trait CredentialSource: Send + Sync {
    fn resolve(&self, backend: &str, user: &str, role: &str) -> Result<Grant, DirectoryError>;
}

/// Directory built from the `[directory]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    stands: BTreeMap<String, String>,
    users: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticDirectory {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            stands: config.stands.clone(),
            users: config.users.clone(),
        }
    }

    pub fn stand_count(&self) -> usize {
        self.stands.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl CredentialSource for StaticDirectory {
    fn resolve(&self, backend: &str, user: &str, role: &str) -> Result<Grant, DirectoryError> {
        let target_url = self
            .stands
            .get(backend)
            .ok_or_else(|| DirectoryError::UnknownBackend(backend.to_string()))?;
        let roles = self
            .users
            .get(user)
            .ok_or_else(|| DirectoryError::UnknownUser(user.to_string()))?;
        let credential = roles
            .get(role)
            .ok_or_else(|| DirectoryError::NoCredentialForRole {
                user: user.to_string(),
                role: role.to_string(),
            })?;

        Ok(Grant {
            target_url: target_url.clone(),
            credential: credential.clone(),
            metadata: SessionMetadata {
                user: Some(user.to_string()),
                role: Some(role.to_string()),
                stand: Some(backend.to_string()),
            },
        })
    }
}
