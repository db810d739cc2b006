//! Session registry: id → session, expire-on-read, optional snapshot.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use url::Url;

use crate::observability::metrics;
use crate::session::record::{now_millis, Session, SessionId, SessionMetadata};
use crate::session::snapshot::{SessionTable, SnapshotStore};

/// Rejected session creation input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("target url is empty")]
    EmptyUrl,

    #[error("malformed target url '{0}'")]
    MalformedUrl(String),

    #[error("credential is empty")]
    EmptyCredential,
}

/// Owner of every live session record.
///
/// Lookups hand out `Arc<Session>` clones; records are never mutated after
/// insertion, only removed once their age reaches the ttl.
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    ttl: Duration,
    store: Option<Arc<dyn SnapshotStore>>,
    /// Serializes snapshot writes so the last write always holds the newest table.
    save_lock: Arc<Mutex<()>>,
}

impl SessionRegistry {
    /// Create an in-memory registry.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
            store: None,
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create a registry backed by a snapshot store.
    ///
    /// The snapshot is loaded and expired entries dropped before the registry
    /// is returned. An unreadable snapshot starts the registry empty.
    pub fn with_store(ttl: Duration, store: Box<dyn SnapshotStore>) -> Self {
        let registry = Self::new(ttl);

        match store.load() {
            Ok(table) => {
                let now = now_millis();
                let total = table.len();
                for (id, session) in table {
                    if !session.is_expired(ttl, now) {
                        registry.sessions.insert(id, Arc::new(session));
                    }
                }
                tracing::info!(
                    loaded = registry.sessions.len(),
                    dropped = total - registry.sessions.len(),
                    "Sessions loaded from snapshot"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load session snapshot, starting empty");
            }
        }

        metrics::record_sessions_active(registry.sessions.len());
        Self {
            store: Some(Arc::from(store)),
            ..registry
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a new session for `target_url` and `credential`.
    ///
    /// The url is reduced to its origin; anything but an absolute http(s)
    /// url with a host is rejected.
    pub fn create(
        &self,
        target_url: &str,
        credential: &str,
        metadata: SessionMetadata,
    ) -> Result<SessionId, SessionError> {
        let target_url = normalize_origin(target_url)?;
        if credential.trim().is_empty() {
            return Err(SessionError::EmptyCredential);
        }

        let session = Arc::new(Session {
            target_url,
            credential: credential.to_string(),
            metadata,
            created_at: now_millis(),
        });

        let id = loop {
            let id = SessionId::generate();
            match self.sessions.entry(id.to_string()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(session);
                    break id;
                }
            }
        };

        metrics::record_session_created();
        metrics::record_sessions_active(self.sessions.len());
        self.persist();
        Ok(id)
    }

    /// Find a live session. Records whose age reached the ttl are removed
    /// and reported as absent.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| Arc::clone(entry.value()))?;

        let now = now_millis();
        if session.is_expired(self.ttl, now) {
            self.sessions
                .remove_if(id, |_, s| s.is_expired(self.ttl, now));
            tracing::debug!(session_id = %id, "Session expired on lookup");
            metrics::record_sessions_active(self.sessions.len());
            return None;
        }

        Some(session)
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = now_millis();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(self.ttl, now));
        let removed = before.saturating_sub(self.sessions.len());

        if removed > 0 {
            tracing::info!(removed, "Expired sessions deleted");
            metrics::record_sessions_active(self.sessions.len());
            self.persist();
        }
        removed
    }

    /// Number of records currently held (expired ones included until swept).
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy of every live record, ordered by id.
    pub fn snapshot(&self) -> SessionTable {
        let now = now_millis();
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_expired(self.ttl, now))
            .map(|entry| (entry.key().clone(), Session::clone(entry.value())))
            .collect()
    }

    /// Write the table to the store. Inside a tokio runtime the write runs on
    /// the blocking pool; elsewhere it runs inline.
    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let job = SnapshotJob {
            sessions: Arc::clone(&self.sessions),
            store: Arc::clone(store),
            save_lock: Arc::clone(&self.save_lock),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || job.run());
            }
            Err(_) => job.run(),
        }
    }
}

/// One snapshot write. The table is read under the save lock, so writes that
/// finish later never carry an older table.
struct SnapshotJob {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    store: Arc<dyn SnapshotStore>,
    save_lock: Arc<Mutex<()>>,
}

impl SnapshotJob {
    fn run(self) {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let table: SessionTable = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), Session::clone(entry.value())))
            .collect();
        if let Err(e) = self.store.save(&table) {
            tracing::error!(error = %e, "Failed to save session snapshot");
        }
    }
}

/// Reduce an absolute http(s) url to `scheme://host[:port]`.
pub fn normalize_origin(raw: &str) -> Result<String, SessionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SessionError::EmptyUrl);
    }
    let url = Url::parse(raw).map_err(|_| SessionError::MalformedUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SessionError::MalformedUrl(raw.to_string()));
    }
    Ok(url.origin().ascii_serialization())
}
