use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub sessions: usize,
    pub ttl_secs: u64,
    pub allow_direct: bool,
}

/// A session as shown to operators. Credentials are never exposed.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub target: String,
    pub stand: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResult {
    pub removed: usize,
    pub remaining: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        sessions: state.sessions.len(),
        ttl_secs: state.sessions.ttl().as_secs(),
        allow_direct: state.config.sessions.allow_direct,
    })
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state
        .sessions
        .snapshot()
        .into_iter()
        .map(|(id, s)| SessionSummary {
            id,
            target: s.target_url,
            stand: s.metadata.stand,
            user: s.metadata.user,
            role: s.metadata.role,
            created_at: s.created_at,
        })
        .collect();
    Json(sessions)
}

pub async fn purge_sessions(State(state): State<AppState>) -> Json<PurgeResult> {
    let removed = state.sessions.delete_expired();
    Json(PurgeResult {
        removed,
        remaining: state.sessions.len(),
    })
}
