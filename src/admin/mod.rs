//! Operator API: status, session listing and expiry sweeps.
//!
//! Mounted only when `admin.enabled`; every route requires the Bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(list_sessions))
        .route("/admin/sessions/purge", post(purge_sessions))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
