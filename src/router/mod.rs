//! HTTP routes exposing the authenticator.

pub mod login;
pub mod status;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::AppState;
use crate::directory::Directory;

/// Prometheus exposition, when a recorder is installed.
pub async fn metrics<D: Directory>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::default()),
    }
}
