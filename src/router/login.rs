//! Authenticate a user against the directory.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

use crate::AppState;
use crate::directory::Directory;
use crate::error::Result;
use crate::principal::Principal;

/// Handler to authenticate `{ "username": ..., "password": ... }`.
pub async fn handler<D: Directory>(
    State(state): State<AppState<D>>,
    body: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<Principal>> {
    let Json(body) = body?;
    let principal = state.auth.authenticate_json(body).await?;

    Ok(Json(principal))
}
