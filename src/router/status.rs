//! Public server status.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::config::Configuration;

/// Structured status.
#[derive(Serialize)]
pub struct Status {
    version: String,
    name: String,
}

/// Public server status (configuration).
pub async fn status(State(config): State<Arc<Configuration>>) -> Json<Status> {
    Json(Status {
        version: env!("CARGO_PKG_VERSION").into(),
        name: config.name.clone(),
    })
}
