//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub frozen_batches: Option<usize>,
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (storage, frozen_batches) = match state.store.ping().await {
        Ok(()) => (
            "connected".to_string(),
            state.store.freeze_index().await.ok().map(|index| index.len()),
        ),
        Err(err) => {
            tracing::warn!("Storage health check failed: {}", err);
            ("disconnected".to_string(), None)
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage,
        frozen_batches,
    })
}
