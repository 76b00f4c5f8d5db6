//! HTTP handlers for freeze lookups

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::freeze::{FreezeService, FreezeStatus};
use crate::AppState;

/// Whether a batch is frozen, and by which count
pub async fn get_batch_freeze(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<FreezeStatus>> {
    let service = FreezeService::new(state.store);
    Ok(Json(service.status(batch_id).await?))
}
