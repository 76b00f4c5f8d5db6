//! HTTP handlers for ledger reconstruction

use axum::{
    extract::{Path, Query, State},
    Json,
};
use shared::{Ledger, LedgerTarget};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::ledger::{LedgerParams, LedgerService};
use crate::AppState;

/// Ledger for a single batch
pub async fn get_batch_ledger(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
    Query(params): Query<LedgerParams>,
) -> AppResult<Json<Ledger>> {
    let service = LedgerService::new(state.store);
    let query = params.into_query(LedgerTarget::Batch(batch_id))?;
    Ok(Json(service.build_ledger(&query).await?))
}

/// Ledger across every batch of an item
pub async fn get_item_ledger(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(item_id): Path<Uuid>,
    Query(params): Query<LedgerParams>,
) -> AppResult<Json<Ledger>> {
    let service = LedgerService::new(state.store);
    let query = params.into_query(LedgerTarget::Item(item_id))?;
    Ok(Json(service.build_ledger(&query).await?))
}
