//! HTTP handlers for stock mutations

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use shared::TransactionRecord;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::stock::{AcknowledgeTransferInput, RecordTransactionInput, StockService};
use crate::store::PurgeOutcome;
use crate::AppState;

/// Record a receive, dispense, transfer, write-off, return, internal return or adjustment
pub async fn record_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecordTransactionInput>,
) -> AppResult<impl IntoResponse> {
    check_permission(&current_user.0, "stock", "write")?;

    let service = StockService::new(state.store);
    let record = service
        .record_transaction(current_user.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<TransactionRecord>> {
    let service = StockService::new(state.store);
    Ok(Json(service.get_transaction(transaction_id).await?))
}

pub async fn acknowledge_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transfer_id): Path<Uuid>,
    Json(input): Json<AcknowledgeTransferInput>,
) -> AppResult<Json<TransactionRecord>> {
    check_permission(&current_user.0, "stock", "write")?;

    let service = StockService::new(state.store);
    let record = service
        .acknowledge_transfer(transfer_id, current_user.0.user_id, input)
        .await?;
    Ok(Json(record))
}

pub async fn purge_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(transaction_id): Path<Uuid>,
) -> AppResult<Json<PurgeOutcome>> {
    check_permission(&current_user.0, "stock", "purge")?;

    let service = StockService::new(state.store);
    let outcome = service
        .purge_transaction(transaction_id, current_user.0.user_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn purge_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<Uuid>,
) -> AppResult<Json<PurgeOutcome>> {
    check_permission(&current_user.0, "stock", "purge")?;

    let service = StockService::new(state.store);
    let outcome = service.purge_batch(batch_id, current_user.0.user_id).await?;
    Ok(Json(outcome))
}
