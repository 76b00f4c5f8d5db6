//! Error handling for the inventory ledger service
//!
//! Every failure maps to one JSON error shape; lifecycle errors carry the ids a caller
//! needs to resolve them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use shared::FreezeConflict;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient permissions: requires {0}")]
    InsufficientPermissions(String),

    #[error("Only the assigned counter may perform this action on count {count_id}")]
    NotAssignee { count_id: Uuid },

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Freeze and count lifecycle errors
    #[error("Batch {batch_id} is frozen by open physical count {count_id}")]
    BatchFrozen { batch_id: Uuid, count_id: Uuid },

    #[error("Location {location_id} at facility {facility_id} has no stock batches to count")]
    EmptyLocationCount { facility_id: Uuid, location_id: Uuid },

    #[error("Variance reason missing for batches: {}", join_ids(batch_ids))]
    MissingVarianceReason { count_id: Uuid, batch_ids: Vec<Uuid> },

    #[error("Counted quantity missing for batches: {}", join_ids(batch_ids))]
    IncompleteCount { count_id: Uuid, batch_ids: Vec<Uuid> },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("{resource} was modified concurrently")]
    ConcurrentModification { resource: String },

    #[error("Partial commit detected for count {count_id}: applied {}, not applied {}", join_ids(applied), join_ids(pending))]
    PartialCommitDetected {
        count_id: Uuid,
        applied: Vec<Uuid>,
        pending: Vec<Uuid>,
    },

    // Stock errors
    #[error("Unresolvable batch reference: {0}")]
    UnresolvableBatchReference(Uuid),

    #[error("Insufficient inventory in batch {batch_id}: have {available}, change {requested}")]
    InsufficientInventory {
        batch_id: Uuid,
        available: i64,
        requested: i64,
    },

    // Infrastructure errors
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::InsufficientPermissions(_) => "INSUFFICIENT_PERMISSIONS",
            AppError::NotAssignee { .. } => "NOT_ASSIGNEE",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BatchFrozen { .. } => "BATCH_FROZEN",
            AppError::EmptyLocationCount { .. } => "EMPTY_LOCATION_COUNT",
            AppError::MissingVarianceReason { .. } => "MISSING_VARIANCE_REASON",
            AppError::IncompleteCount { .. } => "INCOMPLETE_COUNT",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            AppError::PartialCommitDetected { .. } => "PARTIAL_COMMIT_DETECTED",
            AppError::UnresolvableBatchReference(_) => "UNRESOLVABLE_BATCH_REFERENCE",
            AppError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InsufficientPermissions(_) | AppError::NotAssignee { .. } => {
                StatusCode::FORBIDDEN
            }
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BatchFrozen { .. } | AppError::ConcurrentModification { .. } => {
                StatusCode::CONFLICT
            }
            AppError::EmptyLocationCount { .. }
            | AppError::MissingVarianceReason { .. }
            | AppError::IncompleteCount { .. }
            | AppError::InvalidStateTransition(_)
            | AppError::UnresolvableBatchReference(_)
            | AppError::InsufficientInventory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::PartialCommitDetected { .. }
            | AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::BatchFrozen { batch_id, count_id } => {
                Some(json!({ "batch_id": batch_id, "count_id": count_id }))
            }
            AppError::EmptyLocationCount {
                facility_id,
                location_id,
            } => Some(json!({ "facility_id": facility_id, "location_id": location_id })),
            AppError::MissingVarianceReason {
                count_id,
                batch_ids,
            }
            | AppError::IncompleteCount {
                count_id,
                batch_ids,
            } => Some(json!({ "count_id": count_id, "batch_ids": batch_ids })),
            AppError::PartialCommitDetected {
                count_id,
                applied,
                pending,
            } => Some(json!({ "count_id": count_id, "applied": applied, "pending": pending })),
            AppError::InsufficientInventory {
                batch_id,
                available,
                requested,
            } => Some(json!({
                "batch_id": batch_id,
                "available": available,
                "requested": requested,
            })),
            AppError::UnresolvableBatchReference(batch_id) => {
                Some(json!({ "batch_id": batch_id }))
            }
            AppError::NotAssignee { count_id } => Some(json!({ "count_id": count_id })),
            _ => None,
        }
    }

    /// Message safe to show a client; infrastructure detail stays in the logs
    fn public_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<FreezeConflict> for AppError {
    fn from(conflict: FreezeConflict) -> Self {
        AppError::BatchFrozen {
            batch_id: conflict.batch_id,
            count_id: conflict.count_id,
        }
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_detail = ErrorDetail {
            code: self.code().to_string(),
            message: self.public_message(),
            field: match &self {
                AppError::Validation { field, .. } => Some(field.clone()),
                _ => None,
            },
            details: self.details(),
        };

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for services and handlers
pub type AppResult<T> = Result<T, AppError>;
