//! HTTP handlers for physical counts

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared::{CountFilter, CountStatus, PhysicalCount};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::{check_permission, CurrentUser};
use crate::services::physical_count::{
    CountReview, CountTransition, CreateCountInput, PhysicalCountService, TransitionInput,
    UpdateCountItemsInput,
};
use crate::AppState;

/// Query parameters for listing counts
#[derive(Debug, Deserialize)]
pub struct ListCountsQuery {
    pub facility_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    /// Comma-separated statuses
    pub status: Option<String>,
}

impl ListCountsQuery {
    fn into_filter(self) -> AppResult<CountFilter> {
        let statuses = match self.status.as_deref() {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    CountStatus::parse(s).ok_or_else(|| {
                        AppError::validation("status", format!("Unknown count status '{}'", s))
                    })
                })
                .collect::<AppResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(CountFilter {
            facility_id: self.facility_id,
            location_id: self.location_id,
            statuses,
            batch_ids: Vec::new(),
        })
    }
}

/// Open a count on a location
pub async fn create_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateCountInput>,
) -> AppResult<impl IntoResponse> {
    let service = PhysicalCountService::new(state.store);
    let count = service.create_count(current_user.0.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(count)))
}

pub async fn list_counts(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Query(query): Query<ListCountsQuery>,
) -> AppResult<Json<Vec<PhysicalCount>>> {
    let service = PhysicalCountService::new(state.store);
    let filter = query.into_filter()?;
    Ok(Json(service.list_counts(&filter).await?))
}

pub async fn get_count(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<PhysicalCount>> {
    let service = PhysicalCountService::new(state.store);
    Ok(Json(service.get_count(count_id).await?))
}

/// Enter counted quantities; assignee only
pub async fn update_count_items(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
    Json(input): Json<UpdateCountItemsInput>,
) -> AppResult<Json<PhysicalCount>> {
    let service = PhysicalCountService::new(state.store);
    let count = service
        .update_count_items(count_id, current_user.0.user_id, input)
        .await?;
    Ok(Json(count))
}

/// Apply a lifecycle action
pub async fn transition_count(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
    Json(input): Json<TransitionInput>,
) -> AppResult<Json<PhysicalCount>> {
    match input.transition {
        CountTransition::Approve | CountTransition::Reject { .. } => {
            check_permission(&current_user.0, "physical_counts", "review")?
        }
        CountTransition::Cancel { .. } => {
            check_permission(&current_user.0, "physical_counts", "cancel")?
        }
        CountTransition::Start | CountTransition::Submit => {}
    }

    let service = PhysicalCountService::new(state.store);
    let count = service
        .transition_status(
            count_id,
            current_user.0.user_id,
            input.transition,
            input.expected_version,
        )
        .await?;
    Ok(Json(count))
}

/// Variances with ledger cross-check
pub async fn review_count(
    State(state): State<AppState>,
    _current_user: CurrentUser,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<CountReview>> {
    let service = PhysicalCountService::new(state.store);
    Ok(Json(service.review(count_id).await?))
}
