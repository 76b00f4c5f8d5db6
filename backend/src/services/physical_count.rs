//! Physical count lifecycle: initiation, counting, review, approval and cancellation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    validate_counted_quantity, AdjustmentDetails, AdjustmentDirection, CountFilter, CountStatus,
    LedgerTarget, LineItem, PhysicalCount, TransactionDetails, TransactionRecord, VarianceReason,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::LedgerService;
use crate::store::{BatchWrite, CountApproval, InventoryStore, NewCount};

/// Input for opening a count on a location
#[derive(Debug, Deserialize)]
pub struct CreateCountInput {
    pub facility_id: Uuid,
    pub location_id: Uuid,
    pub assigned_to: Uuid,
    pub notes: Option<String>,
}

/// One provisional entry against a count item
#[derive(Debug, Clone, Deserialize)]
pub struct CountItemUpdate {
    pub batch_id: Uuid,
    pub counted_quantity: Option<i64>,
    pub variance_reason: Option<VarianceReason>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCountItemsInput {
    pub items: Vec<CountItemUpdate>,
    pub expected_version: Option<i64>,
}

/// Lifecycle action requested on a count
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CountTransition {
    Start,
    Submit,
    Approve,
    Reject { notes: String },
    Cancel { reason: Option<String> },
}

impl CountTransition {
    pub fn target(&self) -> CountStatus {
        match self {
            CountTransition::Start | CountTransition::Reject { .. } => CountStatus::InProgress,
            CountTransition::Submit => CountStatus::PendingReview,
            CountTransition::Approve => CountStatus::Completed,
            CountTransition::Cancel { .. } => CountStatus::Cancelled,
        }
    }

    /// Statuses the action may be taken from
    fn sources(&self) -> &'static [CountStatus] {
        match self {
            CountTransition::Start => &[CountStatus::Pending],
            CountTransition::Submit => &[CountStatus::Pending, CountStatus::InProgress],
            CountTransition::Approve | CountTransition::Reject { .. } => {
                &[CountStatus::PendingReview]
            }
            CountTransition::Cancel { .. } => &CountStatus::ACTIVE,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionInput {
    #[serde(flatten)]
    pub transition: CountTransition,
    pub expected_version: Option<i64>,
}

/// Per-item variance alongside what the ledger currently says about the batch
#[derive(Debug, Clone, Serialize)]
pub struct ReviewLine {
    pub batch_id: Uuid,
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub variance: Option<i64>,
    pub variance_reason: Option<VarianceReason>,
    pub ledger_balance: i64,
    /// `ledger_balance - system_quantity`
    pub ledger_drift: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountReview {
    pub count_id: Uuid,
    pub status: CountStatus,
    pub version: i64,
    pub lines: Vec<ReviewLine>,
    pub total_system: i64,
    pub total_counted: i64,
    pub total_variance: i64,
    pub uncounted: Vec<Uuid>,
    pub missing_reasons: Vec<Uuid>,
}

#[derive(Clone)]
pub struct PhysicalCountService {
    store: Arc<dyn InventoryStore>,
}

impl PhysicalCountService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Open a count, snapshotting and freezing every batch in the location
    pub async fn create_count(
        &self,
        initiated_by: Uuid,
        input: CreateCountInput,
    ) -> AppResult<PhysicalCount> {
        let count = self
            .store
            .create_count(NewCount {
                id: Uuid::new_v4(),
                facility_id: input.facility_id,
                location_id: input.location_id,
                assigned_to: input.assigned_to,
                initiated_by,
                notes: input.notes,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            count_id = %count.id,
            location_id = %count.location_id,
            batches = count.items.len(),
            "Physical count created; location frozen"
        );
        Ok(count)
    }

    pub async fn get_count(&self, count_id: Uuid) -> AppResult<PhysicalCount> {
        self.store
            .get_count(count_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Physical count {}", count_id)))
    }

    pub async fn list_counts(&self, filter: &CountFilter) -> AppResult<Vec<PhysicalCount>> {
        self.store.list_counts(filter).await
    }

    /// Record provisional counted quantities. The first update on a pending count starts it.
    pub async fn update_count_items(
        &self,
        count_id: Uuid,
        actor: Uuid,
        input: UpdateCountItemsInput,
    ) -> AppResult<PhysicalCount> {
        let mut count = self.get_count(count_id).await?;
        require_assignee(&count, actor)?;
        let expected_version = input.expected_version.unwrap_or(count.version);

        match count.status {
            CountStatus::InProgress => {}
            CountStatus::Pending => {
                count.status = CountStatus::InProgress;
                count.started_at = Some(Utc::now());
            }
            other => {
                return Err(AppError::InvalidStateTransition(format!(
                    "Count {} cannot be edited while {}",
                    count_id, other
                )))
            }
        }

        if input.items.is_empty() {
            return Err(AppError::validation("items", "At least one item is required"));
        }
        for update in input.items {
            let item = count.item_mut(update.batch_id).ok_or_else(|| {
                AppError::validation(
                    "batch_id",
                    format!("Batch {} is not part of count {}", update.batch_id, count_id),
                )
            })?;
            if let Some(quantity) = update.counted_quantity {
                validate_counted_quantity(quantity)
                    .map_err(|m| AppError::validation("counted_quantity", m))?;
                item.counted_quantity = Some(quantity);
            }
            if update.variance_reason.is_some() {
                item.variance_reason = update.variance_reason;
            }
            if update.notes.is_some() {
                item.notes = update.notes;
            }
        }

        self.store.save_count(&count, expected_version).await
    }

    /// Drive the count through one lifecycle step
    pub async fn transition_status(
        &self,
        count_id: Uuid,
        actor: Uuid,
        transition: CountTransition,
        expected_version: Option<i64>,
    ) -> AppResult<PhysicalCount> {
        let mut count = self.get_count(count_id).await?;
        let expected_version = expected_version.unwrap_or(count.version);
        ensure_transition(&count, &transition)?;
        let now = Utc::now();

        match &transition {
            CountTransition::Start => {
                require_assignee(&count, actor)?;
                count.started_at = Some(now);
            }
            CountTransition::Submit => {
                require_assignee(&count, actor)?;
                let uncounted = count.uncounted_batches();
                if !uncounted.is_empty() {
                    return Err(AppError::IncompleteCount {
                        count_id,
                        batch_ids: uncounted,
                    });
                }
                if count.started_at.is_none() {
                    count.started_at = Some(now);
                }
                count.submitted_at = Some(now);
            }
            CountTransition::Approve => return self.approve(count, actor, expected_version, now).await,
            CountTransition::Reject { notes } => {
                if notes.trim().is_empty() {
                    return Err(AppError::validation(
                        "notes",
                        "Rejection notes are required",
                    ));
                }
                count.rejection_notes = Some(notes.clone());
                count.submitted_at = None;
            }
            CountTransition::Cancel { reason } => {
                for item in &mut count.items {
                    item.counted_quantity = None;
                    item.variance_reason = None;
                }
                if let Some(reason) = reason {
                    count.notes = Some(match count.notes.take() {
                        Some(existing) => format!("{}\nCancelled: {}", existing, reason),
                        None => format!("Cancelled: {}", reason),
                    });
                }
                count.cancelled_at = Some(now);
            }
        }

        let from = count.status;
        count.status = transition.target();
        let saved = self.store.save_count(&count, expected_version).await?;
        tracing::info!(
            count_id = %count_id,
            from = %from,
            to = %saved.status,
            actor = %actor,
            "Physical count transitioned"
        );
        Ok(saved)
    }

    /// Variances for review, cross-checked against each batch's ledger balance
    pub async fn review(&self, count_id: Uuid) -> AppResult<CountReview> {
        let count = self.get_count(count_id).await?;
        let ledger = LedgerService::new(self.store.clone());

        let mut lines = Vec::with_capacity(count.items.len());
        for item in &count.items {
            let ledger_balance = ledger
                .current_balance(LedgerTarget::Batch(item.batch_id), None)
                .await?;
            lines.push(ReviewLine {
                batch_id: item.batch_id,
                system_quantity: item.system_quantity,
                counted_quantity: item.counted_quantity,
                variance: item.variance(),
                variance_reason: item.variance_reason,
                ledger_balance,
                ledger_drift: ledger_balance - item.system_quantity,
            });
        }

        let total_system: i64 = count.items.iter().map(|i| i.system_quantity).sum();
        let total_variance: i64 = count.items.iter().filter_map(|i| i.variance()).sum();
        Ok(CountReview {
            count_id,
            status: count.status,
            version: count.version,
            lines,
            total_system,
            total_counted: count.total_counted(),
            total_variance,
            uncounted: count.uncounted_batches(),
            missing_reasons: count.batches_missing_reason(),
        })
    }

    async fn approve(
        &self,
        count: PhysicalCount,
        reviewer: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> AppResult<PhysicalCount> {
        let uncounted = count.uncounted_batches();
        if !uncounted.is_empty() {
            return Err(AppError::IncompleteCount {
                count_id: count.id,
                batch_ids: uncounted,
            });
        }
        let missing = count.batches_missing_reason();
        if !missing.is_empty() {
            return Err(AppError::MissingVarianceReason {
                count_id: count.id,
                batch_ids: missing,
            });
        }

        let (batch_writes, adjustments) = variance_writes(&count, reviewer, now);
        let mut completed = count.clone();
        completed.status = CountStatus::Completed;
        completed.reviewed_by = Some(reviewer);
        completed.reviewed_at = Some(now);

        let outcome = self
            .store
            .commit_approval(CountApproval {
                count: completed,
                expected_version,
                batch_writes: batch_writes.clone(),
                adjustments,
            })
            .await;

        match outcome {
            Ok(approved) => {
                tracing::info!(
                    count_id = %approved.id,
                    adjusted_batches = batch_writes.len(),
                    reviewer = %reviewer,
                    "Physical count approved; freeze released"
                );
                Ok(approved)
            }
            Err(err) => Err(self.classify_failed_approval(&count, &batch_writes, err).await),
        }
    }

    /// A failed approval that left some writes behind is an integrity fault
    async fn classify_failed_approval(
        &self,
        count: &PhysicalCount,
        writes: &[BatchWrite],
        err: AppError,
    ) -> AppError {
        let still_in_review = matches!(
            self.store.get_count(count.id).await,
            Ok(Some(ref c)) if c.status == CountStatus::PendingReview
        );
        if !still_in_review || writes.is_empty() {
            return err;
        }
        let Ok((applied, pending)) = self.partition_writes(writes).await else {
            return err;
        };
        if applied.is_empty() {
            return err;
        }

        tracing::error!(
            count_id = %count.id,
            applied = ?applied,
            pending = ?pending,
            cause = %err,
            "Partial commit detected during count approval"
        );
        AppError::PartialCommitDetected {
            count_id: count.id,
            applied,
            pending,
        }
    }

    async fn partition_writes(&self, writes: &[BatchWrite]) -> AppResult<(Vec<Uuid>, Vec<Uuid>)> {
        let ids: Vec<Uuid> = writes.iter().map(|w| w.batch_id).collect();
        let batches = self.store.get_batches(&ids).await?;
        Ok(writes.iter().fold((Vec::new(), Vec::new()), |(mut applied, mut pending), w| {
            let landed = batches
                .iter()
                .any(|b| b.id == w.batch_id && b.quantity == w.quantity);
            if landed {
                applied.push(w.batch_id);
            } else {
                pending.push(w.batch_id);
            }
            (applied, pending)
        }))
    }
}

fn require_assignee(count: &PhysicalCount, actor: Uuid) -> AppResult<()> {
    if count.assigned_to != actor {
        return Err(AppError::NotAssignee { count_id: count.id });
    }
    Ok(())
}

fn ensure_transition(count: &PhysicalCount, transition: &CountTransition) -> AppResult<()> {
    let target = transition.target();
    if !transition.sources().contains(&count.status) || !count.status.can_transition_to(target) {
        return Err(AppError::InvalidStateTransition(format!(
            "Count {} cannot move from {} to {}",
            count.id, count.status, target
        )));
    }
    Ok(())
}

/// Absolute batch writes and synthetic adjustments for every nonzero variance
fn variance_writes(
    count: &PhysicalCount,
    reviewer: Uuid,
    now: DateTime<Utc>,
) -> (Vec<BatchWrite>, Vec<TransactionRecord>) {
    count
        .variant_items()
        .filter_map(|item| Some((item, item.counted_quantity?, item.variance()?)))
        .map(|(item, counted, variance)| {
            let write = BatchWrite {
                batch_id: item.batch_id,
                quantity: counted,
            };
            let direction = if variance > 0 {
                AdjustmentDirection::Increase
            } else {
                AdjustmentDirection::Decrease
            };
            let adjustment = TransactionRecord {
                id: Uuid::new_v4(),
                occurred_at: now,
                facility_id: count.facility_id,
                user_id: reviewer,
                reference: Some(format!("Physical count {}", count.id)),
                details: TransactionDetails::Adjustment(AdjustmentDetails {
                    direction,
                    from_quantity: Some(item.system_quantity),
                    to_quantity: Some(counted),
                    reason: item.variance_reason,
                    physical_count_id: Some(count.id),
                    lines: vec![LineItem {
                        batch_id: item.batch_id,
                        quantity: variance.abs(),
                    }],
                }),
            };
            (write, adjustment)
        })
        .unzip()
}
