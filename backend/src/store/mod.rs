//! Storage boundary for the ledger engine
//!
//! The engine reads the transaction log and stock batches and writes them only through
//! [`InventoryStore`]. Every mutating method performs its freeze check inside the same
//! storage transaction as the write it guards.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    BatchFilter, CountFilter, FreezeIndex, PhysicalCount, StockBatch, TransactionDetails,
    TransactionRecord, TransferStatus, MAX_BATCH_QUANTITY,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

mod memory;
mod postgres;

pub use memory::{Fault, MemoryStore};
pub use postgres::PgInventoryStore;

/// A new transaction plus any batches it brings into existence
#[derive(Debug, Clone)]
pub struct StockMutation {
    pub record: TransactionRecord,
    pub new_batches: Vec<StockBatch>,
}

/// Destination-side confirmation of a pending transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAcknowledgement {
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    pub acknowledged_at: DateTime<Utc>,
    pub acknowledged_by: Uuid,
    /// `(source batch, received quantity)` for discrepancy acknowledgements
    pub received: Vec<(Uuid, i64)>,
}

/// Fields needed to open a count; items are snapshotted by the store
#[derive(Debug, Clone)]
pub struct NewCount {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub location_id: Uuid,
    pub assigned_to: Uuid,
    pub initiated_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Absolute quantity written to a batch on approval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWrite {
    pub batch_id: Uuid,
    pub quantity: i64,
}

/// Everything a count approval commits as one unit
#[derive(Debug, Clone)]
pub struct CountApproval {
    /// The count in its completed form
    pub count: PhysicalCount,
    pub expected_version: i64,
    pub batch_writes: Vec<BatchWrite>,
    pub adjustments: Vec<TransactionRecord>,
}

/// What a purge removed and reversed
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeOutcome {
    pub removed_transactions: Vec<Uuid>,
    pub rewritten_transactions: Vec<Uuid>,
    pub reversed: Vec<(Uuid, i64)>,
    pub removed_batch: Option<Uuid>,
}

/// Transaction log, stock batches and physical counts behind one transactional boundary
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Cheap liveness check
    async fn ping(&self) -> AppResult<()>;

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Option<StockBatch>>;

    /// Known batches among `batch_ids`; unknown ids are simply absent
    async fn get_batches(&self, batch_ids: &[Uuid]) -> AppResult<Vec<StockBatch>>;

    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<StockBatch>>;

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<TransactionRecord>>;

    /// Every record with a line touching any of `batch_ids`, on either side of a transfer
    async fn list_transactions(&self, batch_ids: &[Uuid]) -> AppResult<Vec<TransactionRecord>>;

    /// Append a record and apply its stock effect, rejecting frozen batches
    async fn apply_transaction(&self, mutation: StockMutation) -> AppResult<TransactionRecord>;

    /// Move a pending transfer to its acknowledged state and credit the destination
    async fn acknowledge_transfer(
        &self,
        ack: TransferAcknowledgement,
    ) -> AppResult<TransactionRecord>;

    /// Reverse a record's net effect and delete it
    async fn purge_transaction(&self, id: Uuid) -> AppResult<PurgeOutcome>;

    /// Remove a batch and every log row depending on it
    async fn purge_batch(&self, batch_id: Uuid) -> AppResult<PurgeOutcome>;

    /// Current freeze membership
    async fn freeze_index(&self) -> AppResult<FreezeIndex>;

    /// Recompute freeze membership from persisted counts
    async fn rebuild_freeze_index(&self) -> AppResult<FreezeIndex>;

    /// Snapshot the location, freeze its batches and persist the count, atomically
    async fn create_count(&self, draft: NewCount) -> AppResult<PhysicalCount>;

    async fn get_count(&self, id: Uuid) -> AppResult<Option<PhysicalCount>>;

    async fn list_counts(&self, filter: &CountFilter) -> AppResult<Vec<PhysicalCount>>;

    /// Persist a count without touching stock, if its version is still `expected_version`.
    /// Terminal statuses release the freeze in the same write.
    async fn save_count(
        &self,
        count: &PhysicalCount,
        expected_version: i64,
    ) -> AppResult<PhysicalCount>;

    /// Apply an approval's batch writes, adjustments, status change and freeze release
    /// as one unit
    async fn commit_approval(&self, approval: CountApproval) -> AppResult<PhysicalCount>;
}

/// Apply signed deltas to known quantities, enforcing the non-negative invariant
pub(crate) fn apply_deltas(
    quantities: &HashMap<Uuid, i64>,
    deltas: &[(Uuid, i64)],
) -> AppResult<Vec<(Uuid, i64)>> {
    deltas
        .iter()
        .map(|(batch_id, delta)| {
            let available = *quantities
                .get(batch_id)
                .ok_or(AppError::UnresolvableBatchReference(*batch_id))?;
            let over_capacity = || {
                AppError::validation(
                    "quantity",
                    format!(
                        "Batch {} would exceed the maximum quantity of {}",
                        batch_id, MAX_BATCH_QUANTITY
                    ),
                )
            };
            let next = available.checked_add(*delta).ok_or_else(over_capacity)?;
            if next < 0 {
                return Err(AppError::InsufficientInventory {
                    batch_id: *batch_id,
                    available,
                    requested: *delta,
                });
            }
            if next > MAX_BATCH_QUANTITY {
                return Err(over_capacity());
            }
            Ok((*batch_id, next))
        })
        .collect()
}

/// The acknowledged form of a pending transfer
pub(crate) fn acknowledged_record(
    record: &TransactionRecord,
    ack: &TransferAcknowledgement,
) -> AppResult<TransactionRecord> {
    let TransactionDetails::Transfer(details) = &record.details else {
        return Err(AppError::validation(
            "transfer_id",
            format!("Transaction {} is not a transfer", record.id),
        ));
    };
    if details.status.is_acknowledged() {
        return Err(AppError::InvalidStateTransition(format!(
            "Transfer {} is already {}",
            record.id,
            details.status.as_str()
        )));
    }
    if ack.acknowledged_at < record.occurred_at {
        return Err(AppError::validation(
            "acknowledged_at",
            "Acknowledgement cannot precede the transfer",
        ));
    }

    let mut details = details.clone();
    for (batch_id, _) in &ack.received {
        if !details.lines.iter().any(|l| l.batch_id == *batch_id) {
            return Err(AppError::validation(
                "received",
                format!("Batch {} is not part of transfer {}", batch_id, record.id),
            ));
        }
    }
    for line in &mut details.lines {
        line.received_quantity = match ack.status {
            TransferStatus::Discrepancy => Some(
                ack.received
                    .iter()
                    .find(|(b, _)| *b == line.batch_id)
                    .map_or(line.quantity, |(_, q)| *q),
            ),
            _ => Some(line.quantity),
        };
    }
    details.status = ack.status;
    details.acknowledged_at = Some(ack.acknowledged_at);
    details.acknowledged_by = Some(ack.acknowledged_by);

    Ok(TransactionRecord {
        details: TransactionDetails::Transfer(details),
        ..record.clone()
    })
}

/// `record` with every line touching `batch_id` removed, or `None` if nothing remains
pub(crate) fn without_batch(record: &TransactionRecord, batch_id: Uuid) -> Option<TransactionRecord> {
    let mut stripped = record.clone();
    let remaining = match &mut stripped.details {
        TransactionDetails::Transfer(t) => {
            t.lines
                .retain(|l| l.batch_id != batch_id && l.destination_batch() != batch_id);
            t.lines.len()
        }
        TransactionDetails::Adjustment(a) => {
            a.lines.retain(|l| l.batch_id != batch_id);
            a.lines.len()
        }
        TransactionDetails::Receive { lines }
        | TransactionDetails::Dispense { lines }
        | TransactionDetails::WriteOff { lines }
        | TransactionDetails::Return { lines }
        | TransactionDetails::InternalReturn { lines } => {
            lines.retain(|l| l.batch_id != batch_id);
            lines.len()
        }
    };
    (remaining > 0).then_some(stripped)
}

/// Signed reversal of a record's stock effect
pub(crate) fn reversal(record: &TransactionRecord) -> Vec<(Uuid, i64)> {
    record
        .net_effect()
        .into_iter()
        .map(|(batch_id, delta)| (batch_id, -delta))
        .filter(|(_, delta)| *delta != 0)
        .collect()
}

/// How purging one batch rewrites the log that depends on it
#[derive(Debug, Default)]
pub(crate) struct BatchPurgePlan {
    pub removed: Vec<Uuid>,
    pub rewritten: Vec<TransactionRecord>,
    /// Net change on the surviving batches
    pub reversed: Vec<(Uuid, i64)>,
}

pub(crate) fn plan_batch_purge<'a>(
    dependents: impl IntoIterator<Item = &'a TransactionRecord>,
    batch_id: Uuid,
) -> BatchPurgePlan {
    let mut plan = BatchPurgePlan::default();
    for record in dependents {
        let remaining = without_batch(record, batch_id);
        let after = remaining
            .as_ref()
            .map(TransactionRecord::net_effect)
            .unwrap_or_default();
        for (b, d) in shared::effect_delta(&record.net_effect(), &after) {
            if b == batch_id {
                continue;
            }
            match plan.reversed.iter_mut().find(|(id, _)| *id == b) {
                Some((_, total)) => *total = total.saturating_add(d),
                None => plan.reversed.push((b, d)),
            }
        }
        match remaining {
            Some(stripped) => plan.rewritten.push(stripped),
            None => plan.removed.push(record.id),
        }
    }
    plan.reversed.retain(|(_, d)| *d != 0);
    plan
}

/// Count adjustments are owned by their count and cannot be purged independently
pub(crate) fn ensure_purgeable(record: &TransactionRecord) -> AppResult<()> {
    match record.originating_count() {
        Some(count_id) => Err(AppError::validation(
            "transaction_id",
            format!(
                "Transaction {} was written by physical count {} and cannot be purged",
                record.id, count_id
            ),
        )),
        None => Ok(()),
    }
}
