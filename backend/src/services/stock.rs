//! Stock mutation service: records transactions, acknowledges transfers and purges

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use shared::{
    validate_acknowledgement, validate_transaction, StockBatch, TransactionDetails,
    TransactionKind, TransactionRecord, TransferStatus,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{InventoryStore, PurgeOutcome, StockMutation, TransferAcknowledgement};

/// A batch declared by a receive
#[derive(Debug, Clone, Deserialize)]
pub struct NewBatchInput {
    pub id: Option<Uuid>,
    pub item_id: Uuid,
    pub location_id: Uuid,
    pub lot_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

/// Input for recording a transaction of any kind
#[derive(Debug, Deserialize)]
pub struct RecordTransactionInput {
    pub id: Option<Uuid>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub facility_id: Uuid,
    pub reference: Option<String>,
    #[serde(flatten)]
    pub details: TransactionDetails,
    #[serde(default)]
    pub new_batches: Vec<NewBatchInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedLine {
    pub batch_id: Uuid,
    pub quantity: i64,
}

/// Input for acknowledging a transfer at the destination
#[derive(Debug, Deserialize)]
pub struct AcknowledgeTransferInput {
    pub status: TransferStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub received: Vec<ReceivedLine>,
}

#[derive(Clone)]
pub struct StockService {
    store: Arc<dyn InventoryStore>,
}

impl StockService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Append a transaction and apply it to stock. Frozen batches reject the write.
    pub async fn record_transaction(
        &self,
        user_id: Uuid,
        input: RecordTransactionInput,
    ) -> AppResult<TransactionRecord> {
        let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);
        let record = TransactionRecord {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            occurred_at,
            facility_id: input.facility_id,
            user_id,
            reference: input.reference,
            details: input.details,
        };
        validate_transaction(&record).map_err(|m| AppError::validation("lines", m))?;

        if !input.new_batches.is_empty() && record.kind() != TransactionKind::Receive {
            return Err(AppError::validation(
                "new_batches",
                "Only a receive may declare new batches",
            ));
        }
        let referenced = record.batch_ids();
        let new_batches: Vec<StockBatch> = input
            .new_batches
            .into_iter()
            .map(|b| StockBatch {
                id: b.id.unwrap_or_else(Uuid::new_v4),
                item_id: b.item_id,
                facility_id: record.facility_id,
                location_id: b.location_id,
                quantity: 0,
                lot_number: b.lot_number,
                expires_on: b.expires_on,
                created_at: occurred_at,
            })
            .collect();
        if let Some(orphan) = new_batches.iter().find(|b| !referenced.contains(&b.id)) {
            return Err(AppError::validation(
                "new_batches",
                format!("Declared batch {} is not received by any line", orphan.id),
            ));
        }

        let recorded = self
            .store
            .apply_transaction(StockMutation {
                record,
                new_batches,
            })
            .await?;

        tracing::info!(
            transaction_id = %recorded.id,
            kind = recorded.kind().as_str(),
            facility_id = %recorded.facility_id,
            "Recorded stock transaction"
        );
        Ok(recorded)
    }

    pub async fn get_transaction(&self, id: Uuid) -> AppResult<TransactionRecord> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", id)))
    }

    /// Confirm a pending transfer at the destination and credit the received quantity
    pub async fn acknowledge_transfer(
        &self,
        transfer_id: Uuid,
        user_id: Uuid,
        input: AcknowledgeTransferInput,
    ) -> AppResult<TransactionRecord> {
        let received: Vec<(Uuid, i64)> = input
            .received
            .iter()
            .map(|l| (l.batch_id, l.quantity))
            .collect();
        validate_acknowledgement(input.status, &received)
            .map_err(|m| AppError::validation("status", m))?;

        let acknowledged = self
            .store
            .acknowledge_transfer(TransferAcknowledgement {
                transfer_id,
                status: input.status,
                acknowledged_at: input.acknowledged_at.unwrap_or_else(Utc::now),
                acknowledged_by: user_id,
                received,
            })
            .await?;

        tracing::info!(
            transfer_id = %transfer_id,
            status = input.status.as_str(),
            "Transfer acknowledged"
        );
        Ok(acknowledged)
    }

    /// Reverse a transaction's effect on stock and remove it from the log
    pub async fn purge_transaction(&self, id: Uuid, user_id: Uuid) -> AppResult<PurgeOutcome> {
        let outcome = self.store.purge_transaction(id).await?;
        tracing::warn!(
            transaction_id = %id,
            purged_by = %user_id,
            reversed = ?outcome.reversed,
            "Purged transaction"
        );
        Ok(outcome)
    }

    /// Remove a batch and the log rows that depend on it
    pub async fn purge_batch(&self, batch_id: Uuid, user_id: Uuid) -> AppResult<PurgeOutcome> {
        let outcome = self.store.purge_batch(batch_id).await?;
        tracing::warn!(
            batch_id = %batch_id,
            purged_by = %user_id,
            removed = outcome.removed_transactions.len(),
            rewritten = outcome.rewritten_transactions.len(),
            "Purged batch"
        );
        Ok(outcome)
    }
}
