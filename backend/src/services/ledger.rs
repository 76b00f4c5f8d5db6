//! Ledger service: loads the log slice for a target and folds it into a ledger

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{
    build_ledger, BatchFilter, CountFilter, Ledger, LedgerQuery, LedgerTarget, PhysicalCount,
    StockBatch, TransactionRecord,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::InventoryStore;

/// Query-string parameters for ledger endpoints
#[derive(Debug, Default, Deserialize)]
pub struct LedgerParams {
    pub facility_id: Option<Uuid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl LedgerParams {
    pub fn into_query(self, target: LedgerTarget) -> AppResult<LedgerQuery> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(AppError::validation("end", "End date precedes start date"));
            }
        }
        let mut query = LedgerQuery::new(target).between(self.start, self.end);
        if let Some(facility_id) = self.facility_id {
            query = query.for_facility(facility_id);
        }
        Ok(query)
    }
}

/// Everything the reconstructor needs for one target
struct LedgerInputs {
    catalog: Vec<StockBatch>,
    transactions: Vec<TransactionRecord>,
    counts: Vec<PhysicalCount>,
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn InventoryStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    /// Build the ledger for a batch or item
    pub async fn build_ledger(&self, query: &LedgerQuery) -> AppResult<Ledger> {
        let inputs = self.load(query.target).await?;
        let ledger = build_ledger(query, &inputs.catalog, &inputs.transactions, &inputs.counts);

        for reference in &ledger.unresolved {
            tracing::warn!(
                transaction_id = %reference.transaction_id,
                batch_id = %reference.batch_id,
                "Skipping unresolvable batch reference in ledger"
            );
        }
        tracing::debug!(
            entries = ledger.entries.len(),
            closing_balance = ledger.closing_balance,
            "Built ledger"
        );
        Ok(ledger)
    }

    /// Closing balance of the unwindowed ledger
    pub async fn current_balance(
        &self,
        target: LedgerTarget,
        facility_id: Option<Uuid>,
    ) -> AppResult<i64> {
        let mut query = LedgerQuery::new(target);
        if let Some(facility_id) = facility_id {
            query = query.for_facility(facility_id);
        }
        Ok(self.build_ledger(&query).await?.closing_balance)
    }

    async fn load(&self, target: LedgerTarget) -> AppResult<LedgerInputs> {
        let target_batches: Vec<Uuid> = match target {
            LedgerTarget::Batch(batch_id) => vec![batch_id],
            LedgerTarget::Item(item_id) => self
                .store
                .list_batches(&BatchFilter::for_item(item_id))
                .await?
                .into_iter()
                .map(|b| b.id)
                .collect(),
        };
        if target_batches.is_empty() {
            return Ok(LedgerInputs {
                catalog: Vec::new(),
                transactions: Vec::new(),
                counts: Vec::new(),
            });
        }

        let transactions = self.store.list_transactions(&target_batches).await?;

        // Every batch a loaded record touches, so only truly unknown ones go unresolved
        let mut referenced: Vec<Uuid> = transactions
            .iter()
            .flat_map(TransactionRecord::batch_ids)
            .chain(target_batches.iter().copied())
            .collect();
        referenced.sort();
        referenced.dedup();
        let catalog = self.store.get_batches(&referenced).await?;

        if let LedgerTarget::Batch(batch_id) = target {
            if transactions.is_empty() && !catalog.iter().any(|b| b.id == batch_id) {
                return Err(AppError::NotFound(format!("Batch {}", batch_id)));
            }
        }

        let counts = self
            .store
            .list_counts(&CountFilter::completed_for_batches(target_batches))
            .await?;

        Ok(LedgerInputs {
            catalog,
            transactions,
            counts,
        })
    }
}
