//! In-memory inventory store
//!
//! One mutex guards batches, log, counts and the maintained freeze index. Approvals stage
//! their writes on a copy of the state and swap it in, so a failure leaves nothing behind.
//! Faults can be injected to exercise rollback and torn-write detection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use shared::{
    effect_delta, BatchFilter, CountFilter, CountStatus, FreezeIndex, PhysicalCount,
    PhysicalCountItem, StockBatch, TransactionRecord,
};
use uuid::Uuid;

use super::{
    acknowledged_record, apply_deltas, ensure_purgeable, plan_batch_purge, reversal, BatchWrite,
    CountApproval, InventoryStore, NewCount, PurgeOutcome, StockMutation,
    TransferAcknowledgement,
};
use crate::error::{AppError, AppResult};

/// Failure modes the memory store can simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The next approval fails after this many batch writes and rolls back
    FailApprovalAfter(usize),
    /// The next approval keeps this many batch writes and then fails without rolling back
    TornApprovalAfter(usize),
    /// Every call fails until the fault is cleared
    Unavailable,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    batches: HashMap<Uuid, StockBatch>,
    transactions: Vec<TransactionRecord>,
    counts: HashMap<Uuid, PhysicalCount>,
    freeze: FreezeIndex,
}

impl MemoryState {
    fn quantities(&self, batch_ids: impl IntoIterator<Item = Uuid>) -> HashMap<Uuid, i64> {
        batch_ids
            .into_iter()
            .filter_map(|id| self.batches.get(&id).map(|b| (id, b.quantity)))
            .collect()
    }

    fn set_quantities(&mut self, updates: &[(Uuid, i64)]) {
        for (batch_id, quantity) in updates {
            if let Some(batch) = self.batches.get_mut(batch_id) {
                batch.quantity = *quantity;
            }
        }
    }

    fn write_batch(&mut self, write: &BatchWrite) -> AppResult<()> {
        let batch = self
            .batches
            .get_mut(&write.batch_id)
            .ok_or(AppError::UnresolvableBatchReference(write.batch_id))?;
        batch.quantity = write.quantity;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fault: Mutex<Option<Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with batches that have no log history
    pub fn with_batches(batches: impl IntoIterator<Item = StockBatch>) -> Self {
        let store = Self::new();
        if let Ok(mut state) = store.state.lock() {
            state.batches = batches.into_iter().map(|b| (b.id, b)).collect();
        }
        store
    }

    pub fn inject_fault(&self, fault: Fault) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(fault);
        }
    }

    pub fn clear_fault(&self) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = None;
        }
    }

    fn state(&self) -> AppResult<MutexGuard<'_, MemoryState>> {
        if self.current_fault() == Some(Fault::Unavailable) {
            return Err(AppError::StorageUnavailable(
                "memory store is marked unavailable".to_string(),
            ));
        }
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }

    fn current_fault(&self) -> Option<Fault> {
        self.fault.lock().ok().and_then(|slot| *slot)
    }

    /// Take a pending approval fault; `Unavailable` stays in place
    fn take_approval_fault(&self) -> Option<Fault> {
        let mut slot = self.fault.lock().ok()?;
        match *slot {
            Some(Fault::FailApprovalAfter(_)) | Some(Fault::TornApprovalAfter(_)) => slot.take(),
            _ => None,
        }
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        self.state().map(|_| ())
    }

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Option<StockBatch>> {
        Ok(self.state()?.batches.get(&batch_id).cloned())
    }

    async fn get_batches(&self, batch_ids: &[Uuid]) -> AppResult<Vec<StockBatch>> {
        let state = self.state()?;
        Ok(batch_ids
            .iter()
            .filter_map(|id| state.batches.get(id).cloned())
            .collect())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<StockBatch>> {
        let state = self.state()?;
        let mut batches: Vec<StockBatch> = state
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        batches.sort_by_key(|b| (b.created_at, b.id));
        Ok(batches)
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<TransactionRecord>> {
        Ok(self
            .state()?
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_transactions(&self, batch_ids: &[Uuid]) -> AppResult<Vec<TransactionRecord>> {
        let state = self.state()?;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.batch_ids().iter().any(|b| batch_ids.contains(b)))
            .cloned()
            .collect())
    }

    async fn apply_transaction(&self, mutation: StockMutation) -> AppResult<TransactionRecord> {
        let StockMutation {
            record,
            new_batches,
        } = mutation;
        let mut state = self.state()?;

        if state.transactions.iter().any(|t| t.id == record.id) {
            return Err(AppError::validation(
                "id",
                format!("Transaction {} already exists", record.id),
            ));
        }
        if let Some(existing) = new_batches
            .iter()
            .find(|b| state.batches.contains_key(&b.id))
        {
            return Err(AppError::validation(
                "new_batches",
                format!("Batch {} already exists", existing.id),
            ));
        }

        let mut quantities = state.quantities(record.batch_ids());
        for batch in &new_batches {
            quantities.insert(batch.id, batch.quantity);
        }
        if let Some(missing) = record
            .batch_ids()
            .into_iter()
            .find(|id| !quantities.contains_key(id))
        {
            return Err(AppError::UnresolvableBatchReference(missing));
        }

        let effect = record.net_effect();
        let touched: Vec<Uuid> = effect.iter().map(|(b, _)| *b).collect();
        state.freeze.check_unfrozen(&touched)?;
        let updates = apply_deltas(&quantities, &effect)?;

        for batch in new_batches {
            state.batches.insert(batch.id, batch);
        }
        state.set_quantities(&updates);
        state.transactions.push(record.clone());
        Ok(record)
    }

    async fn acknowledge_transfer(
        &self,
        ack: TransferAcknowledgement,
    ) -> AppResult<TransactionRecord> {
        let mut state = self.state()?;
        let position = state
            .transactions
            .iter()
            .position(|t| t.id == ack.transfer_id)
            .ok_or_else(|| AppError::NotFound(format!("Transfer {}", ack.transfer_id)))?;

        let current = &state.transactions[position];
        let updated = acknowledged_record(current, &ack)?;
        let delta = effect_delta(&current.net_effect(), &updated.net_effect());
        let touched: Vec<Uuid> = delta.iter().map(|(b, _)| *b).collect();
        state.freeze.check_unfrozen(&touched)?;
        let updates = apply_deltas(&state.quantities(touched), &delta)?;

        state.set_quantities(&updates);
        state.transactions[position] = updated.clone();
        Ok(updated)
    }

    async fn purge_transaction(&self, id: Uuid) -> AppResult<PurgeOutcome> {
        let mut state = self.state()?;
        let position = state
            .transactions
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", id)))?;
        let record = &state.transactions[position];
        ensure_purgeable(record)?;

        let reversed = reversal(record);
        let touched: Vec<Uuid> = reversed.iter().map(|(b, _)| *b).collect();
        state.freeze.check_unfrozen(&touched)?;
        let updates = apply_deltas(&state.quantities(touched), &reversed)?;

        state.set_quantities(&updates);
        state.transactions.remove(position);
        Ok(PurgeOutcome {
            removed_transactions: vec![id],
            reversed,
            ..PurgeOutcome::default()
        })
    }

    async fn purge_batch(&self, batch_id: Uuid) -> AppResult<PurgeOutcome> {
        let mut state = self.state()?;
        if !state.batches.contains_key(&batch_id) {
            return Err(AppError::NotFound(format!("Batch {}", batch_id)));
        }
        state.freeze.check_unfrozen(&[batch_id])?;

        let plan = plan_batch_purge(
            state
                .transactions
                .iter()
                .filter(|t| t.batch_ids().contains(&batch_id)),
            batch_id,
        );
        let touched: Vec<Uuid> = plan.reversed.iter().map(|(b, _)| *b).collect();
        state.freeze.check_unfrozen(&touched)?;
        let updates = apply_deltas(&state.quantities(touched), &plan.reversed)?;

        state.set_quantities(&updates);
        state
            .transactions
            .retain(|t| !plan.removed.contains(&t.id));
        let rewritten_ids: Vec<Uuid> = plan.rewritten.iter().map(|t| t.id).collect();
        for stripped in plan.rewritten {
            if let Some(slot) = state.transactions.iter_mut().find(|t| t.id == stripped.id) {
                *slot = stripped;
            }
        }
        state.batches.remove(&batch_id);

        Ok(PurgeOutcome {
            removed_transactions: plan.removed,
            rewritten_transactions: rewritten_ids,
            reversed: plan.reversed,
            removed_batch: Some(batch_id),
        })
    }

    async fn freeze_index(&self) -> AppResult<FreezeIndex> {
        Ok(self.state()?.freeze.clone())
    }

    async fn rebuild_freeze_index(&self) -> AppResult<FreezeIndex> {
        let mut state = self.state()?;
        let mut counts: Vec<&PhysicalCount> = state.counts.values().collect();
        counts.sort_by_key(|c| (c.created_at, c.id));
        let rebuilt = FreezeIndex::from_counts(counts);
        state.freeze = rebuilt.clone();
        Ok(rebuilt)
    }

    async fn create_count(&self, draft: NewCount) -> AppResult<PhysicalCount> {
        let mut state = self.state()?;
        let scope = BatchFilter::for_location(draft.facility_id, draft.location_id);
        let mut batches: Vec<&StockBatch> =
            state.batches.values().filter(|b| scope.matches(b)).collect();
        if batches.is_empty() {
            return Err(AppError::EmptyLocationCount {
                facility_id: draft.facility_id,
                location_id: draft.location_id,
            });
        }
        batches.sort_by_key(|b| (b.created_at, b.id));

        let items: Vec<PhysicalCountItem> = batches
            .iter()
            .map(|b| PhysicalCountItem::new(b.id, b.quantity))
            .collect();
        let batch_ids: Vec<Uuid> = items.iter().map(|i| i.batch_id).collect();
        state.freeze.lock_batches(draft.id, &batch_ids)?;

        let count = PhysicalCount {
            id: draft.id,
            facility_id: draft.facility_id,
            location_id: draft.location_id,
            status: CountStatus::Pending,
            assigned_to: draft.assigned_to,
            initiated_by: draft.initiated_by,
            reviewed_by: None,
            notes: draft.notes,
            rejection_notes: None,
            items,
            created_at: draft.created_at,
            started_at: None,
            submitted_at: None,
            reviewed_at: None,
            cancelled_at: None,
            version: 1,
        };
        state.counts.insert(count.id, count.clone());
        Ok(count)
    }

    async fn get_count(&self, id: Uuid) -> AppResult<Option<PhysicalCount>> {
        Ok(self.state()?.counts.get(&id).cloned())
    }

    async fn list_counts(&self, filter: &CountFilter) -> AppResult<Vec<PhysicalCount>> {
        let state = self.state()?;
        let mut counts: Vec<PhysicalCount> = state
            .counts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        counts.sort_by_key(|c| (c.created_at, c.id));
        Ok(counts)
    }

    async fn save_count(
        &self,
        count: &PhysicalCount,
        expected_version: i64,
    ) -> AppResult<PhysicalCount> {
        let mut state = self.state()?;
        let stored_version = state
            .counts
            .get(&count.id)
            .map(|c| c.version)
            .ok_or_else(|| AppError::NotFound(format!("Physical count {}", count.id)))?;
        if stored_version != expected_version {
            return Err(AppError::ConcurrentModification {
                resource: format!("Physical count {}", count.id),
            });
        }

        let mut saved = count.clone();
        saved.version = expected_version + 1;
        if saved.status.is_terminal() {
            state.freeze.release_batches(saved.id);
        }
        state.counts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn commit_approval(&self, approval: CountApproval) -> AppResult<PhysicalCount> {
        let mut state = self.state()?;
        let count_id = approval.count.id;
        let stored_version = state
            .counts
            .get(&count_id)
            .map(|c| c.version)
            .ok_or_else(|| AppError::NotFound(format!("Physical count {}", count_id)))?;
        if stored_version != approval.expected_version {
            return Err(AppError::ConcurrentModification {
                resource: format!("Physical count {}", count_id),
            });
        }

        match self.take_approval_fault() {
            Some(Fault::TornApprovalAfter(applied)) => {
                for write in approval.batch_writes.iter().take(applied) {
                    state.write_batch(write)?;
                }
                return Err(AppError::StorageUnavailable(format!(
                    "injected failure after {} batch writes",
                    applied
                )));
            }
            Some(Fault::FailApprovalAfter(applied)) => {
                let mut staged = state.clone();
                for write in approval.batch_writes.iter().take(applied) {
                    staged.write_batch(write)?;
                }
                return Err(AppError::StorageUnavailable(format!(
                    "injected failure after {} batch writes, rolled back",
                    applied
                )));
            }
            _ => {}
        }

        let mut staged = state.clone();
        for write in &approval.batch_writes {
            staged.write_batch(write)?;
        }
        staged.transactions.extend(approval.adjustments);
        let mut completed = approval.count;
        completed.version = approval.expected_version + 1;
        staged.freeze.release_batches(count_id);
        staged.counts.insert(count_id, completed.clone());

        *state = staged;
        Ok(completed)
    }
}
