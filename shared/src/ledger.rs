//! Ledger reconstruction
//!
//! Merges every transaction stream plus completed count variances into one ordered list of
//! signed movements and folds it into opening, running and closing balances.
//!
//! Streams are ordered against each other by timestamp alone. Clock skew between the
//! systems that author the streams can reorder movements; the reconstructor does not
//! attempt to correct for it.

use std::collections::{HashMap, HashSet};

use crate::models::{
    Ledger, LedgerEntry, LedgerQuery, LedgerTarget, Movement, MovementKind, PhysicalCount,
    CountStatus, StockBatch, TransactionRecord, UnresolvedReference,
};

/// Build a ledger for `query`.
///
/// `catalog` must contain every batch referenced by `transactions` that is still known;
/// lines pointing anywhere else are reported in [`Ledger::unresolved`] and skipped.
/// Adjustments generated by a count that is itself present in `counts` are not emitted
/// a second time.
pub fn build_ledger(
    query: &LedgerQuery,
    catalog: &[StockBatch],
    transactions: &[TransactionRecord],
    counts: &[PhysicalCount],
) -> Ledger {
    let batches: HashMap<_, _> = catalog.iter().map(|b| (b.id, b)).collect();
    let resolve = |batch_id| -> Option<bool> {
        match (query.target, batches.get(&batch_id)) {
            (LedgerTarget::Batch(target), _) if target == batch_id => Some(true),
            (_, None) => None,
            (LedgerTarget::Batch(_), Some(_)) => Some(false),
            (LedgerTarget::Item(item), Some(batch)) => Some(batch.item_id == item),
        }
    };
    let in_facility =
        |m: &Movement| query.facility_id.map_or(true, |facility| m.facility_id == facility);

    let completed: Vec<&PhysicalCount> = counts
        .iter()
        .filter(|c| c.status == CountStatus::Completed && c.reviewed_at.is_some())
        .collect();
    let replayed: HashSet<_> = completed.iter().map(|c| c.id).collect();

    let mut unresolved = Vec::new();
    let mut seen_unresolved = HashSet::new();
    let mut movements = Vec::new();

    for record in transactions {
        if record.originating_count().is_some_and(|id| replayed.contains(&id)) {
            continue;
        }
        for movement in record.movements() {
            match resolve(movement.batch_id) {
                None => {
                    if seen_unresolved.insert((record.id, movement.batch_id)) {
                        unresolved.push(UnresolvedReference {
                            transaction_id: record.id,
                            batch_id: movement.batch_id,
                        });
                    }
                }
                Some(true) if in_facility(&movement) => movements.push(movement),
                Some(_) => {}
            }
        }
    }

    for count in completed {
        let Some(reviewed_at) = count.reviewed_at else {
            continue;
        };
        for (sequence, item) in count.items.iter().enumerate() {
            let Some(variance) = item.variance().filter(|v| *v != 0) else {
                continue;
            };
            let movement = Movement {
                transaction_id: count.id,
                sequence,
                kind: MovementKind::CountVariance,
                occurred_at: reviewed_at,
                facility_id: count.facility_id,
                batch_id: item.batch_id,
                signed_quantity: variance,
                reference: item.notes.clone(),
            };
            if resolve(item.batch_id) == Some(true) && in_facility(&movement) {
                movements.push(movement);
            }
        }
    }

    movements.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
            .then_with(|| a.sequence.cmp(&b.sequence))
    });

    let mut opening_balance = 0i64;
    let mut entries = Vec::new();
    for movement in movements {
        if query.start.is_some_and(|start| movement.occurred_at < start) {
            opening_balance = opening_balance.saturating_add(movement.signed_quantity);
            continue;
        }
        if query.end.is_some_and(|end| movement.occurred_at > end) {
            continue;
        }
        entries.push(movement);
    }

    let mut running_balance = opening_balance;
    let mut total_in = 0i64;
    let mut total_out = 0i64;
    let entries: Vec<LedgerEntry> = entries
        .into_iter()
        .map(|m| {
            running_balance = running_balance.saturating_add(m.signed_quantity);
            let (quantity_in, quantity_out) = if m.signed_quantity >= 0 {
                (m.signed_quantity, 0)
            } else {
                (0, m.signed_quantity.saturating_neg())
            };
            total_in = total_in.saturating_add(quantity_in);
            total_out = total_out.saturating_add(quantity_out);
            LedgerEntry {
                date: m.occurred_at,
                kind: m.kind,
                facility_id: m.facility_id,
                batch_id: m.batch_id,
                transaction_id: m.transaction_id,
                reference: m.reference,
                quantity_in,
                quantity_out,
                running_balance,
            }
        })
        .collect();

    Ledger {
        target: query.target,
        facility_id: query.facility_id,
        entries,
        opening_balance,
        closing_balance: running_balance,
        total_in,
        total_out,
        unresolved,
    }
}

/// Balance after every known movement, ignoring any date window on `query`
pub fn current_balance(
    query: &LedgerQuery,
    catalog: &[StockBatch],
    transactions: &[TransactionRecord],
    counts: &[PhysicalCount],
) -> i64 {
    let unwindowed = LedgerQuery {
        start: None,
        end: None,
        ..query.clone()
    };
    build_ledger(&unwindowed, catalog, transactions, counts).closing_balance
}
