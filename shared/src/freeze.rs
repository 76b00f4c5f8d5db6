//! Freeze index: which batches are locked by which open count

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PhysicalCount;

/// A batch is already held by another count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("batch {batch_id} is frozen by physical count {count_id}")]
pub struct FreezeConflict {
    pub batch_id: Uuid,
    pub count_id: Uuid,
}

/// Set of frozen batches, keyed both ways
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FreezeIndex {
    by_batch: HashMap<Uuid, Uuid>,
    by_count: HashMap<Uuid, BTreeSet<Uuid>>,
}

impl FreezeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the index from counts; only active counts contribute.
    ///
    /// A batch listed by more than one active count keeps the first holder, which is how
    /// persisted data written outside the lock discipline shows up.
    pub fn from_counts<'a>(counts: impl IntoIterator<Item = &'a PhysicalCount>) -> Self {
        let mut index = Self::new();
        for count in counts.into_iter().filter(|c| c.status.is_active()) {
            for batch_id in count.batch_ids() {
                if index.by_batch.contains_key(&batch_id) {
                    continue;
                }
                index.by_batch.insert(batch_id, count.id);
                index.by_count.entry(count.id).or_default().insert(batch_id);
            }
        }
        index
    }

    pub fn is_frozen(&self, batch_id: Uuid) -> bool {
        self.by_batch.contains_key(&batch_id)
    }

    /// Count currently holding `batch_id`
    pub fn blocking_count(&self, batch_id: Uuid) -> Option<Uuid> {
        self.by_batch.get(&batch_id).copied()
    }

    /// First frozen batch among `batch_ids`, as a conflict
    pub fn check_unfrozen(&self, batch_ids: &[Uuid]) -> Result<(), FreezeConflict> {
        match batch_ids
            .iter()
            .find_map(|b| self.by_batch.get(b).map(|c| (*b, *c)))
        {
            Some((batch_id, count_id)) => Err(FreezeConflict { batch_id, count_id }),
            None => Ok(()),
        }
    }

    /// Lock `batch_ids` for `count_id`. Nothing is locked if any batch belongs to
    /// another count.
    pub fn lock_batches(&mut self, count_id: Uuid, batch_ids: &[Uuid]) -> Result<(), FreezeConflict> {
        if let Some((batch_id, holder)) = batch_ids.iter().find_map(|b| {
            self.by_batch
                .get(b)
                .filter(|holder| **holder != count_id)
                .map(|holder| (*b, *holder))
        }) {
            return Err(FreezeConflict {
                batch_id,
                count_id: holder,
            });
        }

        let held = self.by_count.entry(count_id).or_default();
        for batch_id in batch_ids {
            self.by_batch.insert(*batch_id, count_id);
            held.insert(*batch_id);
        }
        Ok(())
    }

    /// Release every batch held by `count_id`, returning them
    pub fn release_batches(&mut self, count_id: Uuid) -> Vec<Uuid> {
        let released: Vec<Uuid> = self
            .by_count
            .remove(&count_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for batch_id in &released {
            self.by_batch.remove(batch_id);
        }
        released
    }

    pub fn batches_for(&self, count_id: Uuid) -> Vec<Uuid> {
        self.by_count
            .get(&count_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_batch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountStatus, PhysicalCountItem};
    use chrono::Utc;
    use proptest::prelude::*;

    fn count(id: u128, status: CountStatus, batches: &[u128]) -> PhysicalCount {
        PhysicalCount {
            id: Uuid::from_u128(id),
            facility_id: Uuid::nil(),
            location_id: Uuid::nil(),
            status,
            assigned_to: Uuid::nil(),
            initiated_by: Uuid::nil(),
            reviewed_by: None,
            notes: None,
            rejection_notes: None,
            items: batches
                .iter()
                .map(|b| PhysicalCountItem::new(Uuid::from_u128(*b), 10))
                .collect(),
            created_at: Utc::now(),
            started_at: None,
            submitted_at: None,
            reviewed_at: None,
            cancelled_at: None,
            version: 1,
        }
    }

    #[test]
    fn test_lock_is_all_or_nothing() {
        let mut index = FreezeIndex::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        index.lock_batches(Uuid::from_u128(100), &[a, b]).unwrap();

        let conflict = index
            .lock_batches(Uuid::from_u128(200), &[c, b])
            .unwrap_err();
        assert_eq!(conflict.batch_id, b);
        assert_eq!(conflict.count_id, Uuid::from_u128(100));
        assert!(!index.is_frozen(c));
    }

    #[test]
    fn test_relock_by_same_count_is_noop() {
        let mut index = FreezeIndex::new();
        let count_id = Uuid::from_u128(100);
        let a = Uuid::from_u128(1);
        index.lock_batches(count_id, &[a]).unwrap();
        index.lock_batches(count_id, &[a]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.batches_for(count_id), vec![a]);
    }

    #[test]
    fn test_release_unfreezes_only_that_count() {
        let mut index = FreezeIndex::new();
        index.lock_batches(Uuid::from_u128(100), &[Uuid::from_u128(1)]).unwrap();
        index.lock_batches(Uuid::from_u128(200), &[Uuid::from_u128(2)]).unwrap();

        let released = index.release_batches(Uuid::from_u128(100));
        assert_eq!(released, vec![Uuid::from_u128(1)]);
        assert!(!index.is_frozen(Uuid::from_u128(1)));
        assert_eq!(index.blocking_count(Uuid::from_u128(2)), Some(Uuid::from_u128(200)));
    }

    #[test]
    fn test_check_unfrozen_names_blocking_count() {
        let index = FreezeIndex::from_counts(&[count(7, CountStatus::InProgress, &[5])]);
        let err = index
            .check_unfrozen(&[Uuid::from_u128(4), Uuid::from_u128(5)])
            .unwrap_err();
        assert_eq!(err.count_id, Uuid::from_u128(7));
        assert!(err.to_string().contains(&Uuid::from_u128(7).to_string()));
    }

    fn status_strategy() -> impl Strategy<Value = CountStatus> {
        prop_oneof![
            Just(CountStatus::Pending),
            Just(CountStatus::InProgress),
            Just(CountStatus::PendingReview),
            Just(CountStatus::Completed),
            Just(CountStatus::Cancelled),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A batch is frozen iff an active count lists it
        #[test]
        fn prop_frozen_iff_in_active_count(
            specs in prop::collection::vec(
                (status_strategy(), prop::collection::btree_set(0u128..20, 1..5)),
                0..6
            ),
            candidate in 0u128..20,
        ) {
            let counts: Vec<PhysicalCount> = specs
                .iter()
                .enumerate()
                .map(|(i, (status, batches))| {
                    let batches: Vec<u128> = batches.iter().copied().collect();
                    count(1000 + i as u128, *status, &batches)
                })
                .collect();
            let index = FreezeIndex::from_counts(&counts);

            let expected = counts.iter().any(|c| {
                c.status.is_active() && c.items.iter().any(|i| i.batch_id == Uuid::from_u128(candidate))
            });
            prop_assert_eq!(index.is_frozen(Uuid::from_u128(candidate)), expected);
        }
    }
}
