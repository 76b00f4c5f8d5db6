//! Physical count models and lifecycle rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a physical count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStatus {
    Pending,
    InProgress,
    PendingReview,
    Completed,
    Cancelled,
}

impl CountStatus {
    pub const ACTIVE: [CountStatus; 3] = [
        CountStatus::Pending,
        CountStatus::InProgress,
        CountStatus::PendingReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Pending => "pending",
            CountStatus::InProgress => "in_progress",
            CountStatus::PendingReview => "pending_review",
            CountStatus::Completed => "completed",
            CountStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CountStatus::Pending),
            "in_progress" => Some(CountStatus::InProgress),
            "pending_review" => Some(CountStatus::PendingReview),
            "completed" => Some(CountStatus::Completed),
            "cancelled" => Some(CountStatus::Cancelled),
            _ => None,
        }
    }

    /// Active counts hold a freeze on their batches
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CountStatus::Completed | CountStatus::Cancelled)
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: CountStatus) -> bool {
        use CountStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, PendingReview)
                | (InProgress, PendingReview)
                | (PendingReview, Completed)
                | (PendingReview, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Cancelled)
                | (PendingReview, Cancelled)
        )
    }
}

impl std::fmt::Display for CountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason recorded against a nonzero variance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceReason {
    Misplaced,
    Damaged,
    Expired,
    Theft,
    CountingError,
    UnrecordedReceipt,
    UnrecordedDispense,
    DataEntryError,
    Other,
}

impl VarianceReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceReason::Misplaced => "misplaced",
            VarianceReason::Damaged => "damaged",
            VarianceReason::Expired => "expired",
            VarianceReason::Theft => "theft",
            VarianceReason::CountingError => "counting_error",
            VarianceReason::UnrecordedReceipt => "unrecorded_receipt",
            VarianceReason::UnrecordedDispense => "unrecorded_dispense",
            VarianceReason::DataEntryError => "data_entry_error",
            VarianceReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "misplaced" => Some(VarianceReason::Misplaced),
            "damaged" => Some(VarianceReason::Damaged),
            "expired" => Some(VarianceReason::Expired),
            "theft" => Some(VarianceReason::Theft),
            "counting_error" => Some(VarianceReason::CountingError),
            "unrecorded_receipt" => Some(VarianceReason::UnrecordedReceipt),
            "unrecorded_dispense" => Some(VarianceReason::UnrecordedDispense),
            "data_entry_error" => Some(VarianceReason::DataEntryError),
            "other" => Some(VarianceReason::Other),
            _ => None,
        }
    }
}

/// One batch line of a count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCountItem {
    pub batch_id: Uuid,
    /// Quantity on record when the freeze was acquired
    pub system_quantity: i64,
    pub counted_quantity: Option<i64>,
    pub variance_reason: Option<VarianceReason>,
    pub notes: Option<String>,
}

impl PhysicalCountItem {
    pub fn new(batch_id: Uuid, system_quantity: i64) -> Self {
        Self {
            batch_id,
            system_quantity,
            counted_quantity: None,
            variance_reason: None,
            notes: None,
        }
    }

    /// `counted - system`, or `None` until a count is entered
    pub fn variance(&self) -> Option<i64> {
        self.counted_quantity.map(|c| c - self.system_quantity)
    }

    pub fn has_variance(&self) -> bool {
        self.variance().is_some_and(|v| v != 0)
    }
}

/// A physical count of one storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCount {
    pub id: Uuid,
    pub facility_id: Uuid,
    pub location_id: Uuid,
    pub status: CountStatus,
    pub assigned_to: Uuid,
    pub initiated_by: Uuid,
    pub reviewed_by: Option<Uuid>,
    pub notes: Option<String>,
    pub rejection_notes: Option<String>,
    pub items: Vec<PhysicalCountItem>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Approval time; variances are dated here in the ledger
    pub reviewed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Incremented by the store on every write
    pub version: i64,
}

impl PhysicalCount {
    pub fn batch_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.batch_id).collect()
    }

    pub fn item(&self, batch_id: Uuid) -> Option<&PhysicalCountItem> {
        self.items.iter().find(|i| i.batch_id == batch_id)
    }

    pub fn item_mut(&mut self, batch_id: Uuid) -> Option<&mut PhysicalCountItem> {
        self.items.iter_mut().find(|i| i.batch_id == batch_id)
    }

    /// Batches still lacking a counted quantity
    pub fn uncounted_batches(&self) -> Vec<Uuid> {
        self.items
            .iter()
            .filter(|i| i.counted_quantity.is_none())
            .map(|i| i.batch_id)
            .collect()
    }

    /// Batches with a nonzero variance but no reason code
    pub fn batches_missing_reason(&self) -> Vec<Uuid> {
        self.items
            .iter()
            .filter(|i| i.has_variance() && i.variance_reason.is_none())
            .map(|i| i.batch_id)
            .collect()
    }

    pub fn variant_items(&self) -> impl Iterator<Item = &PhysicalCountItem> {
        self.items.iter().filter(|i| i.has_variance())
    }

    pub fn total_counted(&self) -> i64 {
        self.items.iter().filter_map(|i| i.counted_quantity).sum()
    }
}

/// Filter for count listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountFilter {
    pub facility_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub statuses: Vec<CountStatus>,
    /// Only counts containing at least one of these batches
    #[serde(default)]
    pub batch_ids: Vec<Uuid>,
}

impl CountFilter {
    pub fn completed_for_batches(batch_ids: Vec<Uuid>) -> Self {
        Self {
            statuses: vec![CountStatus::Completed],
            batch_ids,
            ..Self::default()
        }
    }

    pub fn matches(&self, count: &PhysicalCount) -> bool {
        self.facility_id.map_or(true, |id| count.facility_id == id)
            && self.location_id.map_or(true, |id| count.location_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&count.status))
            && (self.batch_ids.is_empty()
                || count.items.iter().any(|i| self.batch_ids.contains(&i.batch_id)))
    }
}
