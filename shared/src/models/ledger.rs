//! Ledger query and result models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MovementKind;

/// What a ledger is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LedgerTarget {
    Batch(Uuid),
    Item(Uuid),
}

/// Ledger request: target plus optional facility filter and inclusive date window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub target: LedgerTarget,
    pub facility_id: Option<Uuid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl LedgerQuery {
    pub fn new(target: LedgerTarget) -> Self {
        Self {
            target,
            facility_id: None,
            start: None,
            end: None,
        }
    }

    pub fn for_facility(mut self, facility_id: Uuid) -> Self {
        self.facility_id = Some(facility_id);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// One visible ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub date: DateTime<Utc>,
    pub kind: MovementKind,
    pub facility_id: Uuid,
    pub batch_id: Uuid,
    pub transaction_id: Uuid,
    pub reference: Option<String>,
    pub quantity_in: i64,
    pub quantity_out: i64,
    pub running_balance: i64,
}

/// A line that pointed at a batch the catalog does not know
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub transaction_id: Uuid,
    pub batch_id: Uuid,
}

/// A reconstructed ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub target: LedgerTarget,
    pub facility_id: Option<Uuid>,
    pub entries: Vec<LedgerEntry>,
    pub opening_balance: i64,
    pub closing_balance: i64,
    pub total_in: i64,
    pub total_out: i64,
    pub unresolved: Vec<UnresolvedReference>,
}
