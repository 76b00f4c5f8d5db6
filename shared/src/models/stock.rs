//! Stock batch models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A receipt lot of an item held in one storage location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: Uuid,
    pub item_id: Uuid,
    pub facility_id: Uuid,
    pub location_id: Uuid,
    /// Never negative
    pub quantity: i64,
    pub lot_number: Option<String>,
    pub expires_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Filter for batch lookups; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFilter {
    pub item_id: Option<Uuid>,
    pub facility_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
}

impl BatchFilter {
    pub fn for_item(item_id: Uuid) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }

    pub fn for_location(facility_id: Uuid, location_id: Uuid) -> Self {
        Self {
            facility_id: Some(facility_id),
            location_id: Some(location_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, batch: &StockBatch) -> bool {
        self.item_id.map_or(true, |id| batch.item_id == id)
            && self.facility_id.map_or(true, |id| batch.facility_id == id)
            && self.location_id.map_or(true, |id| batch.location_id == id)
    }
}
