//! Freeze queries for mutating subsystems

use std::sync::Arc;

use serde::Serialize;
use shared::FreezeIndex;
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::InventoryStore;

/// Freeze state of one batch
#[derive(Debug, Clone, Serialize)]
pub struct FreezeStatus {
    pub batch_id: Uuid,
    pub frozen: bool,
    pub count_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct FreezeService {
    store: Arc<dyn InventoryStore>,
}

impl FreezeService {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self { store }
    }

    pub async fn is_frozen(&self, batch_id: Uuid) -> AppResult<bool> {
        Ok(self.store.freeze_index().await?.is_frozen(batch_id))
    }

    pub async fn status(&self, batch_id: Uuid) -> AppResult<FreezeStatus> {
        let count_id = self.store.freeze_index().await?.blocking_count(batch_id);
        Ok(FreezeStatus {
            batch_id,
            frozen: count_id.is_some(),
            count_id,
        })
    }

    /// Recompute membership from persisted counts
    pub async fn rebuild(&self) -> AppResult<FreezeIndex> {
        let index = self.store.rebuild_freeze_index().await?;
        tracing::info!(frozen_batches = index.len(), "Rebuilt freeze index");
        Ok(index)
    }
}
