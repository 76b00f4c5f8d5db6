//! Shared fixture for the integration tests
//!
//! Stock is seeded through receive transactions so that every ledger built in a test is
//! backed by the same log the store applied.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ledger_backend::{
    services::{
        CountItemUpdate, CountTransition, CreateCountInput, FreezeService, LedgerService,
        NewBatchInput, PhysicalCountService, RecordTransactionInput, StockService,
        UpdateCountItemsInput,
    },
    store::{InventoryStore, MemoryStore},
    AppResult,
};
use shared::{
    LineItem, PhysicalCount, TransactionDetails, TransactionRecord, TransferDetails,
    TransferLine, TransferStatus, VarianceReason,
};
use uuid::Uuid;

pub struct Fixture {
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn InventoryStore>,
    pub stock: StockService,
    pub counts: PhysicalCountService,
    pub ledger: LedgerService,
    pub freeze: FreezeService,
    pub facility_id: Uuid,
    pub location_id: Uuid,
    pub item_id: Uuid,
    /// Assigned counter
    pub counter: Uuid,
    pub reviewer: Uuid,
    pub clerk: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn InventoryStore> = memory.clone();
        Self {
            stock: StockService::new(store.clone()),
            counts: PhysicalCountService::new(store.clone()),
            ledger: LedgerService::new(store.clone()),
            freeze: FreezeService::new(store.clone()),
            memory,
            store,
            facility_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            counter: Uuid::new_v4(),
            reviewer: Uuid::new_v4(),
            clerk: Uuid::new_v4(),
        }
    }

    /// Receive `quantity` into a new batch of the fixture item at the fixture location
    pub async fn receive_new_batch(&self, quantity: i64) -> Uuid {
        self.receive_new_batch_at(
            self.facility_id,
            self.location_id,
            quantity,
            days_ago(10),
        )
        .await
    }

    pub async fn receive_new_batch_at(
        &self,
        facility_id: Uuid,
        location_id: Uuid,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> Uuid {
        let batch_id = Uuid::new_v4();
        self.stock
            .record_transaction(
                self.clerk,
                RecordTransactionInput {
                    id: None,
                    occurred_at: Some(occurred_at),
                    facility_id,
                    reference: Some("PO-1".to_string()),
                    details: TransactionDetails::Receive {
                        lines: vec![LineItem { batch_id, quantity }],
                    },
                    new_batches: vec![NewBatchInput {
                        id: Some(batch_id),
                        item_id: self.item_id,
                        location_id,
                        lot_number: None,
                        expires_on: None,
                    }],
                },
            )
            .await
            .expect("seed receive");
        batch_id
    }

    /// Record a single-line transaction of a simple kind in the fixture facility
    pub async fn record(
        &self,
        details: TransactionDetails,
        occurred_at: DateTime<Utc>,
    ) -> AppResult<TransactionRecord> {
        self.stock
            .record_transaction(
                self.clerk,
                RecordTransactionInput {
                    id: None,
                    occurred_at: Some(occurred_at),
                    facility_id: self.facility_id,
                    reference: None,
                    details,
                    new_batches: Vec::new(),
                },
            )
            .await
    }

    pub async fn dispense(&self, batch_id: Uuid, quantity: i64) -> AppResult<TransactionRecord> {
        self.record(
            TransactionDetails::Dispense {
                lines: vec![LineItem { batch_id, quantity }],
            },
            days_ago(5),
        )
        .await
    }

    /// Pending transfer out of the fixture facility
    pub async fn transfer(
        &self,
        batch_id: Uuid,
        destination_facility_id: Uuid,
        destination_batch_id: Option<Uuid>,
        quantity: i64,
        occurred_at: DateTime<Utc>,
    ) -> AppResult<TransactionRecord> {
        self.record(
            TransactionDetails::Transfer(TransferDetails {
                destination_facility_id,
                status: TransferStatus::Pending,
                acknowledged_at: None,
                acknowledged_by: None,
                lines: vec![TransferLine {
                    batch_id,
                    destination_batch_id,
                    quantity,
                    received_quantity: None,
                }],
            }),
            occurred_at,
        )
        .await
    }

    pub async fn quantity(&self, batch_id: Uuid) -> i64 {
        self.store
            .get_batch(batch_id)
            .await
            .expect("store reachable")
            .map(|b| b.quantity)
            .expect("batch exists")
    }

    pub async fn open_count(&self) -> AppResult<PhysicalCount> {
        self.counts
            .create_count(
                self.reviewer,
                CreateCountInput {
                    facility_id: self.facility_id,
                    location_id: self.location_id,
                    assigned_to: self.counter,
                    notes: None,
                },
            )
            .await
    }

    /// Enter counted quantities as the assignee
    pub async fn enter(
        &self,
        count_id: Uuid,
        entries: &[(Uuid, i64, Option<VarianceReason>)],
    ) -> AppResult<PhysicalCount> {
        let items = entries
            .iter()
            .map(|(batch_id, counted, reason)| CountItemUpdate {
                batch_id: *batch_id,
                counted_quantity: Some(*counted),
                variance_reason: *reason,
                notes: None,
            })
            .collect();
        self.counts
            .update_count_items(
                count_id,
                self.counter,
                UpdateCountItemsInput {
                    items,
                    expected_version: None,
                },
            )
            .await
    }

    pub async fn submit(&self, count_id: Uuid) -> AppResult<PhysicalCount> {
        self.counts
            .transition_status(count_id, self.counter, CountTransition::Submit, None)
            .await
    }

    pub async fn approve(&self, count_id: Uuid) -> AppResult<PhysicalCount> {
        self.counts
            .transition_status(count_id, self.reviewer, CountTransition::Approve, None)
            .await
    }

    /// Open a count, enter every quantity and submit it for review
    pub async fn counted_and_submitted(
        &self,
        entries: &[(Uuid, i64, Option<VarianceReason>)],
    ) -> PhysicalCount {
        let count = self.open_count().await.expect("count opens");
        self.enter(count.id, entries).await.expect("entries saved");
        self.submit(count.id).await.expect("count submits")
    }
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}
