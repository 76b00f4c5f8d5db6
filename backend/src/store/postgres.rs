//! PostgreSQL inventory store
//!
//! Each mutation runs in one transaction: it locks the affected `stock_batches` rows
//! `FOR UPDATE`, derives freeze membership from active count items, then writes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    effect_delta, AdjustmentDetails, AdjustmentDirection, BatchFilter, CountFilter, CountStatus,
    FreezeIndex, LineItem, PhysicalCount, PhysicalCountItem, StockBatch, TransactionDetails,
    TransactionKind, TransactionRecord, TransferDetails, TransferLine, TransferStatus,
    VarianceReason,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    acknowledged_record, apply_deltas, ensure_purgeable, plan_batch_purge, reversal,
    CountApproval, InventoryStore, NewCount, PurgeOutcome, StockMutation,
    TransferAcknowledgement,
};
use crate::error::{AppError, AppResult};

const BATCH_COLUMNS: &str =
    "id, item_id, facility_id, location_id, quantity, lot_number, expires_on, created_at";

const TRANSACTION_COLUMNS: &str = "id, kind, occurred_at, facility_id, user_id, reference, \
     destination_facility_id, transfer_status, acknowledged_at, acknowledged_by, \
     adjustment_direction, from_quantity, to_quantity, reason, physical_count_id";

const COUNT_COLUMNS: &str = "id, facility_id, location_id, status, assigned_to, initiated_by, \
     reviewed_by, notes, rejection_notes, created_at, started_at, submitted_at, reviewed_at, \
     cancelled_at, version";

const ACTIVE_COUNT_STATUSES: &str = "('pending', 'in_progress', 'pending_review')";

#[derive(Clone)]
pub struct PgInventoryStore {
    db: PgPool,
}

impl PgInventoryStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    item_id: Uuid,
    facility_id: Uuid,
    location_id: Uuid,
    quantity: i64,
    lot_number: Option<String>,
    expires_on: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

impl From<BatchRow> for StockBatch {
    fn from(row: BatchRow) -> Self {
        StockBatch {
            id: row.id,
            item_id: row.item_id,
            facility_id: row.facility_id,
            location_id: row.location_id,
            quantity: row.quantity,
            lot_number: row.lot_number,
            expires_on: row.expires_on,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    occurred_at: DateTime<Utc>,
    facility_id: Uuid,
    user_id: Uuid,
    reference: Option<String>,
    destination_facility_id: Option<Uuid>,
    transfer_status: Option<String>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<Uuid>,
    adjustment_direction: Option<String>,
    from_quantity: Option<i64>,
    to_quantity: Option<i64>,
    reason: Option<String>,
    physical_count_id: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct LineRow {
    transaction_id: Uuid,
    batch_id: Uuid,
    destination_batch_id: Option<Uuid>,
    quantity: i64,
    received_quantity: Option<i64>,
}

#[derive(Debug, FromRow)]
struct CountRow {
    id: Uuid,
    facility_id: Uuid,
    location_id: Uuid,
    status: String,
    assigned_to: Uuid,
    initiated_by: Uuid,
    reviewed_by: Option<Uuid>,
    notes: Option<String>,
    rejection_notes: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: i64,
}

#[derive(Debug, FromRow)]
struct CountItemRow {
    count_id: Uuid,
    batch_id: Uuid,
    system_quantity: i64,
    counted_quantity: Option<i64>,
    variance_reason: Option<String>,
    notes: Option<String>,
}

fn corrupt(what: &str, value: &str) -> AppError {
    AppError::Internal(format!("Unrecognized {} '{}' in storage", what, value))
}

fn assemble_transaction(row: TransactionRow, lines: Vec<LineRow>) -> AppResult<TransactionRecord> {
    let kind = TransactionKind::parse(&row.kind).ok_or_else(|| corrupt("transaction kind", &row.kind))?;
    let items = || -> Vec<LineItem> {
        lines
            .iter()
            .map(|l| LineItem {
                batch_id: l.batch_id,
                quantity: l.quantity,
            })
            .collect()
    };

    let details = match kind {
        TransactionKind::Receive => TransactionDetails::Receive { lines: items() },
        TransactionKind::Dispense => TransactionDetails::Dispense { lines: items() },
        TransactionKind::WriteOff => TransactionDetails::WriteOff { lines: items() },
        TransactionKind::Return => TransactionDetails::Return { lines: items() },
        TransactionKind::InternalReturn => TransactionDetails::InternalReturn { lines: items() },
        TransactionKind::Transfer => {
            let raw = row.transfer_status.as_deref().unwrap_or_default();
            let status = TransferStatus::parse(raw).ok_or_else(|| corrupt("transfer status", raw))?;
            let destination_facility_id = row
                .destination_facility_id
                .ok_or_else(|| corrupt("transfer destination", "null"))?;
            TransactionDetails::Transfer(TransferDetails {
                destination_facility_id,
                status,
                acknowledged_at: row.acknowledged_at,
                acknowledged_by: row.acknowledged_by,
                lines: lines
                    .iter()
                    .map(|l| TransferLine {
                        batch_id: l.batch_id,
                        destination_batch_id: l.destination_batch_id,
                        quantity: l.quantity,
                        received_quantity: l.received_quantity,
                    })
                    .collect(),
            })
        }
        TransactionKind::Adjustment => {
            let raw = row.adjustment_direction.as_deref().unwrap_or_default();
            let direction =
                AdjustmentDirection::parse(raw).ok_or_else(|| corrupt("adjustment direction", raw))?;
            let reason = match row.reason.as_deref() {
                Some(code) => Some(VarianceReason::parse(code).ok_or_else(|| corrupt("reason", code))?),
                None => None,
            };
            TransactionDetails::Adjustment(AdjustmentDetails {
                direction,
                from_quantity: row.from_quantity,
                to_quantity: row.to_quantity,
                reason,
                physical_count_id: row.physical_count_id,
                lines: items(),
            })
        }
    };

    Ok(TransactionRecord {
        id: row.id,
        occurred_at: row.occurred_at,
        facility_id: row.facility_id,
        user_id: row.user_id,
        reference: row.reference,
        details,
    })
}

fn assemble_count(row: CountRow, items: Vec<CountItemRow>) -> AppResult<PhysicalCount> {
    let status = CountStatus::parse(&row.status).ok_or_else(|| corrupt("count status", &row.status))?;
    let items = items
        .into_iter()
        .map(|i| {
            let variance_reason = match i.variance_reason.as_deref() {
                Some(code) => Some(VarianceReason::parse(code).ok_or_else(|| corrupt("reason", code))?),
                None => None,
            };
            Ok(PhysicalCountItem {
                batch_id: i.batch_id,
                system_quantity: i.system_quantity,
                counted_quantity: i.counted_quantity,
                variance_reason,
                notes: i.notes,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(PhysicalCount {
        id: row.id,
        facility_id: row.facility_id,
        location_id: row.location_id,
        status,
        assigned_to: row.assigned_to,
        initiated_by: row.initiated_by,
        reviewed_by: row.reviewed_by,
        notes: row.notes,
        rejection_notes: row.rejection_notes,
        items,
        created_at: row.created_at,
        started_at: row.started_at,
        submitted_at: row.submitted_at,
        reviewed_at: row.reviewed_at,
        cancelled_at: row.cancelled_at,
        version: row.version,
    })
}

/// Header columns of `record`, the inverse of [`assemble_transaction`]
fn transaction_row(record: &TransactionRecord) -> TransactionRow {
    let mut row = TransactionRow {
        id: record.id,
        kind: record.kind().as_str().to_string(),
        occurred_at: record.occurred_at,
        facility_id: record.facility_id,
        user_id: record.user_id,
        reference: record.reference.clone(),
        destination_facility_id: None,
        transfer_status: None,
        acknowledged_at: None,
        acknowledged_by: None,
        adjustment_direction: None,
        from_quantity: None,
        to_quantity: None,
        reason: None,
        physical_count_id: None,
    };
    match &record.details {
        TransactionDetails::Transfer(t) => {
            row.destination_facility_id = Some(t.destination_facility_id);
            row.transfer_status = Some(t.status.as_str().to_string());
            row.acknowledged_at = t.acknowledged_at;
            row.acknowledged_by = t.acknowledged_by;
        }
        TransactionDetails::Adjustment(a) => {
            row.adjustment_direction = Some(a.direction.as_str().to_string());
            row.from_quantity = a.from_quantity;
            row.to_quantity = a.to_quantity;
            row.reason = a.reason.map(|r| r.as_str().to_string());
            row.physical_count_id = a.physical_count_id;
        }
        _ => {}
    }
    row
}

/// Line rows of `record` in line order
fn line_rows(record: &TransactionRecord) -> Vec<LineRow> {
    let plain = |lines: &[LineItem]| -> Vec<LineRow> {
        lines
            .iter()
            .map(|l| LineRow {
                transaction_id: record.id,
                batch_id: l.batch_id,
                destination_batch_id: None,
                quantity: l.quantity,
                received_quantity: None,
            })
            .collect()
    };
    match &record.details {
        TransactionDetails::Transfer(t) => t
            .lines
            .iter()
            .map(|l| LineRow {
                transaction_id: record.id,
                batch_id: l.batch_id,
                destination_batch_id: l.destination_batch_id,
                quantity: l.quantity,
                received_quantity: l.received_quantity,
            })
            .collect(),
        TransactionDetails::Adjustment(a) => plain(&a.lines),
        TransactionDetails::Receive { lines }
        | TransactionDetails::Dispense { lines }
        | TransactionDetails::WriteOff { lines }
        | TransactionDetails::Return { lines }
        | TransactionDetails::InternalReturn { lines } => plain(lines),
    }
}

// ============================================================================
// Connection-level helpers
// ============================================================================

/// Lock batch rows in id order and return their quantities
async fn lock_batches(conn: &mut PgConnection, batch_ids: &[Uuid]) -> AppResult<HashMap<Uuid, i64>> {
    if batch_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT id, quantity FROM stock_batches WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(batch_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Reject if any of `batch_ids` is an item of an active count
async fn ensure_unfrozen(conn: &mut PgConnection, batch_ids: &[Uuid]) -> AppResult<()> {
    if batch_ids.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "SELECT i.batch_id, c.id FROM physical_count_items i \
         JOIN physical_counts c ON c.id = i.count_id \
         WHERE c.status IN {} AND i.batch_id = ANY($1) \
         ORDER BY c.created_at, c.id LIMIT 1",
        ACTIVE_COUNT_STATUSES
    );
    let blocking: Option<(Uuid, Uuid)> = sqlx::query_as(&sql)
        .bind(batch_ids)
        .fetch_optional(&mut *conn)
        .await?;
    match blocking {
        Some((batch_id, count_id)) => Err(AppError::BatchFrozen { batch_id, count_id }),
        None => Ok(()),
    }
}

async fn write_quantities(conn: &mut PgConnection, updates: &[(Uuid, i64)]) -> AppResult<()> {
    for (batch_id, quantity) in updates {
        let result = sqlx::query("UPDATE stock_batches SET quantity = $2 WHERE id = $1")
            .bind(batch_id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::UnresolvableBatchReference(*batch_id));
        }
    }
    Ok(())
}

async fn insert_lines(conn: &mut PgConnection, record: &TransactionRecord) -> AppResult<()> {
    for (line_no, line) in line_rows(record).into_iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO inventory_transaction_lines (
                transaction_id, line_no, batch_id, destination_batch_id, quantity, received_quantity
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(line.transaction_id)
        .bind(line_no as i32)
        .bind(line.batch_id)
        .bind(line.destination_batch_id)
        .bind(line.quantity)
        .bind(line.received_quantity)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_transaction(conn: &mut PgConnection, record: &TransactionRecord) -> AppResult<()> {
    let row = transaction_row(record);
    sqlx::query(
        r#"
        INSERT INTO inventory_transactions (
            id, kind, occurred_at, facility_id, user_id, reference,
            destination_facility_id, transfer_status, acknowledged_at, acknowledged_by,
            adjustment_direction, from_quantity, to_quantity, reason, physical_count_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(row.id)
    .bind(&row.kind)
    .bind(row.occurred_at)
    .bind(row.facility_id)
    .bind(row.user_id)
    .bind(&row.reference)
    .bind(row.destination_facility_id)
    .bind(&row.transfer_status)
    .bind(row.acknowledged_at)
    .bind(row.acknowledged_by)
    .bind(&row.adjustment_direction)
    .bind(row.from_quantity)
    .bind(row.to_quantity)
    .bind(&row.reason)
    .bind(row.physical_count_id)
    .execute(&mut *conn)
    .await?;

    insert_lines(conn, record).await
}

/// Load full records for `ids`, optionally locking the header rows
async fn fetch_transactions(
    conn: &mut PgConnection,
    ids: &[Uuid],
    for_update: bool,
) -> AppResult<Vec<TransactionRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM inventory_transactions WHERE id = ANY($1) ORDER BY occurred_at, id{}",
        TRANSACTION_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let headers: Vec<TransactionRow> = sqlx::query_as(&sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

    let lines: Vec<LineRow> = sqlx::query_as(
        r#"
        SELECT transaction_id, batch_id, destination_batch_id, quantity, received_quantity
        FROM inventory_transaction_lines
        WHERE transaction_id = ANY($1)
        ORDER BY transaction_id, line_no
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_transaction: HashMap<Uuid, Vec<LineRow>> = HashMap::new();
    for line in lines {
        by_transaction.entry(line.transaction_id).or_default().push(line);
    }
    headers
        .into_iter()
        .map(|row| {
            let lines = by_transaction.remove(&row.id).unwrap_or_default();
            assemble_transaction(row, lines)
        })
        .collect()
}

/// Ids of records with a line on either side touching any of `batch_ids`
async fn dependent_transaction_ids(conn: &mut PgConnection, batch_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    let ids: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT transaction_id
        FROM inventory_transaction_lines
        WHERE batch_id = ANY($1) OR destination_batch_id = ANY($1)
        "#,
    )
    .bind(batch_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

async fn fetch_counts(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<Vec<PhysicalCount>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {} FROM physical_counts WHERE id = ANY($1) ORDER BY created_at, id",
        COUNT_COLUMNS
    );
    let headers: Vec<CountRow> = sqlx::query_as(&sql).bind(ids).fetch_all(&mut *conn).await?;

    let items: Vec<CountItemRow> = sqlx::query_as(
        r#"
        SELECT count_id, batch_id, system_quantity, counted_quantity, variance_reason, notes
        FROM physical_count_items
        WHERE count_id = ANY($1)
        ORDER BY count_id, line_no
        "#,
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_count: HashMap<Uuid, Vec<CountItemRow>> = HashMap::new();
    for item in items {
        by_count.entry(item.count_id).or_default().push(item);
    }
    headers
        .into_iter()
        .map(|row| {
            let items = by_count.remove(&row.id).unwrap_or_default();
            assemble_count(row, items)
        })
        .collect()
}

async fn fetch_count(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<PhysicalCount>> {
    Ok(fetch_counts(conn, &[id]).await?.into_iter().next())
}

/// Update a count's header and items under a version check
async fn update_count(
    conn: &mut PgConnection,
    count: &PhysicalCount,
    expected_version: i64,
) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE physical_counts
        SET status = $3, reviewed_by = $4, notes = $5, rejection_notes = $6,
            started_at = $7, submitted_at = $8, reviewed_at = $9, cancelled_at = $10,
            version = version + 1, updated_at = NOW()
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(count.id)
    .bind(expected_version)
    .bind(count.status.as_str())
    .bind(count.reviewed_by)
    .bind(&count.notes)
    .bind(&count.rejection_notes)
    .bind(count.started_at)
    .bind(count.submitted_at)
    .bind(count.reviewed_at)
    .bind(count.cancelled_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM physical_counts WHERE id = $1")
            .bind(count.id)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match exists {
            Some(_) => AppError::ConcurrentModification {
                resource: format!("Physical count {}", count.id),
            },
            None => AppError::NotFound(format!("Physical count {}", count.id)),
        });
    }

    for item in &count.items {
        sqlx::query(
            r#"
            UPDATE physical_count_items
            SET counted_quantity = $3, variance_reason = $4, notes = $5
            WHERE count_id = $1 AND batch_id = $2
            "#,
        )
        .bind(count.id)
        .bind(item.batch_id)
        .bind(item.counted_quantity)
        .bind(item.variance_reason.map(|r| r.as_str()))
        .bind(&item.notes)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn active_counts(conn: &mut PgConnection) -> AppResult<Vec<PhysicalCount>> {
    let sql = format!(
        "SELECT id FROM physical_counts WHERE status IN {} ORDER BY created_at, id",
        ACTIVE_COUNT_STATUSES
    );
    let ids: Vec<(Uuid,)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;
    let ids: Vec<Uuid> = ids.into_iter().map(|(id,)| id).collect();
    fetch_counts(conn, &ids).await
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.db)
            .await
            .map(|_| ())
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    async fn get_batch(&self, batch_id: Uuid) -> AppResult<Option<StockBatch>> {
        let sql = format!("SELECT {} FROM stock_batches WHERE id = $1", BATCH_COLUMNS);
        let row: Option<BatchRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(StockBatch::from))
    }

    async fn get_batches(&self, batch_ids: &[Uuid]) -> AppResult<Vec<StockBatch>> {
        let sql = format!(
            "SELECT {} FROM stock_batches WHERE id = ANY($1) ORDER BY created_at, id",
            BATCH_COLUMNS
        );
        let rows: Vec<BatchRow> = sqlx::query_as(&sql)
            .bind(batch_ids)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(StockBatch::from).collect())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<StockBatch>> {
        let sql = format!(
            r#"
            SELECT {} FROM stock_batches
            WHERE ($1::uuid IS NULL OR item_id = $1)
              AND ($2::uuid IS NULL OR facility_id = $2)
              AND ($3::uuid IS NULL OR location_id = $3)
            ORDER BY created_at, id
            "#,
            BATCH_COLUMNS
        );
        let rows: Vec<BatchRow> = sqlx::query_as(&sql)
            .bind(filter.item_id)
            .bind(filter.facility_id)
            .bind(filter.location_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(StockBatch::from).collect())
    }

    async fn get_transaction(&self, id: Uuid) -> AppResult<Option<TransactionRecord>> {
        let mut conn = self.db.acquire().await?;
        Ok(fetch_transactions(&mut conn, &[id], false)
            .await?
            .into_iter()
            .next())
    }

    async fn list_transactions(&self, batch_ids: &[Uuid]) -> AppResult<Vec<TransactionRecord>> {
        if batch_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.db.acquire().await?;
        let ids = dependent_transaction_ids(&mut conn, batch_ids).await?;
        fetch_transactions(&mut conn, &ids, false).await
    }

    async fn apply_transaction(&self, mutation: StockMutation) -> AppResult<TransactionRecord> {
        let StockMutation {
            record,
            new_batches,
        } = mutation;
        let mut tx = self.db.begin().await?;

        for batch in &new_batches {
            let result = sqlx::query(
                r#"
                INSERT INTO stock_batches (
                    id, item_id, facility_id, location_id, quantity, lot_number, expires_on, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(batch.id)
            .bind(batch.item_id)
            .bind(batch.facility_id)
            .bind(batch.location_id)
            .bind(batch.quantity)
            .bind(&batch.lot_number)
            .bind(batch.expires_on)
            .bind(batch.created_at)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::validation(
                    "new_batches",
                    format!("Batch {} already exists", batch.id),
                ));
            }
        }

        let referenced = record.batch_ids();
        let quantities = lock_batches(&mut tx, &referenced).await?;
        if let Some(missing) = referenced.iter().find(|id| !quantities.contains_key(id)) {
            return Err(AppError::UnresolvableBatchReference(*missing));
        }

        let effect = record.net_effect();
        let touched: Vec<Uuid> = effect.iter().map(|(b, _)| *b).collect();
        ensure_unfrozen(&mut tx, &touched).await?;
        let updates = apply_deltas(&quantities, &effect)?;

        write_quantities(&mut tx, &updates).await?;
        insert_transaction(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn acknowledge_transfer(
        &self,
        ack: TransferAcknowledgement,
    ) -> AppResult<TransactionRecord> {
        let mut tx = self.db.begin().await?;
        let current = fetch_transactions(&mut tx, &[ack.transfer_id], true)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Transfer {}", ack.transfer_id)))?;

        let updated = acknowledged_record(&current, &ack)?;
        let delta = effect_delta(&current.net_effect(), &updated.net_effect());
        let touched: Vec<Uuid> = delta.iter().map(|(b, _)| *b).collect();
        let quantities = lock_batches(&mut tx, &touched).await?;
        ensure_unfrozen(&mut tx, &touched).await?;
        let updates = apply_deltas(&quantities, &delta)?;
        write_quantities(&mut tx, &updates).await?;

        sqlx::query(
            r#"
            UPDATE inventory_transactions
            SET transfer_status = $2, acknowledged_at = $3, acknowledged_by = $4
            WHERE id = $1
            "#,
        )
        .bind(updated.id)
        .bind(ack.status.as_str())
        .bind(ack.acknowledged_at)
        .bind(ack.acknowledged_by)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM inventory_transaction_lines WHERE transaction_id = $1")
            .bind(updated.id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, &updated).await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn purge_transaction(&self, id: Uuid) -> AppResult<PurgeOutcome> {
        let mut tx = self.db.begin().await?;
        let record = fetch_transactions(&mut tx, &[id], true)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Transaction {}", id)))?;
        ensure_purgeable(&record)?;

        let reversed = reversal(&record);
        let touched: Vec<Uuid> = reversed.iter().map(|(b, _)| *b).collect();
        let quantities = lock_batches(&mut tx, &touched).await?;
        ensure_unfrozen(&mut tx, &touched).await?;
        let updates = apply_deltas(&quantities, &reversed)?;
        write_quantities(&mut tx, &updates).await?;

        sqlx::query("DELETE FROM inventory_transactions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(PurgeOutcome {
            removed_transactions: vec![id],
            reversed,
            ..PurgeOutcome::default()
        })
    }

    async fn purge_batch(&self, batch_id: Uuid) -> AppResult<PurgeOutcome> {
        let mut tx = self.db.begin().await?;
        if lock_batches(&mut tx, &[batch_id]).await?.is_empty() {
            return Err(AppError::NotFound(format!("Batch {}", batch_id)));
        }
        ensure_unfrozen(&mut tx, &[batch_id]).await?;

        let dependent_ids = dependent_transaction_ids(&mut tx, &[batch_id]).await?;
        let dependents = fetch_transactions(&mut tx, &dependent_ids, true).await?;
        let plan = plan_batch_purge(&dependents, batch_id);

        let touched: Vec<Uuid> = plan.reversed.iter().map(|(b, _)| *b).collect();
        let quantities = lock_batches(&mut tx, &touched).await?;
        ensure_unfrozen(&mut tx, &touched).await?;
        let updates = apply_deltas(&quantities, &plan.reversed)?;
        write_quantities(&mut tx, &updates).await?;

        sqlx::query("DELETE FROM inventory_transactions WHERE id = ANY($1)")
            .bind(&plan.removed)
            .execute(&mut *tx)
            .await?;
        for stripped in &plan.rewritten {
            sqlx::query("DELETE FROM inventory_transaction_lines WHERE transaction_id = $1")
                .bind(stripped.id)
                .execute(&mut *tx)
                .await?;
            insert_lines(&mut tx, stripped).await?;
        }
        sqlx::query("DELETE FROM stock_batches WHERE id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(PurgeOutcome {
            removed_transactions: plan.removed,
            rewritten_transactions: plan.rewritten.iter().map(|t| t.id).collect(),
            reversed: plan.reversed,
            removed_batch: Some(batch_id),
        })
    }

    async fn freeze_index(&self) -> AppResult<FreezeIndex> {
        let mut conn = self.db.acquire().await?;
        let counts = active_counts(&mut conn).await?;
        Ok(FreezeIndex::from_counts(&counts))
    }

    async fn rebuild_freeze_index(&self) -> AppResult<FreezeIndex> {
        // Membership is derived on every read; rebuilding is a fresh derivation.
        self.freeze_index().await
    }

    async fn create_count(&self, draft: NewCount) -> AppResult<PhysicalCount> {
        let mut tx = self.db.begin().await?;

        let batches: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT id, quantity FROM stock_batches
            WHERE facility_id = $1 AND location_id = $2
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(draft.facility_id)
        .bind(draft.location_id)
        .fetch_all(&mut *tx)
        .await?;
        if batches.is_empty() {
            return Err(AppError::EmptyLocationCount {
                facility_id: draft.facility_id,
                location_id: draft.location_id,
            });
        }

        let batch_ids: Vec<Uuid> = batches.iter().map(|(id, _)| *id).collect();
        ensure_unfrozen(&mut tx, &batch_ids).await?;

        sqlx::query(
            r#"
            INSERT INTO physical_counts (
                id, facility_id, location_id, status, assigned_to, initiated_by, notes,
                created_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
            "#,
        )
        .bind(draft.id)
        .bind(draft.facility_id)
        .bind(draft.location_id)
        .bind(CountStatus::Pending.as_str())
        .bind(draft.assigned_to)
        .bind(draft.initiated_by)
        .bind(&draft.notes)
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, (batch_id, quantity)) in batches.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO physical_count_items (count_id, line_no, batch_id, system_quantity)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(draft.id)
            .bind(line_no as i32)
            .bind(batch_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        let count = fetch_count(&mut tx, draft.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Physical count {} vanished", draft.id)))?;
        tx.commit().await?;
        Ok(count)
    }

    async fn get_count(&self, id: Uuid) -> AppResult<Option<PhysicalCount>> {
        let mut conn = self.db.acquire().await?;
        fetch_count(&mut conn, id).await
    }

    async fn list_counts(&self, filter: &CountFilter) -> AppResult<Vec<PhysicalCount>> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let mut conn = self.db.acquire().await?;
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT pc.id FROM physical_counts pc
            WHERE ($1::uuid IS NULL OR pc.facility_id = $1)
              AND ($2::uuid IS NULL OR pc.location_id = $2)
              AND (cardinality($3::text[]) = 0 OR pc.status = ANY($3))
              AND (cardinality($4::uuid[]) = 0 OR EXISTS (
                    SELECT 1 FROM physical_count_items i
                    WHERE i.count_id = pc.id AND i.batch_id = ANY($4)))
            ORDER BY pc.created_at, pc.id
            "#,
        )
        .bind(filter.facility_id)
        .bind(filter.location_id)
        .bind(&statuses)
        .bind(&filter.batch_ids)
        .fetch_all(&mut *conn)
        .await?;
        let ids: Vec<Uuid> = ids.into_iter().map(|(id,)| id).collect();
        fetch_counts(&mut conn, &ids).await
    }

    async fn save_count(
        &self,
        count: &PhysicalCount,
        expected_version: i64,
    ) -> AppResult<PhysicalCount> {
        let mut tx = self.db.begin().await?;
        update_count(&mut tx, count, expected_version).await?;
        let saved = fetch_count(&mut tx, count.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Physical count {}", count.id)))?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn commit_approval(&self, approval: CountApproval) -> AppResult<PhysicalCount> {
        let CountApproval {
            count,
            expected_version,
            batch_writes,
            adjustments,
        } = approval;
        let mut tx = self.db.begin().await?;

        update_count(&mut tx, &count, expected_version).await?;

        let write_ids: Vec<Uuid> = batch_writes.iter().map(|w| w.batch_id).collect();
        let locked = lock_batches(&mut tx, &write_ids).await?;
        if let Some(missing) = write_ids.iter().find(|id| !locked.contains_key(id)) {
            return Err(AppError::UnresolvableBatchReference(*missing));
        }
        let updates: Vec<(Uuid, i64)> = batch_writes
            .iter()
            .map(|w| (w.batch_id, w.quantity))
            .collect();
        write_quantities(&mut tx, &updates).await?;

        for adjustment in &adjustments {
            insert_transaction(&mut tx, adjustment).await?;
        }

        let completed = fetch_count(&mut tx, count.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Physical count {}", count.id)))?;
        tx.commit().await?;
        Ok(completed)
    }
}
