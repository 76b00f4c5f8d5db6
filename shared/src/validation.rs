//! Validation utilities for ledger inputs

use std::collections::HashSet;

use crate::models::{TransactionDetails, TransactionRecord, TransferStatus};

// ============================================================================
// Quantity Validations
// ============================================================================

/// Largest quantity a single line may move
pub const MAX_LINE_QUANTITY: i64 = 1_000_000_000;

/// Largest quantity a batch may hold
pub const MAX_BATCH_QUANTITY: i64 = 1_000_000_000_000;

/// Validate that a moved quantity is positive and within [`MAX_LINE_QUANTITY`]
pub fn validate_line_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err("Quantity exceeds the per-line maximum");
    }
    Ok(())
}

/// Validate a physically counted quantity
pub fn validate_counted_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity < 0 {
        return Err("Counted quantity cannot be negative");
    }
    if quantity > MAX_BATCH_QUANTITY {
        return Err("Counted quantity exceeds the batch maximum");
    }
    Ok(())
}

// ============================================================================
// Transaction Validations
// ============================================================================

/// Validate the shape of a new transaction before it reaches storage
pub fn validate_transaction(record: &TransactionRecord) -> Result<(), &'static str> {
    let quantities: Vec<i64> = match &record.details {
        TransactionDetails::Transfer(t) => {
            if t.status != TransferStatus::Pending {
                return Err("A new transfer must start pending");
            }
            if t.destination_facility_id == record.facility_id
                && t.lines.iter().all(|l| l.destination_batch() == l.batch_id)
            {
                return Err("Transfer source and destination are identical");
            }
            t.lines.iter().map(|l| l.quantity).collect()
        }
        TransactionDetails::Adjustment(a) => {
            if a.physical_count_id.is_some() {
                return Err("Count adjustments are written by count approval only");
            }
            a.lines.iter().map(|l| l.quantity).collect()
        }
        TransactionDetails::Receive { lines }
        | TransactionDetails::Dispense { lines }
        | TransactionDetails::WriteOff { lines }
        | TransactionDetails::Return { lines }
        | TransactionDetails::InternalReturn { lines } => {
            lines.iter().map(|l| l.quantity).collect()
        }
    };

    if quantities.is_empty() {
        return Err("At least one line item is required");
    }
    for quantity in quantities {
        validate_line_quantity(quantity)?;
    }

    let batches = source_batches(record);
    let unique: HashSet<_> = batches.iter().collect();
    if unique.len() != batches.len() {
        return Err("A batch may appear only once per transaction");
    }
    Ok(())
}

/// Validate a transfer acknowledgement's received quantities
pub fn validate_acknowledgement(
    status: TransferStatus,
    received: &[(uuid::Uuid, i64)],
) -> Result<(), &'static str> {
    match status {
        TransferStatus::Pending => Err("Acknowledgement must be received or discrepancy"),
        TransferStatus::Received => Ok(()),
        TransferStatus::Discrepancy => {
            if received.is_empty() {
                return Err("A discrepancy must report received quantities");
            }
            if received.iter().any(|(_, q)| *q < 0) {
                return Err("Received quantity cannot be negative");
            }
            if received.iter().any(|(_, q)| *q > MAX_LINE_QUANTITY) {
                return Err("Received quantity exceeds the per-line maximum");
            }
            Ok(())
        }
    }
}

fn source_batches(record: &TransactionRecord) -> Vec<uuid::Uuid> {
    match &record.details {
        TransactionDetails::Transfer(t) => t.lines.iter().map(|l| l.batch_id).collect(),
        TransactionDetails::Adjustment(a) => a.lines.iter().map(|l| l.batch_id).collect(),
        TransactionDetails::Receive { lines }
        | TransactionDetails::Dispense { lines }
        | TransactionDetails::WriteOff { lines }
        | TransactionDetails::Return { lines }
        | TransactionDetails::InternalReturn { lines } => {
            lines.iter().map(|l| l.batch_id).collect()
        }
    }
}
