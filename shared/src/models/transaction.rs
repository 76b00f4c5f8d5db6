//! Inventory transaction records and their movement projection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VarianceReason;

/// The seven transaction streams that move stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Receive,
    Dispense,
    Transfer,
    WriteOff,
    Return,
    InternalReturn,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Receive => "receive",
            TransactionKind::Dispense => "dispense",
            TransactionKind::Transfer => "transfer",
            TransactionKind::WriteOff => "write_off",
            TransactionKind::Return => "return",
            TransactionKind::InternalReturn => "internal_return",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receive" => Some(TransactionKind::Receive),
            "dispense" => Some(TransactionKind::Dispense),
            "transfer" => Some(TransactionKind::Transfer),
            "write_off" => Some(TransactionKind::WriteOff),
            "return" => Some(TransactionKind::Return),
            "internal_return" => Some(TransactionKind::InternalReturn),
            "adjustment" => Some(TransactionKind::Adjustment),
            _ => None,
        }
    }
}

/// Direction of an adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

impl AdjustmentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentDirection::Increase => "increase",
            AdjustmentDirection::Decrease => "decrease",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "increase" => Some(AdjustmentDirection::Increase),
            "decrease" => Some(AdjustmentDirection::Decrease),
            _ => None,
        }
    }
}

/// Acknowledgement sub-state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Received,
    Discrepancy,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Received => "received",
            TransferStatus::Discrepancy => "discrepancy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "received" => Some(TransferStatus::Received),
            "discrepancy" => Some(TransferStatus::Discrepancy),
            _ => None,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// A single `(batch, quantity)` line. Quantities are unsigned magnitudes;
/// the sign comes from the transaction kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub batch_id: Uuid,
    pub quantity: i64,
}

/// A transfer line, tracked on both sides of the move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub batch_id: Uuid,
    /// Batch credited at the destination; the source batch when absent
    pub destination_batch_id: Option<Uuid>,
    pub quantity: i64,
    /// Quantity the destination confirmed, set on acknowledgement
    pub received_quantity: Option<i64>,
}

impl TransferLine {
    pub fn destination_batch(&self) -> Uuid {
        self.destination_batch_id.unwrap_or(self.batch_id)
    }

    /// Quantity credited to the destination for the given acknowledgement status
    pub fn inbound_quantity(&self, status: TransferStatus) -> i64 {
        match status {
            TransferStatus::Discrepancy => self.received_quantity.unwrap_or(self.quantity),
            _ => self.quantity,
        }
    }
}

/// Transfer-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub destination_facility_id: Uuid,
    pub status: TransferStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<Uuid>,
    pub lines: Vec<TransferLine>,
}

/// Adjustment-specific fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentDetails {
    pub direction: AdjustmentDirection,
    pub from_quantity: Option<i64>,
    pub to_quantity: Option<i64>,
    pub reason: Option<VarianceReason>,
    /// Set on synthetic adjustments written by a count approval
    pub physical_count_id: Option<Uuid>,
    pub lines: Vec<LineItem>,
}

/// Kind-specific payload of a transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionDetails {
    Receive { lines: Vec<LineItem> },
    Dispense { lines: Vec<LineItem> },
    Transfer(TransferDetails),
    WriteOff { lines: Vec<LineItem> },
    Return { lines: Vec<LineItem> },
    InternalReturn { lines: Vec<LineItem> },
    Adjustment(AdjustmentDetails),
}

/// An immutable entry in the transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub facility_id: Uuid,
    pub user_id: Uuid,
    pub reference: Option<String>,
    #[serde(flatten)]
    pub details: TransactionDetails,
}

/// One signed quantity change on one batch, attributed to a facility and a moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub transaction_id: Uuid,
    /// Position of the originating line, for stable ordering within a transaction
    pub sequence: usize,
    pub kind: MovementKind,
    pub occurred_at: DateTime<Utc>,
    pub facility_id: Uuid,
    pub batch_id: Uuid,
    pub signed_quantity: i64,
    pub reference: Option<String>,
}

/// Ledger-facing label of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receive,
    Dispense,
    TransferOut,
    TransferIn,
    WriteOff,
    Return,
    InternalReturn,
    AdjustmentIncrease,
    AdjustmentDecrease,
    CountVariance,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Receive => "receive",
            MovementKind::Dispense => "dispense",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::WriteOff => "write_off",
            MovementKind::Return => "return",
            MovementKind::InternalReturn => "internal_return",
            MovementKind::AdjustmentIncrease => "adjustment_increase",
            MovementKind::AdjustmentDecrease => "adjustment_decrease",
            MovementKind::CountVariance => "count_variance",
        }
    }
}

impl TransactionRecord {
    pub fn kind(&self) -> TransactionKind {
        match &self.details {
            TransactionDetails::Receive { .. } => TransactionKind::Receive,
            TransactionDetails::Dispense { .. } => TransactionKind::Dispense,
            TransactionDetails::Transfer(_) => TransactionKind::Transfer,
            TransactionDetails::WriteOff { .. } => TransactionKind::WriteOff,
            TransactionDetails::Return { .. } => TransactionKind::Return,
            TransactionDetails::InternalReturn { .. } => TransactionKind::InternalReturn,
            TransactionDetails::Adjustment(_) => TransactionKind::Adjustment,
        }
    }

    /// Every batch id this record touches, on either side of a transfer
    pub fn batch_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = match &self.details {
            TransactionDetails::Transfer(t) => t
                .lines
                .iter()
                .flat_map(|l| [l.batch_id, l.destination_batch()])
                .collect(),
            TransactionDetails::Adjustment(a) => a.lines.iter().map(|l| l.batch_id).collect(),
            TransactionDetails::Receive { lines }
            | TransactionDetails::Dispense { lines }
            | TransactionDetails::WriteOff { lines }
            | TransactionDetails::Return { lines }
            | TransactionDetails::InternalReturn { lines } => {
                lines.iter().map(|l| l.batch_id).collect()
            }
        };
        ids.sort();
        ids.dedup();
        ids
    }

    /// Physical count that generated this record, if it is a synthetic adjustment
    pub fn originating_count(&self) -> Option<Uuid> {
        match &self.details {
            TransactionDetails::Adjustment(a) => a.physical_count_id,
            _ => None,
        }
    }

    /// Project the record onto signed movements.
    ///
    /// Transfers yield an outbound movement at `occurred_at` for the source facility and,
    /// once acknowledged, an inbound movement at `acknowledged_at` for the destination.
    pub fn movements(&self) -> Vec<Movement> {
        let simple = |lines: &[LineItem], kind: MovementKind, sign: i64| -> Vec<Movement> {
            lines
                .iter()
                .enumerate()
                .map(|(sequence, line)| Movement {
                    transaction_id: self.id,
                    sequence,
                    kind,
                    occurred_at: self.occurred_at,
                    facility_id: self.facility_id,
                    batch_id: line.batch_id,
                    signed_quantity: line.quantity.saturating_mul(sign),
                    reference: self.reference.clone(),
                })
                .collect()
        };

        match &self.details {
            TransactionDetails::Receive { lines } => simple(lines, MovementKind::Receive, 1),
            TransactionDetails::InternalReturn { lines } => {
                simple(lines, MovementKind::InternalReturn, 1)
            }
            TransactionDetails::Dispense { lines } => simple(lines, MovementKind::Dispense, -1),
            TransactionDetails::WriteOff { lines } => simple(lines, MovementKind::WriteOff, -1),
            TransactionDetails::Return { lines } => simple(lines, MovementKind::Return, -1),
            TransactionDetails::Adjustment(a) => match a.direction {
                AdjustmentDirection::Increase => {
                    simple(&a.lines, MovementKind::AdjustmentIncrease, 1)
                }
                AdjustmentDirection::Decrease => {
                    simple(&a.lines, MovementKind::AdjustmentDecrease, -1)
                }
            },
            TransactionDetails::Transfer(t) => {
                let mut out = Vec::with_capacity(t.lines.len() * 2);
                for (sequence, line) in t.lines.iter().enumerate() {
                    out.push(Movement {
                        transaction_id: self.id,
                        sequence,
                        kind: MovementKind::TransferOut,
                        occurred_at: self.occurred_at,
                        facility_id: self.facility_id,
                        batch_id: line.batch_id,
                        signed_quantity: line.quantity.saturating_neg(),
                        reference: self.reference.clone(),
                    });
                }
                if let (true, Some(ack_at)) = (t.status.is_acknowledged(), t.acknowledged_at) {
                    let offset = t.lines.len();
                    for (i, line) in t.lines.iter().enumerate() {
                        out.push(Movement {
                            transaction_id: self.id,
                            sequence: offset + i,
                            kind: MovementKind::TransferIn,
                            occurred_at: ack_at,
                            facility_id: t.destination_facility_id,
                            batch_id: line.destination_batch(),
                            signed_quantity: line.inbound_quantity(t.status),
                            reference: self.reference.clone(),
                        });
                    }
                }
                out
            }
        }
    }

    /// Net quantity change per batch that this record implies for the stock store
    pub fn net_effect(&self) -> Vec<(Uuid, i64)> {
        let mut effect: Vec<(Uuid, i64)> = Vec::new();
        for movement in self.movements() {
            match effect.iter_mut().find(|(id, _)| *id == movement.batch_id) {
                Some((_, delta)) => *delta = delta.saturating_add(movement.signed_quantity),
                None => effect.push((movement.batch_id, movement.signed_quantity)),
            }
        }
        effect
    }
}

/// Per-batch difference between two effects (`after - before`), dropping zeros
pub fn effect_delta(before: &[(Uuid, i64)], after: &[(Uuid, i64)]) -> Vec<(Uuid, i64)> {
    let mut delta: Vec<(Uuid, i64)> = after.to_vec();
    for (batch_id, qty) in before {
        match delta.iter_mut().find(|(id, _)| id == batch_id) {
            Some((_, d)) => *d = d.saturating_sub(*qty),
            None => delta.push((*batch_id, qty.saturating_neg())),
        }
    }
    delta.retain(|(_, d)| *d != 0);
    delta
}
