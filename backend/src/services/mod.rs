//! Business logic services for the inventory ledger engine

pub mod freeze;
pub mod ledger;
pub mod physical_count;
pub mod stock;

pub use freeze::{FreezeService, FreezeStatus};
pub use ledger::{LedgerParams, LedgerService};
pub use physical_count::{
    CountItemUpdate, CountReview, CountTransition, CreateCountInput, PhysicalCountService,
    ReviewLine, TransitionInput, UpdateCountItemsInput,
};
pub use stock::{
    AcknowledgeTransferInput, NewBatchInput, ReceivedLine, RecordTransactionInput, StockService,
};
