//! Domain models for the inventory ledger

mod ledger;
mod physical_count;
mod stock;
mod transaction;

pub use ledger::*;
pub use physical_count::*;
pub use stock::*;
pub use transaction::*;
