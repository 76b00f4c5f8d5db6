//! Shared types and pure logic for the inventory ledger
//!
//! Domain models, the freeze index and the ledger reconstructor live here so that every
//! consumer of the engine computes balances and freeze membership the same way.

pub mod freeze;
pub mod ledger;
pub mod models;
pub mod validation;

pub use freeze::*;
pub use ledger::*;
pub use models::*;
pub use validation::*;
