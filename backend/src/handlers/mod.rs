//! HTTP handlers

pub mod counts;
pub mod freeze;
pub mod health;
pub mod ledger;
pub mod stock;

pub use counts::*;
pub use freeze::*;
pub use health::*;
pub use ledger::*;
pub use stock::*;
