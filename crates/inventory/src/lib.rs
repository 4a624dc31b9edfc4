//! Inventory domain module: stock counters and the movement ledger.
//!
//! This crate contains the business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no locking, no storage). The batch
//! coordinator in `minierp-infra` drives these types inside a database
//! transaction.

pub mod deltas;
pub mod flow;
pub mod key;
pub mod ledger;
pub mod stock;

pub use deltas::StockDeltas;
pub use flow::{Direction, FlowKind, FlowRule};
pub use key::StockKey;
pub use ledger::{InventoryTransaction, LedgerReference, NewLedgerEntry, RefType, TransactionType};
pub use stock::Stock;
