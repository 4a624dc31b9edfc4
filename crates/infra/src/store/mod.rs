//! Stock store boundary.
//!
//! This module defines the storage abstraction the coordinator runs against:
//! a store that opens transactions and answers unlocked reads, and a
//! transaction type that takes row locks, flushes inserts, and appends ledger
//! entries. Two implementations are provided: an in-memory store for tests and
//! development, and a Postgres store.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryTx};
pub use postgres::{PgStore, PgTx};
pub use query::{
    Counterparty, LedgerEntryDetail, LedgerFilter, Page, Pagination, StockLevel, StockScope,
};
pub use r#trait::{OrderTx, StockStore, StockTx, StoreError, TransientKind};
