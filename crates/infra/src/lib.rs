//! Infrastructure layer: stock stores, the batch coordinator, order service,
//! retry policy, configuration and database wiring.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod orders;
pub mod retry;
pub mod store;


pub use config::Settings;
pub use coordinator::{BatchRequest, StockCoordinator, adjust_in, apply_in};
pub use error::StockError;
pub use orders::{OrderOutcome, OrderService};
pub use retry::{RetryPolicies, RetryPolicy};
pub use store::{
    Counterparty, InMemoryStore, LedgerEntryDetail, LedgerFilter, OrderTx, Page, Pagination,
    PgStore, StockLevel, StockScope, StockStore, StockTx, StoreError, TransientKind,
};
