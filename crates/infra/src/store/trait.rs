use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use minierp_core::{LedgerEntryId, PartnerId, PurchaseOrderId, SalesOrderId, UserId};
use minierp_inventory::{InventoryTransaction, NewLedgerEntry, Stock, StockKey};
use minierp_purchasing::PurchaseOrder;
use minierp_sales::{CustomerInfo, SalesOrder, ShippingAddress};

use super::query::{LedgerFilter, Page, Pagination, StockLevel, StockScope};

/// Closed set of failures that are safe to retry by re-running the whole
/// transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    /// A concurrent transaction created the same stock row first.
    UniqueViolation,
    /// A row lock could not be acquired within the lock timeout.
    LockNotAvailable,
    /// The transaction was chosen as a deadlock (or serialization) victim.
    Deadlock,
}

impl core::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            TransientKind::UniqueViolation => "unique violation",
            TransientKind::LockNotAvailable => "lock not available",
            TransientKind::Deadlock => "deadlock",
        })
    }
}

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. Any error
/// aborts the enclosing transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient {kind}: {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },

    /// A referenced master-data row (item, warehouse, partner) does not exist.
    #[error("missing reference: {0}")]
    MissingReference(String),

    /// A row the transaction expected to update does not exist.
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }
}

/// Durable home of stock counters, the movement ledger, and orders.
///
/// ## Reads
///
/// The read methods on the store itself see committed data only and never
/// take row locks, so stock-level displays neither block on nor delay the
/// coordinator's writers.
///
/// ## Writes
///
/// Every mutation happens inside a transaction obtained from [`Self::begin`].
/// Dropping a transaction without committing rolls it back and releases its
/// locks.
#[async_trait]
pub trait StockStore: Send + Sync {
    type Tx: StockTx + OrderTx + Send;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn stock(&self, key: StockKey) -> Result<Option<Stock>, StoreError>;

    /// Stock levels ordered by `(item_id, warehouse_id)`.
    async fn stock_levels(
        &self,
        scope: StockScope,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StoreError>;

    async fn ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<InventoryTransaction>, StoreError>;

    /// Ledger entries matching `filter`, newest first.
    async fn ledger_entries(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError>;

    async fn purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    async fn sales_order(&self, id: SalesOrderId) -> Result<Option<SalesOrder>, StoreError>;
}

/// Stock and ledger writes inside one transaction.
#[async_trait]
pub trait StockTx: Send {
    /// Lock the existing rows among `keys` and return them.
    ///
    /// Callers pass keys in canonical order; locks are acquired in that order
    /// and rows come back in it. Keys with no row are skipped. Locks are held
    /// until the transaction ends.
    async fn lock_stocks(&mut self, keys: &[StockKey]) -> Result<Vec<Stock>, StoreError>;

    /// Insert zero-quantity rows for `keys` and flush them immediately.
    ///
    /// A row created concurrently by another transaction fails with
    /// `Transient { kind: UniqueViolation }` here rather than at commit. The
    /// new rows are locked by this transaction.
    async fn insert_stocks(
        &mut self,
        keys: &[StockKey],
        actor: UserId,
    ) -> Result<Vec<Stock>, StoreError>;

    /// Write every dirty row (which must be locked by this transaction) and
    /// mark it persisted. Returns the number of rows written.
    async fn save_stocks(&mut self, stocks: &mut [Stock], actor: UserId)
    -> Result<usize, StoreError>;

    async fn append_ledger(
        &mut self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Order reads-for-update and writes inside one transaction.
#[async_trait]
pub trait OrderTx: Send {
    async fn insert_purchase_order(
        &mut self,
        supplier_id: PartnerId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StoreError>;

    /// Load and lock an order row for the rest of the transaction.
    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Persist status and lines of an order locked by this transaction.
    async fn save_purchase_order(
        &mut self,
        order: &PurchaseOrder,
        actor: UserId,
    ) -> Result<(), StoreError>;

    async fn insert_sales_order(
        &mut self,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        actor: UserId,
    ) -> Result<SalesOrder, StoreError>;

    async fn lock_sales_order(
        &mut self,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError>;

    async fn save_sales_order(&mut self, order: &SalesOrder, actor: UserId)
    -> Result<(), StoreError>;
}

#[async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }

    async fn stock(&self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        (**self).stock(key).await
    }

    async fn stock_levels(
        &self,
        scope: StockScope,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StoreError> {
        (**self).stock_levels(scope, pagination).await
    }

    async fn ledger_entry(
        &self,
        id: LedgerEntryId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        (**self).ledger_entry(id).await
    }

    async fn ledger_entries(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StoreError> {
        (**self).ledger_entries(filter, pagination).await
    }

    async fn purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        (**self).purchase_order(id).await
    }

    async fn sales_order(&self, id: SalesOrderId) -> Result<Option<SalesOrder>, StoreError> {
        (**self).sales_order(id).await
    }
}
