//! Lock & batch coordinator: the only path that mutates stock.
//!
//! ## Batch Flow
//!
//! ```text
//! deltas (StockKey -> positive qty)
//!   ↓
//! 1. Validate (no store access)
//!   ↓
//! 2. Lock existing rows in (item_id, warehouse_id) order
//!   ↓
//! 3. Missing rows: NotFound, or insert + flush when creation is allowed
//!   ↓
//! 4. Apply the flow's direction to every row, build ledger entries
//!   ↓
//! 5. Save dirty rows, append the ledger, commit
//! ```
//!
//! Every batch locks in the same global order, so two overlapping batches
//! can block each other but never form a wait cycle. A concurrent creator of
//! the same row makes our insert fail with a unique violation; the retry
//! envelope then re-runs the whole transaction, which finds the row in step 2.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use minierp_core::{ItemId, LedgerEntryId, PurchaseOrderId, SalesOrderId, UserId, WarehouseId};
use minierp_inventory::{
    FlowKind, InventoryTransaction, NewLedgerEntry, RefType, Stock, StockDeltas, StockKey,
};

use crate::error::StockError;
use crate::retry::{RetryPolicies, retry_transient};
use crate::store::{
    Counterparty, LedgerEntryDetail, LedgerFilter, Page, Pagination, StockLevel, StockScope,
    StockStore, StockTx,
};

/// One stock batch: positive quantities moved in the direction of `flow`,
/// recorded against order `ref_id`.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub deltas: &'a StockDeltas,
    pub ref_id: i64,
    pub flow: FlowKind,
    /// Create missing stock rows at zero before applying.
    pub allow_create: bool,
    pub actor: UserId,
}

impl<'a> BatchRequest<'a> {
    /// A request with `allow_create` taken from the flow's rule.
    pub fn new(deltas: &'a StockDeltas, ref_id: i64, flow: FlowKind, actor: UserId) -> Self {
        Self {
            deltas,
            ref_id,
            flow,
            allow_create: flow.allows_create(),
            actor,
        }
    }

    pub fn validate(&self) -> Result<(), StockError> {
        self.deltas.validate()?;
        if self.ref_id <= 0 {
            return Err(StockError::Validation(format!(
                "{} batch requires a positive ref id, got {}",
                self.flow, self.ref_id
            )));
        }
        if self.allow_create && !self.flow.allows_create() {
            return Err(StockError::Validation(format!(
                "{} batches cannot create stock rows",
                self.flow
            )));
        }
        Ok(())
    }
}

/// Apply a batch inside a caller-owned transaction.
///
/// Nothing is committed here; on error the caller drops (rolls back) the
/// transaction. Returns the appended ledger entries in lock order.
pub async fn apply_in<T>(
    tx: &mut T,
    request: &BatchRequest<'_>,
) -> Result<Vec<InventoryTransaction>, StockError>
where
    T: StockTx,
{
    request.validate()?;
    let direction = request.flow.direction();
    let keys = request.deltas.sorted_keys();

    let mut stocks = tx.lock_stocks(&keys).await?;

    if stocks.len() < keys.len() {
        let locked: BTreeSet<StockKey> = stocks.iter().map(Stock::key).collect();
        let missing: Vec<StockKey> = keys
            .iter()
            .copied()
            .filter(|key| !locked.contains(key))
            .collect();

        if !request.allow_create {
            let listed: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(StockError::NotFound(format!(
                "no stock row for {}",
                listed.join(", ")
            )));
        }

        let created = tx.insert_stocks(&missing, request.actor).await?;
        debug!(created = created.len(), flow = %request.flow, "created stock rows on demand");
        stocks.extend(created);
        stocks.sort_by_key(Stock::key);
    }

    let mut entries = Vec::with_capacity(stocks.len());
    for stock in &mut stocks {
        let key = stock.key();
        let amount = request.deltas.get(&key).ok_or_else(|| {
            StockError::InvariantViolation(format!("locked unrequested stock row {key}"))
        })?;
        stock.apply(direction, amount)?;
        entries.push(NewLedgerEntry::movement(
            key,
            request.flow,
            amount,
            request.ref_id,
            request.actor,
        )?);
    }

    tx.save_stocks(&mut stocks, request.actor).await?;
    Ok(tx.append_ledger(entries).await?)
}

/// Set one stock row to a counted quantity inside a caller-owned transaction.
///
/// Returns the ADJUST entry, or `None` when the count matches the current
/// quantity (nothing is written).
pub async fn adjust_in<T>(
    tx: &mut T,
    key: StockKey,
    actual_qty: i64,
    reason: &str,
    actor: UserId,
) -> Result<Option<InventoryTransaction>, StockError>
where
    T: StockTx,
{
    validate_adjust(actual_qty, reason)?;

    let mut stock = match tx.lock_stocks(&[key]).await?.pop() {
        Some(stock) => stock,
        // Absent rows count as zero.
        None if actual_qty == 0 => return Ok(None),
        None => tx
            .insert_stocks(&[key], actor)
            .await?
            .pop()
            .ok_or_else(|| StockError::InvariantViolation(format!("stock {key} not created")))?,
    };

    let delta = stock.set_actual(actual_qty)?;
    if delta == 0 {
        return Ok(None);
    }
    let entry = NewLedgerEntry::adjust(key, delta, reason, actor)?;

    tx.save_stocks(std::slice::from_mut(&mut stock), actor).await?;
    Ok(tx.append_ledger(vec![entry]).await?.pop())
}

fn validate_adjust(actual_qty: i64, reason: &str) -> Result<(), StockError> {
    if actual_qty < 0 {
        return Err(StockError::Validation(format!(
            "actual quantity cannot be negative, got {actual_qty}"
        )));
    }
    if reason.trim().is_empty() {
        return Err(StockError::Validation(
            "adjustment reason cannot be blank".into(),
        ));
    }
    Ok(())
}

/// Entry point for stock mutations and unlocked stock reads.
///
/// Each mutating call runs one transaction inside the retry envelope:
/// batches use `retry.batch`, stock-takes use `retry.adjust`. Validation
/// happens before the first transaction is opened.
#[derive(Debug, Clone)]
pub struct StockCoordinator<S> {
    store: S,
    retry: RetryPolicies,
}

impl<S> StockCoordinator<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicies::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicies) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply a batch of positive quantities atomically.
    #[instrument(skip(self, deltas), fields(key_count = deltas.len()), err)]
    pub async fn apply(
        &self,
        deltas: &StockDeltas,
        ref_id: i64,
        flow: FlowKind,
        allow_create: bool,
        actor: UserId,
    ) -> Result<Vec<InventoryTransaction>, StockError> {
        let request = BatchRequest {
            deltas,
            ref_id,
            flow,
            allow_create,
            actor,
        };
        request.validate()?;

        let request = &request;
        retry_transient(&self.retry.batch, "apply", move || async move {
            let mut tx = self.store.begin().await?;
            let entries = apply_in(&mut tx, request).await?;
            tx.commit().await?;
            Ok(entries)
        })
        .await
    }

    /// Receive purchased goods, creating stock rows as needed.
    pub async fn increase(
        &self,
        deltas: &StockDeltas,
        purchase_order: PurchaseOrderId,
        actor: UserId,
    ) -> Result<Vec<InventoryTransaction>, StockError> {
        self.apply(deltas, purchase_order.get(), FlowKind::PurchaseInbound, true, actor)
            .await
    }

    /// Take stock out for a confirmed sale.
    pub async fn decrease(
        &self,
        deltas: &StockDeltas,
        sales_order: SalesOrderId,
        actor: UserId,
    ) -> Result<Vec<InventoryTransaction>, StockError> {
        self.apply(deltas, sales_order.get(), FlowKind::SalesOutbound, false, actor)
            .await
    }

    /// Return stock taken by a cancelled sale.
    pub async fn restore(
        &self,
        deltas: &StockDeltas,
        sales_order: SalesOrderId,
        actor: UserId,
    ) -> Result<Vec<InventoryTransaction>, StockError> {
        self.apply(
            deltas,
            sales_order.get(),
            FlowKind::SalesCancelRestore,
            false,
            actor,
        )
        .await
    }

    /// Record a physical count for one (item, warehouse).
    #[instrument(skip(self, key, reason), fields(key = %key), err)]
    pub async fn adjust(
        &self,
        key: StockKey,
        actual_qty: i64,
        reason: &str,
        actor: UserId,
    ) -> Result<Option<InventoryTransaction>, StockError> {
        validate_adjust(actual_qty, reason)?;

        retry_transient(&self.retry.adjust, "adjust", move || async move {
            let mut tx = self.store.begin().await?;
            let entry = adjust_in(&mut tx, key, actual_qty, reason, actor).await?;
            tx.commit().await?;
            Ok(entry)
        })
        .await
    }

    pub async fn stock(&self, key: StockKey) -> Result<Option<Stock>, StockError> {
        Ok(self.store.stock(key).await?)
    }

    pub async fn stock_levels_by_item(
        &self,
        item_id: ItemId,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StockError> {
        Ok(self
            .store
            .stock_levels(StockScope::Item(item_id), pagination)
            .await?)
    }

    pub async fn stock_levels_by_warehouse(
        &self,
        warehouse_id: WarehouseId,
        pagination: Pagination,
    ) -> Result<Page<StockLevel>, StockError> {
        Ok(self
            .store
            .stock_levels(StockScope::Warehouse(warehouse_id), pagination)
            .await?)
    }

    pub async fn ledger_entry(&self, id: LedgerEntryId) -> Result<InventoryTransaction, StockError> {
        self.store
            .ledger_entry(id)
            .await?
            .ok_or_else(|| StockError::NotFound(format!("ledger entry {id}")))
    }

    /// One ledger entry with the supplier or customer of the order it was
    /// booked against.
    pub async fn ledger_entry_detail(
        &self,
        id: LedgerEntryId,
    ) -> Result<LedgerEntryDetail, StockError> {
        let entry = self.ledger_entry(id).await?;
        let counterparty = match (entry.ref_type, entry.ref_id) {
            (Some(RefType::PurchaseOrder), Some(ref_id)) => self
                .store
                .purchase_order(PurchaseOrderId::new(ref_id))
                .await?
                .map(|order| Counterparty::Supplier(order.supplier_id())),
            (Some(RefType::SalesOrder), Some(ref_id)) => self
                .store
                .sales_order(SalesOrderId::new(ref_id))
                .await?
                .map(|order| Counterparty::Customer(order.customer_id())),
            _ => None,
        };
        if counterparty.is_none() && entry.ref_id.is_some() {
            debug!(%id, ref_id = ?entry.ref_id, "ledger entry references an unknown order");
        }
        Ok(LedgerEntryDetail {
            entry,
            counterparty,
        })
    }

    pub async fn ledger_entries(
        &self,
        filter: &LedgerFilter,
        pagination: Pagination,
    ) -> Result<Page<InventoryTransaction>, StockError> {
        Ok(self.store.ledger_entries(filter, pagination).await?)
    }
}
