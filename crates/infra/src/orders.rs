//! Order service: purchase and sales order transitions.
//!
//! Every operation is one transaction inside the batch retry envelope. The
//! order row is locked first, so two transitions of the same order serialize;
//! stock rows are locked afterwards by [`apply_in`]. A transition that moves
//! stock commits its status change only together with the stock batch.

use serde::Serialize;
use tracing::{info, instrument};

use minierp_core::{
    DomainResult, ItemId, PartnerId, PurchaseOrderId, SalesOrderId, UserId, WarehouseId,
};
use minierp_inventory::{FlowKind, InventoryTransaction};
use minierp_purchasing::PurchaseOrder;
use minierp_sales::{CustomerInfo, SalesOrder, ShippingAddress};

use crate::coordinator::{BatchRequest, apply_in};
use crate::error::StockError;
use crate::retry::{RetryPolicies, RetryPolicy, retry_transient};
use crate::store::{OrderTx, StockStore, StockTx};

/// An order after a transition, with the ledger entries it produced.
#[derive(Debug, Clone, Serialize)]
pub struct OrderOutcome<O> {
    pub order: O,
    pub entries: Vec<InventoryTransaction>,
}

impl<O> OrderOutcome<O> {
    fn without_movement(order: O) -> Self {
        Self {
            order,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderService<S> {
    store: S,
    retry: RetryPolicy,
}

async fn lock_purchase<T: OrderTx>(
    tx: &mut T,
    id: PurchaseOrderId,
) -> Result<PurchaseOrder, StockError> {
    tx.lock_purchase_order(id)
        .await?
        .ok_or_else(|| StockError::NotFound(format!("purchase order {id}")))
}

async fn lock_sales<T: OrderTx>(tx: &mut T, id: SalesOrderId) -> Result<SalesOrder, StockError> {
    tx.lock_sales_order(id)
        .await?
        .ok_or_else(|| StockError::NotFound(format!("sales order {id}")))
}

impl<S> OrderService<S>
where
    S: StockStore,
{
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicies::default().batch)
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // Purchase orders

    pub async fn create_purchase_order(
        &self,
        supplier_id: PartnerId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StockError> {
        retry_transient(&self.retry, "create_purchase_order", move || async move {
            let mut tx = self.store.begin().await?;
            let order = tx.insert_purchase_order(supplier_id, actor).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await
    }

    pub async fn add_purchase_line(
        &self,
        id: PurchaseOrderId,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        qty: i64,
        unit_cost: i64,
        actor: UserId,
    ) -> Result<PurchaseOrder, StockError> {
        self.edit_purchase("add_purchase_line", id, actor, |order| {
            order.add_line(item_id, warehouse_id, qty, unit_cost).map(drop)
        })
        .await
    }

    pub async fn remove_purchase_line(
        &self,
        id: PurchaseOrderId,
        line_no: u32,
        actor: UserId,
    ) -> Result<PurchaseOrder, StockError> {
        self.edit_purchase("remove_purchase_line", id, actor, |order| {
            order.remove_line(line_no).map(drop)
        })
        .await
    }

    pub async fn order_purchase(
        &self,
        id: PurchaseOrderId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StockError> {
        self.edit_purchase("order_purchase", id, actor, PurchaseOrder::order)
            .await
    }

    /// Receive all lines into stock and mark the order `Received`.
    #[instrument(skip(self), err)]
    pub async fn receive_purchase(
        &self,
        id: PurchaseOrderId,
        actor: UserId,
    ) -> Result<OrderOutcome<PurchaseOrder>, StockError> {
        let outcome = retry_transient(&self.retry, "receive_purchase", move || async move {
            let mut tx = self.store.begin().await?;
            let mut order = lock_purchase(&mut tx, id).await?;

            let deltas = order.receipt_deltas()?;
            let request = BatchRequest::new(&deltas, id.get(), FlowKind::PurchaseInbound, actor);
            let entries = apply_in(&mut tx, &request).await?;
            order.mark_received()?;

            tx.save_purchase_order(&order, actor).await?;
            tx.commit().await?;
            Ok(OrderOutcome { order, entries })
        })
        .await?;

        info!(purchase_order = %id, entries = outcome.entries.len(), "purchase order received");
        Ok(outcome)
    }

    pub async fn cancel_purchase(
        &self,
        id: PurchaseOrderId,
        actor: UserId,
    ) -> Result<PurchaseOrder, StockError> {
        self.edit_purchase("cancel_purchase", id, actor, PurchaseOrder::cancel)
            .await
    }

    pub async fn purchase_order(&self, id: PurchaseOrderId) -> Result<PurchaseOrder, StockError> {
        self.store
            .purchase_order(id)
            .await?
            .ok_or_else(|| StockError::NotFound(format!("purchase order {id}")))
    }

    async fn edit_purchase<F>(
        &self,
        operation: &'static str,
        id: PurchaseOrderId,
        actor: UserId,
        edit: F,
    ) -> Result<PurchaseOrder, StockError>
    where
        F: Fn(&mut PurchaseOrder) -> DomainResult<()> + Sync,
    {
        let edit = &edit;
        retry_transient(&self.retry, operation, move || async move {
            let mut tx = self.store.begin().await?;
            let mut order = lock_purchase(&mut tx, id).await?;
            edit(&mut order)?;
            tx.save_purchase_order(&order, actor).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await
    }

    // Sales orders

    pub async fn create_sales_order(
        &self,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        actor: UserId,
    ) -> Result<SalesOrder, StockError> {
        let (customer_info, shipping_address) = (&customer_info, &shipping_address);
        retry_transient(&self.retry, "create_sales_order", move || async move {
            let mut tx = self.store.begin().await?;
            let order = tx
                .insert_sales_order(
                    customer_id,
                    customer_info.clone(),
                    shipping_address.clone(),
                    actor,
                )
                .await?;
            tx.commit().await?;
            Ok(order)
        })
        .await
    }

    pub async fn add_sales_line(
        &self,
        id: SalesOrderId,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        qty: i64,
        unit_price: i64,
        actor: UserId,
    ) -> Result<SalesOrder, StockError> {
        self.edit_sales("add_sales_line", id, actor, |order| {
            order.add_line(item_id, warehouse_id, qty, unit_price).map(drop)
        })
        .await
    }

    pub async fn remove_sales_line(
        &self,
        id: SalesOrderId,
        line_no: u32,
        actor: UserId,
    ) -> Result<SalesOrder, StockError> {
        self.edit_sales("remove_sales_line", id, actor, |order| {
            order.remove_line(line_no).map(drop)
        })
        .await
    }

    /// Take the lines out of stock and mark the order `Ordered`.
    ///
    /// Insufficient stock on any line fails the whole order; nothing moves.
    #[instrument(skip(self), err)]
    pub async fn order_sales(
        &self,
        id: SalesOrderId,
        actor: UserId,
    ) -> Result<OrderOutcome<SalesOrder>, StockError> {
        let outcome = retry_transient(&self.retry, "order_sales", move || async move {
            let mut tx = self.store.begin().await?;
            let mut order = lock_sales(&mut tx, id).await?;

            let deltas = order.order_deltas()?;
            let request = BatchRequest::new(&deltas, id.get(), FlowKind::SalesOutbound, actor);
            let entries = apply_in(&mut tx, &request).await?;
            order.mark_ordered()?;

            tx.save_sales_order(&order, actor).await?;
            tx.commit().await?;
            Ok(OrderOutcome { order, entries })
        })
        .await?;

        info!(sales_order = %id, entries = outcome.entries.len(), "sales order placed");
        Ok(outcome)
    }

    pub async fn ship_sales(&self, id: SalesOrderId, actor: UserId) -> Result<SalesOrder, StockError> {
        self.edit_sales("ship_sales", id, actor, SalesOrder::ship)
            .await
    }

    /// Cancel the order, restoring stock if it had been ordered.
    #[instrument(skip(self), err)]
    pub async fn cancel_sales(
        &self,
        id: SalesOrderId,
        actor: UserId,
    ) -> Result<OrderOutcome<SalesOrder>, StockError> {
        retry_transient(&self.retry, "cancel_sales", move || async move {
            let mut tx = self.store.begin().await?;
            let mut order = lock_sales(&mut tx, id).await?;

            let outcome = match order.cancellation_deltas()? {
                Some(deltas) => {
                    let request =
                        BatchRequest::new(&deltas, id.get(), FlowKind::SalesCancelRestore, actor);
                    let entries = apply_in(&mut tx, &request).await?;
                    order.mark_cancelled()?;
                    OrderOutcome { order, entries }
                }
                None => {
                    order.mark_cancelled()?;
                    OrderOutcome::without_movement(order)
                }
            };

            tx.save_sales_order(&outcome.order, actor).await?;
            tx.commit().await?;
            Ok(outcome)
        })
        .await
    }

    pub async fn sales_order(&self, id: SalesOrderId) -> Result<SalesOrder, StockError> {
        self.store
            .sales_order(id)
            .await?
            .ok_or_else(|| StockError::NotFound(format!("sales order {id}")))
    }

    async fn edit_sales<F>(
        &self,
        operation: &'static str,
        id: SalesOrderId,
        actor: UserId,
        edit: F,
    ) -> Result<SalesOrder, StockError>
    where
        F: Fn(&mut SalesOrder) -> DomainResult<()> + Sync,
    {
        let edit = &edit;
        retry_transient(&self.retry, operation, move || async move {
            let mut tx = self.store.begin().await?;
            let mut order = lock_sales(&mut tx, id).await?;
            edit(&mut order)?;
            tx.save_sales_order(&order, actor).await?;
            tx.commit().await?;
            Ok(order)
        })
        .await
    }
}
