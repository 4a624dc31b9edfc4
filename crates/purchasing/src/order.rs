use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use minierp_core::{
    DomainError, DomainResult, Entity, ItemId, PartnerId, PurchaseOrderId, UserId, WarehouseId,
};
use minierp_inventory::{StockDeltas, StockKey};

/// Purchase order status lifecycle.
///
/// `Created -> Ordered -> Received`, with `Cancelled` reachable from
/// `Created` or `Ordered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Created,
    Ordered,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Created => "CREATED",
            PurchaseOrderStatus::Ordered => "ORDERED",
            PurchaseOrderStatus::Received => "RECEIVED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(PurchaseOrderStatus::Created),
            "ORDERED" => Ok(PurchaseOrderStatus::Ordered),
            "RECEIVED" => Ok(PurchaseOrderStatus::Received),
            "CANCELLED" => Ok(PurchaseOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown purchase order status: {other}"
            ))),
        }
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub qty: i64,
    /// Unit cost in minor currency units.
    pub unit_cost: i64,
}

impl PurchaseOrderLine {
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_id: PartnerId,
    status: PurchaseOrderStatus,
    lines: Vec<PurchaseOrderLine>,
    created_by: UserId,
    created_at: DateTime<Utc>,
}

impl PurchaseOrder {
    /// A freshly created order with no lines.
    pub fn new(
        id: PurchaseOrderId,
        supplier_id: PartnerId,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            supplier_id,
            status: PurchaseOrderStatus::Created,
            lines: Vec::new(),
            created_by,
            created_at,
        }
    }

    /// Rebuild an order read from the store.
    pub fn rehydrate(
        id: PurchaseOrderId,
        supplier_id: PartnerId,
        status: PurchaseOrderStatus,
        lines: Vec<PurchaseOrderLine>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            supplier_id,
            status,
            lines,
            created_by,
            created_at,
        }
    }

    pub fn supplier_id(&self) -> PartnerId {
        self.supplier_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[PurchaseOrderLine] {
        &self.lines
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add a line, returning its line number. Only allowed while `Created`.
    pub fn add_line(
        &mut self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
        qty: i64,
        unit_cost: i64,
    ) -> DomainResult<u32> {
        self.ensure_editable()?;

        if qty <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        let key = StockKey::new(item_id, warehouse_id);
        if self.lines.iter().any(|line| line.stock_key() == key) {
            return Err(DomainError::conflict(format!(
                "purchase order {} already has a line for {key}",
                self.id
            )));
        }

        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        self.lines.push(PurchaseOrderLine {
            line_no,
            item_id,
            warehouse_id,
            qty,
            unit_cost,
        });
        Ok(line_no)
    }

    pub fn remove_line(&mut self, line_no: u32) -> DomainResult<PurchaseOrderLine> {
        self.ensure_editable()?;

        let index = self
            .lines
            .iter()
            .position(|line| line.line_no == line_no)
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "line {line_no} on purchase order {}",
                    self.id
                ))
            })?;
        Ok(self.lines.remove(index))
    }

    /// `Created -> Ordered`.
    pub fn order(&mut self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Created {
            return Err(DomainError::invariant(
                "only created purchase orders can be ordered",
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot order purchase order without lines",
            ));
        }
        self.status = PurchaseOrderStatus::Ordered;
        Ok(())
    }

    /// Inbound quantities for receiving this order.
    ///
    /// Fails unless the order is `Ordered`, so the stock batch is never built
    /// for an order that cannot transition to `Received`.
    pub fn receipt_deltas(&self) -> DomainResult<StockDeltas> {
        if self.status != PurchaseOrderStatus::Ordered {
            return Err(DomainError::invariant(
                "cannot receive goods before purchase order is ordered",
            ));
        }
        StockDeltas::from_lines(self.lines.iter().map(|line| (line.stock_key(), line.qty)))
    }

    /// `Ordered -> Received`.
    pub fn mark_received(&mut self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Ordered {
            return Err(DomainError::invariant(
                "cannot receive goods before purchase order is ordered",
            ));
        }
        self.status = PurchaseOrderStatus::Received;
        Ok(())
    }

    /// `Created | Ordered -> Cancelled`. Nothing has entered stock yet, so
    /// cancelling a purchase order never moves stock.
    pub fn cancel(&mut self) -> DomainResult<()> {
        match self.status {
            PurchaseOrderStatus::Created | PurchaseOrderStatus::Ordered => {
                self.status = PurchaseOrderStatus::Cancelled;
                Ok(())
            }
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled => Err(
                DomainError::invariant(format!(
                    "cannot cancel purchase order in status {}",
                    self.status.as_str()
                )),
            ),
        }
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.status != PurchaseOrderStatus::Created {
            return Err(DomainError::invariant(
                "cannot modify purchase order once ordered",
            ));
        }
        Ok(())
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> PurchaseOrderId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order() -> PurchaseOrder {
        PurchaseOrder::new(
            PurchaseOrderId::new(1),
            PartnerId::new(5),
            UserId::new(9),
            Utc::now(),
        )
    }

    fn item(id: i64) -> ItemId {
        ItemId::new(id)
    }

    fn warehouse(id: i64) -> WarehouseId {
        WarehouseId::new(id)
    }

    #[test]
    fn add_line_assigns_increasing_line_numbers() {
        let mut order = test_order();
        assert_eq!(order.add_line(item(1), warehouse(1), 3, 100).unwrap(), 1);
        assert_eq!(order.add_line(item(2), warehouse(1), 4, 100).unwrap(), 2);
        order.remove_line(1).unwrap();
        assert_eq!(order.add_line(item(3), warehouse(1), 1, 0).unwrap(), 3);
    }

    #[test]
    fn duplicate_stock_key_is_rejected() {
        let mut order = test_order();
        order.add_line(item(1), warehouse(1), 3, 100).unwrap();
        let err = order.add_line(item(1), warehouse(1), 2, 100).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn order_requires_lines() {
        let mut order = test_order();
        match order.order().unwrap_err() {
            DomainError::Validation(msg) if msg.contains("without lines") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lines_are_frozen_after_ordering() {
        let mut order = test_order();
        order.add_line(item(1), warehouse(1), 3, 100).unwrap();
        order.order().unwrap();

        assert!(matches!(
            order.add_line(item(2), warehouse(1), 1, 1),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(matches!(
            order.remove_line(1),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn receive_follows_order() {
        let mut order = test_order();
        order.add_line(item(2), warehouse(1), 3, 100).unwrap();
        order.add_line(item(1), warehouse(1), 4, 100).unwrap();

        assert!(order.receipt_deltas().is_err());
        order.order().unwrap();

        let deltas = order.receipt_deltas().unwrap();
        assert_eq!(
            deltas.sorted_keys(),
            vec![
                StockKey::new(item(1), warehouse(1)),
                StockKey::new(item(2), warehouse(1))
            ]
        );

        order.mark_received().unwrap();
        assert_eq!(order.status(), PurchaseOrderStatus::Received);
        assert!(order.cancel().is_err());
    }

    #[test]
    fn cancel_from_created_or_ordered() {
        let mut created = test_order();
        created.cancel().unwrap();
        assert_eq!(created.status(), PurchaseOrderStatus::Cancelled);
        assert!(created.cancel().is_err());

        let mut ordered = test_order();
        ordered.add_line(item(1), warehouse(1), 1, 1).unwrap();
        ordered.order().unwrap();
        ordered.cancel().unwrap();
        assert_eq!(ordered.status(), PurchaseOrderStatus::Cancelled);
    }

    #[test]
    fn status_names_round_trip() {
        for status in [
            PurchaseOrderStatus::Created,
            PurchaseOrderStatus::Ordered,
            PurchaseOrderStatus::Received,
            PurchaseOrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PurchaseOrderStatus>().unwrap(), status);
        }
    }
}
