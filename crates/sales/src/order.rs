use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use minierp_core::{
    DomainError, DomainResult, Entity, ItemId, PartnerId, SalesOrderId, UserId, ValueObject,
    WarehouseId,
};
use minierp_inventory::{StockDeltas, StockKey};

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Created,
    Ordered,
    Shipped,
    Cancelled,
}

impl SalesOrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            SalesOrderStatus::Created => "CREATED",
            SalesOrderStatus::Ordered => "ORDERED",
            SalesOrderStatus::Shipped => "SHIPPED",
            SalesOrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::str::FromStr for SalesOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(SalesOrderStatus::Created),
            "ORDERED" => Ok(SalesOrderStatus::Ordered),
            "SHIPPED" => Ok(SalesOrderStatus::Shipped),
            "CANCELLED" => Ok(SalesOrderStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown sales order status: {other}"
            ))),
        }
    }
}

/// Contact details captured on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
}

impl CustomerInfo {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }
        Ok(Self {
            name,
            phone: phone.into(),
        })
    }
}

impl ValueObject for CustomerInfo {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub zipcode: String,
    pub address1: String,
    pub address2: String,
}

impl ShippingAddress {
    pub fn new(
        zipcode: impl Into<String>,
        address1: impl Into<String>,
        address2: impl Into<String>,
    ) -> DomainResult<Self> {
        let zipcode = zipcode.into();
        let address1 = address1.into();
        if zipcode.trim().is_empty() || address1.trim().is_empty() {
            return Err(DomainError::validation(
                "shipping address requires zipcode and address1",
            ));
        }
        Ok(Self {
            zipcode,
            address1,
            address2: address2.into(),
        })
    }
}

impl ValueObject for ShippingAddress {}

/// Sales order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub qty: i64,
    /// Unit price in minor currency units.
    pub unit_price: i64,
}

impl SalesOrderLine {
    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    customer_id: PartnerId,
    customer_info: CustomerInfo,
    shipping_address: ShippingAddress,
    status: SalesOrderStatus,
    lines: Vec<SalesOrderLine>,
    created_by: UserId,
    created_at: DateTime<Utc>,
}

impl SalesOrder {
    pub fn new(
        id: SalesOrderId,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            customer_info,
            shipping_address,
            status: SalesOrderStatus::Created,
            lines: Vec::new(),
            created_by,
            created_at,
        }
    }

    /// Rebuild an order read from the store.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: SalesOrderId,
        customer_id: PartnerId,
        customer_info: CustomerInfo,
        shipping_address: ShippingAddress,
        status: SalesOrderStatus,
        lines: Vec<SalesOrderLine>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            customer_info,
            shipping_address,
            status,
            lines,
            created_by,
            created_at,
        }
    }

    pub fn customer_id(&self) -> PartnerId {
        self.customer_id
    }

    pub fn customer_info(&self) -> &CustomerInfo {
        &self.customer_info
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[SalesOrderLine] {
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
        unit_price: i64,
    ) -> DomainResult<u32> {
        self.ensure_editable()?;

        if qty <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        let key = StockKey::new(item_id, warehouse_id);
        if self.lines.iter().any(|line| line.stock_key() == key) {
            return Err(DomainError::conflict(format!(
                "sales order {} already has a line for {key}",
                self.id
            )));
        }

        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        self.lines.push(SalesOrderLine {
            line_no,
            item_id,
            warehouse_id,
            qty,
            unit_price,
        });
        Ok(line_no)
    }

    pub fn remove_line(&mut self, line_no: u32) -> DomainResult<SalesOrderLine> {
        self.ensure_editable()?;

        let index = self
            .lines
            .iter()
            .position(|line| line.line_no == line_no)
            .ok_or_else(|| {
                DomainError::not_found(format!("line {line_no} on sales order {}", self.id))
            })?;
        Ok(self.lines.remove(index))
    }

    /// Outbound quantities committed by ordering this sale.
    pub fn order_deltas(&self) -> DomainResult<StockDeltas> {
        if self.status != SalesOrderStatus::Created {
            return Err(DomainError::invariant(
                "only created sales orders can be ordered",
            ));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot order sales order without lines",
            ));
        }
        self.line_deltas()
    }

    /// `Created -> Ordered`, once the outbound batch has been applied.
    pub fn mark_ordered(&mut self) -> DomainResult<()> {
        self.order_deltas()?;
        self.status = SalesOrderStatus::Ordered;
        Ok(())
    }

    /// `Ordered -> Shipped`. Stock already left at ordering time.
    pub fn ship(&mut self) -> DomainResult<()> {
        if self.status != SalesOrderStatus::Ordered {
            return Err(DomainError::invariant(
                "only ordered sales orders can be shipped",
            ));
        }
        self.status = SalesOrderStatus::Shipped;
        Ok(())
    }

    /// Quantities to put back when cancelling.
    ///
    /// `Some` for an `Ordered` sale (its stock was committed), `None` for a
    /// `Created` one. Any other status cannot be cancelled.
    pub fn cancellation_deltas(&self) -> DomainResult<Option<StockDeltas>> {
        match self.status {
            SalesOrderStatus::Created => Ok(None),
            SalesOrderStatus::Ordered => self.line_deltas().map(Some),
            SalesOrderStatus::Shipped | SalesOrderStatus::Cancelled => {
                Err(DomainError::invariant(format!(
                    "cannot cancel sales order in status {}",
                    self.status.as_str()
                )))
            }
        }
    }

    /// `Created | Ordered -> Cancelled`.
    pub fn mark_cancelled(&mut self) -> DomainResult<()> {
        self.cancellation_deltas()?;
        self.status = SalesOrderStatus::Cancelled;
        Ok(())
    }

    fn line_deltas(&self) -> DomainResult<StockDeltas> {
        StockDeltas::from_lines(self.lines.iter().map(|line| (line.stock_key(), line.qty)))
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.status != SalesOrderStatus::Created {
            return Err(DomainError::invariant(
                "cannot modify sales order once ordered",
            ));
        }
        Ok(())
    }
}

impl Entity for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> SalesOrderId {
        self.id
    }
}
