//! Flow kinds: the business reason behind a batch of stock deltas.

use serde::{Deserialize, Serialize};

use crate::ledger::{RefType, TransactionType};

/// Which way a movement moves stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Ledger entry type recorded for a movement in this direction.
    pub const fn transaction_type(self) -> TransactionType {
        match self {
            Direction::Inbound => TransactionType::Inbound,
            Direction::Outbound => TransactionType::Outbound,
        }
    }

    /// Apply the direction's sign to a positive amount.
    pub const fn signed(self, amount: i64) -> i64 {
        match self {
            Direction::Inbound => amount,
            Direction::Outbound => -amount,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    /// Goods received against a purchase order.
    PurchaseInbound,
    /// Goods committed to a confirmed sales order.
    SalesOutbound,
    /// Goods returned to stock when a confirmed sales order is cancelled.
    SalesCancelRestore,
}

/// Row of the flow table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub direction: Direction,
    pub ref_type: RefType,
    /// Whether missing stock rows may be created on demand.
    pub allows_create: bool,
}

impl FlowKind {
    pub const ALL: [FlowKind; 3] = [
        FlowKind::PurchaseInbound,
        FlowKind::SalesOutbound,
        FlowKind::SalesCancelRestore,
    ];

    /// The flow table.
    pub const fn rule(self) -> FlowRule {
        match self {
            FlowKind::PurchaseInbound => FlowRule {
                direction: Direction::Inbound,
                ref_type: RefType::PurchaseOrder,
                allows_create: true,
            },
            FlowKind::SalesOutbound => FlowRule {
                direction: Direction::Outbound,
                ref_type: RefType::SalesOrder,
                allows_create: false,
            },
            FlowKind::SalesCancelRestore => FlowRule {
                direction: Direction::Inbound,
                ref_type: RefType::SalesOrder,
                allows_create: false,
            },
        }
    }

    pub const fn direction(self) -> Direction {
        self.rule().direction
    }

    pub const fn ref_type(self) -> RefType {
        self.rule().ref_type
    }

    pub const fn allows_create(self) -> bool {
        self.rule().allows_create
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FlowKind::PurchaseInbound => "PURCHASE_INBOUND",
            FlowKind::SalesOutbound => "SALES_OUTBOUND",
            FlowKind::SalesCancelRestore => "SALES_CANCEL_RESTORE",
        }
    }
}

impl core::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_purchase_inbound_creates_rows() {
        let creating: Vec<_> = FlowKind::ALL
            .into_iter()
            .filter(|flow| flow.allows_create())
            .collect();
        assert_eq!(creating, vec![FlowKind::PurchaseInbound]);
    }

    #[test]
    fn cancel_restore_is_inbound_against_sales_orders() {
        let rule = FlowKind::SalesCancelRestore.rule();
        assert_eq!(rule.direction, Direction::Inbound);
        assert_eq!(rule.ref_type, RefType::SalesOrder);
        assert_eq!(
            rule.direction.transaction_type(),
            TransactionType::Inbound
        );
    }

    #[test]
    fn outbound_negates_amount() {
        assert_eq!(FlowKind::SalesOutbound.direction().signed(4), -4);
        assert_eq!(FlowKind::PurchaseInbound.direction().signed(4), 4);
    }
}
