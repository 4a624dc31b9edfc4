//! Read-side query types: pagination, filters, and result pages.
//!
//! Reads never take row locks; they see committed data only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use minierp_core::{ItemId, PartnerId, WarehouseId};
use minierp_inventory::{InventoryTransaction, RefType, Stock, TransactionType};

/// Pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// The same pagination with `limit` capped at [`Self::MAX_LIMIT`]. The
    /// fields are public, so stores cap again before querying.
    pub fn capped(self) -> Self {
        Self {
            limit: self.limit.min(Self::MAX_LIMIT),
            offset: self.offset,
        }
    }

    /// Slice an already-ordered, fully materialised result set.
    pub fn page_of<T>(self, rows: Vec<T>) -> Page<T> {
        let pagination = self.capped();
        let total = rows.len() as u64;
        let items: Vec<T> = rows
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Page::new(items, total, pagination)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of rows matching the query (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = u64::from(pagination.offset) + (items.len() as u64) < total;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }
}

/// Which stock rows a stock-level listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockScope {
    Item(ItemId),
    Warehouse(WarehouseId),
}

/// Current quantity of one (item, warehouse), for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    pub qty: i64,
}

impl From<&Stock> for StockLevel {
    fn from(stock: &Stock) -> Self {
        Self {
            item_id: stock.item_id(),
            warehouse_id: stock.warehouse_id(),
            qty: stock.qty(),
        }
    }
}

/// The trading partner on the order a movement was booked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "partner_id", rename_all = "snake_case")]
pub enum Counterparty {
    Supplier(PartnerId),
    Customer(PartnerId),
}

/// A ledger entry with its order reference resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryDetail {
    #[serde(flatten)]
    pub entry: InventoryTransaction,
    /// `None` for stock-takes and for references to unknown orders.
    pub counterparty: Option<Counterparty>,
}

/// Filter criteria for ledger history. All fields are optional and combine
/// with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub item_id: Option<ItemId>,
    pub warehouse_id: Option<WarehouseId>,
    pub kind: Option<TransactionType>,
    pub ref_type: Option<RefType>,
    pub ref_id: Option<i64>,
    /// Entries created at or after this instant.
    pub created_from: Option<DateTime<Utc>>,
    /// Entries created strictly before this instant.
    pub created_to: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &InventoryTransaction) -> bool {
        self.item_id.is_none_or(|id| entry.item_id == id)
            && self.warehouse_id.is_none_or(|id| entry.warehouse_id == id)
            && self.kind.is_none_or(|kind| entry.kind == kind)
            && self.ref_type.is_none_or(|t| entry.ref_type == Some(t))
            && self.ref_id.is_none_or(|id| entry.ref_id == Some(id))
            && self.created_from.is_none_or(|from| entry.created_at >= from)
            && self.created_to.is_none_or(|to| entry.created_at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_caps_limit() {
        assert_eq!(Pagination::new(Some(5000), None).limit, 1000);
        assert_eq!(Pagination::new(None, Some(3)), Pagination { limit: 50, offset: 3 });
    }

    #[test]
    fn page_of_reports_has_more() {
        let page = Pagination::new(Some(2), Some(1)).page_of(vec![1, 2, 3, 4]);
        assert_eq!(page.items, vec![2, 3]);
        assert_eq!(page.total, 4);
        assert!(page.has_more);

        let last = Pagination::new(Some(2), Some(2)).page_of(vec![1, 2, 3, 4]);
        assert!(!last.has_more);
    }

    #[test]
    fn hand_built_pagination_is_capped_when_paging() {
        let pagination = Pagination {
            limit: u32::MAX,
            offset: 0,
        };
        assert_eq!(pagination.capped().limit, Pagination::MAX_LIMIT);

        let page = pagination.page_of((0..1500).collect::<Vec<u32>>());
        assert_eq!(page.items.len(), 1000);
        assert_eq!(page.pagination.limit, 1000);
        assert_eq!(page.total, 1500);
        assert!(page.has_more);
    }
}
