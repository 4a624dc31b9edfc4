use serde::{Deserialize, Serialize};

use minierp_core::{ItemId, ValueObject, WarehouseId};

/// Natural key of a stock counter: one row per (item, warehouse).
///
/// The derived ordering compares `item_id` first, then `warehouse_id`. That is
/// the canonical lock order: every ordered collection of keys is already in the
/// sequence in which row locks must be taken.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub const fn new(item_id: ItemId, warehouse_id: WarehouseId) -> Self {
        Self {
            item_id,
            warehouse_id,
        }
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "(item {}, warehouse {})", self.item_id, self.warehouse_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(item: i64, warehouse: i64) -> StockKey {
        StockKey::new(ItemId::new(item), WarehouseId::new(warehouse))
    }

    #[test]
    fn orders_by_item_then_warehouse() {
        let mut keys = vec![key(2, 1), key(1, 9), key(1, 2), key(2, 0)];
        keys.sort();
        assert_eq!(keys, vec![key(1, 2), key(1, 9), key(2, 0), key(2, 1)]);
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(key(3, 4), key(3, 4));
        assert_ne!(key(3, 4), key(4, 3));
    }
}
