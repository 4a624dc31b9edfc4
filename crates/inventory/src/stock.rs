use serde::{Deserialize, Serialize};

use minierp_core::{DomainError, DomainResult, Entity, ItemId, StockId, WarehouseId};

use crate::flow::Direction;
use crate::key::StockKey;

/// Stock counter for one (item, warehouse).
///
/// Only the batch coordinator mutates a `Stock`, and only after the row has
/// been locked in the enclosing transaction. `persisted_qty` remembers the
/// quantity last read from or written to the store so saves can skip rows
/// that did not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    id: StockId,
    key: StockKey,
    qty: i64,
    #[serde(skip)]
    persisted_qty: i64,
}

impl Stock {
    /// Rehydrate a row read from the store.
    pub fn from_persisted(id: StockId, key: StockKey, qty: i64) -> Self {
        Self {
            id,
            key,
            qty,
            persisted_qty: qty,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn item_id(&self) -> ItemId {
        self.key.item_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.key.warehouse_id
    }

    pub fn qty(&self) -> i64 {
        self.qty
    }

    pub fn increase(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive(self.key, amount)?;
        self.qty = self.qty.checked_add(amount).ok_or_else(|| {
            DomainError::validation(format!("quantity overflow for {}", self.key))
        })?;
        Ok(())
    }

    /// Remove `amount` units; never lets the counter go negative.
    pub fn decrease(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive(self.key, amount)?;
        if self.qty < amount {
            return Err(DomainError::conflict(format!(
                "insufficient stock for {}: available {}, requested {}",
                self.key, self.qty, amount
            )));
        }
        self.qty -= amount;
        Ok(())
    }

    /// Move `amount` units in `direction`, returning the signed delta.
    pub fn apply(&mut self, direction: Direction, amount: i64) -> DomainResult<i64> {
        match direction {
            Direction::Inbound => self.increase(amount)?,
            Direction::Outbound => self.decrease(amount)?,
        }
        Ok(direction.signed(amount))
    }

    /// Overwrite the counter with an observed quantity, returning the delta.
    pub fn set_actual(&mut self, actual_qty: i64) -> DomainResult<i64> {
        if actual_qty < 0 {
            return Err(DomainError::validation(format!(
                "actual quantity cannot be negative for {}, got {actual_qty}",
                self.key
            )));
        }
        let delta = actual_qty - self.qty;
        self.qty = actual_qty;
        Ok(delta)
    }

    pub fn is_dirty(&self) -> bool {
        self.qty != self.persisted_qty
    }

    /// Record that the current quantity has been written to the store.
    pub fn mark_persisted(&mut self) {
        self.persisted_qty = self.qty;
    }
}

impl Entity for Stock {
    type Id = StockId;

    fn id(&self) -> StockId {
        self.id
    }
}

fn ensure_positive(key: StockKey, amount: i64) -> DomainResult<()> {
    if amount <= 0 {
        return Err(DomainError::validation(format!(
            "quantity must be positive for {key}, got {amount}"
        )));
    }
    Ok(())
}
