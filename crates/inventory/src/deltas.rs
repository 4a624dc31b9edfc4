//! Quantity maps handed to the batch coordinator.

use std::collections::BTreeMap;

use minierp_core::{DomainError, DomainResult};

use crate::key::StockKey;

/// Positive quantities per stock key, iterated in canonical lock order.
///
/// Adding the same key twice sums the quantities, so order lines that repeat
/// an (item, warehouse) pair collapse into one movement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockDeltas {
    entries: BTreeMap<StockKey, i64>,
}

impl StockDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(key, qty)` pairs, summing duplicate keys.
    pub fn from_lines<I>(lines: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = (StockKey, i64)>,
    {
        let mut deltas = Self::new();
        for (key, qty) in lines {
            deltas.add(key, qty)?;
        }
        Ok(deltas)
    }

    pub fn add(&mut self, key: StockKey, qty: i64) -> DomainResult<()> {
        let slot = self.entries.entry(key).or_insert(0);
        *slot = slot
            .checked_add(qty)
            .ok_or_else(|| DomainError::validation(format!("quantity overflow for {key}")))?;
        Ok(())
    }

    /// Reject maps that cannot describe a movement: empty, or any quantity
    /// that is zero or negative.
    pub fn validate(&self) -> DomainResult<()> {
        if self.entries.is_empty() {
            return Err(DomainError::validation("stock deltas cannot be empty"));
        }
        for (key, qty) in &self.entries {
            if *qty == 0 {
                return Err(DomainError::validation(format!(
                    "quantity for {key} cannot be zero"
                )));
            }
            if *qty < 0 {
                return Err(DomainError::validation(format!(
                    "quantity for {key} must be positive, got {qty}"
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &StockKey) -> Option<i64> {
        self.entries.get(key).copied()
    }

    /// Keys in canonical lock order.
    pub fn sorted_keys(&self) -> Vec<StockKey> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StockKey, i64)> + '_ {
        self.entries.iter().map(|(key, qty)| (*key, *qty))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minierp_core::{ItemId, WarehouseId};
    use proptest::prelude::*;

    fn key(item: i64, warehouse: i64) -> StockKey {
        StockKey::new(ItemId::new(item), WarehouseId::new(warehouse))
    }

    #[test]
    fn duplicate_keys_are_summed() {
        let deltas = StockDeltas::from_lines([(key(1, 1), 4), (key(2, 1), 1), (key(1, 1), 6)])
            .unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas.get(&key(1, 1)), Some(10));
    }

    #[test]
    fn validate_rejects_empty_and_zero() {
        assert!(matches!(
            StockDeltas::new().validate(),
            Err(DomainError::Validation(msg)) if msg.contains("empty")
        ));

        let zero = StockDeltas::from_lines([(key(1, 1), 0)]).unwrap();
        assert!(matches!(
            zero.validate(),
            Err(DomainError::Validation(msg)) if msg.contains("zero")
        ));

        let negative = StockDeltas::from_lines([(key(1, 1), -2)]).unwrap();
        assert!(negative.validate().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: keys always come out sorted by (item, warehouse) and
        /// without duplicates, whatever order the lines were added in.
        #[test]
        fn sorted_keys_are_canonical(
            lines in prop::collection::vec((1i64..20, 1i64..5, 1i64..100), 1..40)
        ) {
            let deltas = StockDeltas::from_lines(
                lines.iter().map(|(i, w, q)| (key(*i, *w), *q))
            ).unwrap();

            let keys = deltas.sorted_keys();
            prop_assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));

            let total: i64 = lines.iter().map(|(_, _, q)| *q).sum();
            let summed: i64 = deltas.iter().map(|(_, q)| q).sum();
            prop_assert_eq!(total, summed);
        }
    }
}
