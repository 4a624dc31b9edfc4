//! Strongly-typed identifiers used across the domain.
//!
//! Rows are keyed by database-assigned `BIGINT` identifiers, so every id is a
//! thin newtype over `i64`. Valid identifiers are strictly positive.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an item (master data owned elsewhere).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(i64);

/// Identifier of a warehouse (master data owned elsewhere).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarehouseId(i64);

/// Identifier of a business partner (supplier or customer).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartnerId(i64);

/// Identifier of a user (actor identity stamped on audited rows).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(i64);

/// Identifier of a stock counter row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockId(i64);

/// Identifier of an inventory transaction (ledger entry).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEntryId(i64);

macro_rules! impl_i64_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a raw identifier without checking it.
            ///
            /// Prefer [`Self::parse`] for values that come from outside the process.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Wrap a raw identifier, rejecting non-positive values.
            pub fn parse(raw: i64) -> Result<Self, DomainError> {
                if raw <= 0 {
                    return Err(DomainError::validation(format!(
                        "{} must be positive, got {}",
                        $name, raw
                    )));
                }
                Ok(Self(raw))
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = i64::from_str(s)
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                Self::parse(raw)
            }
        }
    };
}

impl_i64_newtype!(ItemId, "ItemId");
impl_i64_newtype!(WarehouseId, "WarehouseId");
impl_i64_newtype!(PartnerId, "PartnerId");
impl_i64_newtype!(UserId, "UserId");
impl_i64_newtype!(PurchaseOrderId, "PurchaseOrderId");
impl_i64_newtype!(SalesOrderId, "SalesOrderId");
impl_i64_newtype!(StockId, "StockId");
impl_i64_newtype!(LedgerEntryId, "LedgerEntryId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_positive() {
        assert!(ItemId::parse(0).is_err());
        assert!(WarehouseId::parse(-3).is_err());
        assert_eq!(ItemId::parse(7).unwrap().get(), 7);
    }

    #[test]
    fn from_str_round_trips_display() {
        let id: PurchaseOrderId = "42".parse().unwrap();
        assert_eq!(id.to_string(), "42");

        match "abc".parse::<SalesOrderId>().unwrap_err() {
            DomainError::Validation(msg) if msg.contains("SalesOrderId") => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ids_order_numerically() {
        assert!(ItemId::new(2) < ItemId::new(10));
    }
}
