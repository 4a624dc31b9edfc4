//! Movement ledger entries.
//!
//! A ledger entry is the immutable record of one quantity change and its
//! cause. Entries are built through the validating constructors on
//! [`NewLedgerEntry`] and become [`InventoryTransaction`]s once the store has
//! appended them (assigning `id` and `created_at`). Nothing ever mutates an
//! appended entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use minierp_core::{DomainError, DomainResult, ItemId, LedgerEntryId, UserId, WarehouseId};

use crate::flow::FlowKind;
use crate::key::StockKey;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Inbound,
    Outbound,
    Adjust,
}

impl TransactionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransactionType::Inbound => "INBOUND",
            TransactionType::Outbound => "OUTBOUND",
            TransactionType::Adjust => "ADJUST",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(TransactionType::Inbound),
            "OUTBOUND" => Ok(TransactionType::Outbound),
            "ADJUST" => Ok(TransactionType::Adjust),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Kind of document a movement was booked against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    PurchaseOrder,
    SalesOrder,
}

impl RefType {
    pub const fn as_str(self) -> &'static str {
        match self {
            RefType::PurchaseOrder => "PURCHASE_ORDER",
            RefType::SalesOrder => "SALES_ORDER",
        }
    }
}

impl core::fmt::Display for RefType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for RefType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PURCHASE_ORDER" => Ok(RefType::PurchaseOrder),
            "SALES_ORDER" => Ok(RefType::SalesOrder),
            other => Err(DomainError::validation(format!("unknown ref type: {other}"))),
        }
    }
}

/// The document a movement was booked against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerReference {
    pub ref_type: RefType,
    pub ref_id: i64,
}

/// A validated ledger entry that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    key: StockKey,
    kind: TransactionType,
    qty_delta: i64,
    reference: Option<LedgerReference>,
    reason: Option<String>,
    created_by: UserId,
}

impl NewLedgerEntry {
    /// Entry for an order-driven movement.
    ///
    /// `amount` is the positive quantity moved; the sign of `qty_delta` comes
    /// from the flow's direction.
    pub fn movement(
        key: StockKey,
        flow: FlowKind,
        amount: i64,
        ref_id: i64,
        created_by: UserId,
    ) -> DomainResult<Self> {
        if amount <= 0 {
            return Err(DomainError::validation(format!(
                "movement quantity must be positive for {key}, got {amount}"
            )));
        }
        if ref_id <= 0 {
            return Err(DomainError::validation(format!(
                "{} movement requires a positive ref id, got {ref_id}",
                flow
            )));
        }
        let rule = flow.rule();
        Ok(Self {
            key,
            kind: rule.direction.transaction_type(),
            qty_delta: rule.direction.signed(amount),
            reference: Some(LedgerReference {
                ref_type: rule.ref_type,
                ref_id,
            }),
            reason: None,
            created_by,
        })
    }

    /// Entry for a stock-take correction.
    pub fn adjust(
        key: StockKey,
        qty_delta: i64,
        reason: &str,
        created_by: UserId,
    ) -> DomainResult<Self> {
        if qty_delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason cannot be blank"));
        }
        Ok(Self {
            key,
            kind: TransactionType::Adjust,
            qty_delta,
            reference: None,
            reason: Some(reason.to_string()),
            created_by,
        })
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    pub fn qty_delta(&self) -> i64 {
        self.qty_delta
    }

    pub fn reference(&self) -> Option<LedgerReference> {
        self.reference
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    /// The persisted form, once the store has assigned identity and time.
    pub fn into_transaction(
        self,
        id: LedgerEntryId,
        created_at: DateTime<Utc>,
    ) -> InventoryTransaction {
        InventoryTransaction {
            id,
            item_id: self.key.item_id,
            warehouse_id: self.key.warehouse_id,
            kind: self.kind,
            qty_delta: self.qty_delta,
            ref_type: self.reference.map(|r| r.ref_type),
            ref_id: self.reference.map(|r| r.ref_id),
            reason: self.reason,
            created_at,
            created_by: self.created_by,
        }
    }
}

/// An appended ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: LedgerEntryId,
    pub item_id: ItemId,
    pub warehouse_id: WarehouseId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub qty_delta: i64,
    pub ref_type: Option<RefType>,
    pub ref_id: Option<i64>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl InventoryTransaction {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.item_id, self.warehouse_id)
    }
}
