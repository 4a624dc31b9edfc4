//! `minierp-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the domain error model and the integer identifiers shared by the stock,
//! purchasing and sales crates.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    ItemId, LedgerEntryId, PartnerId, PurchaseOrderId, SalesOrderId, StockId, UserId, WarehouseId,
};
pub use value_object::ValueObject;
