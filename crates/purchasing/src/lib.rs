//! Purchasing domain module (purchase orders).
//!
//! This crate contains the purchase order state machine, implemented purely as
//! deterministic domain logic (no IO, no storage). Receiving an order turns its
//! lines into an inbound stock batch; the order service in `minierp-infra`
//! commits both in one transaction.

pub mod order;

pub use order::{PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus};
