//! Sales domain module (sales orders).
//!
//! This crate contains the sales order state machine, implemented purely as
//! deterministic domain logic (no IO, no storage). Ordering a sale commits its
//! lines as an outbound stock batch; cancelling a confirmed sale restores them.

pub mod order;

pub use order::{CustomerInfo, SalesOrder, SalesOrderLine, SalesOrderStatus, ShippingAddress};
