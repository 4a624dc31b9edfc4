//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. A
/// `StockKey { item, warehouse }` is one; a stock row, which carries a
/// database id and a mutable quantity, is an entity instead.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct ShippingAddress { zipcode: String, address1: String, address2: String }
///
/// impl ValueObject for ShippingAddress {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
