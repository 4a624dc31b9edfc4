//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Stock rows and orders are entities: two snapshots with the same id describe
/// the same row at different points in time.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
