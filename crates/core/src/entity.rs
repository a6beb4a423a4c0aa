//! Entity trait: identity + continuity.

/// Entity marker + minimal interface.
///
/// Ledger rows (stock movements, cash-flow entries) are entities: two rows
/// with identical values are still distinct facts.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
