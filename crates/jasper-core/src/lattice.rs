//! Merge contract for replicated state.

/// State that replicas exchange whole and merge on receipt.
///
/// `join` must be commutative, associative and idempotent, so replicas end
/// up equal no matter how often or in what order states arrive.
pub trait Lattice: Clone + PartialEq {
    /// The empty state; `bottom().join(x) == x`.
    fn bottom() -> Self;

    fn join(&self, other: &Self) -> Self;

    /// Merge `other` into `self` in place.
    fn join_assign(&mut self, other: &Self) {
        *self = self.join(other);
    }
}
