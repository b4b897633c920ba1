//! Lattice traits for data flow analysis.
//!
//! A lattice defines how abstract values combine at control flow join points.
//!
//! # Conventions
//!
//! The solver combines the states of converging paths with
//! [`MeetSemiLattice::meet`]. The state of a block that has not been reached
//! yet must be the identity of `meet`; the analyses in this crate call it
//! "unreached" or "unreachable".
//!
//! Value domains that are combined pointwise inside a state (such as
//! [`ConstantValue`](crate::analysis::ConstantValue)) use the
//! [`JoinSemiLattice`] vocabulary instead: `top` is "unknown" and `join`
//! loses precision.

use std::fmt::Debug;

use crate::utils::BitSet;

/// A meet semi-lattice: the operation the solver uses at join points.
///
/// It must satisfy:
///
/// - **Idempotent**: `x.meet(x) = x`
/// - **Commutative**: `x.meet(y) = y.meet(x)`
/// - **Associative**: `x.meet(y.meet(z)) = (x.meet(y)).meet(z)`
pub trait MeetSemiLattice: Clone + Debug + PartialEq {
    /// Combines the states of two converging paths.
    #[must_use]
    fn meet(&self, other: &Self) -> Self;

    /// Returns `true` if this is the bottom element.
    ///
    /// Once bottom is reached, further meets cannot change the value.
    fn is_bottom(&self) -> bool;
}

/// A join semi-lattice with a join (least upper bound) operation.
///
/// It must satisfy:
///
/// - **Idempotent**: `x.join(x) = x`
/// - **Commutative**: `x.join(y) = y.join(x)`
/// - **Associative**: `x.join(y.join(z)) = (x.join(y)).join(z)`
pub trait JoinSemiLattice: Clone + Debug + PartialEq {
    /// Computes the least specific value that covers both inputs.
    #[must_use]
    fn join(&self, other: &Self) -> Self;

    /// Returns `true` if this is the top element ("unknown").
    fn is_top(&self) -> bool;
}

impl MeetSemiLattice for BitSet {
    /// Meet is union: a register live on any successor path is live.
    fn meet(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.union_with(other);
        result
    }

    fn is_bottom(&self) -> bool {
        self.count() == self.len()
    }
}
