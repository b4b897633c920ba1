//! Constant propagation.
//!
//! [`ConstantValue`] is the per-register domain, [`ConstantEnvironment`] maps registers to
//! values, and [`ConstantAnalysis`] solves [`ConstantPropagation`] over a graph and answers
//! per-position and per-edge queries. The inliner uses it twice: to summarize the arguments
//! a call site passes, and to specialize a callee to such a summary before estimating its
//! cost.

mod environment;
mod propagation;
mod value;

pub use environment::{ConstantEnvironment, RESULT_REGISTER};
pub use propagation::{ConstantAnalysis, ConstantPropagation};
pub use value::{ConstantValue, ImmutableAttr};
