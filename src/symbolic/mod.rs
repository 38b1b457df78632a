//! Symbolic model description
//!
//! - [`expr`]: scalar expressions with exact differentiation
//! - [`descriptor`]: state layout, dynamics and measurement declarations

pub mod descriptor;
pub mod expr;

pub use descriptor::{Discretization, ModelDescriptor, ObservationDecl, StateLayout, StateSlice};
pub use expr::{jacobian, Expr, Func, Var};
