//! symkf: symbolic-model-driven Extended Kalman Filtering
//!
//! Models are declared once as symbolic expressions, differentiated exactly,
//! compiled into straight-line numeric programs and then driven by a
//! generic EKF runtime.
//!
//! # Pipeline
//!
//! - [`symbolic`]: state layout, dynamics and measurement declarations
//! - [`compiler`]: Jacobian derivation, program emission and artifacts on disk
//! - [`models`]: evaluator traits and the observation noise model
//! - [`filters`]: the EKF runtime, batch results and RTS smoothing
//!
//! Vector spaces are encoded in the type system ([`types::spaces`]) so that a
//! state can never be added to an innovation by accident.

pub mod compiler;
pub mod filters;
pub mod models;
pub mod symbolic;
pub mod types;

pub mod prelude {
    pub use crate::compiler::{CompiledModel, ModelCompiler, SymbolicCompiler};
    pub use crate::filters::*;
    pub use crate::models::*;
    pub use crate::symbolic::{Expr, ModelDescriptor, StateLayout, Var};
    pub use crate::types::kind::*;
    pub use crate::types::spaces::*;
    pub use crate::types::transforms::*;
    pub use crate::{Error, Result};
}

/// Error types for the library
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Dimension mismatch, unknown observation kind or malformed noise block
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A prediction produced non-finite values
    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),
    /// A step was requested before the current filter time
    #[error("time went backwards: filter is at {current}, step requested at {requested}")]
    TemporalOrdering { current: f64, requested: f64 },
    /// Model validation, derivation or artifact I/O failed
    #[error("compilation error: {0}")]
    Compilation(String),
}

pub type Result<T> = ::core::result::Result<T, Error>;
