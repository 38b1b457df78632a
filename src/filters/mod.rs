//! Filtering runtime
//!
//! - [`ekf::SymbolicEkf`]: Extended Kalman Filter over a compiled model
//! - [`batch`]: observation batches, step results and counters
//! - [`config::FilterConfig`]: initial estimate, noise and gates
//! - [`smoother::rts_smooth`]: Rauch–Tung–Striebel smoothing of a forward pass

pub mod batch;
pub mod config;
pub mod ekf;
pub mod smoother;

pub use batch::{BatchResult, Estimate, FilterStats, ObservationBatch, ObservationRow, UpdateReport};
pub use config::FilterConfig;
pub use ekf::{CovarianceInit, SymbolicEkf};
pub use smoother::rts_smooth;
