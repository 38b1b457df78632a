//! Model traits consumed by the EKF runtime
//!
//! Process and measurement evaluators are traits so the runtime never depends
//! on how a model was produced; the observation noise model lives alongside.

mod noise;
mod observation;
mod transition;

pub use noise::*;
pub use observation::*;
pub use transition::*;
