//! Measurement models
//!
//! Describes how sensor measurements of each observation kind relate to the
//! state.

use nalgebra::RealField;
use num_traits::Float;

use crate::compiler::{CompiledModel, Inputs};
use crate::types::kind::ObservationKind;
use crate::types::spaces::{Measurement, StateVector};
use crate::types::transforms::MeasurementJacobian;

/// Trait for nonlinear, kind-keyed observation models.
///
/// z = h_kind(x, p) + v
///
/// where `p` holds the extra per-measurement parameters the kind declares.
/// Every method returns `None` for a kind the model does not declare.
pub trait NonlinearObservationModel<T: RealField> {
    /// Dimension of one measurement of `kind`.
    fn measurement_dim(&self, kind: ObservationKind) -> Option<usize>;

    /// Number of extra parameters a measurement of `kind` expects.
    fn param_count(&self, kind: ObservationKind) -> Option<usize>;

    /// Predicted measurement `h(x, p)`.
    fn observe(&self, kind: ObservationKind, state: &StateVector<T>, params: &[T]) -> Option<Measurement<T>>;

    /// Jacobian `H = ∂h/∂x` at `state`.
    fn jacobian_at(
        &self,
        kind: ObservationKind,
        state: &StateVector<T>,
        params: &[T],
    ) -> Option<MeasurementJacobian<T>>;
}

impl<T: RealField + Float + Copy> NonlinearObservationModel<T> for CompiledModel {
    fn measurement_dim(&self, kind: ObservationKind) -> Option<usize> {
        self.observation(kind).map(|o| o.dim)
    }

    fn param_count(&self, kind: ObservationKind) -> Option<usize> {
        self.observation(kind).map(|o| o.n_params)
    }

    fn observe(&self, kind: ObservationKind, state: &StateVector<T>, params: &[T]) -> Option<Measurement<T>> {
        let obs = self.observation(kind)?;
        let inputs = Inputs::state(state.as_slice()).with_params(params);
        Some(Measurement::from_dvector(obs.h.eval_vector(&inputs)))
    }

    fn jacobian_at(
        &self,
        kind: ObservationKind,
        state: &StateVector<T>,
        params: &[T],
    ) -> Option<MeasurementJacobian<T>> {
        let obs = self.observation(kind)?;
        let inputs = Inputs::state(state.as_slice()).with_params(params);
        Some(MeasurementJacobian::from_matrix(obs.jacobian.eval_matrix(&inputs)))
    }
}
