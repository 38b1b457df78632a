//! Process models
//!
//! The runtime only ever sees these traits; [`CompiledModel`] is the one
//! implementation the crate ships.

use nalgebra::{DMatrix, RealField};
use num_traits::Float;

use crate::compiler::{CompiledModel, Inputs};
use crate::types::spaces::{ErrorState, StateVector};
use crate::types::transforms::{ErrorTransitionMatrix, InjectionMatrix, TransitionMatrix};

/// Trait for nonlinear discrete-time transition models.
///
/// x_{k+1} = f(x_k, dt)
pub trait NonlinearTransitionModel<T: RealField> {
    /// Dimension `D` of the full state.
    fn dim_state(&self) -> usize;

    /// Propagates the state through `f(x, dt)`.
    fn predict_nonlinear(&self, state: &StateVector<T>, dt: T) -> StateVector<T>;

    /// Jacobian `F = ∂f/∂x` evaluated at `state`.
    fn jacobian_at(&self, state: &StateVector<T>, dt: T) -> TransitionMatrix<T>;
}

/// Trait for models whose covariance lives on an error state.
///
/// With an additive error state `x ⊞ δ = x + δ` and `G = I`.
pub trait ErrorStateModel<T: RealField + Copy> {
    /// Dimension `D_err` of the error state.
    fn dim_state_err(&self) -> usize;

    /// Applies a correction: `x ⊞ δ`.
    fn inject(&self, state: &StateVector<T>, correction: &ErrorState<T>) -> StateVector<T>;

    /// `G(x) = ∂(x ⊞ δ)/∂δ` at `δ = 0`.
    fn injection_jacobian(&self, state: &StateVector<T>) -> InjectionMatrix<T>;

    /// Error-state transition `G(x')⁺ · F · G(x)`.
    ///
    /// Returns `None` when `G(x')` loses column rank.
    fn error_transition(
        &self,
        prior: &StateVector<T>,
        posterior: &StateVector<T>,
        jacobian: &TransitionMatrix<T>,
    ) -> Option<ErrorTransitionMatrix<T>> {
        InjectionMatrix::error_transition(
            &self.injection_jacobian(prior),
            jacobian,
            &self.injection_jacobian(posterior),
        )
    }
}

// ============================================================================
// Compiled model
// ============================================================================

impl<T: RealField + Float + Copy> NonlinearTransitionModel<T> for CompiledModel {
    fn dim_state(&self) -> usize {
        CompiledModel::dim_state(self)
    }

    fn predict_nonlinear(&self, state: &StateVector<T>, dt: T) -> StateVector<T> {
        let inputs = Inputs::state(state.as_slice()).with_dt(dt);
        StateVector::from_dvector(self.transition_program().eval_vector(&inputs))
    }

    fn jacobian_at(&self, state: &StateVector<T>, dt: T) -> TransitionMatrix<T> {
        let inputs = Inputs::state(state.as_slice()).with_dt(dt);
        TransitionMatrix::from_matrix(self.transition_jacobian_program().eval_matrix(&inputs))
    }
}

impl<T: RealField + Float + Copy> ErrorStateModel<T> for CompiledModel {
    fn dim_state_err(&self) -> usize {
        CompiledModel::dim_state_err(self)
    }

    fn inject(&self, state: &StateVector<T>, correction: &ErrorState<T>) -> StateVector<T> {
        match self.injection() {
            Some(injection) => {
                let inputs = Inputs::state(state.as_slice()).with_err_state(correction.as_slice());
                StateVector::from_dvector(injection.inject.eval_vector(&inputs))
            }
            None => StateVector::from_dvector(state.as_dvector() + correction.as_dvector()),
        }
    }

    fn injection_jacobian(&self, state: &StateVector<T>) -> InjectionMatrix<T> {
        match self.injection() {
            Some(injection) => {
                let inputs = Inputs::state(state.as_slice());
                InjectionMatrix::from_matrix(injection.jacobian.eval_matrix(&inputs))
            }
            None => InjectionMatrix::identity(state.len()),
        }
    }

    fn error_transition(
        &self,
        prior: &StateVector<T>,
        posterior: &StateVector<T>,
        jacobian: &TransitionMatrix<T>,
    ) -> Option<ErrorTransitionMatrix<T>> {
        if self.injection().is_none() {
            return Some(additive_error_transition(jacobian));
        }
        InjectionMatrix::error_transition(
            &self.injection_jacobian(prior),
            jacobian,
            &self.injection_jacobian(posterior),
        )
    }
}

/// Maps a full-state transition onto the error state when `G = I`.
#[inline]
pub fn additive_error_transition<T: RealField + Copy>(
    jacobian: &TransitionMatrix<T>,
) -> ErrorTransitionMatrix<T> {
    ErrorTransitionMatrix::from_matrix(DMatrix::clone(jacobian.as_matrix()))
}
