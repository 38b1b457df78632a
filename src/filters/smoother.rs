//! Rauch–Tung–Striebel fixed-interval smoothing
//!
//! Runs backwards over the [`BatchResult`]s of a forward pass. Each result
//! already carries what the backward pass needs: the filtered posterior,
//! the predicted prior and the error-state transition that produced it.
//!
//! Differences between full states are mapped onto the error state through
//! the left pseudo-inverse of the injection Jacobian, and smoothed
//! corrections are applied with the model's injection, so models with a
//! reduced error state are smoothed consistently.

use nalgebra::{Cholesky, RealField};
use num_traits::Float;

use super::batch::{BatchResult, Estimate};
use crate::models::ErrorStateModel;
use crate::types::spaces::{ErrorState, StateCovariance};
use crate::{Error, Result};

/// Smooths a forward pass.
///
/// With `C_k = P_k Fᵀ_{k+1} P⁻¹_{k+1|k}`:
/// - x_k^s = x_k ⊞ C_k (x_{k+1}^s ⊟ x_{k+1|k})
/// - P_k^s = P_k + C_k (P_{k+1}^s − P_{k+1|k}) C_kᵀ
///
/// Returns one estimate per result, in the same order.
///
/// # Errors
/// - `Error::Configuration` if a result after the first has no transition
///   (the filter time was reset inside the sequence)
/// - `Error::NumericalDegeneracy` if a predicted covariance is not positive
///   definite or the injection Jacobian loses rank
pub fn rts_smooth<T, M>(model: &M, results: &[BatchResult<T>]) -> Result<Vec<Estimate<T>>>
where
    T: RealField + Float + Copy,
    M: ErrorStateModel<T> + ?Sized,
{
    let n = results.len();
    let Some(last) = results.last() else {
        return Ok(Vec::new());
    };

    let mut smoothed: Vec<Estimate<T>> = Vec::with_capacity(n);
    let mut later = last.posterior.clone();

    for k in (0..n - 1).rev() {
        let next = &results[k + 1];
        let current = &results[k].posterior;
        let transition = next.transition.as_ref().ok_or_else(|| {
            Error::Configuration(format!("result {} was not produced by a prediction", k + 1))
        })?;

        // C = P F^T P_pred^{-1}, solved as (P_pred^{-1} F P)^T
        let chol = Cholesky::new(next.prior.covariance.as_matrix().clone()).ok_or_else(|| {
            Error::NumericalDegeneracy(format!("predicted covariance {} is not positive definite", k + 1))
        })?;
        let gain = chol
            .solve(&(transition.as_matrix() * current.covariance.as_matrix()))
            .transpose();

        let pinv = model
            .injection_jacobian(&next.prior.state)
            .left_pseudo_inverse()
            .ok_or_else(|| Error::NumericalDegeneracy("injection Jacobian lost column rank".into()))?;
        let delta = pinv.as_matrix() * (later.state.as_dvector() - next.prior.state.as_dvector());
        let correction = ErrorState::from_dvector(&gain * delta);

        let covariance = StateCovariance::from_matrix(
            current.covariance.as_matrix()
                + &gain
                    * (later.covariance.as_matrix() - next.prior.covariance.as_matrix())
                    * gain.transpose(),
        )
        .symmetrized();

        let estimate = Estimate {
            state: model.inject(&current.state, &correction),
            covariance,
        };
        smoothed.push(std::mem::replace(&mut later, estimate));
    }
    smoothed.push(later);

    smoothed.reverse();
    Ok(smoothed)
}
