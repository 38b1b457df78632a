//! Filter configuration
//!
//! Everything a filter needs besides the compiled model, as one explicit
//! value.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, RealField};
use num_traits::Float;

use crate::compiler::CompiledModel;
use crate::models::ObservationNoise;
use crate::types::kind::ObservationKind;
use crate::types::spaces::{StateCovariance, StateVector};
use crate::{Error, Result};

/// Initial estimate, process noise, observation noise and gates.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig<T: RealField> {
    /// Initial state `x0`, length `D`
    pub initial_state: StateVector<T>,
    /// Initial covariance `P0`, `D_err × D_err`
    pub initial_covariance: StateCovariance<T>,
    /// Process noise rate `Q`, scaled by `dt` on every prediction
    pub process_noise: StateCovariance<T>,
    /// Default measurement noise per kind
    pub observation_noise: ObservationNoise<T>,
    /// Mahalanobis gate per kind, on `yᵀ S⁻¹ y` of a single row
    pub gates: BTreeMap<ObservationKind, T>,
}

impl<T: RealField + Float + Copy> FilterConfig<T> {
    /// Creates a configuration with no observation noise and no gates.
    pub fn new(initial_state: &[T], initial_covariance: DMatrix<T>, process_noise: DMatrix<T>) -> Self {
        Self {
            initial_state: StateVector::from_slice(initial_state),
            initial_covariance: StateCovariance::from_matrix(initial_covariance),
            process_noise: StateCovariance::from_matrix(process_noise),
            observation_noise: ObservationNoise::new(),
            gates: BTreeMap::new(),
        }
    }

    pub fn with_observation_noise(mut self, noise: ObservationNoise<T>) -> Self {
        self.observation_noise = noise;
        self
    }

    /// Rejects rows of `kind` whose squared Mahalanobis distance exceeds `threshold`.
    pub fn with_gate(mut self, kind: ObservationKind, threshold: T) -> Self {
        self.gates.insert(kind, threshold);
        self
    }

    #[inline]
    pub fn gate(&self, kind: ObservationKind) -> Option<T> {
        self.gates.get(&kind).copied()
    }

    /// Checks every dimension against `model`.
    pub fn validate(&self, model: &CompiledModel) -> Result<()> {
        let (d, d_err) = (model.dim_state(), model.dim_state_err());
        if self.initial_state.len() != d {
            return Err(Error::Configuration(format!(
                "initial state has {} components, model '{}' has {d}",
                self.initial_state.len(),
                model.name()
            )));
        }
        if !self.initial_state.is_finite() {
            return Err(Error::Configuration("initial state is not finite".into()));
        }
        check_covariance(&self.initial_covariance, d_err, "initial covariance")?;
        check_covariance(&self.process_noise, d_err, "process noise")?;
        self.observation_noise.check_against(model)?;

        for (kind, threshold) in &self.gates {
            if model.observation(*kind).is_none() {
                return Err(Error::Configuration(format!("gate set for undeclared {kind}")));
            }
            if !(*threshold > T::zero()) {
                return Err(Error::Configuration(format!("gate for {kind} must be positive")));
            }
        }
        Ok(())
    }
}

/// Requires a finite, symmetric, positive semi-definite `dim × dim` matrix.
///
/// Symmetry and the eigenvalue floor use the tolerance applied to
/// observation noise blocks, relative to the largest entry.
pub(crate) fn check_covariance<T: RealField + Float + Copy>(
    cov: &StateCovariance<T>,
    dim: usize,
    what: &str,
) -> Result<()> {
    let (r, c) = cov.as_matrix().shape();
    if r != dim || c != dim {
        return Err(Error::Configuration(format!("{what} is {r}x{c}, expected {dim}x{dim}")));
    }
    if !cov.is_finite() {
        return Err(Error::Configuration(format!("{what} is not finite")));
    }
    let tol = nalgebra::convert::<f64, T>(1e-9) * (T::one() + cov.as_matrix().amax());
    if !cov.is_symmetric(tol) {
        return Err(Error::Configuration(format!("{what} is not symmetric")));
    }
    let lowest = cov
        .symmetrized()
        .into_matrix()
        .symmetric_eigenvalues()
        .iter()
        .fold(T::zero(), |acc, &v| if v < acc { v } else { acc });
    if lowest < -tol {
        return Err(Error::Configuration(format!(
            "{what} is not positive semi-definite (eigenvalue {})",
            num_traits::ToPrimitive::to_f64(&lowest).unwrap_or(f64::NAN)
        )));
    }
    Ok(())
}
