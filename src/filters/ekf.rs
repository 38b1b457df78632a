//! Extended Kalman Filter driven by a compiled symbolic model
//!
//! The filter owns a single estimate `(x, P, t)` and advances it through
//! prediction and batched updates. All linearization comes from the
//! [`CompiledModel`]: the transition Jacobian `F`, the per-kind measurement
//! Jacobians `H`, and for reduced error states the injection Jacobian `G`.
//!
//! # Error state
//!
//! `P` always lives on the error state. For additive models `G = I` and the
//! filter is a textbook EKF. Otherwise corrections are applied through the
//! model's injection `x ⊞ δ`, measurement Jacobians are taken as `H·G(x)`,
//! and the transition is mapped as `F_err = G(x')⁺ · F · G(x)`.
//!
//! # Updates
//!
//! One call to [`SymbolicEkf::update`] applies one combined correction for
//! every row of a batch: innovations and Jacobians are stacked, the noise
//! blocks form a block-diagonal `R`, the gain is solved through a Cholesky
//! factor of `S`, and the covariance is updated in Joseph form and then
//! symmetrized.
//!
//! Rows are screened before stacking. A row whose own innovation covariance
//! is not positive definite, or whose innovation is not finite, is skipped
//! and counted; so is a row beyond its kind's Mahalanobis gate. If the
//! stacked `S` still fails to factor the whole batch is skipped. Skips are
//! reported in the returned [`UpdateReport`], never raised as errors.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nalgebra::{dmatrix, DMatrix};
//! use symkf::compiler::{ModelCompiler, SymbolicCompiler};
//! use symkf::filters::{FilterConfig, ObservationRow, SymbolicEkf};
//! use symkf::models::ObservationNoise;
//! use symkf::symbolic::{Expr, ModelDescriptor, StateLayout};
//! use symkf::types::kind::ObservationKind;
//!
//! const POSITION: ObservationKind = ObservationKind::new(2);
//!
//! let layout = StateLayout::new(2)
//!     .with_slice("position", 0..1).unwrap()
//!     .with_slice("velocity", 1..2).unwrap();
//! let position = layout.scalar("position").unwrap();
//! let velocity = layout.scalar("velocity").unwrap();
//! let descriptor = ModelDescriptor::new("kinematic", layout)
//!     .with_dynamics(vec![velocity, Expr::zero()])
//!     .observe(POSITION, vec![position], None);
//! let model = Arc::new(SymbolicCompiler.compile(&descriptor).unwrap());
//!
//! let config = FilterConfig::new(&[0.0, 0.0], DMatrix::identity(2, 2), dmatrix![0.01, 0.0; 0.0, 4.0])
//!     .with_observation_noise(ObservationNoise::new().with(POSITION, dmatrix![0.01]).unwrap());
//! let mut filter = SymbolicEkf::new(model, config).unwrap();
//! filter.init_state(&[0.0, 0.0], None, Some(0.0)).unwrap();
//!
//! let result = filter
//!     .predict_and_update_batch(1.0, POSITION, &[ObservationRow::new(&[1.0])], None)
//!     .unwrap();
//! assert!(result.report.applied());
//! assert!(filter.state().as_slice()[0] > 0.9);
//! ```

use std::path::Path;
use std::sync::Arc;

use nalgebra::{DMatrix, RealField};
use num_traits::Float;

use super::batch::{BatchResult, Estimate, FilterStats, ObservationBatch, ObservationRow, UpdateReport};
use super::config::{check_covariance, FilterConfig};
use crate::compiler::{load_artifact, CompiledModel};
use crate::models::{
    validate_block, ErrorStateModel, NonlinearObservationModel, NonlinearTransitionModel, ObservationNoise,
};
use crate::types::kind::ObservationKind;
use crate::types::spaces::{
    ComputeInnovation, Innovation, MeasurementCovariance, StateCovariance, StateVector,
};
use crate::types::transforms::{
    block_diagonal, compute_innovation_covariance, compute_kalman_gain, joseph_update,
    mahalanobis_squared, vstack, ErrorTransitionMatrix, ObservationMatrix,
};
use crate::{Error, Result};

/// Covariance supplied to [`SymbolicEkf::init_state`].
#[derive(Debug, Clone, PartialEq)]
pub enum CovarianceInit<T: RealField> {
    /// Per-component variances, length `D_err`
    Diagonal(Vec<T>),
    /// Full `D_err × D_err` matrix
    Full(DMatrix<T>),
}

impl<T: RealField + Float + Copy> CovarianceInit<T> {
    fn into_covariance(self, dim: usize) -> Result<StateCovariance<T>> {
        let cov = match self {
            CovarianceInit::Diagonal(diag) => {
                if diag.len() != dim {
                    return Err(Error::Configuration(format!(
                        "diagonal covariance has {} entries, expected {dim}",
                        diag.len()
                    )));
                }
                StateCovariance::from_diagonal(&diag)
            }
            CovarianceInit::Full(m) => StateCovariance::from_matrix(m),
        };
        check_covariance(&cov, dim, "covariance")?;
        Ok(cov.symmetrized())
    }
}

// ============================================================================
// Symbolic EKF
// ============================================================================

/// An Extended Kalman Filter over a [`CompiledModel`].
///
/// The compiled model is shared through an `Arc`; the estimate is owned
/// exclusively and only changes through `&mut self` methods.
#[derive(Debug, Clone)]
pub struct SymbolicEkf<T: RealField> {
    model: Arc<CompiledModel>,
    config: FilterConfig<T>,
    state: StateVector<T>,
    covariance: StateCovariance<T>,
    time: Option<T>,
    stats: FilterStats,
}

/// A prediction computed but not yet committed.
struct Propagation<T: RealField> {
    state: StateVector<T>,
    covariance: StateCovariance<T>,
    transition: Option<ErrorTransitionMatrix<T>>,
}

/// An update computed but not yet committed.
struct Correction<T: RealField> {
    posterior: Option<Estimate<T>>,
    innovations: Vec<Innovation<T>>,
    report: UpdateReport,
}

impl<T: RealField + Float + Copy> SymbolicEkf<T> {
    /// Creates a filter at `config`'s initial estimate with no filter time.
    ///
    /// # Errors
    /// `Error::Configuration` if any part of `config` disagrees with the
    /// model's dimensions.
    pub fn new(model: Arc<CompiledModel>, config: FilterConfig<T>) -> Result<Self> {
        config.validate(&model)?;
        let state = config.initial_state.clone();
        let covariance = config.initial_covariance.symmetrized();
        log::debug!(
            "created filter for model '{}' (D={}, D_err={})",
            model.name(),
            model.dim_state(),
            model.dim_state_err()
        );
        Ok(Self {
            model,
            config,
            state,
            covariance,
            time: None,
            stats: FilterStats::default(),
        })
    }

    /// Loads the artifact `name` from `dir` and builds a filter on it.
    ///
    /// The expected dimensions are checked against the artifact. The filter
    /// starts without observation noise; attach it with
    /// [`with_observation_noise`](Self::with_observation_noise) or pass `R`
    /// explicitly to every update.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        dir: impl AsRef<Path>,
        name: &str,
        process_noise: DMatrix<T>,
        initial_state: &[T],
        initial_covariance: DMatrix<T>,
        dim_state: usize,
        dim_state_err: usize,
    ) -> Result<Self> {
        let model = load_artifact(dir, name)?;
        if model.dim_state() != dim_state || model.dim_state_err() != dim_state_err {
            return Err(Error::Configuration(format!(
                "model '{name}' has D={}, D_err={}; expected D={dim_state}, D_err={dim_state_err}",
                model.dim_state(),
                model.dim_state_err()
            )));
        }
        let config = FilterConfig::new(initial_state, initial_covariance, process_noise);
        Self::new(Arc::new(model), config)
    }

    /// Replaces the default observation noise.
    pub fn with_observation_noise(mut self, noise: ObservationNoise<T>) -> Result<Self> {
        noise.check_against(&self.model)?;
        self.config.observation_noise = noise;
        Ok(self)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Copy of the current state `x`.
    pub fn state(&self) -> StateVector<T> {
        self.state.clone()
    }

    /// Copy of the current covariance `P`.
    pub fn covariance(&self) -> StateCovariance<T> {
        self.covariance.clone()
    }

    /// Current filter time, `None` until the first prediction or initialization.
    #[inline]
    pub fn filter_time(&self) -> Option<T> {
        self.time
    }

    /// Copy of the current `(x, P)`.
    pub fn estimate(&self) -> Estimate<T> {
        Estimate {
            state: self.state.clone(),
            covariance: self.covariance.clone(),
        }
    }

    #[inline]
    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    pub fn model(&self) -> &Arc<CompiledModel> {
        &self.model
    }

    pub fn config(&self) -> &FilterConfig<T> {
        &self.config
    }

    /// Default noise for `n` rows of `kind`.
    pub fn get_r(&self, kind: ObservationKind, n: usize) -> Result<Vec<MeasurementCovariance<T>>> {
        self.config.observation_noise.get_r(kind, n)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Replaces the estimate.
    ///
    /// `covariance: None` keeps the current `P`. `filter_time: None` leaves
    /// the filter time uninitialized, so the next prediction only adopts its
    /// time.
    ///
    /// # Errors
    /// `Error::Configuration` on a dimension mismatch or non-finite input;
    /// nothing is changed in that case.
    pub fn init_state(
        &mut self,
        state: &[T],
        covariance: Option<CovarianceInit<T>>,
        filter_time: Option<T>,
    ) -> Result<()> {
        let d = self.model.dim_state();
        if state.len() != d {
            return Err(Error::Configuration(format!(
                "state has {} components, expected {d}",
                state.len()
            )));
        }
        let state = StateVector::from_slice(state);
        if !state.is_finite() {
            return Err(Error::Configuration("state is not finite".into()));
        }
        let covariance = covariance
            .map(|init| init.into_covariance(self.model.dim_state_err()))
            .transpose()?;
        if filter_time.is_some_and(|t| !Float::is_finite(t)) {
            return Err(Error::Configuration("filter time is not finite".into()));
        }

        self.state = state;
        if let Some(covariance) = covariance {
            self.covariance = covariance;
        }
        self.time = filter_time;
        log::debug!("state reinitialized at t={:?}", filter_time.map(to_f64));
        Ok(())
    }

    /// Propagates the estimate to `time`.
    ///
    /// - x ← f(x, dt)
    /// - P ← F_err P F_errᵀ + dt·Q
    ///
    /// An uninitialized filter adopts `time` without propagating.
    ///
    /// # Errors
    /// - `Error::TemporalOrdering` if `time` precedes the filter time
    /// - `Error::NumericalDegeneracy` if the prediction is not finite
    ///
    /// The estimate is unchanged on error.
    pub fn predict(&mut self, time: T) -> Result<()> {
        let step = self.propagate(time)?;
        self.commit_prediction(time, step);
        Ok(())
    }

    /// Applies one batch of same-kind observations at the current time.
    ///
    /// `noise` overrides the registered noise with one block per row. An
    /// empty batch is a no-op.
    ///
    /// # Errors
    /// `Error::Configuration` for an undeclared kind, a row of the wrong
    /// length, a wrong parameter count, or malformed noise. Degenerate rows
    /// are reported, not raised.
    pub fn update(
        &mut self,
        kind: ObservationKind,
        rows: &[ObservationRow<T>],
        noise: Option<&[MeasurementCovariance<T>]>,
    ) -> Result<UpdateReport> {
        let noise = self.resolve_noise(kind, rows, noise)?;
        let correction = self.correct(&self.state, &self.covariance, kind, rows, &noise);
        let (report, _) = self.commit_correction(correction);
        Ok(report)
    }

    /// Predicts to `time` and applies the batch as one step.
    ///
    /// The batch is validated and the whole step computed before anything is
    /// committed, so an error leaves `(x, P, t)` untouched.
    pub fn predict_and_update_batch(
        &mut self,
        time: T,
        kind: ObservationKind,
        rows: &[ObservationRow<T>],
        noise: Option<&[MeasurementCovariance<T>]>,
    ) -> Result<BatchResult<T>> {
        let noise = self.resolve_noise(kind, rows, noise)?;
        let step = self.propagate(time)?;
        let correction = self.correct(&step.state, &step.covariance, kind, rows, &noise);

        let prior = Estimate {
            state: step.state.clone(),
            covariance: step.covariance.clone(),
        };
        let transition = self.commit_prediction(time, step);
        let (report, innovations) = self.commit_correction(correction);

        Ok(BatchResult {
            time,
            kind,
            prior,
            posterior: self.estimate(),
            transition,
            innovations,
            report,
        })
    }

    /// [`predict_and_update_batch`](Self::predict_and_update_batch) with the
    /// registered noise.
    pub fn process(&mut self, batch: &ObservationBatch<T>) -> Result<BatchResult<T>> {
        self.predict_and_update_batch(batch.time, batch.kind, &batch.rows, None)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn propagate(&self, time: T) -> Result<Propagation<T>> {
        if !Float::is_finite(time) {
            return Err(Error::Configuration("prediction time is not finite".into()));
        }
        let Some(current) = self.time else {
            return Ok(Propagation {
                state: self.state.clone(),
                covariance: self.covariance.clone(),
                transition: None,
            });
        };
        if time < current {
            return Err(Error::TemporalOrdering {
                current: to_f64(current),
                requested: to_f64(time),
            });
        }

        let dt = time - current;
        let model = self.model.as_ref();
        let state = NonlinearTransitionModel::predict_nonlinear(model, &self.state, dt);
        let jacobian = NonlinearTransitionModel::jacobian_at(model, &self.state, dt);
        let transition = model
            .error_transition(&self.state, &state, &jacobian)
            .ok_or_else(|| {
                Error::NumericalDegeneracy("injection Jacobian lost column rank during prediction".into())
            })?;

        let covariance = transition
            .propagate_covariance(&self.covariance)
            .add(&self.config.process_noise.scale(dt))
            .symmetrized();

        if !state.is_finite() || !covariance.is_finite() {
            return Err(Error::NumericalDegeneracy(format!(
                "prediction over dt={} produced non-finite values",
                to_f64(dt)
            )));
        }
        Ok(Propagation {
            state,
            covariance,
            transition: Some(transition),
        })
    }

    fn commit_prediction(&mut self, time: T, step: Propagation<T>) -> Option<ErrorTransitionMatrix<T>> {
        match (self.time, &step.transition) {
            (Some(previous), Some(_)) => {
                self.stats.predictions += 1;
                log::debug!("predict t={} -> {}", to_f64(previous), to_f64(time));
            }
            _ => log::debug!("filter time initialized at t={}", to_f64(time)),
        }
        self.state = step.state;
        self.covariance = step.covariance;
        self.time = Some(time);
        step.transition
    }

    /// Checks a batch against the model and returns one noise block per row.
    fn resolve_noise(
        &self,
        kind: ObservationKind,
        rows: &[ObservationRow<T>],
        noise: Option<&[MeasurementCovariance<T>]>,
    ) -> Result<Vec<MeasurementCovariance<T>>> {
        if rows.is_empty() {
            return match noise {
                Some(blocks) if !blocks.is_empty() => Err(Error::Configuration(format!(
                    "{} noise blocks supplied for an empty batch of {kind}",
                    blocks.len()
                ))),
                _ => Ok(Vec::new()),
            };
        }

        let obs = self.model.observation(kind).ok_or_else(|| {
            Error::Configuration(format!(
                "model '{}' declares no measurement for {kind}",
                self.model.name()
            ))
        })?;
        for (i, row) in rows.iter().enumerate() {
            if row.z.len() != obs.dim {
                return Err(Error::Configuration(format!(
                    "row {i} of {kind} has {} components, expected {}",
                    row.z.len(),
                    obs.dim
                )));
            }
            if row.params.len() != obs.n_params {
                return Err(Error::Configuration(format!(
                    "row {i} of {kind} carries {} parameters, expected {}",
                    row.params.len(),
                    obs.n_params
                )));
            }
        }

        let blocks = match noise {
            Some(blocks) => {
                if blocks.len() != rows.len() {
                    return Err(Error::Configuration(format!(
                        "{} noise blocks supplied for {} rows of {kind}",
                        blocks.len(),
                        rows.len()
                    )));
                }
                for block in blocks {
                    validate_block(kind, block)?;
                }
                blocks.to_vec()
            }
            None => self.config.observation_noise.get_r(kind, rows.len())?,
        };
        if let Some(block) = blocks.iter().find(|b| b.dim() != obs.dim) {
            return Err(Error::Configuration(format!(
                "noise for {kind} is {0}x{0}, measurement dimension is {1}",
                block.dim(),
                obs.dim
            )));
        }
        Ok(blocks)
    }

    /// Computes the combined correction of a validated batch at `(state, covariance)`.
    fn correct(
        &self,
        state: &StateVector<T>,
        covariance: &StateCovariance<T>,
        kind: ObservationKind,
        rows: &[ObservationRow<T>],
        noise: &[MeasurementCovariance<T>],
    ) -> Correction<T> {
        let mut report = UpdateReport::new(kind, rows.len());
        let skipped = |report: UpdateReport| Correction {
            posterior: None,
            innovations: Vec::new(),
            report,
        };
        if rows.is_empty() {
            return skipped(report);
        }

        let model = self.model.as_ref();
        let injection = model.injection_jacobian(state);
        let gate = self.config.gate(kind);

        let mut accepted: Vec<(ObservationMatrix<T>, Innovation<T>, &MeasurementCovariance<T>)> =
            Vec::with_capacity(rows.len());
        for (i, (row, r)) in rows.iter().zip(noise).enumerate() {
            let predicted = NonlinearObservationModel::observe(model, kind, state, &row.params);
            let jacobian = NonlinearObservationModel::jacobian_at(model, kind, state, &row.params);
            let (Some(predicted), Some(jacobian)) = (predicted, jacobian) else {
                report.degenerate += 1;
                continue;
            };

            let h = jacobian.compose(&injection);
            let y = row.z.innovation(&predicted);
            let s = compute_innovation_covariance(covariance, &h, r);
            let distance = if y.is_finite() && s.is_finite() {
                mahalanobis_squared(&y, &s)
            } else {
                None
            };
            let Some(distance) = distance else {
                report.degenerate += 1;
                log::warn!("skipping row {i} of {kind}: degenerate innovation");
                continue;
            };
            if let Some(threshold) = gate {
                if distance > threshold {
                    report.gated += 1;
                    log::warn!(
                        "gated row {i} of {kind}: distance² {} exceeds {}",
                        to_f64(distance),
                        to_f64(threshold)
                    );
                    continue;
                }
            }
            accepted.push((h, y, r));
        }

        if accepted.is_empty() {
            return skipped(report);
        }

        let h_blocks: Vec<&DMatrix<T>> = accepted.iter().map(|(h, _, _)| h.as_matrix()).collect();
        let h = ObservationMatrix::from_matrix(vstack(&h_blocks, covariance.dim()));
        let y = Innovation::from_vec(
            accepted
                .iter()
                .flat_map(|(_, y, _)| y.as_slice().iter().copied())
                .collect(),
        );
        let r_blocks: Vec<&DMatrix<T>> = accepted.iter().map(|(_, _, r)| r.as_matrix()).collect();
        let r = MeasurementCovariance::from_matrix(block_diagonal(&r_blocks));

        let s = compute_innovation_covariance(covariance, &h, &r);
        let Some(gain) = compute_kalman_gain(covariance, &h, &s) else {
            report.batch_skipped = true;
            log::warn!("skipping batch of {kind}: stacked innovation covariance is not positive definite");
            return skipped(report);
        };

        let correction = gain.correct(&y);
        let posterior_state = model.inject(state, &correction);
        let posterior_covariance = joseph_update(covariance, &gain, &h, &r).symmetrized();
        if !posterior_state.is_finite() || !posterior_covariance.is_finite() {
            report.batch_skipped = true;
            log::warn!("skipping batch of {kind}: correction is not finite");
            return skipped(report);
        }

        report.accepted = accepted.len();
        Correction {
            posterior: Some(Estimate {
                state: posterior_state,
                covariance: posterior_covariance,
            }),
            innovations: accepted.into_iter().map(|(_, y, _)| y).collect(),
            report,
        }
    }

    fn commit_correction(&mut self, correction: Correction<T>) -> (UpdateReport, Vec<Innovation<T>>) {
        let report = correction.report;
        if report.rows == 0 {
            return (report, correction.innovations);
        }
        self.stats.record(&report);
        if let Some(posterior) = correction.posterior {
            self.state = posterior.state;
            self.covariance = posterior.covariance;
        }
        log::debug!(
            "update {}: {} of {} rows applied ({} degenerate, {} gated)",
            report.kind,
            report.accepted,
            report.rows,
            report.degenerate,
            report.gated
        );
        (report, correction.innovations)
    }
}

fn to_f64<T: Float>(value: T) -> f64 {
    num_traits::ToPrimitive::to_f64(&value).unwrap_or(f64::NAN)
}

// ============================================================================
// Tests
// ============================================================================
