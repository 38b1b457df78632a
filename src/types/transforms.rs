//! Typed transformation matrices
//!
//! Matrices that transform vectors between spaces, with type-level
//! encoding of source and target spaces, plus the Kalman gain and
//! covariance update kernels shared by the runtime and the smoother.

use ::core::marker::PhantomData;
use nalgebra::{DMatrix, RealField, Scalar};

use super::spaces::{
    ErrorState, ErrorStateSpace, Innovation, InnovationCovariance, InnovationSpace,
    MeasurementCovariance, MeasurementSpace, StateCovariance, StateSpace, Vector,
};

// ============================================================================
// Transform Matrix
// ============================================================================

/// A transformation matrix that maps vectors from one space to another.
///
/// # Type Parameters
///
/// - `T`: Scalar type
/// - `To`: Target space marker (row space)
/// - `From`: Source space marker (column space)
#[derive(Debug, Clone, PartialEq)]
pub struct Transform<T: Scalar, To, From> {
    inner: DMatrix<T>,
    _marker: PhantomData<(To, From)>,
}

impl<T: Scalar, To, From> Transform<T, To, From> {
    /// Creates a transform from a raw matrix.
    #[inline]
    pub fn from_matrix(inner: DMatrix<T>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns a reference to the underlying matrix.
    #[inline]
    pub fn as_matrix(&self) -> &DMatrix<T> {
        &self.inner
    }

    /// Consumes self and returns the underlying matrix.
    #[inline]
    pub fn into_matrix(self) -> DMatrix<T> {
        self.inner
    }

    /// `(rows, cols)` of the underlying matrix.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }
}

impl<T: RealField + Copy, To, From> Transform<T, To, From> {
    /// Creates a zero transform of the given shape.
    #[inline]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::from_matrix(DMatrix::zeros(rows, cols))
    }

    /// Returns the transpose of this transform.
    ///
    /// The transpose maps from `To` to `From` (reversed).
    #[inline]
    pub fn transpose(&self) -> Transform<T, From, To> {
        Transform {
            inner: self.inner.transpose(),
            _marker: PhantomData,
        }
    }

    /// Applies the transform to a vector of the source space.
    #[inline]
    pub fn apply(&self, v: &Vector<T, From>) -> Vector<T, To> {
        Vector::from_dvector(&self.inner * v.as_dvector())
    }

    /// Composes `self ∘ rhs`.
    #[inline]
    pub fn compose<Mid>(&self, rhs: &Transform<T, From, Mid>) -> Transform<T, To, Mid> {
        Transform::from_matrix(&self.inner * &rhs.inner)
    }
}

// ============================================================================
// Type Aliases
// ============================================================================

/// Full-state transition Jacobian `F = ∂f/∂x`: StateSpace -> StateSpace
pub type TransitionMatrix<T> = Transform<T, StateSpace, StateSpace>;

/// Transition Jacobian expressed on the error state: ErrorStateSpace -> ErrorStateSpace
pub type ErrorTransitionMatrix<T> = Transform<T, ErrorStateSpace, ErrorStateSpace>;

/// Full-state measurement Jacobian `∂h/∂x`: StateSpace -> MeasurementSpace
pub type MeasurementJacobian<T> = Transform<T, MeasurementSpace, StateSpace>;

/// Measurement Jacobian on the error state `H = ∂h/∂x · G`: ErrorStateSpace -> MeasurementSpace
pub type ObservationMatrix<T> = Transform<T, MeasurementSpace, ErrorStateSpace>;

/// Injection Jacobian `G = ∂(x ⊞ δ)/∂δ` at `δ = 0`: ErrorStateSpace -> StateSpace
pub type InjectionMatrix<T> = Transform<T, StateSpace, ErrorStateSpace>;

/// Kalman gain: InnovationSpace -> ErrorStateSpace
pub type KalmanGain<T> = Transform<T, ErrorStateSpace, InnovationSpace>;

// ============================================================================
// Specific Transform Applications
// ============================================================================

impl<T: RealField + Copy> ErrorTransitionMatrix<T> {
    /// Creates an identity transition.
    #[inline]
    pub fn identity(dim: usize) -> Self {
        Self::from_matrix(DMatrix::identity(dim, dim))
    }

    /// Propagates a covariance matrix: F * P * F^T
    #[inline]
    pub fn propagate_covariance(&self, cov: &StateCovariance<T>) -> StateCovariance<T> {
        StateCovariance::from_matrix(&self.inner * cov.as_matrix() * self.inner.transpose())
    }
}

impl<T: RealField + Copy> InjectionMatrix<T> {
    /// Identity injection used when the error state is the additive difference.
    #[inline]
    pub fn identity(dim: usize) -> Self {
        Self::from_matrix(DMatrix::identity(dim, dim))
    }

    /// Left pseudo-inverse `(GᵀG)⁻¹Gᵀ`, mapping full-state deltas back onto the error state.
    ///
    /// Returns `None` if `G` does not have full column rank.
    pub fn left_pseudo_inverse(&self) -> Option<Transform<T, ErrorStateSpace, StateSpace>> {
        let gt = self.inner.transpose();
        let gtg = &gt * &self.inner;
        let chol = nalgebra::Cholesky::new(gtg)?;
        Some(Transform::from_matrix(chol.solve(&gt)))
    }

    /// Expresses a full-state transition Jacobian on the error state:
    /// `F_err = G(x')⁺ · F · G(x)`.
    pub fn error_transition(
        prior: &InjectionMatrix<T>,
        jacobian: &TransitionMatrix<T>,
        posterior: &InjectionMatrix<T>,
    ) -> Option<ErrorTransitionMatrix<T>> {
        let pinv = posterior.left_pseudo_inverse()?;
        Some(Transform::from_matrix(
            pinv.as_matrix() * jacobian.as_matrix() * prior.as_matrix(),
        ))
    }
}

impl<T: RealField + Copy> ObservationMatrix<T> {
    /// Projects state covariance to measurement space: H * P * H^T
    #[inline]
    pub fn project_covariance(&self, cov: &StateCovariance<T>) -> MeasurementCovariance<T> {
        MeasurementCovariance::from_matrix(&self.inner * cov.as_matrix() * self.inner.transpose())
    }
}

impl<T: RealField + Copy> KalmanGain<T> {
    /// Applies the Kalman gain to an innovation vector.
    #[inline]
    pub fn correct(&self, innovation: &Innovation<T>) -> ErrorState<T> {
        ErrorState::from_dvector(&self.inner * innovation.as_dvector())
    }
}

// ============================================================================
// Kalman Gain Computation
// ============================================================================

/// Computes the innovation covariance.
///
/// S = H * P * H^T + R
pub fn compute_innovation_covariance<T: RealField + Copy>(
    state_cov: &StateCovariance<T>,
    obs_matrix: &ObservationMatrix<T>,
    meas_noise: &MeasurementCovariance<T>,
) -> InnovationCovariance<T> {
    let h_p_ht = obs_matrix.project_covariance(state_cov);
    InnovationCovariance::from_matrix(h_p_ht.as_matrix() + meas_noise.as_matrix())
}

/// Computes the Kalman gain matrix.
///
/// K = P * H^T * S^{-1}
///
/// S is factored with Cholesky rather than inverted; `S⁻¹ H P` is solved and
/// transposed, which is exact for symmetric P and S. Returns `None` when S is
/// not positive definite.
pub fn compute_kalman_gain<T: RealField + Copy>(
    state_cov: &StateCovariance<T>,
    obs_matrix: &ObservationMatrix<T>,
    innovation_cov: &InnovationCovariance<T>,
) -> Option<KalmanGain<T>> {
    let chol = nalgebra::Cholesky::new(innovation_cov.as_matrix().clone())?;
    let h_p = obs_matrix.as_matrix() * state_cov.as_matrix();
    let s_inv_h_p = chol.solve(&h_p);
    Some(KalmanGain::from_matrix(s_inv_h_p.transpose()))
}

/// Squared Mahalanobis distance `yᵀ S⁻¹ y`.
///
/// Returns `None` when S is not positive definite.
pub fn mahalanobis_squared<T: RealField + Copy>(
    innovation: &Innovation<T>,
    innovation_cov: &InnovationCovariance<T>,
) -> Option<T> {
    let chol = nalgebra::Cholesky::new(innovation_cov.as_matrix().clone())?;
    let y = innovation.as_dvector();
    let s_inv_y = chol.solve(y);
    Some(y.dot(&s_inv_y))
}

/// Updates state covariance using Joseph form for numerical stability.
///
/// P_updated = (I - K*H) * P * (I - K*H)^T + K * R * K^T
pub fn joseph_update<T: RealField + Copy>(
    state_cov: &StateCovariance<T>,
    kalman_gain: &KalmanGain<T>,
    obs_matrix: &ObservationMatrix<T>,
    meas_noise: &MeasurementCovariance<T>,
) -> StateCovariance<T> {
    let n = state_cov.dim();
    let i: DMatrix<T> = DMatrix::identity(n, n);
    let k_h = kalman_gain.as_matrix() * obs_matrix.as_matrix();
    let i_kh = i - k_h;

    let term1 = &i_kh * state_cov.as_matrix() * i_kh.transpose();
    let term2 =
        kalman_gain.as_matrix() * meas_noise.as_matrix() * kalman_gain.as_matrix().transpose();

    StateCovariance::from_matrix(term1 + term2)
}

/// Stacks blocks on the diagonal of a square matrix (block-diagonal R).
pub fn block_diagonal<T: RealField + Copy>(blocks: &[&DMatrix<T>]) -> DMatrix<T> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::zeros(n, n);
    let mut offset = 0;
    for block in blocks {
        let m = block.nrows();
        out.view_mut((offset, offset), (m, m)).copy_from(*block);
        offset += m;
    }
    out
}

/// Stacks matrices with equal column counts on top of each other.
pub fn vstack<T: RealField + Copy>(blocks: &[&DMatrix<T>], cols: usize) -> DMatrix<T> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::zeros(n, cols);
    let mut offset = 0;
    for block in blocks {
        let m = block.nrows();
        out.view_mut((offset, 0), (m, cols)).copy_from(*block);
        offset += m;
    }
    out
}
