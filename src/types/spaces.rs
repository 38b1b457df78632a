//! Vector space markers and typed vectors
//!
//! This module provides type-safe vectors that cannot be accidentally mixed
//! across different mathematical spaces (state, error state, measurement,
//! innovation). Dimensions are only known once a compiled model is loaded,
//! so the wrappers sit on top of nalgebra's dynamically sized storage.

use ::core::marker::PhantomData;
use ::core::ops::{Add, Mul, Neg, Sub};
use nalgebra::{DMatrix, DVector, RealField, Scalar};
use num_traits::Float;

// ============================================================================
// Vector Space Markers
// ============================================================================

/// Marker type for full state vectors (dimension `D`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSpace;

/// Marker type for error-state vectors (dimension `D_err`)
///
/// Covariances and linearizations live in this space. For models without a
/// state injection it coincides with [`StateSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStateSpace;

/// Marker type for measurement space vectors (e.g., sensor observations)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementSpace;

/// Marker type for innovation vectors (measurement - predicted measurement)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnovationSpace;

// ============================================================================
// Typed Vector
// ============================================================================

/// A dynamically sized vector tagged with the mathematical space it belongs to.
///
/// The `Space` parameter ensures that vectors from different spaces cannot
/// be accidentally mixed in operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector<T: Scalar, Space> {
    inner: DVector<T>,
    _marker: PhantomData<Space>,
}

impl<T: Scalar, Space> Vector<T, Space> {
    /// Creates a vector from owned components.
    #[inline]
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            inner: DVector::from_vec(data),
            _marker: PhantomData,
        }
    }

    /// Creates a vector by copying a slice.
    #[inline]
    pub fn from_slice(data: &[T]) -> Self {
        Self {
            inner: DVector::from_column_slice(data),
            _marker: PhantomData,
        }
    }

    /// Wraps an nalgebra vector.
    #[inline]
    pub fn from_dvector(inner: DVector<T>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns a reference to the underlying nalgebra vector.
    #[inline]
    pub fn as_dvector(&self) -> &DVector<T> {
        &self.inner
    }

    /// Consumes self and returns the underlying nalgebra vector.
    #[inline]
    pub fn into_dvector(self) -> DVector<T> {
        self.inner
    }

    /// Returns the components as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice()
    }

    /// Number of components.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` for a zero-dimensional vector.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Access element at index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.inner.get(index)
    }

    /// Access element at index (unchecked).
    ///
    /// # Panics
    /// Panics if index is out of bounds.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn index(&self, index: usize) -> &T {
        &self.inner[index]
    }
}

impl<T: RealField + Copy, Space> Vector<T, Space> {
    /// Creates a zero vector of the given dimension.
    #[inline]
    pub fn zeros(dim: usize) -> Self {
        Self {
            inner: DVector::zeros(dim),
            _marker: PhantomData,
        }
    }

    /// Computes the Euclidean norm.
    #[inline]
    pub fn norm(&self) -> T {
        self.inner.norm()
    }

    /// Scales the vector by a scalar.
    #[inline]
    pub fn scale(&self, s: T) -> Self {
        Self {
            inner: self.inner.scale(s),
            _marker: PhantomData,
        }
    }
}

impl<T: RealField + Float + Copy, Space> Vector<T, Space> {
    /// Returns `true` if every component is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.inner.iter().all(|v| Float::is_finite(*v))
    }
}

// ============================================================================
// Type Aliases
// ============================================================================

/// A full state vector.
pub type StateVector<T> = Vector<T, StateSpace>;

/// An error-state vector (correction applied through the state injection).
pub type ErrorState<T> = Vector<T, ErrorStateSpace>;

/// A measurement vector in measurement space.
pub type Measurement<T> = Vector<T, MeasurementSpace>;

/// An innovation vector (measurement residual) in innovation space.
pub type Innovation<T> = Vector<T, InnovationSpace>;

// ============================================================================
// Operations: Same-Space Addition/Subtraction
// ============================================================================

impl<T: RealField + Copy, Space> Add for Vector<T, Space> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner + rhs.inner,
            _marker: PhantomData,
        }
    }
}

impl<T: RealField + Copy, Space> Sub for Vector<T, Space> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            inner: self.inner - rhs.inner,
            _marker: PhantomData,
        }
    }
}

impl<T: RealField + Copy, Space> Neg for Vector<T, Space> {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self::Output {
        Self {
            inner: -self.inner,
            _marker: PhantomData,
        }
    }
}

impl<T: RealField + Copy, Space> Mul<T> for Vector<T, Space> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: T) -> Self::Output {
        Self {
            inner: self.inner * rhs,
            _marker: PhantomData,
        }
    }
}

// ============================================================================
// Special Operation: Measurement - Measurement = Innovation
// ============================================================================

/// Trait for computing innovation (residual) from measurements.
///
/// This is a separate trait because subtracting two measurements
/// produces an innovation vector, not another measurement.
pub trait ComputeInnovation<T: RealField> {
    /// Computes the innovation between this measurement and a predicted measurement.
    fn innovation(&self, predicted: &Measurement<T>) -> Innovation<T>;
}

impl<T: RealField + Copy> ComputeInnovation<T> for Measurement<T> {
    #[inline]
    fn innovation(&self, predicted: &Measurement<T>) -> Innovation<T> {
        Innovation {
            inner: &self.inner - &predicted.inner,
            _marker: PhantomData,
        }
    }
}

// ============================================================================
// Covariance Matrix
// ============================================================================

/// A covariance matrix bound to a specific vector space.
///
/// Covariance matrices are symmetric positive semi-definite matrices
/// that describe the uncertainty in a vector estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance<T: Scalar, Space> {
    inner: DMatrix<T>,
    _marker: PhantomData<Space>,
}

impl<T: Scalar, Space> Covariance<T, Space> {
    /// Creates a covariance matrix from a raw matrix.
    ///
    /// # Safety (logical)
    /// The caller should ensure the matrix is symmetric and positive semi-definite.
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

    /// Side length of the (square) matrix.
    #[inline]
    pub fn dim(&self) -> usize {
        self.inner.nrows()
    }

    /// Returns `true` if the matrix is square.
    #[inline]
    pub fn is_square(&self) -> bool {
        self.inner.is_square()
    }
}

impl<T: RealField + Copy, Space> Covariance<T, Space> {
    /// Creates a zero covariance matrix.
    #[inline]
    pub fn zeros(dim: usize) -> Self {
        Self::from_matrix(DMatrix::zeros(dim, dim))
    }

    /// Creates an identity covariance matrix.
    #[inline]
    pub fn identity(dim: usize) -> Self {
        Self::from_matrix(DMatrix::identity(dim, dim))
    }

    /// Creates a diagonal covariance matrix.
    #[inline]
    pub fn from_diagonal(diag: &[T]) -> Self {
        Self::from_matrix(DMatrix::from_diagonal(&DVector::from_column_slice(diag)))
    }

    /// Scales the covariance matrix.
    #[inline]
    pub fn scale(&self, s: T) -> Self {
        Self::from_matrix(self.inner.scale(s))
    }

    /// Adds two covariance matrices.
    #[inline]
    pub fn add(&self, other: &Self) -> Self {
        Self::from_matrix(&self.inner + &other.inner)
    }

    /// Computes the trace of the covariance matrix.
    #[inline]
    pub fn trace(&self) -> T {
        self.inner.trace()
    }

    /// Returns the diagonal (per-component variances).
    #[inline]
    pub fn diagonal(&self) -> Vec<T> {
        self.inner.diagonal().iter().copied().collect()
    }

    /// Returns the symmetric part `(P + Pᵀ) / 2`.
    ///
    /// Applied after every propagation so floating-point asymmetry cannot
    /// accumulate over many iterations.
    #[inline]
    pub fn symmetrized(&self) -> Self {
        let half: T = nalgebra::convert(0.5);
        Self::from_matrix((&self.inner + self.inner.transpose()) * half)
    }

    /// Returns `true` if `|P_ij - P_ji| <= tol` for all entries.
    pub fn is_symmetric(&self, tol: T) -> bool {
        if !self.inner.is_square() {
            return false;
        }
        let n = self.inner.nrows();
        (0..n).all(|i| (0..i).all(|j| (self.inner[(i, j)] - self.inner[(j, i)]).abs() <= tol))
    }

    /// Computes the Cholesky decomposition (lower triangular).
    #[inline]
    pub fn cholesky(&self) -> Option<DMatrix<T>> {
        nalgebra::Cholesky::new(self.inner.clone()).map(|c| c.l())
    }
}

impl<T: RealField + Float + Copy, Space> Covariance<T, Space> {
    /// Returns `true` if every entry is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.inner.iter().all(|v| Float::is_finite(*v))
    }
}

impl<T: RealField + Copy, Space> Add for Covariance<T, Space> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::from_matrix(self.inner + rhs.inner)
    }
}

// ============================================================================
// Type Aliases for Covariance
// ============================================================================

/// State covariance. Lives in error-state space (`D_err × D_err`).
pub type StateCovariance<T> = Covariance<T, ErrorStateSpace>;

/// Covariance matrix in measurement space.
pub type MeasurementCovariance<T> = Covariance<T, MeasurementSpace>;

/// Covariance matrix in innovation space.
///
/// The innovation covariance S = H*P*H' + R is built from measurement-space
/// quantities; it is typed separately because only innovations are whitened
/// with it.
pub type InnovationCovariance<T> = Covariance<T, InnovationSpace>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_vector_operations() {
        let v1: StateVector<f64> = StateVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let v2: StateVector<f64> = StateVector::from_slice(&[0.5, 1.0, 1.5, 2.0]);

        let sum = v1 + v2;
        assert_eq!(sum.len(), 4);
        assert!((sum.index(0) - 1.5).abs() < 1e-10);
        assert!((sum.index(1) - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_measurement_to_innovation() {
        let actual: Measurement<f64> = Measurement::from_vec(vec![10.0, 20.0]);
        let predicted: Measurement<f64> = Measurement::from_vec(vec![9.5, 19.0]);

        let innovation = actual.innovation(&predicted);
        assert!((innovation.index(0) - 0.5).abs() < 1e-10);
        assert!((innovation.index(1) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_covariance_operations() {
        let cov: StateCovariance<f64> = StateCovariance::identity(2);
        assert_eq!(cov.dim(), 2);
        assert!((cov.trace() - 2.0).abs() < 1e-10);
        assert!(cov.cholesky().is_some());
    }

    #[test]
    fn test_singular_covariance_has_no_cholesky_factor() {
        let singular: StateCovariance<f64> =
            StateCovariance::from_matrix(nalgebra::dmatrix![1.0, 1.0; 1.0, 1.0]);
        assert!(singular.cholesky().is_none());
    }

    #[test]
    fn test_symmetrize() {
        let skewed: StateCovariance<f64> =
            StateCovariance::from_matrix(nalgebra::dmatrix![2.0, 1.0; 0.0, 3.0]);
        assert!(!skewed.is_symmetric(1e-12));

        let sym = skewed.symmetrized();
        assert!(sym.is_symmetric(1e-12));
        assert!((sym.as_matrix()[(0, 1)] - 0.5).abs() < 1e-12);
        assert!((sym.as_matrix()[(1, 1)] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_finiteness() {
        let v: StateVector<f64> = StateVector::from_vec(vec![1.0, f64::NAN]);
        assert!(!v.is_finite());

        let p: StateCovariance<f64> = StateCovariance::from_diagonal(&[1.0, 2.0]);
        assert!(p.is_finite());
        assert_eq!(p.diagonal(), vec![1.0, 2.0]);
    }
}
