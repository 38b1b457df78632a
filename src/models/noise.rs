//! Observation noise
//!
//! One covariance block per observation kind, broadcast to every row of a
//! batch.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, RealField};
use num_traits::Float;

use crate::compiler::CompiledModel;
use crate::types::kind::ObservationKind;
use crate::types::spaces::MeasurementCovariance;
use crate::{Error, Result};

/// Per-kind measurement noise blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationNoise<T: RealField> {
    blocks: BTreeMap<ObservationKind, MeasurementCovariance<T>>,
}

impl<T: RealField + Float + Copy> ObservationNoise<T> {
    /// A model with no registered kinds.
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: ObservationKind, block: DMatrix<T>) -> Result<Self> {
        self.register(kind, block)?;
        Ok(self)
    }

    /// Builder form of [`register_diagonal`](Self::register_diagonal).
    pub fn with_diagonal(mut self, kind: ObservationKind, variances: &[T]) -> Result<Self> {
        self.register_diagonal(kind, variances)?;
        Ok(self)
    }

    /// Registers (or replaces) the noise block for `kind`.
    ///
    /// # Errors
    /// `Error::Configuration` if the block is empty, not square, not finite
    /// or not symmetric.
    pub fn register(&mut self, kind: ObservationKind, block: DMatrix<T>) -> Result<()> {
        let block = MeasurementCovariance::from_matrix(block);
        validate_block(kind, &block)?;
        self.blocks.insert(kind, block);
        Ok(())
    }

    /// Registers a diagonal block from per-component variances.
    pub fn register_diagonal(&mut self, kind: ObservationKind, variances: &[T]) -> Result<()> {
        self.register(kind, MeasurementCovariance::from_diagonal(variances).into_matrix())
    }

    /// Registered block for `kind`.
    pub fn block(&self, kind: ObservationKind) -> Option<&MeasurementCovariance<T>> {
        self.blocks.get(&kind)
    }

    /// Measurement dimension registered for `kind`.
    pub fn dim(&self, kind: ObservationKind) -> Option<usize> {
        self.blocks.get(&kind).map(MeasurementCovariance::dim)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ObservationKind> + '_ {
        self.blocks.keys().copied()
    }

    /// `n` identical copies of the block for `kind`, one per batch row.
    ///
    /// # Errors
    /// `Error::Configuration` for a kind without a registered block.
    pub fn get_r(&self, kind: ObservationKind, n: usize) -> Result<Vec<MeasurementCovariance<T>>> {
        let block = self
            .blocks
            .get(&kind)
            .ok_or_else(|| Error::Configuration(format!("no observation noise registered for {kind}")))?;
        Ok(vec![block.clone(); n])
    }

    /// Checks every registered block against the model's measurement dimensions.
    ///
    /// Blocks for kinds the model does not declare are rejected as well.
    pub fn check_against(&self, model: &CompiledModel) -> Result<()> {
        for (kind, block) in &self.blocks {
            match model.observation(*kind) {
                Some(obs) if obs.dim == block.dim() => {}
                Some(obs) => {
                    return Err(Error::Configuration(format!(
                        "noise for {kind} is {0}x{0} but the measurement has dimension {1}",
                        block.dim(),
                        obs.dim
                    )))
                }
                None => {
                    return Err(Error::Configuration(format!(
                        "noise registered for {kind}, which model '{}' does not declare",
                        model.name()
                    )))
                }
            }
        }
        Ok(())
    }
}

impl<T: RealField + Float + Copy> Default for ObservationNoise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared check for registered blocks and per-call overrides.
pub(crate) fn validate_block<T: RealField + Float + Copy>(
    kind: ObservationKind,
    block: &MeasurementCovariance<T>,
) -> Result<()> {
    if block.dim() == 0 || !block.is_square() {
        let (r, c) = block.as_matrix().shape();
        return Err(Error::Configuration(format!(
            "noise for {kind} must be a non-empty square matrix, got {r}x{c}"
        )));
    }
    if !block.is_finite() {
        return Err(Error::Configuration(format!("noise for {kind} is not finite")));
    }
    let scale = block.as_matrix().amax();
    let tol = nalgebra::convert::<f64, T>(1e-9) * (T::one() + scale);
    if !block.is_symmetric(tol) {
        return Err(Error::Configuration(format!("noise for {kind} is not symmetric")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dmatrix;

    const POSITION: ObservationKind = ObservationKind::new(2);
    const PAIR: ObservationKind = ObservationKind::new(3);

    #[test]
    fn test_get_r_broadcasts() {
        let noise = ObservationNoise::new()
            .with(POSITION, dmatrix![0.01_f64])
            .unwrap()
            .with(PAIR, dmatrix![1.0, 0.2; 0.2, 2.0])
            .unwrap();

        for n in 0..5 {
            let r = noise.get_r(PAIR, n).unwrap();
            assert_eq!(r.len(), n);
            for block in &r {
                assert_eq!(block, noise.block(PAIR).unwrap());
            }
        }
        assert!(noise.get_r(POSITION, 0).unwrap().is_empty());
        assert_eq!(noise.get_r(POSITION, 1).unwrap()[0].as_matrix()[(0, 0)], 0.01);
    }

    #[test]
    fn test_unknown_kind() {
        let noise: ObservationNoise<f64> = ObservationNoise::new();
        assert!(matches!(noise.get_r(POSITION, 1), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_malformed_blocks_rejected() {
        let mut noise = ObservationNoise::new();
        assert!(noise.register(POSITION, DMatrix::<f64>::zeros(1, 2)).is_err());
        assert!(noise.register(POSITION, DMatrix::<f64>::zeros(0, 0)).is_err());
        assert!(noise.register(POSITION, dmatrix![f64::NAN]).is_err());
        assert!(noise.register(PAIR, dmatrix![1.0, 0.5; 0.0, 1.0]).is_err());
        assert!(noise.dim(POSITION).is_none());
    }

    #[test]
    fn test_diagonal_registration() {
        let noise = ObservationNoise::new().with_diagonal(PAIR, &[1.0_f64, 4.0]).unwrap();
        assert_eq!(noise.dim(PAIR), Some(2));
        assert_eq!(noise.block(PAIR).unwrap().diagonal(), vec![1.0, 4.0]);
        assert_eq!(noise.kinds().collect::<Vec<_>>(), vec![PAIR]);
    }
}
