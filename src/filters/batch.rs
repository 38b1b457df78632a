//! Observation batches and step results

use nalgebra::RealField;
use num_traits::Float;

use crate::types::kind::ObservationKind;
use crate::types::spaces::{Innovation, Measurement, StateCovariance, StateVector};
use crate::types::transforms::ErrorTransitionMatrix;

// ============================================================================
// Input
// ============================================================================

/// One measurement row plus the extra parameters its kind declares.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRow<T: RealField> {
    pub z: Measurement<T>,
    pub params: Vec<T>,
}

impl<T: RealField + Float + Copy> ObservationRow<T> {
    /// A row without extra parameters.
    pub fn new(z: &[T]) -> Self {
        Self {
            z: Measurement::from_slice(z),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: &[T]) -> Self {
        self.params = params.to_vec();
        self
    }
}

impl<T: RealField + Float + Copy> From<Measurement<T>> for ObservationRow<T> {
    fn from(z: Measurement<T>) -> Self {
        Self { z, params: Vec::new() }
    }
}

/// All rows of one kind observed at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch<T: RealField> {
    pub time: T,
    pub kind: ObservationKind,
    pub rows: Vec<ObservationRow<T>>,
}

impl<T: RealField + Float + Copy> ObservationBatch<T> {
    pub fn new(time: T, kind: ObservationKind) -> Self {
        Self {
            time,
            kind,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: ObservationRow<T>) -> Self {
        self.rows.push(row);
        self
    }

    /// Appends plain measurement rows.
    pub fn with_measurements(mut self, rows: &[&[T]]) -> Self {
        self.rows.extend(rows.iter().map(|z| ObservationRow::new(z)));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// Output
// ============================================================================

/// A filter estimate at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate<T: RealField> {
    pub state: StateVector<T>,
    pub covariance: StateCovariance<T>,
}

/// What happened to the rows of one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReport {
    pub kind: ObservationKind,
    /// Rows received
    pub rows: usize,
    /// Rows that contributed to the correction
    pub accepted: usize,
    /// Rows with a non-finite innovation or an innovation covariance that is
    /// not positive definite
    pub degenerate: usize,
    /// Rows rejected by the Mahalanobis gate
    pub gated: usize,
    /// The stacked innovation covariance failed to factor; nothing was applied
    pub batch_skipped: bool,
}

impl UpdateReport {
    pub(crate) fn new(kind: ObservationKind, rows: usize) -> Self {
        Self {
            kind,
            rows,
            accepted: 0,
            degenerate: 0,
            gated: 0,
            batch_skipped: false,
        }
    }

    /// `true` when the state was corrected.
    #[inline]
    pub fn applied(&self) -> bool {
        self.accepted > 0 && !self.batch_skipped
    }
}

/// Result of one `predict_and_update_batch` step.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult<T: RealField> {
    pub time: T,
    pub kind: ObservationKind,
    /// Estimate after prediction, before the update
    pub prior: Estimate<T>,
    /// Estimate after the update
    pub posterior: Estimate<T>,
    /// Error-state transition used by the prediction; `None` when the step
    /// only initialized the filter time
    pub transition: Option<ErrorTransitionMatrix<T>>,
    /// Innovation of each accepted row, evaluated at the prior
    pub innovations: Vec<Innovation<T>>,
    pub report: UpdateReport,
}

/// Cumulative counters over a filter's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterStats {
    pub predictions: usize,
    /// Batches that corrected the estimate
    pub updates: usize,
    pub rows_accepted: usize,
    pub rows_degenerate: usize,
    pub rows_gated: usize,
    pub batches_skipped: usize,
}

impl FilterStats {
    pub(crate) fn record(&mut self, report: &UpdateReport) {
        if report.applied() {
            self.updates += 1;
        }
        self.rows_accepted += report.accepted;
        self.rows_degenerate += report.degenerate;
        self.rows_gated += report.gated;
        if report.batch_skipped {
            self.batches_skipped += 1;
        }
    }
}
