//! Symbolic model descriptor
//!
//! A descriptor is a pure value: state layout, continuous-time dynamics,
//! discretization rule, optional error-state injection and the measurement
//! declarations. Building one performs no I/O, so models can be unit-tested
//! without touching the filesystem; [`crate::compiler`] turns it into
//! numeric evaluators.

use std::ops::Range;

use super::expr::Expr;
use crate::types::kind::ObservationKind;
use crate::{Error, Result};

// ============================================================================
// State layout
// ============================================================================

/// A named, contiguous slice of the state vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSlice {
    pub name: String,
    pub start: usize,
    pub len: usize,
}

impl StateSlice {
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    fn overlaps(&self, other: &StateSlice) -> bool {
        self.start < other.start + other.len && other.start < self.start + self.len
    }
}

/// Named slices over a state vector of dimension `D`.
///
/// Slices lie within `[0, D)` and never overlap. Gaps are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    dim: usize,
    slices: Vec<StateSlice>,
}

impl StateLayout {
    /// An empty layout over `dim` components.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            slices: Vec::new(),
        }
    }

    /// Adds a named slice.
    ///
    /// # Errors
    /// `Error::Configuration` if the slice is empty, leaves `[0, D)`, overlaps
    /// an existing slice or reuses a name.
    pub fn with_slice(mut self, name: impl Into<String>, range: Range<usize>) -> Result<Self> {
        let name = name.into();
        if range.start >= range.end {
            return Err(Error::Configuration(format!("state slice '{name}' is empty")));
        }
        if range.end > self.dim {
            return Err(Error::Configuration(format!(
                "state slice '{name}' ({}..{}) exceeds state dimension {}",
                range.start, range.end, self.dim
            )));
        }
        let slice = StateSlice {
            name,
            start: range.start,
            len: range.end - range.start,
        };
        if let Some(existing) = self.slices.iter().find(|s| s.name == slice.name) {
            return Err(Error::Configuration(format!(
                "state slice '{}' declared twice",
                existing.name
            )));
        }
        if let Some(existing) = self.slices.iter().find(|s| s.overlaps(&slice)) {
            return Err(Error::Configuration(format!(
                "state slice '{}' overlaps '{}'",
                slice.name, existing.name
            )));
        }
        self.slices.push(slice);
        Ok(self)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn slices(&self) -> &[StateSlice] {
        &self.slices
    }

    /// Index range of a named slice.
    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.slices.iter().find(|s| s.name == name).map(StateSlice::range)
    }

    /// Symbols `x[i]` for every index in a named slice.
    pub fn symbols(&self, name: &str) -> Option<Vec<Expr>> {
        self.range(name).map(|r| r.map(Expr::state).collect())
    }

    /// The single symbol of a one-component slice.
    pub fn scalar(&self, name: &str) -> Option<Expr> {
        let range = self.range(name)?;
        (range.len() == 1).then(|| Expr::state(range.start))
    }

    /// Symbols for the whole state vector.
    pub fn state_symbols(&self) -> Vec<Expr> {
        (0..self.dim).map(Expr::state).collect()
    }
}

// ============================================================================
// Dynamics and measurements
// ============================================================================

/// Rule turning continuous-time `state_dot` into a discrete transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discretization {
    /// Explicit first-order Euler: `f = x + dt * state_dot`.
    #[default]
    Euler,
}

impl Discretization {
    /// Discrete transition for every component.
    pub fn discretize(self, state_dot: &[Expr]) -> Vec<Expr> {
        match self {
            Discretization::Euler => state_dot
                .iter()
                .enumerate()
                .map(|(i, rate)| Expr::state(i) + Expr::dt() * rate.clone())
                .collect(),
        }
    }
}

/// One measurement declaration: `h_kind(x, p)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDecl {
    pub kind: ObservationKind,
    pub exprs: Vec<Expr>,
    /// Number of extra per-row parameters `p[k]` the expressions may use.
    pub n_params: usize,
}

impl ObservationDecl {
    #[inline]
    pub fn dim(&self) -> usize {
        self.exprs.len()
    }
}

/// Declarative description of a process model and its measurement models.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub name: String,
    pub layout: StateLayout,
    pub dim_state_err: usize,
    pub state_dot: Vec<Expr>,
    pub discretization: Discretization,
    /// `x ⊞ δ` over `State` and `ErrState` symbols; `None` means additive.
    pub inject: Option<Vec<Expr>>,
    pub observations: Vec<ObservationDecl>,
}

impl ModelDescriptor {
    /// A descriptor with zero dynamics and an additive error state.
    pub fn new(name: impl Into<String>, layout: StateLayout) -> Self {
        let dim = layout.dim();
        Self {
            name: name.into(),
            layout,
            dim_state_err: dim,
            state_dot: vec![Expr::zero(); dim],
            discretization: Discretization::Euler,
            inject: None,
            observations: Vec::new(),
        }
    }

    /// Sets the continuous-time derivative of the state.
    pub fn with_dynamics(mut self, state_dot: Vec<Expr>) -> Self {
        self.state_dot = state_dot;
        self
    }

    pub fn with_discretization(mut self, discretization: Discretization) -> Self {
        self.discretization = discretization;
        self
    }

    /// Declares a reduced error state of dimension `dim_state_err` with its injection `x ⊞ δ`.
    pub fn with_error_state(mut self, dim_state_err: usize, inject: Vec<Expr>) -> Self {
        self.dim_state_err = dim_state_err;
        self.inject = Some(inject);
        self
    }

    /// Declares a measurement for `kind`. `params` is the number of extra
    /// per-row inputs the expressions use, `None` when there are none.
    pub fn observe(mut self, kind: ObservationKind, exprs: Vec<Expr>, params: Option<usize>) -> Self {
        self.observations.push(ObservationDecl {
            kind,
            exprs,
            n_params: params.unwrap_or(0),
        });
        self
    }

    #[inline]
    pub fn dim_state(&self) -> usize {
        self.layout.dim()
    }

    #[inline]
    pub fn dim_state_err(&self) -> usize {
        self.dim_state_err
    }

    /// Discrete transition `f(x, dt)` under the configured rule.
    pub fn transition(&self) -> Vec<Expr> {
        self.discretization.discretize(&self.state_dot)
    }

    /// Looks up a declaration by kind.
    pub fn observation(&self, kind: ObservationKind) -> Option<&ObservationDecl> {
        self.observations.iter().find(|o| o.kind == kind)
    }
}
