//! Model compilation
//!
//! Turns a [`ModelDescriptor`] into a [`CompiledModel`]: every Jacobian is
//! derived symbolically and each evaluator is emitted as a [`Program`].
//! Compilation is strict. Anything that would make the runtime evaluate an
//! undefined symbol or a structurally singular measurement fails here with
//! [`Error::Compilation`].

pub mod artifact;
pub mod program;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::symbolic::descriptor::ModelDescriptor;
use crate::symbolic::expr::{jacobian, Expr, Var};
use crate::types::kind::ObservationKind;
use crate::{Error, Result};

pub use artifact::{artifact_path, compile_to_dir, load_artifact, write_artifact};
pub use program::{Inputs, Op, Program};

/// Derives numeric evaluators from a symbolic description.
pub trait ModelCompiler {
    fn compile(&self, descriptor: &ModelDescriptor) -> Result<CompiledModel>;
}

// ============================================================================
// Compiled model
// ============================================================================

/// Evaluators for one observation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledObservation {
    pub kind: ObservationKind,
    pub dim: usize,
    pub n_params: usize,
    /// `h(x, p)`, `dim × 1`
    pub h: Program,
    /// `∂h/∂x`, `dim × D`
    pub jacobian: Program,
}

/// Evaluators for a reduced error state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledInjection {
    /// `x ⊞ δ`, `D × 1`
    pub inject: Program,
    /// `∂(x ⊞ δ)/∂δ` at `δ = 0`, `D × D_err`
    pub jacobian: Program,
}

/// Immutable output of a [`ModelCompiler`].
///
/// Shared read-only between filters; see [`crate::models`] for the
/// evaluator traits it implements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledModel {
    name: String,
    dim_state: usize,
    dim_state_err: usize,
    /// `f(x, dt)`, `D × 1`
    transition: Program,
    /// `∂f/∂x`, `D × D`
    transition_jacobian: Program,
    injection: Option<CompiledInjection>,
    observations: Vec<CompiledObservation>,
}

impl CompiledModel {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn dim_state(&self) -> usize {
        self.dim_state
    }

    #[inline]
    pub fn dim_state_err(&self) -> usize {
        self.dim_state_err
    }

    pub fn transition_program(&self) -> &Program {
        &self.transition
    }

    pub fn transition_jacobian_program(&self) -> &Program {
        &self.transition_jacobian
    }

    pub fn injection(&self) -> Option<&CompiledInjection> {
        self.injection.as_ref()
    }

    /// Compiled evaluators for `kind`, if declared.
    pub fn observation(&self, kind: ObservationKind) -> Option<&CompiledObservation> {
        self.observations.iter().find(|o| o.kind == kind)
    }

    /// Declared kinds in declaration order.
    pub fn kinds(&self) -> impl Iterator<Item = ObservationKind> + '_ {
        self.observations.iter().map(|o| o.kind)
    }

    /// Checks program shapes and inputs against the declared dimensions.
    ///
    /// Run on every model loaded from disk.
    pub fn validate(&self) -> Result<()> {
        let (d, d_err) = (self.dim_state, self.dim_state_err);
        check_dims(d, d_err, self.injection.is_some())?;

        check_program(&self.transition, "transition", (d, 1), |v| {
            matches!(v, Var::State(i) if i < d) || v == Var::Dt
        })?;
        check_program(&self.transition_jacobian, "transition jacobian", (d, d), |v| {
            matches!(v, Var::State(i) if i < d) || v == Var::Dt
        })?;

        if let Some(injection) = &self.injection {
            check_program(&injection.inject, "injection", (d, 1), |v| match v {
                Var::State(i) => i < d,
                Var::ErrState(j) => j < d_err,
                _ => false,
            })?;
            check_program(&injection.jacobian, "injection jacobian", (d, d_err), |v| {
                matches!(v, Var::State(i) if i < d)
            })?;
        }

        let mut seen = BTreeSet::new();
        for obs in &self.observations {
            if !seen.insert(obs.kind) {
                return Err(Error::Compilation(format!("{} declared twice", obs.kind)));
            }
            if obs.dim == 0 {
                return Err(Error::Compilation(format!("{} has an empty measurement", obs.kind)));
            }
            let n_params = obs.n_params;
            let allowed = |v: Var| match v {
                Var::State(i) => i < d,
                Var::Param(k) => k < n_params,
                _ => false,
            };
            let label = format!("measurement {}", obs.kind);
            check_program(&obs.h, &label, (obs.dim, 1), allowed)?;
            check_program(&obs.jacobian, &label, (obs.dim, d), allowed)?;
        }
        Ok(())
    }
}

fn check_dims(d: usize, d_err: usize, has_injection: bool) -> Result<()> {
    if d == 0 {
        return Err(Error::Compilation("state dimension must be positive".into()));
    }
    if d_err == 0 || d_err > d {
        return Err(Error::Compilation(format!(
            "error-state dimension {d_err} must lie in 1..={d}"
        )));
    }
    if d_err != d && !has_injection {
        return Err(Error::Compilation(format!(
            "error-state dimension {d_err} differs from state dimension {d} but no injection is declared"
        )));
    }
    Ok(())
}

fn check_program(
    program: &Program,
    label: &str,
    shape: (usize, usize),
    allowed: impl Fn(Var) -> bool,
) -> Result<()> {
    program
        .validate()
        .map_err(|e| Error::Compilation(format!("{label}: {e}")))?;
    if program.shape() != shape {
        return Err(Error::Compilation(format!(
            "{label}: expected {}x{} outputs, found {}x{}",
            shape.0,
            shape.1,
            program.shape().0,
            program.shape().1
        )));
    }
    if let Some(bad) = program.inputs().into_iter().find(|v| !allowed(*v)) {
        return Err(Error::Compilation(format!("{label}: reads unbound symbol {bad}")));
    }
    Ok(())
}

// ============================================================================
// Symbolic compiler
// ============================================================================

/// Exact symbolic differentiation followed by program emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolicCompiler;

impl SymbolicCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ModelCompiler for SymbolicCompiler {
    fn compile(&self, descriptor: &ModelDescriptor) -> Result<CompiledModel> {
        let d = descriptor.dim_state();
        let d_err = descriptor.dim_state_err();
        check_dims(d, d_err, descriptor.inject.is_some())?;

        if descriptor.state_dot.len() != d {
            return Err(Error::Compilation(format!(
                "state_dot has {} components for a state of dimension {d}",
                descriptor.state_dot.len()
            )));
        }
        check_exprs(&descriptor.state_dot, "dynamics", |v| match v {
            Var::State(i) => i < d,
            Var::Dt => true,
            _ => false,
        })?;

        let state_vars: Vec<Var> = (0..d).map(Var::State).collect();
        let f = descriptor.transition();
        let f_jac = jacobian(&f, &state_vars);

        let injection = match &descriptor.inject {
            Some(inject) => Some(compile_injection(inject, d, d_err)?),
            None => None,
        };

        let mut seen = BTreeSet::new();
        let mut observations = Vec::with_capacity(descriptor.observations.len());
        for decl in &descriptor.observations {
            if !seen.insert(decl.kind) {
                return Err(Error::Compilation(format!("{} declared twice", decl.kind)));
            }
            if decl.exprs.is_empty() {
                return Err(Error::Compilation(format!("{} has an empty measurement", decl.kind)));
            }
            let n_params = decl.n_params;
            check_exprs(&decl.exprs, &format!("measurement {}", decl.kind), |v| match v {
                Var::State(i) => i < d,
                Var::Param(k) => k < n_params,
                _ => false,
            })?;

            let h_jac = jacobian(&decl.exprs, &state_vars);
            if h_jac.iter().flatten().all(Expr::is_zero) {
                return Err(Error::Compilation(format!(
                    "measurement {} does not depend on the state",
                    decl.kind
                )));
            }
            observations.push(CompiledObservation {
                kind: decl.kind,
                dim: decl.dim(),
                n_params,
                h: Program::vector(&decl.exprs),
                jacobian: Program::matrix(&h_jac, d),
            });
        }

        let model = CompiledModel {
            name: descriptor.name.clone(),
            dim_state: d,
            dim_state_err: d_err,
            transition: Program::vector(&f),
            transition_jacobian: Program::matrix(&f_jac, d),
            injection,
            observations,
        };

        log::info!(
            "compiled model '{}': D={}, D_err={}, {} measurement kind(s), {} transition ops",
            model.name,
            d,
            d_err,
            model.observations.len(),
            model.transition.len() + model.transition_jacobian.len()
        );
        Ok(model)
    }
}

fn compile_injection(inject: &[Expr], d: usize, d_err: usize) -> Result<CompiledInjection> {
    if inject.len() != d {
        return Err(Error::Compilation(format!(
            "injection has {} components for a state of dimension {d}",
            inject.len()
        )));
    }
    check_exprs(inject, "injection", |v| match v {
        Var::State(i) => i < d,
        Var::ErrState(j) => j < d_err,
        _ => false,
    })?;

    let err_vars: Vec<Var> = (0..d_err).map(Var::ErrState).collect();
    let zero = Expr::zero();
    let g: Vec<Vec<Expr>> = jacobian(inject, &err_vars)
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|entry| err_vars.iter().fold(entry, |e, v| e.substitute(*v, &zero)))
                .collect()
        })
        .collect();

    Ok(CompiledInjection {
        inject: Program::vector(inject),
        jacobian: Program::matrix(&g, d_err),
    })
}

fn check_exprs(exprs: &[Expr], label: &str, allowed: impl Fn(Var) -> bool) -> Result<()> {
    for expr in exprs {
        if let Some(bad) = expr.variables().into_iter().find(|v| !allowed(*v)) {
            return Err(Error::Compilation(format!("{label}: symbol {bad} is not allowed here")));
        }
        if expr.constants().iter().any(|c| !c.is_finite()) {
            return Err(Error::Compilation(format!("{label}: non-finite constant")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::descriptor::StateLayout;

    const POSITION: ObservationKind = ObservationKind::new(2);

    fn kinematic() -> ModelDescriptor {
        let layout = StateLayout::new(2)
            .with_slice("position", 0..1)
            .unwrap()
            .with_slice("velocity", 1..2)
            .unwrap();
        let velocity = layout.scalar("velocity").unwrap();
        let position = layout.scalar("position").unwrap();
        ModelDescriptor::new("kinematic", layout)
            .with_dynamics(vec![velocity, Expr::zero()])
            .observe(POSITION, vec![position], None)
    }

    #[test]
    fn test_kinematic_compiles() {
        let model = SymbolicCompiler.compile(&kinematic()).unwrap();
        assert_eq!(model.dim_state(), 2);
        assert_eq!(model.dim_state_err(), 2);
        assert!(model.injection().is_none());
        assert_eq!(model.observation(POSITION).unwrap().dim, 1);
        assert_eq!(model.kinds().collect::<Vec<_>>(), vec![POSITION]);
        model.validate().unwrap();

        let state = [1.0_f64, 2.0];
        let jac = model
            .transition_jacobian_program()
            .eval_matrix(&Inputs::state(&state).with_dt(0.5));
        assert_eq!(jac[(0, 0)], 1.0);
        assert_eq!(jac[(0, 1)], 0.5);
        assert_eq!(jac[(1, 0)], 0.0);
        assert_eq!(jac[(1, 1)], 1.0);
    }

    #[test]
    fn test_wrong_state_dot_length() {
        let desc = kinematic().with_dynamics(vec![Expr::state(1)]);
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_reduced_error_state_requires_injection() {
        let mut desc = kinematic();
        desc.dim_state_err = 1;
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));

        let desc = kinematic().with_error_state(3, vec![Expr::state(0), Expr::state(1)]);
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_injection_length_checked() {
        let desc = kinematic().with_error_state(1, vec![Expr::state(0) + Expr::err_state(0)]);
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_symbols_out_of_place() {
        let dt_in_h = kinematic().observe(ObservationKind::new(3), vec![Expr::state(0) * Expr::dt()], None);
        assert!(matches!(SymbolicCompiler.compile(&dt_in_h), Err(Error::Compilation(_))));

        let err_in_f = kinematic().with_dynamics(vec![Expr::err_state(0), Expr::zero()]);
        assert!(matches!(SymbolicCompiler.compile(&err_in_f), Err(Error::Compilation(_))));

        let out_of_range = kinematic().observe(ObservationKind::new(3), vec![Expr::state(5)], None);
        assert!(matches!(SymbolicCompiler.compile(&out_of_range), Err(Error::Compilation(_))));

        let undeclared_param =
            kinematic().observe(ObservationKind::new(3), vec![Expr::state(0) * Expr::param(0)], None);
        assert!(matches!(SymbolicCompiler.compile(&undeclared_param), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_duplicate_and_empty_measurements() {
        let dup = kinematic().observe(POSITION, vec![Expr::state(1)], None);
        assert!(matches!(SymbolicCompiler.compile(&dup), Err(Error::Compilation(_))));

        let empty = kinematic().observe(ObservationKind::new(3), vec![], None);
        assert!(matches!(SymbolicCompiler.compile(&empty), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_state_independent_measurement_is_singular() {
        let desc = kinematic().observe(ObservationKind::new(3), vec![Expr::param(0) * 2.0], Some(1));
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_non_finite_constant_rejected() {
        let desc = kinematic().with_dynamics(vec![Expr::state(1) * f64::INFINITY, Expr::zero()]);
        assert!(matches!(SymbolicCompiler.compile(&desc), Err(Error::Compilation(_))));
    }

    #[test]
    fn test_injection_jacobian_at_zero_error() {
        // unit circle: x = (cos θ, sin θ), δ rotates the angle
        let layout = StateLayout::new(2).with_slice("direction", 0..2).unwrap();
        let (c, s, d) = (Expr::state(0), Expr::state(1), Expr::err_state(0));
        let inject = vec![
            c.clone() * d.clone().cos() - s.clone() * d.clone().sin(),
            s.clone() * d.clone().cos() + c.clone() * d.sin(),
        ];
        let desc = ModelDescriptor::new("circle", layout).with_error_state(1, inject);
        let model = SymbolicCompiler.compile(&desc).unwrap();
        model.validate().unwrap();

        let injection = model.injection().unwrap();
        assert_eq!(injection.jacobian.shape(), (2, 1));
        let state = [0.6_f64, 0.8];
        let g = injection.jacobian.eval_matrix(&Inputs::state(&state));
        assert!((g[(0, 0)] + 0.8).abs() < 1e-12);
        assert!((g[(1, 0)] - 0.6).abs() < 1e-12);
    }
}
