//! Model fixtures shared by the integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use nalgebra::{dmatrix, DMatrix};
use symkf::compiler::{CompiledModel, ModelCompiler, SymbolicCompiler};
use symkf::filters::{FilterConfig, SymbolicEkf};
use symkf::models::ObservationNoise;
use symkf::symbolic::{Expr, ModelDescriptor, StateLayout};
use symkf::types::kind::{KindNames, ObservationKind};

pub const POSITION: ObservationKind = ObservationKind::new(2);
pub const HEADING: ObservationKind = ObservationKind::new(3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn kind_names() -> KindNames {
    KindNames::new().with(POSITION, "Position").with(HEADING, "Heading")
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("symkf-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ============================================================================
// Kinematic model: [position, velocity], position observed
// ============================================================================

pub fn kinematic_descriptor() -> ModelDescriptor {
    let layout = StateLayout::new(2)
        .with_slice("position", 0..1)
        .unwrap()
        .with_slice("velocity", 1..2)
        .unwrap();
    let position = layout.scalar("position").unwrap();
    let velocity = layout.scalar("velocity").unwrap();

    ModelDescriptor::new("kinematic", layout)
        .with_dynamics(vec![velocity, Expr::zero()])
        .observe(POSITION, vec![position], None)
}

pub fn kinematic_model() -> Arc<CompiledModel> {
    Arc::new(SymbolicCompiler.compile(&kinematic_descriptor()).unwrap())
}

pub fn kinematic_config() -> FilterConfig<f64> {
    FilterConfig::new(&[0.5, 0.0], DMatrix::identity(2, 2), dmatrix![0.01, 0.0; 0.0, 4.0])
        .with_observation_noise(ObservationNoise::new().with(POSITION, dmatrix![0.01]).unwrap())
}

pub fn kinematic_filter() -> SymbolicEkf<f64> {
    SymbolicEkf::new(kinematic_model(), kinematic_config()).unwrap()
}

// ============================================================================
// Unit-circle model: direction (cos θ, sin θ) with a 1-D angular error state
// ============================================================================

pub fn circle_descriptor() -> ModelDescriptor {
    let layout = StateLayout::new(2).with_slice("direction", 0..2).unwrap();
    let (c, s) = (Expr::state(0), Expr::state(1));
    let d = Expr::err_state(0);
    let inject = vec![
        c.clone() * d.clone().cos() - s.clone() * d.clone().sin(),
        s.clone() * d.clone().cos() + c.clone() * d.sin(),
    ];

    ModelDescriptor::new("circle", layout)
        .with_error_state(1, inject)
        .observe(HEADING, vec![s.atan2(c)], None)
}

pub fn circle_filter(theta: f64, variance: f64) -> SymbolicEkf<f64> {
    let model = Arc::new(SymbolicCompiler.compile(&circle_descriptor()).unwrap());
    let config = FilterConfig::new(&[theta.cos(), theta.sin()], dmatrix![variance], dmatrix![1e-4])
        .with_observation_noise(ObservationNoise::new().with(HEADING, dmatrix![0.01]).unwrap());
    SymbolicEkf::new(model, config).unwrap()
}
