//! Compiling to disk and constructing filters from stored artifacts

mod common;

use std::fs;

use common::{circle_descriptor, kinematic_config, kinematic_descriptor, kinematic_filter, scratch_dir, POSITION};
use nalgebra::{dmatrix, DMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use symkf::compiler::{artifact_path, compile_to_dir, load_artifact, SymbolicCompiler};
use symkf::filters::{ObservationRow, SymbolicEkf};
use symkf::symbolic::{Expr, ModelDescriptor, StateLayout};
use symkf::Error;

#[test]
fn test_loaded_filter_matches_in_memory_filter() {
    common::init_logging();
    let dir = scratch_dir("loaded-filter");
    compile_to_dir(&SymbolicCompiler, &kinematic_descriptor(), &dir).unwrap();

    let mut loaded = SymbolicEkf::load(
        &dir,
        "kinematic",
        dmatrix![0.01, 0.0; 0.0, 4.0],
        &[0.5, 0.0],
        DMatrix::identity(2, 2),
        2,
        2,
    )
    .unwrap()
    .with_observation_noise(kinematic_config().observation_noise)
    .unwrap();
    let mut direct = kinematic_filter();

    for (t, z) in [(0.0, 0.4), (0.5, 0.7), (1.25, 1.1)] {
        let rows = [ObservationRow::new(&[z])];
        let a = loaded.predict_and_update_batch(t, POSITION, &rows, None).unwrap();
        let b = direct.predict_and_update_batch(t, POSITION, &rows, None).unwrap();
        assert_eq!(a, b);
    }
    assert_eq!(loaded.estimate(), direct.estimate());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_error_state_model_survives_round_trip() {
    let dir = scratch_dir("circle-artifact");
    let compiled = compile_to_dir(&SymbolicCompiler, &circle_descriptor(), &dir).unwrap();
    let loaded = load_artifact(&dir, "circle").unwrap();

    assert_eq!(loaded, compiled);
    assert_eq!(loaded.dim_state(), 2);
    assert_eq!(loaded.dim_state_err(), 1);
    assert!(loaded.injection().is_some());
    let _ = fs::remove_dir_all(&dir);
}

fn irregular_constant(rng: &mut StdRng) -> f64 {
    let mantissa: f64 = rng.random_range(-1.0..1.0);
    mantissa * 10f64.powi(rng.random_range(-12..12))
}

#[test]
fn test_irregular_constants_survive_round_trip() {
    let dir = scratch_dir("irregular-constants");
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..500 {
        let (rate, gain) = (irregular_constant(&mut rng), irregular_constant(&mut rng));
        let layout = StateLayout::new(1).with_slice("x", 0..1).unwrap();
        let descriptor = ModelDescriptor::new("irregular", layout)
            .with_dynamics(vec![Expr::state(0) * Expr::constant(rate)])
            .observe(POSITION, vec![Expr::state(0) * Expr::constant(gain)], None);

        let compiled = compile_to_dir(&SymbolicCompiler, &descriptor, &dir).unwrap();
        let loaded = load_artifact(&dir, "irregular").unwrap();
        assert_eq!(loaded, compiled, "rate {rate:e}, gain {gain:e}");
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_load_checks_dimensions() {
    let dir = scratch_dir("load-dims");
    compile_to_dir(&SymbolicCompiler, &kinematic_descriptor(), &dir).unwrap();

    let wrong = SymbolicEkf::<f64>::load(&dir, "kinematic", DMatrix::identity(2, 2), &[0.0, 0.0], DMatrix::identity(2, 2), 3, 3);
    assert!(matches!(wrong, Err(Error::Configuration(_))));

    let bad_q = SymbolicEkf::<f64>::load(&dir, "kinematic", DMatrix::identity(3, 3), &[0.0, 0.0], DMatrix::identity(2, 2), 2, 2);
    assert!(matches!(bad_q, Err(Error::Configuration(_))));

    let missing = SymbolicEkf::<f64>::load(&dir, "absent", DMatrix::identity(2, 2), &[0.0, 0.0], DMatrix::identity(2, 2), 2, 2);
    assert!(matches!(missing, Err(Error::Compilation(_))));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_tampered_artifact_is_rejected() {
    let dir = scratch_dir("tampered");
    compile_to_dir(&SymbolicCompiler, &kinematic_descriptor(), &dir).unwrap();

    let path = artifact_path(&dir, "kinematic");
    let text = fs::read_to_string(&path).unwrap();
    let tampered = text.replacen("\"dim_state\": 2", "\"dim_state\": 1", 1);
    assert_ne!(text, tampered);
    fs::write(&path, tampered).unwrap();

    assert!(matches!(load_artifact(&dir, "kinematic"), Err(Error::Compilation(_))));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_no_partial_file_left_behind() {
    let dir = scratch_dir("no-partial");
    compile_to_dir(&SymbolicCompiler, &kinematic_descriptor(), &dir).unwrap();

    let names: Vec<_> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["kinematic.json".to_string()]);
    let _ = fs::remove_dir_all(&dir);
}
