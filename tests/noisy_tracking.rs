//! Tracking a constant-velocity target from noisy position fixes

mod common;

use common::{init_logging, kinematic_model, POSITION};
use nalgebra::{dmatrix, DMatrix};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use symkf::filters::{rts_smooth, BatchResult, FilterConfig, ObservationBatch, ObservationRow, SymbolicEkf};
use symkf::models::ObservationNoise;

const DT: f64 = 0.1;
const STEPS: usize = 100;
const VELOCITY: f64 = 1.0;

fn truth(step: usize) -> f64 {
    VELOCITY * step as f64 * DT
}

fn tracker(gate: Option<f64>) -> SymbolicEkf<f64> {
    let mut config = FilterConfig::new(&[0.0, 0.0], DMatrix::identity(2, 2), DMatrix::identity(2, 2).scale(1e-4))
        .with_observation_noise(ObservationNoise::new().with(POSITION, dmatrix![0.01]).unwrap());
    if let Some(threshold) = gate {
        config = config.with_gate(POSITION, threshold);
    }
    let mut ekf = SymbolicEkf::new(kinematic_model(), config).unwrap();
    ekf.predict(0.0).unwrap();
    ekf
}

fn run(ekf: &mut SymbolicEkf<f64>, fixes: &[f64]) -> Vec<BatchResult<f64>> {
    fixes
        .iter()
        .enumerate()
        .map(|(i, z)| {
            let batch = ObservationBatch::new((i + 1) as f64 * DT, POSITION).with_row(ObservationRow::new(&[*z]));
            ekf.process(&batch).unwrap()
        })
        .collect()
}

fn noisy_fixes(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.1).unwrap();
    (1..=STEPS).map(|k| truth(k) + noise.sample(&mut rng)).collect()
}

fn rmse(estimates: impl Iterator<Item = f64>) -> f64 {
    let errors: Vec<f64> = estimates
        .enumerate()
        .map(|(i, x)| (x - truth(i + 1)).powi(2))
        .collect();
    (errors.iter().sum::<f64>() / errors.len() as f64).sqrt()
}

#[test]
fn test_converges_to_true_track() {
    init_logging();
    let mut ekf = tracker(None);
    run(&mut ekf, &noisy_fixes(7));

    let x = ekf.state();
    assert!((x.as_slice()[0] - truth(STEPS)).abs() < 0.15, "position {}", x.as_slice()[0]);
    assert!((x.as_slice()[1] - VELOCITY).abs() < 0.2, "velocity {}", x.as_slice()[1]);
    assert_eq!(ekf.stats().rows_accepted, STEPS);
    assert_eq!(ekf.stats().predictions, STEPS);
}

#[test]
fn test_gate_drops_outliers() {
    let mut fixes = noisy_fixes(11);
    let outliers = [25, 50, 75];
    for &k in &outliers {
        fixes[k] += 5.0;
    }

    let mut ekf = tracker(Some(25.0));
    let results = run(&mut ekf, &fixes);

    assert_eq!(ekf.stats().rows_gated, outliers.len());
    for &k in &outliers {
        assert_eq!(results[k].report.gated, 1);
        assert!(results[k].innovations.is_empty());
    }
    assert!((ekf.state().as_slice()[1] - VELOCITY).abs() < 0.2);
}

#[test]
fn test_smoothing_improves_on_filtering() {
    let mut ekf = tracker(None);
    let results = run(&mut ekf, &noisy_fixes(3));
    let model = ekf.model().clone();

    let smoothed = rts_smooth(model.as_ref(), &results).unwrap();
    assert_eq!(smoothed.len(), STEPS);
    assert_eq!(smoothed[STEPS - 1], results[STEPS - 1].posterior);

    for (s, r) in smoothed.iter().zip(&results) {
        let (ps, pf) = (s.covariance.as_matrix(), r.posterior.covariance.as_matrix());
        assert!(ps[(0, 0)] <= pf[(0, 0)] + 1e-12);
        assert!(ps[(1, 1)] <= pf[(1, 1)] + 1e-12);
    }

    let filtered = rmse(results.iter().map(|r| r.posterior.state.as_slice()[0]));
    let smooth = rmse(smoothed.iter().map(|s| s.state.as_slice()[0]));
    assert!(smooth < filtered, "smoothed {smooth} vs filtered {filtered}");
}
