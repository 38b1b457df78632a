//! Behavioural properties of the EKF runtime on the kinematic model

mod common;

use approx::assert_relative_eq;
use common::{init_logging, kind_names, kinematic_filter, POSITION};
use nalgebra::dmatrix;
use symkf::filters::{CovarianceInit, ObservationRow};
use symkf::types::kind::ObservationKind;
use symkf::types::spaces::MeasurementCovariance;
use symkf::Error;

fn position_noise(n: usize) -> Vec<MeasurementCovariance<f64>> {
    vec![MeasurementCovariance::from_matrix(dmatrix![0.01]); n]
}

#[test]
fn test_dimensions_and_symmetry_hold_across_steps() {
    init_logging();
    let mut ekf = kinematic_filter();
    ekf.init_state(&[0.0, 0.0], None, Some(0.0)).unwrap();

    for step in 1..=20 {
        let t = step as f64 * 0.05;
        let rows: Vec<_> = (0..(step % 3))
            .map(|i| ObservationRow::new(&[t + 0.01 * i as f64]))
            .collect();
        ekf.predict_and_update_batch(t, POSITION, &rows, None).unwrap();

        let x = ekf.state();
        let p = ekf.covariance();
        assert_eq!(x.len(), 2);
        assert_eq!(p.as_matrix().shape(), (2, 2));
        assert!(p.is_symmetric(0.0), "step {step}: P not symmetric");
        assert!(p.cholesky().is_some(), "step {step}: P not positive definite");
    }
}

#[test]
fn test_empty_batch_is_noop() {
    let mut ekf = kinematic_filter();
    ekf.init_state(&[1.25, -0.5], Some(CovarianceInit::Diagonal(vec![0.3, 0.7])), Some(2.0))
        .unwrap();
    let before = ekf.estimate();

    let report = ekf.update(POSITION, &[], Some(&[])).unwrap();
    assert_eq!(report.rows, 0);
    assert_eq!(ekf.estimate(), before);
    assert_eq!(ekf.filter_time(), Some(2.0));

    // an empty batch needs no declared kind or registered noise
    ekf.update(ObservationKind::NO_OBSERVATION, &[], None).unwrap();
    assert_eq!(ekf.estimate(), before);
}

#[test]
fn test_time_must_not_go_backwards() {
    let mut ekf = kinematic_filter();
    ekf.init_state(&[0.0, 1.0], None, Some(10.0)).unwrap();
    ekf.predict(11.0).unwrap();
    let before = ekf.estimate();

    let err = ekf
        .predict_and_update_batch(10.5, POSITION, &[ObservationRow::new(&[1.0])], None)
        .unwrap_err();
    assert!(matches!(err, Error::TemporalOrdering { current, requested } if current == 11.0 && requested == 10.5));
    assert_eq!(ekf.estimate(), before);
    assert_eq!(ekf.filter_time(), Some(11.0));

    // equal time is allowed and propagates nothing
    ekf.predict(11.0).unwrap();
    assert_eq!(ekf.estimate(), before);
}

#[test]
fn test_pure_prediction_keeps_position_and_grows_variance() {
    let mut ekf = kinematic_filter();
    assert_eq!(ekf.state().as_slice(), &[0.5, 0.0]);
    ekf.predict(0.0).unwrap();

    let mut previous = ekf.covariance().diagonal();
    for step in 1..=10 {
        ekf.predict_and_update_batch(step as f64 * 0.1, ObservationKind::NO_OBSERVATION, &[], None)
            .unwrap();
        assert_eq!(ekf.state().as_slice(), &[0.5, 0.0]);

        let diagonal = ekf.covariance().diagonal();
        assert!(diagonal[0] > previous[0]);
        assert!(diagonal[1] > previous[1]);
        previous = diagonal;
    }
    assert_eq!(ekf.stats().predictions, 10);
    assert_eq!(ekf.stats().updates, 0);
}

#[test]
fn test_single_observation_moves_by_gain() {
    init_logging();
    let mut ekf = kinematic_filter();
    ekf.init_state(&[0.0, 0.0], Some(CovarianceInit::Diagonal(vec![1.0, 1.0])), Some(0.0))
        .unwrap();

    let result = ekf
        .predict_and_update_batch(1.0, POSITION, &[ObservationRow::new(&[1.0])], Some(&position_noise(1)))
        .unwrap();

    // prior P = F P Fᵀ + Q = [[2.01, 1], [1, 5]]
    let prior = result.prior.covariance.as_matrix();
    assert_relative_eq!(prior[(0, 0)], 2.01, epsilon = 1e-12);
    assert_relative_eq!(prior[(0, 1)], 1.0, epsilon = 1e-12);
    assert_relative_eq!(prior[(1, 1)], 5.0, epsilon = 1e-12);

    let gain = [2.01 / 2.02, 1.0 / 2.02];
    let x = ekf.state();
    assert_relative_eq!(x.as_slice()[0], gain[0], epsilon = 1e-12);
    assert_relative_eq!(x.as_slice()[1], gain[1], epsilon = 1e-12);
    assert!(x.as_slice()[0] > 0.0 && x.as_slice()[0] < 1.0);

    let posterior = ekf.covariance();
    assert!(posterior.as_matrix()[(0, 0)] < prior[(0, 0)]);
    assert_relative_eq!(posterior.as_matrix()[(0, 0)], 2.01 * 0.01 / 2.02, epsilon = 1e-12);
    assert!(result.report.applied());
    assert_eq!(ekf.filter_time(), Some(1.0));
}

#[test]
fn test_batch_rows_are_order_invariant() {
    let run = |values: [f64; 2]| {
        let mut ekf = kinematic_filter();
        ekf.init_state(&[0.0, 0.0], Some(CovarianceInit::Diagonal(vec![1.0, 1.0])), Some(0.0))
            .unwrap();
        let rows = [ObservationRow::new(&[values[0]]), ObservationRow::new(&[values[1]])];
        ekf.predict_and_update_batch(1.0, POSITION, &rows, Some(&position_noise(2)))
            .unwrap();
        ekf.estimate()
    };

    let forward = run([1.0, 2.0]);
    let reversed = run([2.0, 1.0]);
    assert_relative_eq!(forward.state.as_dvector(), reversed.state.as_dvector(), epsilon = 1e-12);
    assert_relative_eq!(
        forward.covariance.as_matrix(),
        reversed.covariance.as_matrix(),
        epsilon = 1e-12
    );

    // two equally weighted rows pull towards their mean
    assert!((forward.state.as_slice()[0] - 1.5).abs() < 0.01);
}

#[test]
fn test_noise_broadcast_round_trip() {
    let ekf = kinematic_filter();
    let registered = ekf.config().observation_noise.block(POSITION).unwrap().clone();

    for n in 0..=6 {
        let blocks = ekf.get_r(POSITION, n).unwrap();
        assert_eq!(blocks.len(), n);
        assert!(blocks.iter().all(|b| *b == registered));
    }
    assert!(matches!(ekf.get_r(ObservationKind::new(42), 1), Err(Error::Configuration(_))));
}

#[test]
fn test_kind_names_are_for_display_only() {
    let names = kind_names();
    assert_eq!(names.name(POSITION), "Position");
    assert_eq!(names.name(ObservationKind::NO_OBSERVATION), "No observation");
    assert_ne!(ObservationKind::UNKNOWN, ObservationKind::NO_OBSERVATION);
}
