//! Tests for plant identification from flight data

use crate::common::{logs, sample_rate, synthetic};
use quadtune::analysis::AnalysisError;
use quadtune::columns::{Axis, ColumnMap};
use quadtune::config::AnalysisConfig;
use quadtune::identification::{identify, identify_arx, identify_first_order, ModelOrder, SystemModel};
use quadtune::log::{FlightLog, Metadata};

#[test]
fn test_identify_first_order_from_flight_log() {
    let log = logs::full_flight(4000);
    let columns = ColumnMap::build(&log.headers);
    let cfg = AnalysisConfig::default();

    let model = identify(&log, &columns, Axis::Roll, ModelOrder::First, sample_rate(), &cfg).unwrap();
    let SystemModel::FirstOrder { k, t } = model else {
        panic!("expected first-order model, got {:?}", model);
    };

    // gyro[i] = gyro[i-1] + 0.05 (sp[i-1] - gyro[i-1]): 63.2% after ~19.5 samples
    assert!((k - 1.0).abs() < 0.05, "K = {}", k);
    assert!(t > 0.004 && t < 0.009, "T = {}", t);
}

#[test]
fn test_first_order_scenario_b_plant() {
    let fs = 3200.0;
    let (u, y) = synthetic::first_order_step(1.0, 0.05, 500.0, 1, fs, 1600);
    let SystemModel::FirstOrder { k, t } = identify_first_order(&u, &y, fs).unwrap() else {
        panic!("expected first-order model");
    };
    assert!((k - 1.0).abs() < 0.02, "K = {}", k);
    assert!((t - 0.05).abs() < 0.005, "T = {}", t);
}

#[test]
fn test_arx_recovers_discrete_lag() {
    let (sp, gyro) = synthetic::stick_flight(300, 200.0, 0.05, 3000);
    let model = identify_arx(&sp, &gyro, 1, 1, 1000.0).unwrap();
    let SystemModel::Arx { a, b, sample_time } = &model else {
        panic!("expected ARX model");
    };

    assert_eq!(a.len(), 2);
    assert_eq!(a[0], 1.0);
    assert!((a[1] + 0.95).abs() < 1e-5, "a1 = {}", a[1]);
    assert!((b[0] - 0.05).abs() < 1e-5, "b1 = {}", b[0]);
    assert!((sample_time - 0.001).abs() < 1e-12);
    assert!((model.gain() - 1.0).abs() < 1e-4);
}

#[test]
fn test_arx_zero_order_rejected() {
    let err = identify_arx(&[0.0; 100], &[0.0; 100], 0, 2, 1000.0).unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidParameter(_)));
}

#[test]
fn test_identify_without_setpoint_names_column() {
    let n = 500;
    let log = FlightLog::from_columns(
        vec![("gyroADC[0]", vec![0.0; n])],
        Metadata::new().with("looptime", "1000"),
    );
    let columns = ColumnMap::build(&log.headers);
    let err = identify(
        &log,
        &columns,
        Axis::Roll,
        ModelOrder::First,
        1000.0,
        &AnalysisConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err, AnalysisError::MissingColumn("setpoint[0]".to_string()));
}

#[test]
fn test_identify_without_steps_is_insufficient() {
    let n = 500;
    let log = FlightLog::from_columns(
        vec![("setpoint[0]", vec![10.0; n]), ("gyroADC[0]", vec![10.0; n])],
        Metadata::new(),
    );
    let columns = ColumnMap::build(&log.headers);
    let err = identify(
        &log,
        &columns,
        Axis::Roll,
        ModelOrder::Second,
        1000.0,
        &AnalysisConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AnalysisError::InsufficientData { .. }));
}

#[test]
fn test_identify_arx_from_step_log() {
    // Square-wave stick into an underdamped second-order plant, gain 0.8
    let fs = 1000.0;
    let n = 3000;
    let setpoint: Vec<f64> = (0..n).map(|i| if (i / 300) % 2 == 0 { 0.0 } else { 400.0 }).collect();
    let mut gyro = vec![0.0; n];
    for k in 2..n {
        gyro[k] = 1.5 * gyro[k - 1] - 0.6 * gyro[k - 2] + 0.048 * setpoint[k - 1] + 0.032 * setpoint[k - 2];
    }
    let log = FlightLog::from_columns(
        vec![("setpoint[0]", setpoint), ("gyroADC[0]", gyro)],
        Metadata::new().with("looptime", "1000"),
    );
    let columns = ColumnMap::build(&log.headers);

    let model = identify(
        &log,
        &columns,
        Axis::Roll,
        ModelOrder::Arx { na: 2, nb: 2 },
        fs,
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert_eq!(model.order(), ModelOrder::Arx { na: 2, nb: 2 });
    assert!((model.gain() - 0.8).abs() < 0.01, "gain {}", model.gain());
}

#[test]
fn test_identify_arx_over_parameterized_flight() {
    // First-order plant with sensor jitter, fitted as ARX(2,2)
    let log = logs::full_flight(4000);
    let columns = ColumnMap::build(&log.headers);
    let model = identify(
        &log,
        &columns,
        Axis::Pitch,
        ModelOrder::Arx { na: 2, nb: 2 },
        sample_rate(),
        &AnalysisConfig::default(),
    )
    .unwrap();
    assert!((model.gain() - 1.0).abs() < 0.05, "gain {}", model.gain());
}
