//! Tests for step detection and step-response characterization

use crate::common::synthetic;
use quadtune::analysis::step_response::{analyze_steps, characterize, detect_steps, log_decrement, StepEvent, StepOptions};
use std::f64::consts::PI;

#[test]
fn test_scenario_b_first_order_settling() {
    let fs = 3200.0;
    let t = 0.05;
    let (setpoint, gyro) = synthetic::first_order_step(1.0, t, 500.0, 1, fs, 1200);
    let opts = StepOptions {
        max_response_samples: 1000,
        ..Default::default()
    };

    let analysis = analyze_steps(&setpoint, &gyro, fs, &opts);
    let m = analysis.headline.expect("step detected");

    let expected_ms = 3.0 * t * 1000.0;
    assert!(m.settled);
    assert!(
        (m.settling_time_ms - expected_ms).abs() <= 0.2 * expected_ms,
        "settling {} ms",
        m.settling_time_ms
    );
    assert!(m.overshoot_pct.abs() < 1e-6);
    // 10-90% rise of a first-order lag is T ln 9
    assert!((m.rise_time_ms - t * 9f64.ln() * 1000.0).abs() < 1.0);
}

#[test]
fn test_scenario_c_damping_from_amplitude_ratio() {
    let damping = log_decrement(&[100.0, 50.0]);
    let x = 2f64.ln() / (2.0 * PI);
    let expected = x / (1.0 + x * x).sqrt();

    assert!((damping.damping_ratio - expected).abs() < 1e-12);
    assert!((damping.damping_ratio - 0.11).abs() < 0.01);
    assert!((damping.decay_rate - 2f64.ln() * 100.0).abs() < 1e-9);
}

#[test]
fn test_scenario_c_through_characterize() {
    // Ringing around 500 with every overshoot half the previous one
    let fs = 1000.0;
    let period = 50.0;
    let sigma = 2f64.ln() / period;
    let response: Vec<f64> = (0..200)
        .map(|i| {
            let t = i as f64;
            500.0 + 100.0 * (-sigma * t).exp() * (2.0 * PI * t / period).cos()
        })
        .collect();
    let step = StepEvent {
        start_index: 10,
        start_value: 0.0,
        target_value: 500.0,
        response,
    };

    let m = characterize(&step, fs, &StepOptions::default());
    assert!(m.peak_count >= 2);
    assert!((m.damping_ratio - 0.11).abs() < 0.01, "damping {}", m.damping_ratio);
    assert!((m.oscillation_freq_hz - 20.0).abs() < 0.5);
    assert!(m.overshoot_pct > 0.0);
}

#[test]
fn test_negative_step_is_direction_aware() {
    let fs = 1000.0;
    let (sp, gyro) = synthetic::first_order_step(1.0, 0.02, -300.0, 5, fs, 300);
    let steps = detect_steps(&sp, &gyro, &StepOptions::default());
    assert_eq!(steps.len(), 1);

    let m = characterize(&steps[0], fs, &StepOptions::default());
    assert_eq!(m.magnitude, 300.0);
    assert!(m.rise_time_ms > 0.0);
    assert!(m.delay_ms >= 0.0);
    assert_eq!(m.overshoot_pct, 0.0);
}

#[test]
fn test_no_real_step_gives_no_headline() {
    let sp = vec![0.0, 3.0, 3.0, 0.0, 0.0, 2.0];
    let analysis = analyze_steps(&sp, &[0.0; 6], 1000.0, &StepOptions::default());
    assert!(analysis.headline.is_none());
    assert_eq!(analysis.step_count(), 0);
}

#[test]
fn test_largest_step_is_headline() {
    let mut sp = vec![0.0; 600];
    for v in sp.iter_mut().skip(100) {
        *v = 100.0;
    }
    for v in sp.iter_mut().skip(350) {
        *v = 500.0;
    }
    let gyro = sp.clone();
    let analysis = analyze_steps(&sp, &gyro, 1000.0, &StepOptions::default());

    assert_eq!(analysis.step_count(), 2);
    let headline = analysis.headline.expect("headline");
    assert_eq!(headline.start_index, 350);
    assert_eq!(headline.magnitude, 400.0);
}
