//! Tests for PID synthesis: every design rule lands in the safe range

use quadtune::analysis::AnalysisError;
use quadtune::columns::Axis;
use quadtune::config::{GaConfig, SynthesisConfig};
use quadtune::identification::SystemModel;
use quadtune::synthesis::{design, genetic, simulate_closed_loop, PidGains, SafeRange, TuningMethod};
use strum::IntoEnumIterator;

fn small_ga(seed: u64) -> GaConfig {
    GaConfig {
        population: 8,
        generations: 3,
        seed,
        sim_duration_s: 0.05,
    }
}

fn models() -> Vec<SystemModel> {
    let mut models = Vec::new();
    for k in [0.5, 1.0, 3.0] {
        for t in [0.005, 0.02, 0.08] {
            models.push(SystemModel::FirstOrder { k, t });
        }
    }
    for (zeta, wn) in [(0.2, 120.0), (0.7, 60.0)] {
        models.push(SystemModel::SecondOrder {
            k: 1.0,
            t1: 1.0 / (wn * wn),
            t2: 2.0 * zeta / wn,
            wn,
            zeta,
        });
    }
    models.push(SystemModel::Arx {
        a: vec![1.0, -0.95],
        b: vec![0.05],
        sample_time: 0.001,
    });
    models
}

#[test]
fn test_every_method_stays_in_safe_range() {
    let cfg = SynthesisConfig {
        ga: small_ga(1),
        ..Default::default()
    };

    for model in models() {
        for method in TuningMethod::iter() {
            for axis in Axis::ALL {
                match design(&model, method, &cfg, axis, 1000.0) {
                    Ok(gains) => assert!(
                        SafeRange::for_axis(axis).contains(&gains),
                        "{} on {:?} ({}) gave {:?}",
                        method.as_ref(),
                        model,
                        axis.name(),
                        gains
                    ),
                    Err(AnalysisError::InvalidParameter(_)) => {
                        assert_eq!(method, TuningMethod::CohenCoon);
                        assert!(matches!(model, SystemModel::SecondOrder { .. }));
                    }
                    Err(e) => panic!("{} on {:?} failed: {}", method.as_ref(), model, e),
                }
            }
        }
    }
}

#[test]
fn test_analytic_rules_leave_feedforward_at_zero() {
    let model = SystemModel::FirstOrder { k: 1.0, t: 0.02 };
    let cfg = SynthesisConfig::default();
    for method in [TuningMethod::Imc, TuningMethod::ZieglerNichols, TuningMethod::CohenCoon, TuningMethod::Robust] {
        let gains = design(&model, method, &cfg, Axis::Roll, 1000.0).unwrap();
        assert_eq!(gains.f, 0.0, "{}", method.as_ref());
        assert_eq!(gains, gains.rounded());
    }
}

#[test]
fn test_genetic_is_reproducible_for_a_seed() {
    let model = SystemModel::FirstOrder { k: 1.0, t: 0.02 };
    let first = genetic(&model, Axis::Pitch, &small_ga(42), 1000.0).unwrap();
    let second = genetic(&model, Axis::Pitch, &small_ga(42), 1000.0).unwrap();

    assert_eq!(first, second);
    assert!(SafeRange::for_axis(Axis::Pitch).contains(&first));
}

#[test]
fn test_genetic_rejects_tiny_population() {
    let model = SystemModel::FirstOrder { k: 1.0, t: 0.02 };
    let ga = GaConfig {
        population: 1,
        ..small_ga(3)
    };
    assert!(matches!(
        genetic(&model, Axis::Roll, &ga, 1000.0),
        Err(AnalysisError::InvalidParameter(_))
    ));
}

#[test]
fn test_closed_loop_around_arx_plant() {
    let model = SystemModel::Arx {
        a: vec![1.0, -0.95],
        b: vec![0.05],
        sample_time: 0.001,
    };
    let mut plant = model.plant();
    let response = simulate_closed_loop(&mut plant, &PidGains::new(2.0, 3000.0, 0.0, 0.0), 1.0, 0.001);

    assert!(response.steady_state_error < 0.02, "{:?}", response);
    assert!(response.score().is_finite());
}
