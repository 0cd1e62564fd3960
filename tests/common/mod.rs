//! Common test utilities shared across all test modules
//!
//! Synthetic flight logs: sine and step traces, first-order plant responses
//! and deterministic noise, assembled into `FlightLog`s with the usual
//! blackbox column names.

#![allow(dead_code)]

use quadtune::log::{FlightLog, Metadata};
use std::f64::consts::PI;

/// Looptime of the standard test log: 312 us = 3205 Hz
pub const LOOPTIME_US: f64 = 312.0;

pub fn sample_rate() -> f64 {
    1_000_000.0 / LOOPTIME_US
}

/// Metadata with looptime and the given PID strings
pub fn metadata_with_pids(roll: &str, pitch: &str, yaw: &str) -> Metadata {
    Metadata::new()
        .with("looptime", LOOPTIME_US.to_string())
        .with("rollPID", roll)
        .with("pitchPID", pitch)
        .with("yawPID", yaw)
}

/// Test data generators for synthetic tests
pub mod synthetic {
    use super::*;

    pub fn sine(freq: f64, amplitude: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    /// Pseudo-random but repeatable noise in [-amplitude, amplitude]
    pub fn noise(amplitude: f64, n: usize, seed: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let v = ((i + seed) * 7919 + seed * 104_729) % 1009;
                amplitude * (v as f64 / 504.5 - 1.0)
            })
            .collect()
    }

    pub fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| x + y).collect()
    }

    /// Step at `step_at` from 0 to `amplitude`, and the response of `K / (T s + 1)`
    pub fn first_order_step(
        k: f64,
        t: f64,
        amplitude: f64,
        step_at: usize,
        fs: f64,
        n: usize,
    ) -> (Vec<f64>, Vec<f64>) {
        let setpoint: Vec<f64> = (0..n).map(|i| if i >= step_at { amplitude } else { 0.0 }).collect();
        let gyro = (0..n)
            .map(|i| {
                if i < step_at {
                    0.0
                } else {
                    let time = (i - step_at) as f64 / fs;
                    k * amplitude * (1.0 - (-time / t).exp())
                }
            })
            .collect();
        (setpoint, gyro)
    }

    /// Square-wave stick input with a lagging first-order gyro response
    pub fn stick_flight(period: usize, amplitude: f64, lag: f64, n: usize) -> (Vec<f64>, Vec<f64>) {
        let setpoint: Vec<f64> = (0..n)
            .map(|i| if (i / period) % 2 == 0 { 0.0 } else { amplitude })
            .collect();
        let mut gyro = vec![0.0; n];
        for i in 1..n {
            gyro[i] = gyro[i - 1] + lag * (setpoint[i - 1] - gyro[i - 1]);
        }
        (setpoint, gyro)
    }
}

/// Builders for whole flight logs
pub mod logs {
    use super::*;

    /// A three-axis log with setpoint, gyro and unfiltered gyro columns.
    ///
    /// Every axis flies the same square-wave stick pattern; the unfiltered
    /// gyro carries 250 Hz motor noise that the filtered gyro mostly lacks.
    pub fn full_flight(n: usize) -> FlightLog {
        let fs = sample_rate();
        let mut columns: Vec<(&'static str, Vec<f64>)> = Vec::new();
        let time: Vec<f64> = (0..n).map(|i| i as f64 * LOOPTIME_US).collect();
        columns.push(("time", time));

        let names = [
            ("setpoint[0]", "gyroADC[0]", "gyroUnfilt[0]"),
            ("setpoint[1]", "gyroADC[1]", "gyroUnfilt[1]"),
            ("setpoint[2]", "gyroADC[2]", "gyroUnfilt[2]"),
        ];
        for (axis, (sp_name, gyro_name, unfilt_name)) in names.into_iter().enumerate() {
            let (setpoint, gyro) = synthetic::stick_flight(400 + 50 * axis, 300.0, 0.05, n);
            let motor_noise = synthetic::sine(250.0, 20.0, fs, n);
            let jitter = synthetic::noise(2.0, n, axis + 1);
            let gyro = synthetic::add(&gyro, &jitter);
            let unfilt = synthetic::add(&gyro, &motor_noise);
            columns.push((sp_name, setpoint));
            columns.push((gyro_name, gyro));
            columns.push((unfilt_name, unfilt));
        }

        FlightLog::from_columns(columns, metadata_with_pids("45,80,30,120", "47,84,34,125", "45,80,0,120"))
    }

    /// Same as [`full_flight`] without any `gyroUnfilt` columns
    pub fn without_unfiltered(n: usize) -> FlightLog {
        let log = full_flight(n);
        let keep: Vec<usize> = log
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.starts_with("gyroUnfilt"))
            .map(|(i, _)| i)
            .collect();

        let headers = keep.iter().map(|&i| log.headers[i].clone()).collect();
        let rows = log
            .rows
            .iter()
            .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
            .collect();
        FlightLog::new(headers, rows, log.metadata.clone())
    }
}

/// Assertion helpers for common test patterns
pub mod assertions {
    use quadtune::columns::Axis;
    use quadtune::recommend::Recommendation;
    use quadtune::synthesis::SafeRange;

    /// Every recommended gain lies inside its axis safe range
    pub fn assert_in_safe_range(rec: &Recommendation) {
        for axis in Axis::ALL {
            let gains = rec.recommended_pid.get(axis);
            assert!(
                SafeRange::for_axis(axis).contains(gains),
                "{} gains {:?} outside the safe range",
                axis.name(),
                gains
            );
        }
    }

    /// Recommended gains and filter cutoffs are finite numbers
    pub fn assert_finite_settings(rec: &Recommendation) {
        for axis in Axis::ALL {
            let g = rec.recommended_pid.get(axis);
            for v in [g.p, g.i, g.d, g.f] {
                assert!(v.is_finite(), "{} gain {} is not finite", axis.name(), v);
            }
        }
        let f = &rec.recommended_filters;
        for v in [f.gyro_lowpass_hz, f.dterm_lowpass_hz, f.dyn_notch_min_hz, f.dyn_notch_max_hz] {
            assert!(v.is_finite() && v > 0.0, "filter setting {} is not usable", v);
        }
    }
}
