//! Step-response characterization.
//!
//! Steps are found with a small state machine over the whole setpoint slice
//! (`WaitingForStep -> CollectingResponse -> done`); each collected gyro
//! response is then reduced to damping, oscillation frequency, settling,
//! overshoot, rise time and delay.

use serde::Serialize;
use std::f64::consts::PI;

use super::*;
use crate::config::AnalysisConfig;
use crate::stream::{mean, safe_div};

/// Jumps in the same direction within this many samples extend the current step
const STEP_MERGE_SAMPLES: usize = 3;

/// A step-like change of the setpoint and the gyro trace that followed it
#[derive(Clone, Debug, PartialEq)]
pub struct StepEvent {
    pub start_index: usize,
    pub start_value: f64,
    pub target_value: f64,
    pub response: Vec<f64>,
}

impl StepEvent {
    pub fn magnitude(&self) -> f64 {
        (self.target_value - self.start_value).abs()
    }

    fn direction(&self) -> f64 {
        if self.target_value >= self.start_value {
            1.0
        } else {
            -1.0
        }
    }
}

/// Step detection and characterization parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOptions {
    pub threshold: f64,
    pub min_magnitude: f64,
    pub max_response_samples: usize,
    pub startup_skip_ms: f64,
    pub settle_band: f64,
    pub settle_hold_samples: usize,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for StepOptions {
    fn from(cfg: &AnalysisConfig) -> Self {
        Self {
            threshold: cfg.step_threshold,
            min_magnitude: cfg.min_step_magnitude,
            max_response_samples: cfg.max_response_samples.max(1),
            startup_skip_ms: cfg.startup_skip_ms,
            settle_band: cfg.settle_band,
            settle_hold_samples: cfg.settle_hold_samples,
        }
    }
}

enum DetectorState {
    WaitingForStep,
    CollectingResponse(StepEvent),
}

/// Scan the setpoint for jumps larger than `threshold` and collect the gyro
/// response after each, up to `max_response_samples` or the next step.
///
/// Steps whose total change is at most `min_magnitude` are discarded as noise.
pub fn detect_steps(setpoint: &[f64], gyro: &[f64], opts: &StepOptions) -> Vec<StepEvent> {
    let len = setpoint.len().min(gyro.len());
    let mut steps = Vec::new();
    let mut state = DetectorState::WaitingForStep;

    let finish = |event: StepEvent, steps: &mut Vec<StepEvent>| {
        if event.magnitude() > opts.min_magnitude {
            steps.push(event);
        } else {
            tracing::trace!(
                "Discarding step at {} ({:.1} units is noise)",
                event.start_index,
                event.magnitude()
            );
        }
    };

    for i in 1..len {
        let jump = setpoint[i] - setpoint[i - 1];

        state = match state {
            DetectorState::WaitingForStep => {
                if jump.abs() > opts.threshold {
                    DetectorState::CollectingResponse(StepEvent {
                        start_index: i,
                        start_value: setpoint[i - 1],
                        target_value: setpoint[i],
                        response: vec![gyro[i]],
                    })
                } else {
                    DetectorState::WaitingForStep
                }
            }
            DetectorState::CollectingResponse(mut event) => {
                if jump.abs() > opts.threshold {
                    let same_direction = jump.signum() == event.direction();
                    if same_direction && event.response.len() < STEP_MERGE_SAMPLES {
                        // Still on the leading edge of the same stick movement
                        event.target_value = setpoint[i];
                        event.response.push(gyro[i]);
                        DetectorState::CollectingResponse(event)
                    } else {
                        finish(event, &mut steps);
                        DetectorState::CollectingResponse(StepEvent {
                            start_index: i,
                            start_value: setpoint[i - 1],
                            target_value: setpoint[i],
                            response: vec![gyro[i]],
                        })
                    }
                } else {
                    event.response.push(gyro[i]);
                    if event.response.len() >= opts.max_response_samples {
                        finish(event, &mut steps);
                        DetectorState::WaitingForStep
                    } else {
                        DetectorState::CollectingResponse(event)
                    }
                }
            }
        };
    }

    if let DetectorState::CollectingResponse(event) = state {
        finish(event, &mut steps);
    }

    steps
}

/// Indices of strict local maxima and minima of `data`, at or after `skip`
pub fn find_extrema(data: &[f64], skip: usize) -> (Vec<usize>, Vec<usize>) {
    let mut peaks = Vec::new();
    let mut valleys = Vec::new();
    let start = skip.max(1);
    if data.len() < 3 {
        return (peaks, valleys);
    }
    for i in start..data.len() - 1 {
        if data[i] > data[i - 1] && data[i] > data[i + 1] {
            peaks.push(i);
        } else if data[i] < data[i - 1] && data[i] < data[i + 1] {
            valleys.push(i);
        }
    }
    (peaks, valleys)
}

/// Damping estimate from successive oscillation amplitudes
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Damping {
    /// Logarithmic decrement
    pub delta: f64,
    pub damping_ratio: f64,
    /// Amplitude decay per period, percent
    pub decay_rate: f64,
}

/// Logarithmic-decrement damping from consecutive peak amplitudes.
///
/// `delta = ln(mean(a[k]/a[k+1]))`, `zeta = delta / (2*pi*sqrt(1 + (delta/2pi)^2))`.
/// Fewer than two usable amplitudes gives all zeros. Growing oscillations
/// report a negative decay rate and zero damping.
pub fn log_decrement(amplitudes: &[f64]) -> Damping {
    let ratios: Vec<f64> = amplitudes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| w[0] / w[1])
        .collect();
    if ratios.is_empty() {
        return Damping::default();
    }

    let delta = mean(&ratios).ln();
    let x = delta / (2.0 * PI);
    let damping_ratio = (x / (1.0 + x * x).sqrt()).max(0.0);

    Damping {
        delta,
        damping_ratio,
        decay_rate: delta * 100.0,
    }
}

/// Metrics of one characterized step
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepMetrics {
    pub start_index: usize,
    /// Length of the collected response, starting at `start_index`
    pub response_samples: usize,
    pub magnitude: f64,
    pub peak_count: usize,
    pub valley_count: usize,
    pub damping_ratio: f64,
    pub decay_rate: f64,
    pub oscillation_freq_hz: f64,
    pub settling_time_ms: f64,
    pub settled: bool,
    pub overshoot_pct: f64,
    pub rise_time_ms: f64,
    pub delay_ms: f64,
}

/// Reduce a collected response to [`StepMetrics`]
pub fn characterize(step: &StepEvent, sample_rate: f64, opts: &StepOptions) -> StepMetrics {
    let r = &step.response;
    let dt_ms = safe_div(1000.0, sample_rate);
    let delta = step.target_value - step.start_value;
    let dir = step.direction();
    let magnitude = delta.abs();

    let skip = safe_div(opts.startup_skip_ms, dt_ms).ceil() as usize;
    let (peaks, valleys) = find_extrema(r, skip);

    // Extrema on the overshoot side of the target
    let candidates = if dir > 0.0 { &peaks } else { &valleys };
    let overshoot_side: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| dir * (r[i] - step.target_value) > 0.0)
        .collect();
    let amplitudes: Vec<f64> = overshoot_side
        .iter()
        .map(|&i| (r[i] - step.target_value).abs())
        .collect();
    let damping = log_decrement(&amplitudes);

    let periods_ms: Vec<f64> = overshoot_side
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 * dt_ms)
        .collect();
    let oscillation_freq_hz = safe_div(1000.0, mean(&periods_ms));

    let band = opts.settle_band * magnitude;
    let hold = opts.settle_hold_samples.max(1);
    let settle_index = (0..r.len())
        .find(|&i| i + hold <= r.len() && r[i..i + hold].iter().all(|v| (v - step.target_value).abs() <= band));
    let (settling_time_ms, settled) = match settle_index {
        Some(i) => (i as f64 * dt_ms, true),
        None => (r.len() as f64 * dt_ms, false),
    };

    let extreme = if dir > 0.0 {
        r.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    } else {
        r.iter().copied().fold(f64::INFINITY, f64::min)
    };
    let overshoot_pct = if r.is_empty() {
        0.0
    } else {
        (safe_div(extreme - step.target_value, delta) * 100.0).max(0.0)
    };

    let crossing = |fraction: f64| {
        r.iter()
            .position(|v| dir * (v - step.start_value) >= fraction * magnitude)
    };
    let i10 = crossing(0.1);
    let i90 = crossing(0.9);
    let rise_time_ms = match (i10, i90) {
        (Some(a), Some(b)) if b >= a => (b - a) as f64 * dt_ms,
        _ => 0.0,
    };
    let delay_ms = i10.map(|i| i as f64 * dt_ms).unwrap_or(0.0);

    StepMetrics {
        start_index: step.start_index,
        response_samples: r.len(),
        magnitude,
        peak_count: peaks.len(),
        valley_count: valleys.len(),
        damping_ratio: damping.damping_ratio,
        decay_rate: damping.decay_rate,
        oscillation_freq_hz,
        settling_time_ms,
        settled,
        overshoot_pct,
        rise_time_ms,
        delay_ms,
    }
}

/// All steps of an axis plus the headline (largest) one
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepAnalysis {
    pub headline: Option<StepMetrics>,
    pub steps: Vec<StepMetrics>,
}

impl StepAnalysis {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Detect and characterize every step; the largest-magnitude one is the headline
pub fn analyze_steps(setpoint: &[f64], gyro: &[f64], sample_rate: f64, opts: &StepOptions) -> StepAnalysis {
    let events = detect_steps(setpoint, gyro, opts);
    let steps: Vec<StepMetrics> = events
        .iter()
        .map(|e| characterize(e, sample_rate, opts))
        .collect();

    let headline = steps
        .iter()
        .max_by(|a, b| {
            a.magnitude
                .partial_cmp(&b.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();

    StepAnalysis { headline, steps }
}

/// The largest step event of an axis, used as the identification window
pub fn largest_step(setpoint: &[f64], gyro: &[f64], opts: &StepOptions) -> Option<StepEvent> {
    detect_steps(setpoint, gyro, opts)
        .into_iter()
        .max_by(|a, b| {
            a.magnitude()
                .partial_cmp(&b.magnitude())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Step-response analyzer for the per-axis pipeline
#[derive(Clone, Debug, Default)]
pub struct StepResponseAnalyzer {
    pub options: StepOptions,
}

impl AxisAnalyzer for StepResponseAnalyzer {
    type Output = StepAnalysis;

    fn id(&self) -> &str {
        "step_response"
    }

    fn required_signals(&self) -> Vec<Signal> {
        vec![Signal::Setpoint, Signal::Gyro]
    }

    fn analyze(&self, data: &AxisData) -> Result<StepAnalysis, AnalysisError> {
        let setpoint = require_signal(data, Signal::Setpoint)?;
        let gyro = require_signal(data, Signal::Gyro)?;
        let analysis = analyze_steps(setpoint, gyro, data.sample_rate, &self.options);

        if analysis.headline.is_none() {
            tracing::debug!(
                "No step above {:.0} units on {}",
                self.options.min_magnitude,
                data.axis_label()
            );
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_order_step(k: f64, t: f64, fs: f64, n: usize, amplitude: f64) -> (Vec<f64>, Vec<f64>) {
        let mut setpoint = vec![0.0; n];
        let mut gyro = vec![0.0; n];
        for i in 1..n {
            setpoint[i] = amplitude;
            let time = (i - 1) as f64 / fs;
            gyro[i] = k * amplitude * (1.0 - (-time / t).exp());
        }
        (setpoint, gyro)
    }

    #[test]
    fn test_detect_single_step() {
        let (sp, gyro) = first_order_step(1.0, 0.05, 1000.0, 400, 500.0);
        let steps = detect_steps(&sp, &gyro, &StepOptions::default());

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].start_index, 1);
        assert_eq!(steps[0].start_value, 0.0);
        assert_eq!(steps[0].target_value, 500.0);
        assert_eq!(steps[0].response.len(), 200);
    }

    #[test]
    fn test_small_steps_are_noise() {
        let opts = StepOptions {
            threshold: 2.0,
            ..Default::default()
        };
        let sp = vec![0.0, 4.0, 4.0, 4.0, 0.0, 0.0];
        let gyro = vec![0.0; 6];
        assert!(detect_steps(&sp, &gyro, &opts).is_empty());
    }

    #[test]
    fn test_next_step_ends_collection() {
        let mut sp = vec![0.0; 100];
        for v in sp.iter_mut().skip(10) {
            *v = 200.0;
        }
        for v in sp.iter_mut().skip(50) {
            *v = -100.0;
        }
        let steps = detect_steps(&sp, &[0.0; 100], &StepOptions::default());

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].response.len(), 40);
        assert_eq!(steps[1].start_value, 200.0);
        assert_eq!(steps[1].target_value, -100.0);
    }

    #[test]
    fn test_ramp_edges_merge() {
        let sp = vec![0.0, 100.0, 200.0, 300.0, 300.0, 300.0];
        let steps = detect_steps(&sp, &[0.0; 6], &StepOptions::default());
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].target_value, 300.0);
    }

    #[test]
    fn test_first_order_settling_and_overshoot() {
        let t = 0.05;
        let (sp, gyro) = first_order_step(1.0, t, 1000.0, 400, 500.0);
        let analysis = analyze_steps(&sp, &gyro, 1000.0, &StepOptions::default());
        let m = analysis.headline.expect("step found");

        let expected = 3.0 * t * 1000.0;
        assert!(m.settled);
        assert!(
            (m.settling_time_ms - expected).abs() <= expected * 0.2,
            "settling {} ms",
            m.settling_time_ms
        );
        assert!(m.overshoot_pct.abs() < 1e-9);
        assert_eq!(m.damping_ratio, 0.0);
        // 10%..90% of a first-order response takes T*ln(9)
        assert!((m.rise_time_ms - t * 9f64.ln() * 1000.0).abs() < 2.0);
    }

    #[test]
    fn test_log_decrement_ratio_two() {
        let d = log_decrement(&[100.0, 50.0]);
        let delta = 2f64.ln();
        let expected = delta / (2.0 * PI * (1.0 + (delta / (2.0 * PI)).powi(2)).sqrt());
        assert!((d.damping_ratio - expected).abs() < 1e-12);
        assert!((d.damping_ratio - 0.11).abs() < 0.01);
        assert!((d.decay_rate - delta * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_log_decrement_insufficient() {
        assert_eq!(log_decrement(&[100.0]), Damping::default());
        assert_eq!(log_decrement(&[]), Damping::default());
    }

    /// Piecewise-linear response through the given knots, one sample per ms
    fn polyline(knots: &[(usize, f64)]) -> Vec<f64> {
        let mut out = Vec::new();
        for w in knots.windows(2) {
            let ((i0, v0), (i1, v1)) = (w[0], w[1]);
            for i in i0..i1 {
                out.push(v0 + (v1 - v0) * (i - i0) as f64 / (i1 - i0) as f64);
            }
        }
        out.push(knots.last().map(|k| k.1).unwrap_or(0.0));
        out
    }

    #[test]
    fn test_oscillatory_response_damping_and_frequency() {
        // Peaks 100 and 50 above target, 40 ms apart
        let response = polyline(&[
            (0, 0.0),
            (20, 600.0),
            (40, 450.0),
            (60, 550.0),
            (80, 500.0),
            (150, 500.0),
        ]);
        let step = StepEvent {
            start_index: 0,
            start_value: 0.0,
            target_value: 500.0,
            response,
        };
        let m = characterize(&step, 1000.0, &StepOptions::default());

        let delta = 2f64.ln();
        let expected = delta / (2.0 * PI * (1.0 + (delta / (2.0 * PI)).powi(2)).sqrt());
        assert!((m.damping_ratio - expected).abs() < 0.01);
        assert!((m.oscillation_freq_hz - 25.0).abs() < 1e-9);
        assert!((m.overshoot_pct - 20.0).abs() < 1e-9);
        assert!((m.delay_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_step_direction() {
        let response = polyline(&[(0, 0.0), (20, -360.0), (40, -280.0), (60, -300.0), (120, -300.0)]);
        let step = StepEvent {
            start_index: 0,
            start_value: 0.0,
            target_value: -300.0,
            response,
        };
        let m = characterize(&step, 1000.0, &StepOptions::default());
        assert!((m.overshoot_pct - 20.0).abs() < 1e-9);
        assert!(m.rise_time_ms > 0.0);
        assert!(m.settled);
    }

    #[test]
    fn test_headline_is_largest_step() {
        let mut sp = vec![0.0; 600];
        for v in sp.iter_mut().skip(10).take(200) {
            *v = 100.0;
        }
        for v in sp.iter_mut().skip(300) {
            *v = 400.0;
        }
        let analysis = analyze_steps(&sp, &sp, 1000.0, &StepOptions::default());
        assert_eq!(analysis.step_count(), 3);
        assert_eq!(analysis.headline.map(|h| h.magnitude), Some(400.0));
    }

    #[test]
    fn test_no_steps_gives_no_headline() {
        let analysis = analyze_steps(&[0.0; 50], &[0.0; 50], 1000.0, &StepOptions::default());
        assert!(analysis.headline.is_none());
        assert!(analysis.steps.is_empty());
    }
}
