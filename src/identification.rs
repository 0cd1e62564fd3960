//! System identification of the setpoint -> gyro response.
//!
//! Three model structures are fitted to an axis. The continuous models use
//! the collected response of its largest step, ARX the whole trace:
//! - first order `K / (T s + 1)` from the 63.2% rise time
//! - second order `K / (T1 s^2 + T2 s + 1)` from the overshoot peaks
//! - discrete ARX(na, nb) by ordinary least squares
//!
//! Every model can be simulated through the [`Plant`] trait, which is what
//! controller synthesis runs its closed-loop candidates against.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::analysis::filters::butterworth_lowpass_filtfilt;
use crate::analysis::step_response::{
    characterize, find_extrema, largest_step, log_decrement, StepMetrics, StepOptions,
};
use crate::analysis::{missing_column, require_min_length, AnalysisError, AxisData};
use crate::columns::{Axis, ColumnMap, Signal};
use crate::config::AnalysisConfig;
use crate::log::FlightLog;
use crate::stream::{mean, safe_div};

/// Fraction of the final value that defines the first-order time constant
const TIME_CONSTANT_LEVEL: f64 = 0.632;
/// Damping assumed when the response shows fewer than two overshoot peaks
const DEFAULT_ZETA: f64 = 0.7;
/// Relative pivot size below which the normal equations count as singular
const SINGULAR_TOLERANCE: f64 = 1e-12;
/// Ridge added to the ARX normal equations, relative to their largest entry.
/// Keeps over-parameterized fits (ARX(2,2) of a first-order plant) solvable.
const ARX_RIDGE: f64 = 1e-10;
/// Normalized cutoff of the smoothing applied before peak picking
const PEAK_SMOOTHING_CUTOFF: f64 = 0.1;

/// Which model structure to fit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelOrder {
    First,
    Second,
    Arx { na: usize, nb: usize },
}

/// An identified model of one axis
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SystemModel {
    FirstOrder {
        k: f64,
        t: f64,
    },
    SecondOrder {
        k: f64,
        t1: f64,
        t2: f64,
        wn: f64,
        zeta: f64,
    },
    /// `A(q) y = B(q) u` with `a[0] = 1`; `b[j]` multiplies `u[k - 1 - j]`
    Arx {
        a: Vec<f64>,
        b: Vec<f64>,
        sample_time: f64,
    },
}

impl SystemModel {
    pub fn order(&self) -> ModelOrder {
        match self {
            SystemModel::FirstOrder { .. } => ModelOrder::First,
            SystemModel::SecondOrder { .. } => ModelOrder::Second,
            SystemModel::Arx { a, b, .. } => ModelOrder::Arx {
                na: a.len().saturating_sub(1),
                nb: b.len(),
            },
        }
    }

    /// Steady-state gain
    pub fn gain(&self) -> f64 {
        match self {
            SystemModel::FirstOrder { k, .. } | SystemModel::SecondOrder { k, .. } => *k,
            SystemModel::Arx { a, b, .. } => safe_div(b.iter().sum(), a.iter().sum()),
        }
    }

    /// Natural integration step for simulating this model
    pub fn natural_step(&self, sample_rate: f64) -> f64 {
        match self {
            SystemModel::Arx { sample_time, .. } => *sample_time,
            _ => safe_div(1.0, sample_rate),
        }
    }

    /// Fresh simulation state
    pub fn plant(&self) -> ModelPlant<'_> {
        ModelPlant::new(self)
    }

    /// Open-loop response to a unit step over `duration_s`
    pub fn simulate_step(&self, duration_s: f64, dt: f64) -> Vec<f64> {
        let dt = match self {
            SystemModel::Arx { sample_time, .. } => *sample_time,
            _ => dt,
        };
        if dt <= 0.0 || duration_s <= 0.0 {
            return vec![];
        }
        let steps = (duration_s / dt).ceil() as usize;
        let mut plant = self.plant();
        (0..steps).map(|_| plant.step(1.0, dt)).collect()
    }

    /// Gain and 63.2% time constant of the simulated step response.
    ///
    /// Lets first-order tuning rules run on any model.
    pub fn first_order_equivalent(&self) -> Option<(f64, f64)> {
        match self {
            SystemModel::FirstOrder { k, t } => Some((*k, *t)),
            SystemModel::SecondOrder { k, t2, .. } => Some((*k, *t2)),
            SystemModel::Arx { sample_time, .. } => {
                let k = self.gain();
                if !k.is_finite() || k.abs() < f64::EPSILON {
                    return None;
                }
                let response = self.simulate_step(2000.0 * sample_time, *sample_time);
                let idx = response
                    .iter()
                    .position(|y| y / k >= TIME_CONSTANT_LEVEL)?;
                Some((k, ((idx + 1) as f64 * sample_time).max(*sample_time)))
            }
        }
    }
}

/// Something a controller can drive one step at a time
pub trait Plant {
    /// Apply input `u` for `dt` seconds and return the new output
    fn step(&mut self, u: f64, dt: f64) -> f64;

    /// Back to rest
    fn reset(&mut self);
}

/// Simulation state of a [`SystemModel`]
#[derive(Clone, Debug)]
pub struct ModelPlant<'a> {
    model: &'a SystemModel,
    y: f64,
    dy: f64,
    /// Most recent first
    y_hist: Vec<f64>,
    u_hist: Vec<f64>,
}

impl<'a> ModelPlant<'a> {
    pub fn new(model: &'a SystemModel) -> Self {
        let (na, nb) = match model {
            SystemModel::Arx { a, b, .. } => (a.len().saturating_sub(1), b.len()),
            _ => (0, 0),
        };
        Self {
            model,
            y: 0.0,
            dy: 0.0,
            y_hist: vec![0.0; na],
            u_hist: vec![0.0; nb],
        }
    }

    pub fn output(&self) -> f64 {
        self.y
    }
}

impl Plant for ModelPlant<'_> {
    fn step(&mut self, u: f64, dt: f64) -> f64 {
        match self.model {
            SystemModel::FirstOrder { k, t } => {
                let t = t.max(dt);
                self.y += dt * (k * u - self.y) / t;
            }
            SystemModel::SecondOrder { k, t1, t2, .. } => {
                // Semi-implicit Euler: velocity first, then position
                let t1 = t1.max(f64::EPSILON);
                let accel = (k * u - self.y - t2 * self.dy) / t1;
                self.dy += dt * accel;
                self.y += dt * self.dy;
            }
            SystemModel::Arx { a, b, .. } => {
                self.u_hist.rotate_right(1);
                if let Some(first) = self.u_hist.first_mut() {
                    *first = u;
                }
                let ar: f64 = a.iter().skip(1).zip(&self.y_hist).map(|(ai, yi)| ai * yi).sum();
                let x: f64 = b.iter().zip(&self.u_hist).map(|(bj, uj)| bj * uj).sum();
                self.y = x - ar;
                self.y_hist.rotate_right(1);
                if let Some(first) = self.y_hist.first_mut() {
                    *first = self.y;
                }
            }
        }
        self.y
    }

    fn reset(&mut self) {
        self.y = 0.0;
        self.dy = 0.0;
        self.y_hist.iter_mut().for_each(|v| *v = 0.0);
        self.u_hist.iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Baseline, final value and step onset of an input/output window
struct StepWindow {
    u0: f64,
    y0: f64,
    du: f64,
    dy: f64,
    onset: usize,
}

fn step_window(input: &[f64], output: &[f64]) -> Result<StepWindow, AnalysisError> {
    let n = input.len().min(output.len());
    require_min_length(&output[..n], 3, "identification samples")?;

    let tail = (n / 10).max(1);
    let u0 = input[0];
    let y0 = output[0];
    let du = mean(&input[n - tail..n]) - u0;
    let dy = mean(&output[n - tail..n]) - y0;

    if du.abs() < f64::EPSILON {
        return Err(AnalysisError::NumericDegenerate(
            "input does not change over the window".to_string(),
        ));
    }
    if dy.abs() < f64::EPSILON {
        return Err(AnalysisError::NumericDegenerate(
            "output does not respond to the input step".to_string(),
        ));
    }

    let onset = input[..n]
        .iter()
        .position(|u| (u - u0).abs() >= 0.5 * du.abs())
        .unwrap_or(0);

    Ok(StepWindow { u0, y0, du, dy, onset })
}

/// Time from onset until the output first reaches `level` of its final change,
/// linearly interpolated between samples
fn time_to_level(output: &[f64], w: &StepWindow, level: f64, sample_rate: f64) -> Option<f64> {
    let frac = |y: f64| (y - w.y0) / w.dy;
    let idx = (w.onset..output.len()).find(|&i| frac(output[i]) >= level)?;
    let exact = if idx > w.onset {
        let (a, b) = (frac(output[idx - 1]), frac(output[idx]));
        (idx - 1) as f64 + safe_div(level - a, b - a).clamp(0.0, 1.0)
    } else {
        idx as f64
    };
    Some(safe_div(exact - w.onset as f64, sample_rate))
}

/// First-order fit: `K = dy/du`, `T` = time to 63.2% of the final change
pub fn identify_first_order(input: &[f64], output: &[f64], sample_rate: f64) -> Result<SystemModel, AnalysisError> {
    if sample_rate <= 0.0 {
        return Err(AnalysisError::InvalidParameter("sample rate must be positive".to_string()));
    }
    let w = step_window(input, output)?;
    let k = w.dy / w.du;
    let t = time_to_level(output, &w, TIME_CONSTANT_LEVEL, sample_rate)
        .ok_or_else(|| AnalysisError::InsufficientData {
            what: "63.2% crossing".to_string(),
            needed: 1,
            got: 0,
        })?
        .max(1.0 / sample_rate);

    tracing::debug!("First-order fit: K={:.3}, T={:.4}s (u0={:.1})", k, t, w.u0);
    Ok(SystemModel::FirstOrder { k, t })
}

/// Second-order fit: damping from the log decrement of the overshoot peaks,
/// natural frequency from their spacing.
///
/// With fewer than two peaks zeta defaults to 0.7; one peak still fixes the
/// damped period (it sits half a period after onset), none falls back to the
/// first-order rise time.
pub fn identify_second_order(input: &[f64], output: &[f64], sample_rate: f64) -> Result<SystemModel, AnalysisError> {
    if sample_rate <= 0.0 {
        return Err(AnalysisError::InvalidParameter("sample rate must be positive".to_string()));
    }
    let w = step_window(input, output)?;
    let n = input.len().min(output.len());
    let k = w.dy / w.du;
    let y_final = w.y0 + w.dy;
    let dir = w.dy.signum();

    let smoothed = if n >= 16 {
        butterworth_lowpass_filtfilt(&output[..n], PEAK_SMOOTHING_CUTOFF, 2)
    } else {
        output[..n].to_vec()
    };
    let (maxima, minima) = find_extrema(&smoothed, w.onset + 1);
    let candidates = if dir > 0.0 { maxima } else { minima };
    let peaks: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| dir * (smoothed[i] - y_final) > 0.0)
        .collect();
    let amplitudes: Vec<f64> = peaks.iter().map(|&i| (smoothed[i] - y_final).abs()).collect();

    let (zeta, wn) = match peaks.as_slice() {
        [p0, p1, ..] => {
            let damping = log_decrement(&amplitudes[..2]);
            let zeta = damping.damping_ratio.clamp(0.01, 0.99);
            let period = (p1 - p0) as f64 / sample_rate;
            let wd = 2.0 * PI / period;
            (zeta, wd / (1.0 - zeta * zeta).sqrt())
        }
        [p0] => {
            let time_to_peak = ((p0 - w.onset) as f64 / sample_rate).max(1.0 / sample_rate);
            let wd = PI / time_to_peak;
            (DEFAULT_ZETA, wd / (1.0 - DEFAULT_ZETA * DEFAULT_ZETA).sqrt())
        }
        [] => {
            tracing::debug!("No overshoot peaks, using zeta={} and the rise time", DEFAULT_ZETA);
            let t = time_to_level(output, &w, TIME_CONSTANT_LEVEL, sample_rate)
                .unwrap_or(1.0 / sample_rate)
                .max(1.0 / sample_rate);
            (DEFAULT_ZETA, 1.0 / t)
        }
    };

    if !wn.is_finite() || wn <= 0.0 {
        return Err(AnalysisError::NumericDegenerate(format!("natural frequency {}", wn)));
    }

    let t1 = 1.0 / (wn * wn);
    let t2 = 2.0 * zeta / wn;
    tracing::debug!("Second-order fit: K={:.3}, wn={:.1} rad/s, zeta={:.3}", k, wn, zeta);
    Ok(SystemModel::SecondOrder { k, t1, t2, wn, zeta })
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting
pub fn solve_linear(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, AnalysisError> {
    let n = b.len();
    if a.shape() != [n, n] {
        return Err(AnalysisError::InvalidParameter(format!(
            "matrix shape {:?} does not match vector length {}",
            a.shape(),
            n
        )));
    }

    let mut m = a.clone();
    let mut rhs = b.clone();
    let scale = m.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return Err(AnalysisError::SingularModel("regression matrix is zero".to_string()));
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| {
                m[[i, col]]
                    .abs()
                    .partial_cmp(&m[[j, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if m[[pivot, col]].abs() <= SINGULAR_TOLERANCE * scale {
            return Err(AnalysisError::SingularModel(format!("zero pivot in column {}", col)));
        }
        if pivot != col {
            for j in 0..n {
                m.swap([col, j], [pivot, j]);
            }
            rhs.swap(col, pivot);
        }

        for row in col + 1..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                m[[row, j]] -= factor * m[[col, j]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|j| m[[row, j]] * x[j]).sum();
        x[row] = (rhs[row] - tail) / m[[row, row]];
    }
    Ok(x)
}

/// ARX(na, nb) by ordinary least squares: `theta = (Phi^T Phi)^-1 Phi^T Y`.
///
/// Row `k` of `Phi` is `[-y[k-1] .. -y[k-na], u[k-1] .. u[k-nb]]`.
pub fn identify_arx(
    input: &[f64],
    output: &[f64],
    na: usize,
    nb: usize,
    sample_rate: f64,
) -> Result<SystemModel, AnalysisError> {
    if na == 0 || nb == 0 {
        return Err(AnalysisError::InvalidParameter(format!(
            "ARX orders must be at least 1 (na={}, nb={})",
            na, nb
        )));
    }
    if sample_rate <= 0.0 {
        return Err(AnalysisError::InvalidParameter("sample rate must be positive".to_string()));
    }

    let n = input.len().min(output.len());
    let lag = na.max(nb);
    let params = na + nb;
    let rows = n.saturating_sub(lag);
    if rows < params {
        return Err(AnalysisError::InsufficientData {
            what: "ARX regression rows".to_string(),
            needed: params + lag,
            got: n,
        });
    }

    let phi = Array2::from_shape_fn((rows, params), |(r, c)| {
        let k = r + lag;
        if c < na {
            -output[k - 1 - c]
        } else {
            input[k - 1 - (c - na)]
        }
    });
    let y = Array1::from_iter((lag..n).map(|k| output[k]));

    let phi_t = phi.t();
    let mut normal = phi_t.dot(&phi);
    let ridge = ARX_RIDGE * normal.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    normal.diag_mut().map_inplace(|v| *v += ridge);
    let rhs = phi_t.dot(&y);
    let theta = solve_linear(&normal, &rhs)?;

    let mut a = Vec::with_capacity(na + 1);
    a.push(1.0);
    a.extend(theta.iter().take(na));
    let b: Vec<f64> = theta.iter().skip(na).copied().collect();

    tracing::debug!("ARX({}, {}) fit over {} rows", na, nb, rows);
    Ok(SystemModel::Arx {
        a,
        b,
        sample_time: 1.0 / sample_rate,
    })
}

/// Fit a model of the requested order to an input/output window
pub fn identify_window(
    input: &[f64],
    output: &[f64],
    order: ModelOrder,
    sample_rate: f64,
) -> Result<SystemModel, AnalysisError> {
    match order {
        ModelOrder::First => identify_first_order(input, output, sample_rate),
        ModelOrder::Second => identify_second_order(input, output, sample_rate),
        ModelOrder::Arx { na, nb } => identify_arx(input, output, na, nb, sample_rate),
    }
}

/// Identify an axis.
///
/// First- and second-order models are fitted to the window of `headline`,
/// starting one sample before the step so the baseline is known. ARX needs
/// an input that changes more than once, so it regresses over the whole
/// trace and every step in it.
pub fn identify_axis(
    data: &AxisData,
    order: ModelOrder,
    headline: Option<&StepMetrics>,
) -> Result<SystemModel, AnalysisError> {
    let setpoint = data
        .setpoint
        .as_deref()
        .ok_or_else(|| missing_column(data, Signal::Setpoint))?;
    let gyro = data
        .gyro
        .as_deref()
        .ok_or_else(|| missing_column(data, Signal::Gyro))?;

    if let ModelOrder::Arx { na, nb } = order {
        return identify_arx(setpoint, gyro, na, nb, data.sample_rate);
    }

    let step = headline.ok_or_else(|| AnalysisError::InsufficientData {
        what: "step events for identification".to_string(),
        needed: 1,
        got: 0,
    })?;

    let start = step.start_index.saturating_sub(1);
    let end = (step.start_index + step.response_samples)
        .min(setpoint.len())
        .min(gyro.len());
    if start >= end {
        return Err(AnalysisError::InsufficientData {
            what: "identification window".to_string(),
            needed: 3,
            got: 0,
        });
    }
    identify_window(&setpoint[start..end], &gyro[start..end], order, data.sample_rate)
}

/// Identify `axis` of a log
pub fn identify(
    log: &FlightLog,
    columns: &ColumnMap,
    axis: Axis,
    order: ModelOrder,
    sample_rate: f64,
    cfg: &AnalysisConfig,
) -> Result<SystemModel, AnalysisError> {
    let data = AxisData::extract(log, columns, axis, sample_rate);
    let opts = StepOptions::from(cfg);
    let headline = match (data.setpoint.as_deref(), data.gyro.as_deref()) {
        (Some(setpoint), Some(gyro)) if !matches!(order, ModelOrder::Arx { .. }) => {
            largest_step(setpoint, gyro, &opts).map(|step| characterize(&step, sample_rate, &opts))
        }
        _ => None,
    };
    identify_axis(&data, order, headline.as_ref())
}
