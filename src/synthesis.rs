//! PID synthesis from an identified model.
//!
//! Analytic rules (IMC, Ziegler-Nichols, Cohen-Coon, AMIGO-style robust)
//! produce continuous gains which are then converted to firmware units
//! (P as-is, I and D x100). The genetic tuner searches firmware units
//! directly against a simulated closed loop. Every result is clamped to the
//! axis safe range before it leaves this module.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use strum::{AsRefStr, EnumIter};

use crate::analysis::AnalysisError;
use crate::columns::Axis;
use crate::config::{GaConfig, SynthesisConfig};
use crate::identification::{Plant, SystemModel};
use crate::stream::mean;

/// Dead time assumed by the rules that need one, as a fraction of T
const DEAD_TIME_FRACTION: f64 = 0.1;
/// Firmware scale of the I and D terms
const FIRMWARE_ID_SCALE: f64 = 100.0;
/// Stick ramp used as the closed-loop test input
const SETPOINT_RAMP_S: f64 = 0.01;
/// Band around the target that counts as settled in simulation
const SIM_SETTLE_BAND: f64 = 0.05;
const TOURNAMENT_SIZE: usize = 3;
const MUTATION_SPREAD: f64 = 0.1;

/// PID gains of one axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub f: f64,
}

impl PidGains {
    pub fn new(p: f64, i: f64, d: f64, f: f64) -> Self {
        Self { p, i, d, f }
    }

    pub fn rounded(self) -> Self {
        Self {
            p: self.p.round(),
            i: self.i.round(),
            d: self.d.round(),
            f: self.f.round(),
        }
    }

    fn genes(self) -> [f64; 4] {
        [self.p, self.i, self.d, self.f]
    }

    fn from_genes(g: [f64; 4]) -> Self {
        Self::new(g[0], g[1], g[2], g[3])
    }
}

/// Inclusive bounds for every term of one axis, in firmware units
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SafeRange {
    pub p: (f64, f64),
    pub i: (f64, f64),
    pub d: (f64, f64),
    pub f: (f64, f64),
}

impl SafeRange {
    pub fn for_axis(axis: Axis) -> Self {
        match axis {
            Axis::Roll | Axis::Pitch => Self {
                p: (20.0, 120.0),
                i: (20.0, 150.0),
                d: (10.0, 80.0),
                f: (0.0, 250.0),
            },
            Axis::Yaw => Self {
                p: (20.0, 120.0),
                i: (20.0, 150.0),
                d: (0.0, 40.0),
                f: (0.0, 250.0),
            },
        }
    }

    fn bounds(&self) -> [(f64, f64); 4] {
        [self.p, self.i, self.d, self.f]
    }

    /// Clamp every term; NaN goes to the lower bound
    pub fn clamp(&self, gains: PidGains) -> PidGains {
        let g = gains.genes();
        let b = self.bounds();
        let mut out = [0.0; 4];
        for k in 0..4 {
            out[k] = if g[k].is_nan() { b[k].0 } else { g[k].clamp(b[k].0, b[k].1) };
        }
        PidGains::from_genes(out)
    }

    pub fn contains(&self, gains: &PidGains) -> bool {
        gains
            .genes()
            .iter()
            .zip(self.bounds())
            .all(|(v, (lo, hi))| *v >= lo && *v <= hi)
    }
}

/// Clamp `gains` to the safe range of `axis`
pub fn clamp_to_safe_range(gains: PidGains, axis: Axis) -> PidGains {
    SafeRange::for_axis(axis).clamp(gains)
}

/// Controller design rule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TuningMethod {
    Imc,
    ZieglerNichols,
    CohenCoon,
    Robust,
    Genetic,
}

/// Continuous PID gains: `u = kp e + ki int(e) + kd de/dt`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContinuousGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl ContinuousGains {
    fn from_time_constants(kp: f64, ti: f64, td: f64) -> Self {
        Self {
            kp,
            ki: if ti > 0.0 { kp / ti } else { 0.0 },
            kd: kp * td,
        }
    }
}

/// Scale continuous gains to firmware units and clamp to the axis range
pub fn to_firmware_units(gains: ContinuousGains, axis: Axis) -> PidGains {
    let raw = PidGains::new(
        gains.kp,
        gains.ki * FIRMWARE_ID_SCALE,
        gains.kd * FIRMWARE_ID_SCALE,
        0.0,
    );
    clamp_to_safe_range(raw, axis).rounded()
}

fn usable_gain(k: f64) -> Result<f64, AnalysisError> {
    if k.is_finite() && k.abs() > f64::EPSILON {
        Ok(k)
    } else {
        Err(AnalysisError::NumericDegenerate(format!("plant gain {}", k)))
    }
}

/// Gain and time constant of any model, for the first-order rules
fn first_order_view(model: &SystemModel) -> Result<(f64, f64), AnalysisError> {
    let (k, t) = model
        .first_order_equivalent()
        .ok_or_else(|| AnalysisError::NumericDegenerate("model has no rise time".to_string()))?;
    if !(t.is_finite() && t > 0.0) {
        return Err(AnalysisError::NumericDegenerate(format!("time constant {}", t)));
    }
    Ok((usable_gain(k)?, t))
}

/// Internal model control, lambda tuning
pub fn imc(model: &SystemModel, lambda: f64, robustness: f64) -> Result<ContinuousGains, AnalysisError> {
    match model {
        SystemModel::SecondOrder { k, t1, t2, wn, .. } => {
            let k = usable_gain(*k)?;
            let lam = lambda * (1.0 / wn) * (1.0 + robustness);
            if !(lam.is_finite() && lam > 0.0) {
                return Err(AnalysisError::InvalidParameter(format!("closed-loop time constant {}", lam)));
            }
            Ok(ContinuousGains {
                kp: t2 / (k * lam),
                ki: 1.0 / (k * lam),
                kd: t1 / (k * lam),
            })
        }
        _ => {
            let (k, t) = first_order_view(model)?;
            let lam = lambda * t * (1.0 + robustness);
            if lam <= 0.0 {
                return Err(AnalysisError::InvalidParameter(format!("closed-loop time constant {}", lam)));
            }
            let kp = t / (k * lam);
            Ok(ContinuousGains { kp, ki: kp / t, kd: 0.0 })
        }
    }
}

/// Classic Ziegler-Nichols from the ultimate gain and period
pub fn ziegler_nichols(model: &SystemModel) -> Result<ContinuousGains, AnalysisError> {
    let (ku, tu) = match model {
        SystemModel::SecondOrder { k, wn, zeta, .. } => {
            let k = usable_gain(*k)?;
            (2.0 * zeta / k, 2.0 * PI / wn)
        }
        _ => {
            let (k, t) = first_order_view(model)?;
            let theta = DEAD_TIME_FRACTION * t;
            (PI * t / (2.0 * k * theta), 4.0 * theta)
        }
    };
    Ok(ContinuousGains::from_time_constants(0.6 * ku, 0.5 * tu, 0.125 * tu))
}

/// Cohen-Coon; first-order models only (ARX through its first-order equivalent)
pub fn cohen_coon(model: &SystemModel) -> Result<ContinuousGains, AnalysisError> {
    if matches!(model, SystemModel::SecondOrder { .. }) {
        return Err(AnalysisError::InvalidParameter(
            "Cohen-Coon needs a first-order model".to_string(),
        ));
    }
    let (k, t) = first_order_view(model)?;
    let tau = DEAD_TIME_FRACTION * t;
    let r = tau / t;

    let kp = (1.0 / k) * (t / tau) * (4.0 / 3.0 + r / 4.0);
    let ti = tau * (32.0 + 6.0 * r) / (13.0 + 8.0 * r);
    let td = 4.0 * tau / (11.0 + 2.0 * r);
    Ok(ContinuousGains::from_time_constants(kp, ti, td))
}

/// AMIGO-style rule on a time constant inflated by `1 + robustness`
pub fn robust(model: &SystemModel, robustness: f64) -> Result<ContinuousGains, AnalysisError> {
    let (k, t) = first_order_view(model)?;
    let t = t * (1.0 + robustness.max(0.0));
    let l = DEAD_TIME_FRACTION * t;

    let kp = (1.0 / k) * (0.2 + 0.45 * t / l);
    let ti = l * (0.4 * l + 0.8 * t) / (l + 0.1 * t);
    let td = 0.5 * l * t / (0.3 * l + t);
    Ok(ContinuousGains::from_time_constants(kp, ti, td))
}

/// Step-response figures of a simulated closed loop
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClosedLoopResponse {
    pub overshoot_pct: f64,
    pub settling_time_ms: f64,
    pub steady_state_error: f64,
}

impl ClosedLoopResponse {
    /// Lower is better
    pub fn score(&self) -> f64 {
        let s = self.overshoot_pct + self.settling_time_ms / 10.0 + self.steady_state_error * 100.0;
        if s.is_finite() {
            s
        } else {
            f64::MAX
        }
    }
}

/// Euler-integrated closed loop of `gains` (firmware units) around `plant`.
///
/// The setpoint ramps to 1 over 10 ms; D acts on the measurement, F on the
/// setpoint rate.
pub fn simulate_closed_loop<P: Plant>(plant: &mut P, gains: &PidGains, duration_s: f64, dt: f64) -> ClosedLoopResponse {
    plant.reset();
    let steps = if dt > 0.0 { (duration_s / dt).ceil() as usize } else { 0 };
    if steps == 0 {
        return ClosedLoopResponse::default();
    }

    let (kp, ki, kd, kf) = (
        gains.p,
        gains.i / FIRMWARE_ID_SCALE,
        gains.d / FIRMWARE_ID_SCALE,
        gains.f / FIRMWARE_ID_SCALE,
    );

    let mut y = 0.0;
    let mut prev_y = 0.0;
    let mut prev_r = 0.0;
    let mut integral = 0.0;
    let mut trace = Vec::with_capacity(steps);

    for n in 0..steps {
        let t = (n + 1) as f64 * dt;
        let r = (t / SETPOINT_RAMP_S).min(1.0);
        let e = r - y;
        integral += e * dt;
        let u = kp * e + ki * integral - kd * (y - prev_y) / dt + kf * (r - prev_r) / dt;

        prev_y = y;
        prev_r = r;
        y = plant.step(u, dt);
        if !y.is_finite() {
            return ClosedLoopResponse {
                overshoot_pct: f64::INFINITY,
                ..Default::default()
            };
        }
        trace.push(y);
    }

    let peak = trace.iter().cloned().fold(f64::MIN, f64::max);
    let overshoot_pct = ((peak - 1.0) * 100.0).max(0.0);
    let settling_time_ms = trace
        .iter()
        .rposition(|v| (v - 1.0).abs() > SIM_SETTLE_BAND)
        .map(|idx| (idx + 1) as f64 * dt * 1000.0)
        .unwrap_or(0.0);
    let tail = (trace.len() / 10).max(1);
    let steady_state_error = (1.0 - mean(&trace[trace.len() - tail..])).abs();

    ClosedLoopResponse {
        overshoot_pct,
        settling_time_ms,
        steady_state_error,
    }
}

fn evaluate(model: &SystemModel, gains: &PidGains, duration_s: f64, dt: f64) -> f64 {
    let mut plant = model.plant();
    simulate_closed_loop(&mut plant, gains, duration_s, dt).score()
}

fn tournament(scores: &[f64], rng: &mut StdRng) -> usize {
    let mut best = rng.gen_range(0..scores.len());
    for _ in 1..TOURNAMENT_SIZE {
        let challenger = rng.gen_range(0..scores.len());
        if scores[challenger] < scores[best] {
            best = challenger;
        }
    }
    best
}

/// Genetic search over `{p, i, d, f}` in firmware units.
///
/// Deterministic for a given seed: all random draws happen on one seeded
/// generator and the parallel evaluation keeps population order.
pub fn genetic(model: &SystemModel, axis: Axis, ga: &GaConfig, sample_rate: f64) -> Result<PidGains, AnalysisError> {
    if ga.population < 2 {
        return Err(AnalysisError::InvalidParameter(format!("population {}", ga.population)));
    }
    let dt = model.natural_step(sample_rate);
    if !(dt.is_finite() && dt > 0.0) {
        return Err(AnalysisError::InvalidParameter(format!("simulation step {}", dt)));
    }

    let range = SafeRange::for_axis(axis);
    let bounds = range.bounds();
    let mut rng = StdRng::seed_from_u64(ga.seed);

    let mut population: Vec<PidGains> = (0..ga.population)
        .map(|_| {
            let mut g = [0.0; 4];
            for (gene, (lo, hi)) in g.iter_mut().zip(bounds) {
                *gene = rng.gen_range(lo..=hi);
            }
            PidGains::from_genes(g)
        })
        .collect();

    let score_all = |pop: &[PidGains]| -> Vec<f64> {
        pop.par_iter()
            .map(|g| evaluate(model, g, ga.sim_duration_s, dt))
            .collect()
    };
    let best_of = |scores: &[f64]| -> usize {
        scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    let mut scores = score_all(&population);

    for generation in 0..ga.generations {
        let elite = population[best_of(&scores)];
        let mut next = Vec::with_capacity(ga.population);
        next.push(elite);

        while next.len() < ga.population {
            let a = population[tournament(&scores, &mut rng)].genes();
            let b = population[tournament(&scores, &mut rng)].genes();
            let mut child = [0.0; 4];
            for k in 0..4 {
                let crossed = (a[k] + b[k]) / 2.0;
                child[k] = crossed * (1.0 + rng.gen_range(-MUTATION_SPREAD..=MUTATION_SPREAD));
            }
            next.push(range.clamp(PidGains::from_genes(child)));
        }

        population = next;
        scores = score_all(&population);
        tracing::trace!(
            "GA generation {}: best score {:.3}",
            generation,
            scores[best_of(&scores)]
        );
    }

    let best = best_of(&scores);
    tracing::debug!(
        "GA on {} finished: score {:.3} after {} generations",
        axis.name(),
        scores[best],
        ga.generations
    );
    Ok(range.clamp(population[best]).rounded())
}

/// Design PID gains for `axis` from `model`.
///
/// The analytic rules leave F at 0; only the genetic tuner searches it.
pub fn design(
    model: &SystemModel,
    method: TuningMethod,
    cfg: &SynthesisConfig,
    axis: Axis,
    sample_rate: f64,
) -> Result<PidGains, AnalysisError> {
    let continuous = match method {
        TuningMethod::Imc => imc(model, cfg.lambda, cfg.robustness)?,
        TuningMethod::ZieglerNichols => ziegler_nichols(model)?,
        TuningMethod::CohenCoon => cohen_coon(model)?,
        TuningMethod::Robust => robust(model, cfg.robustness)?,
        TuningMethod::Genetic => return genetic(model, axis, &cfg.ga, sample_rate),
    };

    if !(continuous.kp.is_finite() && continuous.ki.is_finite() && continuous.kd.is_finite()) {
        return Err(AnalysisError::NumericDegenerate(format!(
            "{} produced non-finite gains",
            method.as_ref()
        )));
    }
    tracing::debug!(
        "{} on {}: kp={:.4} ki={:.4} kd={:.6}",
        method.as_ref(),
        axis.name(),
        continuous.kp,
        continuous.ki,
        continuous.kd
    );
    Ok(to_firmware_units(continuous, axis))
}
