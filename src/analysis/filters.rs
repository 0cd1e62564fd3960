//! Filter primitives and analysis of the flight controller's filter stack.
//!
//! The primitives (Butterworth second-order sections run forward-backward,
//! and the PT1 lowpass the firmware itself uses) condition signals for the
//! other analyzers. [`analyze_filters`] measures how much noise the gyro and
//! D-term filters remove and derives lowpass and dynamic-notch settings from
//! the noise peaks that remain.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::spectral::{self, NoiseClass, SpectralAnalysis, SpectralOptions};
use super::*;
use crate::config::AnalysisConfig;
use crate::log::Metadata;
use crate::stream::{safe_div, RunningStats};

/// Peaks this far above the axis noise floor count as significant
const NOISE_PEAK_RATIO: f64 = 3.0;
/// Firmware supports at most this many dynamic notches
const MAX_NOTCH_COUNT: usize = 5;
/// Reported when the filtered signal has no measurable noise left
const MAX_REDUCTION_DB: f64 = 60.0;

const GYRO_LOWPASS_MIN_HZ: f64 = 100.0;
const GYRO_LOWPASS_MAX_HZ: f64 = 500.0;
const DTERM_LOWPASS_MIN_HZ: f64 = 60.0;
const DTERM_LOWPASS_MAX_HZ: f64 = 200.0;
const NOTCH_MIN_HZ: f64 = 60.0;
const NOTCH_MAX_HZ: f64 = 1000.0;

// ============================================================================
// Filter settings
// ============================================================================

/// Gyro and D-term filter configuration of the flight controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterSettings {
    pub gyro_lowpass_hz: f64,
    pub dterm_lowpass_hz: f64,
    pub dyn_notch_min_hz: f64,
    pub dyn_notch_max_hz: f64,
    pub dyn_notch_count: u32,
    pub dyn_notch_q: u32,
    /// Adaptive Q per notch, strongest peak first; empty when not recommended
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dyn_notch_q_per_peak: Vec<u32>,
    pub gyro_rpm_notch_harmonics: u32,
    pub motor_poles: u32,
    pub dshot_bidir: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            gyro_lowpass_hz: 250.0,
            dterm_lowpass_hz: 100.0,
            dyn_notch_min_hz: 100.0,
            dyn_notch_max_hz: 600.0,
            dyn_notch_count: 3,
            dyn_notch_q: 300,
            dyn_notch_q_per_peak: Vec::new(),
            gyro_rpm_notch_harmonics: 3,
            motor_poles: 14,
            dshot_bidir: false,
        }
    }
}

impl FilterSettings {
    /// Current settings from log metadata; absent or unparsable keys keep defaults
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut settings = Self::default();
        let positive = |key: &str| metadata.get_f64(key).filter(|v| *v > 0.0);
        let count = |key: &str| {
            metadata
                .get_f64(key)
                .filter(|v| *v >= 0.0)
                .map(|v| v.round() as u32)
        };

        if let Some(v) = positive("gyro_lowpass_hz") {
            settings.gyro_lowpass_hz = v;
        }
        if let Some(v) = positive("dterm_lowpass_hz") {
            settings.dterm_lowpass_hz = v;
        }
        if let Some(v) = positive("dyn_notch_min_hz") {
            settings.dyn_notch_min_hz = v;
        }
        if let Some(v) = positive("dyn_notch_max_hz") {
            settings.dyn_notch_max_hz = v;
        }
        if let Some(v) = count("dyn_notch_count") {
            settings.dyn_notch_count = v;
        }
        if let Some(v) = count("dyn_notch_q") {
            settings.dyn_notch_q = v;
        }
        if let Some(v) = count("gyro_rpm_notch_harmonics") {
            settings.gyro_rpm_notch_harmonics = v;
        }
        if let Some(v) = count("motor_poles") {
            settings.motor_poles = v;
        }
        if let Some(flag) = metadata.get_str("dshot_bidir") {
            settings.dshot_bidir = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "on" | "true" | "yes"
            );
        }
        settings
    }

    /// RPM filtering needs bidirectional DShot telemetry and at least one harmonic
    pub fn rpm_filter_active(&self) -> bool {
        self.dshot_bidir && self.gyro_rpm_notch_harmonics > 0
    }
}

// ============================================================================
// Filter analysis
// ============================================================================

/// Parameters for [`analyze_filters`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterOptions {
    pub spectral: SpectralOptions,
    pub noise_split_hz: f64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for FilterOptions {
    fn from(cfg: &AnalysisConfig) -> Self {
        Self {
            spectral: SpectralOptions::from(cfg),
            noise_split_hz: cfg.noise_split_hz,
        }
    }
}

/// Measured gyro filtering
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GyroFilterAnalysis {
    /// Share of the unfiltered noise-band energy removed, averaged over axes; 0 if unmeasured
    pub effectiveness: f64,
    pub noise_reduction_db: f64,
    /// Effectiveness per axis (roll, pitch, yaw)
    pub per_axis: [Option<f64>; 3],
    pub measured_axes: usize,
    pub current_lowpass_hz: f64,
    pub recommended_lowpass_hz: f64,
    /// Lowest wideband noise peak that drove the lowpass recommendation
    pub limiting_noise_hz: Option<f64>,
}

/// Where the D-term noise figure came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DtermSource {
    /// Logged `axisD` columns
    Logged,
    /// Derivative of the filtered gyro through the current D-term lowpass
    Estimated,
    #[default]
    Unavailable,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DtermFilterAnalysis {
    pub source: DtermSource,
    /// RMS of the D-term above the noise split, worst axis
    pub noise_rms: f64,
    pub dominant_noise_hz: Option<f64>,
    pub current_lowpass_hz: f64,
    pub recommended_lowpass_hz: f64,
}

/// A noise peak a dynamic notch should track
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NotchPeak {
    pub frequency: f64,
    pub magnitude: f64,
    pub width_hz: f64,
    pub class: NoiseClass,
    pub q: u32,
    /// Number of axes the peak showed up on
    pub axes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NotchAnalysis {
    pub peaks: Vec<NotchPeak>,
    pub rpm_filter_active: bool,
    pub recommended_min_hz: f64,
    pub recommended_max_hz: f64,
    pub recommended_count: u32,
    pub recommended_q: u32,
    pub recommended_q_per_peak: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FilterAnalysis {
    pub gyro_filters: GyroFilterAnalysis,
    pub dterm: DtermFilterAnalysis,
    pub notch: NotchAnalysis,
}

impl FilterAnalysis {
    /// No data: every recommendation equals the current setting
    pub fn unchanged(current: &FilterSettings) -> Self {
        Self {
            gyro_filters: GyroFilterAnalysis {
                current_lowpass_hz: current.gyro_lowpass_hz,
                recommended_lowpass_hz: current.gyro_lowpass_hz,
                ..Default::default()
            },
            dterm: DtermFilterAnalysis {
                current_lowpass_hz: current.dterm_lowpass_hz,
                recommended_lowpass_hz: current.dterm_lowpass_hz,
                ..Default::default()
            },
            notch: NotchAnalysis {
                rpm_filter_active: current.rpm_filter_active(),
                recommended_min_hz: current.dyn_notch_min_hz,
                recommended_max_hz: current.dyn_notch_max_hz,
                recommended_count: current.dyn_notch_count,
                recommended_q: current.dyn_notch_q,
                ..Default::default()
            },
        }
    }

    /// Recommended settings; fields the analysis does not touch keep `current`
    pub fn recommended_settings(&self, current: &FilterSettings) -> FilterSettings {
        FilterSettings {
            gyro_lowpass_hz: self.gyro_filters.recommended_lowpass_hz,
            dterm_lowpass_hz: self.dterm.recommended_lowpass_hz,
            dyn_notch_min_hz: self.notch.recommended_min_hz,
            dyn_notch_max_hz: self.notch.recommended_max_hz,
            dyn_notch_count: self.notch.recommended_count,
            dyn_notch_q: self.notch.recommended_q,
            dyn_notch_q_per_peak: self.notch.recommended_q_per_peak.clone(),
            ..current.clone()
        }
    }
}

/// Mean-square energy of `signal` above `split_hz` (Butterworth highpass, order 2).
///
/// 0 when the split is at or beyond Nyquist or the signal is too short.
pub fn noise_band_energy(signal: &[f64], split_hz: f64, sample_rate: f64) -> f64 {
    if signal.len() < 4 || sample_rate <= 0.0 || split_hz >= sample_rate / 2.0 {
        return 0.0;
    }
    let high = butterworth_highpass_filtfilt(signal, split_hz / sample_rate, 2);
    let stats = RunningStats::from_slice(&high);
    safe_div(stats.sum_sq, stats.count as f64)
}

/// Filter effectiveness of one axis: `1 - E(gyro) / E(gyroUnfilt)` above the
/// split, clamped to [0, 1], with the reduction in dB.
///
/// `None` when the unfiltered signal has no energy in the noise band.
pub fn filter_effectiveness(
    gyro: &[f64],
    gyro_unfilt: &[f64],
    split_hz: f64,
    sample_rate: f64,
) -> Option<(f64, f64)> {
    let raw = noise_band_energy(gyro_unfilt, split_hz, sample_rate);
    if raw <= 0.0 {
        return None;
    }
    let filtered = noise_band_energy(gyro, split_hz, sample_rate);
    let effectiveness = (1.0 - filtered / raw).clamp(0.0, 1.0);
    let reduction_db = if filtered > 0.0 {
        (10.0 * (raw / filtered).log10()).clamp(-MAX_REDUCTION_DB, MAX_REDUCTION_DB)
    } else {
        MAX_REDUCTION_DB
    };
    Some((effectiveness, reduction_db))
}

/// Noise peaks at or above the split that clear the axis noise floor
fn significant_peaks(analysis: &SpectralAnalysis, split_hz: f64) -> Vec<spectral::NoisePeak> {
    analysis
        .noise_peaks
        .iter()
        .filter(|p| p.frequency >= split_hz && p.magnitude > NOISE_PEAK_RATIO * analysis.noise_floor)
        .copied()
        .collect()
}

/// Merge per-axis peaks that sit within `tolerance_hz` of each other,
/// keeping the strongest, sorted by magnitude.
fn merge_peaks(per_axis: Vec<Vec<spectral::NoisePeak>>, tolerance_hz: f64) -> Vec<NotchPeak> {
    let mut all: Vec<spectral::NoisePeak> = per_axis.into_iter().flatten().collect();
    all.sort_by(|a, b| {
        b.magnitude
            .partial_cmp(&a.magnitude)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged: Vec<NotchPeak> = Vec::new();
    for peak in all {
        match merged
            .iter_mut()
            .find(|m| (m.frequency - peak.frequency).abs() <= tolerance_hz)
        {
            Some(existing) => existing.axes += 1,
            None => merged.push(NotchPeak {
                frequency: peak.frequency,
                magnitude: peak.magnitude,
                width_hz: peak.width_hz,
                class: peak.class,
                q: peak.q,
                axes: 1,
            }),
        }
    }
    merged
}

fn recommend_notches(peaks: &[NotchPeak], current: &FilterSettings) -> NotchAnalysis {
    let rpm_filter_active = current.rpm_filter_active();
    let targets: Vec<&NotchPeak> = peaks
        .iter()
        .filter(|p| p.class != NoiseClass::WidebandOrUnstable)
        .take(MAX_NOTCH_COUNT)
        .collect();

    if targets.is_empty() {
        let mut unchanged = FilterAnalysis::unchanged(current).notch;
        unchanged.peaks = peaks.to_vec();
        return unchanged;
    }

    let mut count = targets.len();
    if rpm_filter_active {
        // Motor noise is already tracked by the RPM filter
        count = count.saturating_sub(1).max(1);
    }

    let min_f = targets.iter().map(|p| p.frequency).fold(f64::INFINITY, f64::min);
    let max_f = targets.iter().map(|p| p.frequency).fold(0.0, f64::max);
    let recommended_min_hz = (min_f * 0.8).floor().clamp(NOTCH_MIN_HZ, NOTCH_MAX_HZ);
    let recommended_max_hz = (max_f * 1.2).ceil().clamp(recommended_min_hz + 50.0, NOTCH_MAX_HZ);

    let q_per_peak: Vec<u32> = targets.iter().take(count).map(|p| p.q).collect();
    let recommended_q = safe_div(
        q_per_peak.iter().map(|&q| q as f64).sum(),
        q_per_peak.len() as f64,
    )
    .round() as u32;

    NotchAnalysis {
        peaks: peaks.to_vec(),
        rpm_filter_active,
        recommended_min_hz,
        recommended_max_hz,
        recommended_count: count as u32,
        recommended_q,
        recommended_q_per_peak: q_per_peak,
    }
}

/// D-term signal of one axis: logged, or estimated from the gyro
fn dterm_signal(data: &AxisData, current: &FilterSettings) -> Option<(Vec<f64>, DtermSource)> {
    if let Some(d) = &data.d_term {
        return Some((d.clone(), DtermSource::Logged));
    }
    let gyro = data.gyro.as_ref()?;
    let derivative: Vec<f64> = sample_derivative(gyro)
        .into_iter()
        .map(|d| d * data.sample_rate)
        .collect();
    Some((
        pt1_filter(&derivative, current.dterm_lowpass_hz, data.sample_rate),
        DtermSource::Estimated,
    ))
}

/// Analyze the filter stack across all axes
pub fn analyze_filters(axes: &[AxisData], current: &FilterSettings, opts: &FilterOptions) -> FilterAnalysis {
    let mut result = FilterAnalysis::unchanged(current);
    let split = opts.noise_split_hz;

    // Gyro effectiveness, measured only where both columns exist
    let mut eff_sum = 0.0;
    let mut db_sum = 0.0;
    for data in axes {
        let (Some(axis), Some(gyro), Some(unfilt)) = (data.axis, &data.gyro, &data.gyro_unfilt) else {
            continue;
        };
        match filter_effectiveness(gyro, unfilt, split, data.sample_rate) {
            Some((eff, db)) => {
                result.gyro_filters.per_axis[axis.index()] = Some(eff);
                eff_sum += eff;
                db_sum += db;
                result.gyro_filters.measured_axes += 1;
            }
            None => tracing::debug!("No noise above {:.0} Hz on {} unfiltered gyro", split, axis.name()),
        }
    }
    let measured = result.gyro_filters.measured_axes as f64;
    result.gyro_filters.effectiveness = safe_div(eff_sum, measured);
    result.gyro_filters.noise_reduction_db = safe_div(db_sum, measured);
    if measured == 0.0 {
        tracing::warn!("No gyroUnfilt columns: gyro filter effectiveness not measured");
    }

    // Noise peaks, from the unfiltered gyro where available
    let mut per_axis_peaks = Vec::new();
    for data in axes {
        let Some(source) = data.gyro_unfilt.as_ref().or(data.gyro.as_ref()) else {
            continue;
        };
        let analysis = spectral::analyze(source, data.sample_rate, &opts.spectral);
        per_axis_peaks.push(significant_peaks(&analysis, split));
    }
    let peaks = merge_peaks(per_axis_peaks, opts.spectral.cluster_tolerance_hz);

    // Gyro lowpass: wideband noise the notches cannot follow
    let limiting = peaks
        .iter()
        .filter(|p| p.class == NoiseClass::WidebandOrUnstable)
        .map(|p| p.frequency)
        .fold(None, |acc: Option<f64>, f| Some(acc.map_or(f, |a| a.min(f))));
    result.gyro_filters.limiting_noise_hz = limiting;
    result.gyro_filters.recommended_lowpass_hz = match limiting {
        Some(f) => (0.8 * f)
            .round()
            .min(current.gyro_lowpass_hz)
            .clamp(GYRO_LOWPASS_MIN_HZ, GYRO_LOWPASS_MAX_HZ),
        None if peaks.is_empty() && result.gyro_filters.measured_axes > 0 => (current.gyro_lowpass_hz * 1.1)
            .round()
            .clamp(GYRO_LOWPASS_MIN_HZ, GYRO_LOWPASS_MAX_HZ),
        None => current.gyro_lowpass_hz,
    };

    result.notch = recommend_notches(&peaks, current);

    // D-term, roll and pitch only: yaw usually runs without D
    for data in axes.iter().filter(|d| d.axis != Some(crate::columns::Axis::Yaw)) {
        let Some((dterm, source)) = dterm_signal(data, current) else {
            continue;
        };
        if result.dterm.source != DtermSource::Logged {
            result.dterm.source = source;
        }
        let noise_rms = noise_band_energy(&dterm, split, data.sample_rate).sqrt();
        result.dterm.noise_rms = result.dterm.noise_rms.max(noise_rms);

        let analysis = spectral::analyze(&dterm, data.sample_rate, &opts.spectral);
        if let Some(strongest) = significant_peaks(&analysis, split)
            .iter()
            .max_by(|a, b| {
                a.magnitude
                    .partial_cmp(&b.magnitude)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        {
            let lowest = result
                .dterm
                .dominant_noise_hz
                .map_or(strongest.frequency, |f| f.min(strongest.frequency));
            result.dterm.dominant_noise_hz = Some(lowest);
        }
    }
    if let Some(f) = result.dterm.dominant_noise_hz {
        result.dterm.recommended_lowpass_hz = (0.7 * f)
            .round()
            .min(current.dterm_lowpass_hz)
            .clamp(DTERM_LOWPASS_MIN_HZ, DTERM_LOWPASS_MAX_HZ);
    }

    tracing::info!(
        "Filter analysis: effectiveness {:.2} over {} axes, {} noise peaks, D-term {:?}",
        result.gyro_filters.effectiveness,
        result.gyro_filters.measured_axes,
        result.notch.peaks.len(),
        result.dterm.source
    );

    result
}

// ============================================================================
// Core filter implementations
// ============================================================================

/// First-order (PT1) lowpass, as run by the flight controller
pub fn pt1_filter(data: &[f64], cutoff_hz: f64, sample_rate: f64) -> Vec<f64> {
    if data.is_empty() {
        return vec![];
    }
    if cutoff_hz <= 0.0 || sample_rate <= 0.0 {
        return data.to_vec();
    }

    let dt = 1.0 / sample_rate;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);

    let mut result = Vec::with_capacity(data.len());
    let mut state = data[0];
    for &value in data {
        state += alpha * (value - state);
        result.push(state);
    }
    result
}

/// Per-sample difference (central inside, one-sided at the ends)
pub fn sample_derivative(data: &[f64]) -> Vec<f64> {
    if data.len() < 2 {
        return vec![0.0; data.len()];
    }

    let mut result = Vec::with_capacity(data.len());
    result.push(data[1] - data[0]);
    for i in 1..data.len() - 1 {
        result.push((data[i + 1] - data[i - 1]) / 2.0);
    }
    result.push(data[data.len() - 1] - data[data.len() - 2]);
    result
}

/// A second-order section (biquad) filter
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Clone, Debug)]
struct Sos {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Sos {
    /// Apply this biquad section to data using Direct Form II Transposed
    fn filter(&self, data: &[f64], zi: [f64; 2]) -> Vec<f64> {
        let mut output = Vec::with_capacity(data.len());
        let [mut z1, mut z2] = zi;

        for &x in data {
            let y = self.b0 * x + z1;
            z1 = self.b1 * x - self.a1 * y + z2;
            z2 = self.b2 * x - self.a2 * y;
            output.push(y);
        }

        output
    }

    fn dc_gain(&self) -> f64 {
        safe_div(self.b0 + self.b1 + self.b2, 1.0 + self.a1 + self.a2)
    }

    /// Steady-state initial conditions for a constant input `x0` (lfilter_zi)
    fn compute_zi(&self, x0: f64) -> [f64; 2] {
        // At steady state x[n] = x0 and y[n] = g * x0:
        //   z2 = b2 * x0 - a2 * y
        //   z1 = b1 * x0 - a1 * y + z2
        let y = self.dc_gain() * x0;
        let z2 = self.b2 * x0 - self.a2 * y;
        let z1 = self.b1 * x0 - self.a1 * y + z2;
        [z1, z2]
    }
}

/// Analog Butterworth prototype, pre-warped and bilinear-transformed into
/// cascaded biquads. `cutoff` is normalized (0.5 = Nyquist).
fn butterworth_sos(cutoff: f64, order: usize, highpass: bool) -> Vec<Sos> {
    if order == 0 {
        return vec![];
    }

    let wc = (PI * cutoff).tan();
    let mut sections = Vec::new();

    // Odd orders carry one first-order section from the real pole
    if order % 2 == 1 {
        let a1 = (wc - 1.0) / (wc + 1.0);
        let section = if highpass {
            let k = 1.0 / (1.0 + wc);
            Sos { b0: k, b1: -k, b2: 0.0, a1, a2: 0.0 }
        } else {
            let k = wc / (1.0 + wc);
            Sos { b0: k, b1: k, b2: 0.0, a1, a2: 0.0 }
        };
        sections.push(section);
    }

    for i in 0..order / 2 {
        // Pole pair angle; zeta = sin(theta) is the section damping
        let theta = PI * (2.0 * i as f64 + 1.0 + (order % 2) as f64) / (2.0 * order as f64);
        let zeta = theta.sin();

        let wc2 = wc * wc;
        let two_zeta_wc = 2.0 * zeta * wc;
        let denom = 1.0 + two_zeta_wc + wc2;

        let a1 = 2.0 * (wc2 - 1.0) / denom;
        let a2 = (1.0 - two_zeta_wc + wc2) / denom;

        let (b0, b1, b2) = if highpass {
            (1.0 / denom, -2.0 / denom, 1.0 / denom)
        } else {
            (wc2 / denom, 2.0 * wc2 / denom, wc2 / denom)
        };
        sections.push(Sos { b0, b1, b2, a1, a2 });
    }

    sections
}

/// Reflect-pad the signal about its end points to reduce edge transients
fn reflect_pad(data: &[f64], pad_len: usize) -> Vec<f64> {
    if data.len() < 2 {
        return data.to_vec();
    }

    let n = data.len();
    let pad_len = pad_len.min(n - 1);
    let mut padded = Vec::with_capacity(n + 2 * pad_len);

    for i in (1..=pad_len).rev() {
        padded.push(2.0 * data[0] - data[i]);
    }
    padded.extend_from_slice(data);
    for i in 1..=pad_len {
        padded.push(2.0 * data[n - 1] - data[n - 1 - i]);
    }

    padded
}

fn run_cascade(data: Vec<f64>, sos: &[Sos]) -> Vec<f64> {
    let Some(&first) = data.first() else {
        return data;
    };
    sos.iter()
        .fold(data, |signal, section| section.filter(&signal, section.compute_zi(first)))
}

/// Zero-phase forward-backward filtering with edge padding (filtfilt)
fn sosfiltfilt(data: &[f64], sos: &[Sos]) -> Vec<f64> {
    if data.is_empty() || sos.is_empty() {
        return data.to_vec();
    }

    // Non-finite samples would poison every later output
    let cleaned: Vec<f64> = data
        .iter()
        .map(|&x| if x.is_finite() { x } else { 0.0 })
        .collect();

    let n = cleaned.len();
    let pad_len = (3 * sos.len() * 2).min(n.saturating_sub(1)).max(1);
    let padded = reflect_pad(&cleaned, pad_len);
    if padded.len() < n + 2 * pad_len {
        return cleaned;
    }

    let mut forward = run_cascade(padded, sos);
    forward.reverse();
    let mut backward = run_cascade(forward, sos);
    backward.reverse();

    backward[pad_len..pad_len + n].to_vec()
}

/// Butterworth lowpass with zero-phase filtering.
///
/// `cutoff` is normalized (0 < cutoff < 0.5, where 0.5 = Nyquist), `order` 1-8.
pub fn butterworth_lowpass_filtfilt(data: &[f64], cutoff: f64, order: usize) -> Vec<f64> {
    if data.is_empty() {
        return vec![];
    }
    let sos = butterworth_sos(cutoff.clamp(0.001, 0.499), order.clamp(1, 8), false);
    sosfiltfilt(data, &sos)
}

/// Butterworth highpass with zero-phase filtering; arguments as for the lowpass
pub fn butterworth_highpass_filtfilt(data: &[f64], cutoff: f64, order: usize) -> Vec<f64> {
    if data.is_empty() {
        return vec![];
    }
    let sos = butterworth_sos(cutoff.clamp(0.001, 0.499), order.clamp(1, 8), true);
    sosfiltfilt(data, &sos)
}
