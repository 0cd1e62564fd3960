//! Recommendation assembly and the full analysis pipeline.
//!
//! [`generate_recommendation`] runs every analyzer over a log and hands the
//! structured results to [`assemble`], which turns them into PID and filter
//! settings plus a rationale per changed value. The assembler only reads
//! analysis outputs; it never calls back into the analyzers.
//!
//! Neither function can fail. Any analysis that errors is logged, recorded
//! as a note and treated as absent, and the affected values stay at their
//! current settings.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::analysis::cross_axis::{analyze_cross_axis, AxisPair, CrossAxisAnalysis, CrossAxisOptions};
use crate::analysis::filters::{analyze_filters, FilterAnalysis, FilterOptions};
use crate::analysis::harmonics::{HarmonicAnalysis, HarmonicAnalyzer};
use crate::analysis::spectral::{self, SpectralAnalysis, SpectralOptions};
use crate::analysis::statistics::{assess_data_quality, DataQuality, ErrorMetrics, ErrorMetricsAnalyzer};
use crate::analysis::step_response::{StepAnalysis, StepMetrics, StepOptions, StepResponseAnalyzer};
use crate::analysis::{AnalysisError, AxisAnalyzer, AxisData};
use crate::cli::{FilterSettings, PidSettings};
use crate::columns::{Axis, ColumnMap};
use crate::config::AnalysisConfig;
use crate::identification::{identify_axis, SystemModel};
use crate::log::FlightLog;
use crate::synthesis::{clamp_to_safe_range, design, PidGains, TuningMethod};

// Error-metric nudges
const HIGH_RMS_ERROR: f64 = 20.0;
const LOW_RMS_ERROR: f64 = 5.0;
const HIGH_MEAN_ERROR: f64 = 10.0;

// Damping targets
const DAMPING_LOW: f64 = 0.5;
const DAMPING_HIGH: f64 = 0.8;
const DECAY_LOW: f64 = 20.0;
const DECAY_HIGH: f64 = 100.0;
const OVERSHOOT_HIGH: f64 = 25.0;
const OVERSHOOT_LOW: f64 = 5.0;
const RINGING_HZ: f64 = 30.0;
const D_FACTOR_MIN: f64 = 0.8;
const D_FACTOR_MAX: f64 = 1.3;

const OSCILLATION_FACTOR: f64 = 0.92;
const HIGH_THD_PCT: f64 = 40.0;
/// Below this data-quality confidence the tune is flagged as low-confidence
const LOW_CONFIDENCE: f64 = 0.3;

/// Everything measured on one axis
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AxisAnalysis {
    pub axis: Axis,
    pub error: Option<ErrorMetrics>,
    pub steps: Option<StepAnalysis>,
    /// Gyro spectrum summary
    pub spectrum: Option<SpectralAnalysis>,
    pub harmonics: Option<HarmonicAnalysis>,
    pub quality: Option<DataQuality>,
    pub model: Option<SystemModel>,
    /// Model-based gains in firmware units
    pub synthesized: Option<PidGains>,
    #[serde(skip)]
    pub notes: Vec<String>,
}

impl AxisAnalysis {
    pub fn empty(axis: Axis) -> Self {
        Self {
            axis,
            error: None,
            steps: None,
            spectrum: None,
            harmonics: None,
            quality: None,
            model: None,
            synthesized: None,
            notes: Vec::new(),
        }
    }

    fn headline(&self) -> Option<&StepMetrics> {
        self.steps.as_ref().and_then(|s| s.headline.as_ref())
    }

    fn has_measurements(&self) -> bool {
        self.error.is_some() || self.steps.is_some() || self.harmonics.is_some() || self.synthesized.is_some()
    }
}

/// Structured inputs of [`assemble`]
#[derive(Clone, Debug)]
pub struct AssemblyInputs<'a> {
    pub current_pid: &'a PidSettings,
    pub current_filters: &'a FilterSettings,
    /// Indexed by [`Axis::index`]
    pub axes: &'a [AxisAnalysis],
    pub filter_analysis: &'a FilterAnalysis,
    pub cross_axis: Option<&'a CrossAxisAnalysis>,
    pub coupling_threshold: f64,
    /// Method behind `AxisAnalysis::synthesized`, if any
    pub synthesis_method: Option<TuningMethod>,
}

/// The tuning recommendation for one log
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub original_pid: PidSettings,
    pub recommended_pid: PidSettings,
    pub original_filters: FilterSettings,
    pub recommended_filters: FilterSettings,
    /// Rationale keyed `"<axis>.<term>"` or `"filters.<setting>"`
    pub explanations: BTreeMap<String, String>,
    pub filter_analysis: FilterAnalysis,
    pub cross_axis: Option<CrossAxisAnalysis>,
    pub axes: Vec<AxisAnalysis>,
    pub notes: Vec<String>,
}

impl Recommendation {
    /// Keep every current setting
    pub fn unchanged(current_pid: PidSettings, current_filters: FilterSettings) -> Self {
        Self {
            original_pid: current_pid,
            recommended_pid: current_pid,
            filter_analysis: FilterAnalysis::unchanged(&current_filters),
            original_filters: current_filters.clone(),
            recommended_filters: current_filters,
            explanations: BTreeMap::new(),
            cross_axis: None,
            axes: Vec::new(),
            notes: Vec::new(),
        }
    }
}

impl Default for Recommendation {
    fn default() -> Self {
        Self::unchanged(PidSettings::default(), FilterSettings::default())
    }
}

/// Rationale strings, appended per key
#[derive(Debug, Default)]
struct Explanations(BTreeMap<String, String>);

impl Explanations {
    fn add(&mut self, key: impl Into<String>, text: impl AsRef<str>) {
        let entry = self.0.entry(key.into()).or_default();
        if !entry.is_empty() {
            entry.push_str("; ");
        }
        entry.push_str(text.as_ref());
    }
}

/// Multiplicative P/I/D factors for one axis
#[derive(Clone, Copy, Debug)]
struct Factors {
    p: f64,
    i: f64,
    d: f64,
}

impl Default for Factors {
    fn default() -> Self {
        Self { p: 1.0, i: 1.0, d: 1.0 }
    }
}

/// P and I nudges from the tracking error
fn error_nudges(axis: Axis, error: &ErrorMetrics, factors: &mut Factors, ex: &mut Explanations) {
    let name = axis.name();
    if error.rms > HIGH_RMS_ERROR {
        factors.p *= 1.1;
        ex.add(
            format!("{}.p", name),
            format!("RMS tracking error {:.1} is high, raising P 10%", error.rms),
        );
    } else if error.rms < LOW_RMS_ERROR && error.samples > 0 {
        factors.p *= 0.95;
        ex.add(
            format!("{}.p", name),
            format!("RMS tracking error {:.1} is low, easing P 5%", error.rms),
        );
    }
    if error.mean_abs > HIGH_MEAN_ERROR {
        factors.i *= 1.15;
        ex.add(
            format!("{}.i", name),
            format!("Mean tracking error {:.1} suggests drift, raising I 15%", error.mean_abs),
        );
    }
}

/// Combined D correction from the headline step, clamped to [0.8, 1.3]
fn damping_factor(step: &StepMetrics) -> (f64, Vec<String>) {
    let mut factor: f64 = 1.0;
    let mut reasons = Vec::new();

    // Damping and decay need at least two peaks to mean anything
    if step.peak_count >= 2 {
        if step.damping_ratio < DAMPING_LOW {
            factor *= 1.1;
            reasons.push(format!("damping ratio {:.2} is below 0.5", step.damping_ratio));
        } else if step.damping_ratio > DAMPING_HIGH {
            factor *= 0.9;
            reasons.push(format!("damping ratio {:.2} is above 0.8", step.damping_ratio));
        }
        if step.decay_rate < DECAY_LOW {
            factor *= 1.05;
            reasons.push(format!("oscillation decays only {:.0}% per period", step.decay_rate));
        } else if step.decay_rate > DECAY_HIGH {
            factor *= 0.95;
            reasons.push(format!("oscillation decays {:.0}% per period", step.decay_rate));
        }
        if step.oscillation_freq_hz > RINGING_HZ {
            factor *= 0.95;
            reasons.push(format!("ringing at {:.0} Hz", step.oscillation_freq_hz));
        }
    }

    if step.overshoot_pct > OVERSHOOT_HIGH {
        factor *= 1.1;
        reasons.push(format!("overshoot {:.0}%", step.overshoot_pct));
    } else if step.overshoot_pct < OVERSHOOT_LOW && step.magnitude > 0.0 {
        factor *= 0.95;
        reasons.push(format!("overshoot only {:.1}%", step.overshoot_pct));
    }

    (factor.clamp(D_FACTOR_MIN, D_FACTOR_MAX), reasons)
}

fn harmonic_corrections(axis: Axis, h: &HarmonicAnalysis, factors: &mut Factors, ex: &mut Explanations) {
    let name = axis.name();
    if h.oscillation_detected {
        factors.p *= OSCILLATION_FACTOR;
        factors.d *= OSCILLATION_FACTOR;
        let text = format!(
            "oscillation at {:.0} Hz ({:.1}x noise floor), reducing 8%",
            h.fundamental_hz, h.peak_to_floor
        );
        ex.add(format!("{}.p", name), &text);
        ex.add(format!("{}.d", name), &text);
    }
    if h.thd_pct > HIGH_THD_PCT {
        factors.p *= 0.95;
        ex.add(
            format!("{}.p", name),
            format!("harmonic distortion {:.0}%, easing P 5%", h.thd_pct),
        );
    }
}

/// Clamp every axis to its safe range, explaining each term that moved
fn clamp_settings(pid: &mut PidSettings, ex: &mut Explanations) {
    for axis in Axis::ALL {
        let gains = pid.get_mut(axis);
        let clamped = clamp_to_safe_range(*gains, axis);
        let terms = [
            ("p", gains.p, clamped.p),
            ("i", gains.i, clamped.i),
            ("d", gains.d, clamped.d),
            ("f", gains.f, clamped.f),
        ];
        for (term, before, after) in terms {
            if before != after {
                ex.add(
                    format!("{}.{}", axis.name(), term),
                    format!("{:.0} clamped to the safe range ({:.0})", before, after),
                );
            }
        }
        *gains = clamped;
    }
}

fn scaled(gains: PidGains, factors: Factors) -> PidGains {
    PidGains::new(gains.p * factors.p, gains.i * factors.i, gains.d * factors.d, gains.f)
}

fn filter_explanations(
    current: &FilterSettings,
    recommended: &FilterSettings,
    analysis: &FilterAnalysis,
    ex: &mut Explanations,
) {
    if recommended.gyro_lowpass_hz != current.gyro_lowpass_hz {
        let reason = match analysis.gyro_filters.limiting_noise_hz {
            Some(f) => format!("wideband noise from {:.0} Hz", f),
            None => "no significant noise above the control band".to_string(),
        };
        ex.add(
            "filters.gyro_lowpass_hz",
            format!(
                "{:.0} -> {:.0} Hz: {}",
                current.gyro_lowpass_hz, recommended.gyro_lowpass_hz, reason
            ),
        );
    }
    if recommended.dterm_lowpass_hz != current.dterm_lowpass_hz {
        let reason = match analysis.dterm.dominant_noise_hz {
            Some(f) => format!("D-term noise at {:.0} Hz", f),
            None => "D-term is clean".to_string(),
        };
        ex.add(
            "filters.dterm_lowpass_hz",
            format!(
                "{:.0} -> {:.0} Hz: {}",
                current.dterm_lowpass_hz, recommended.dterm_lowpass_hz, reason
            ),
        );
    }

    let notch = &analysis.notch;
    if recommended.dyn_notch_count != current.dyn_notch_count {
        let rpm = if notch.rpm_filter_active {
            ", one fewer with RPM filtering active"
        } else {
            ""
        };
        ex.add(
            "filters.dyn_notch_count",
            format!("{} noise peaks need tracking{}", notch.peaks.len(), rpm),
        );
    }
    if recommended.dyn_notch_min_hz != current.dyn_notch_min_hz
        || recommended.dyn_notch_max_hz != current.dyn_notch_max_hz
    {
        let text = format!(
            "notch range {:.0}-{:.0} Hz covers the measured peaks",
            recommended.dyn_notch_min_hz, recommended.dyn_notch_max_hz
        );
        ex.add("filters.dyn_notch_min_hz", &text);
        ex.add("filters.dyn_notch_max_hz", &text);
    }
    if recommended.dyn_notch_q != current.dyn_notch_q || !recommended.dyn_notch_q_per_peak.is_empty() {
        let classes: Vec<&str> = notch.peaks.iter().map(|p| p.class.as_ref()).collect();
        ex.add(
            "filters.dyn_notch_q",
            format!("Q {} from peak widths ({})", recommended.dyn_notch_q, classes.join(", ")),
        );
    }
}

/// Turn structured analysis results into a recommendation.
///
/// Per axis: error-metric P/I nudges, one clamped D correction from the
/// headline step, harmonic and propagation-source reductions. Model-based
/// gains replace the nudges when present. Strongly coupled roll and pitch
/// then share one D value, and every axis is clamped to its safe range.
pub fn assemble(inputs: &AssemblyInputs) -> Recommendation {
    let mut ex = Explanations::default();
    let mut notes = Vec::new();
    let mut recommended = *inputs.current_pid;
    let source = inputs.cross_axis.and_then(CrossAxisAnalysis::source_axis);

    for analysis in inputs.axes {
        let axis = analysis.axis;
        let name = axis.name();
        let current = *inputs.current_pid.get(axis);
        notes.extend(analysis.notes.iter().cloned());

        if !analysis.has_measurements() {
            ex.add(format!("{}.p", name), "no usable data, keeping current gains");
            continue;
        }

        let mut factors = Factors::default();
        let base = match (analysis.synthesized, inputs.synthesis_method) {
            (Some(model_gains), Some(method)) => {
                let f = if method == TuningMethod::Genetic {
                    model_gains.f
                } else {
                    current.f
                };
                let text = format!("model-based {} design", method.as_ref());
                for term in ["p", "i", "d"] {
                    ex.add(format!("{}.{}", name, term), &text);
                }
                if method == TuningMethod::Genetic {
                    ex.add(format!("{}.f", name), &text);
                }
                PidGains { f, ..model_gains }
            }
            _ => {
                if let Some(error) = &analysis.error {
                    error_nudges(axis, error, &mut factors, &mut ex);
                }
                if let Some(step) = analysis.headline() {
                    let (d_factor, reasons) = damping_factor(step);
                    if d_factor != 1.0 {
                        factors.d *= d_factor;
                        ex.add(
                            format!("{}.d", name),
                            format!("D x{:.2}: {}", d_factor, reasons.join(", ")),
                        );
                    }
                }
                current
            }
        };

        if let Some(h) = &analysis.harmonics {
            harmonic_corrections(axis, h, &mut factors, &mut ex);
        }
        if source == Some(axis) {
            factors.p *= 0.95;
            factors.d *= 0.97;
            let text = "primary oscillation source across axes";
            ex.add(format!("{}.p", name), text);
            ex.add(format!("{}.d", name), text);
        }
        if let Some(q) = &analysis.quality {
            if q.confidence < LOW_CONFIDENCE {
                notes.push(format!(
                    "{}: little stick input (confidence {:.2}), treat changes as tentative",
                    name, q.confidence
                ));
            }
        }

        *recommended.get_mut(axis) = scaled(base, factors).rounded();
    }

    // Strongly coupled roll/pitch share one D
    if let Some(coupling) = inputs.cross_axis.and_then(|c| c.coupling(AxisPair::RollPitch)) {
        if coupling.strength > inputs.coupling_threshold {
            let shared = ((recommended.roll.d + recommended.pitch.d) / 2.0).round();
            let text = format!(
                "roll/pitch coupling {:.2}, sharing D = {:.0}",
                coupling.strength, shared
            );
            recommended.roll.d = shared;
            recommended.pitch.d = shared;
            ex.add("roll.d", &text);
            ex.add("pitch.d", &text);
        }
    }

    clamp_settings(&mut recommended, &mut ex);

    let recommended_filters = inputs.filter_analysis.recommended_settings(inputs.current_filters);
    filter_explanations(inputs.current_filters, &recommended_filters, inputs.filter_analysis, &mut ex);
    if inputs.filter_analysis.gyro_filters.measured_axes == 0 {
        notes.push("No unfiltered gyro logged; gyro filter effectiveness not measured".to_string());
    }

    Recommendation {
        original_pid: *inputs.current_pid,
        recommended_pid: recommended,
        original_filters: inputs.current_filters.clone(),
        recommended_filters,
        explanations: ex.0,
        filter_analysis: inputs.filter_analysis.clone(),
        cross_axis: inputs.cross_axis.cloned(),
        axes: inputs.axes.to_vec(),
        notes,
    }
}

/// Run an analyzer, downgrading a failure to `None` plus a note
fn run_or_note<A: AxisAnalyzer>(analyzer: &A, data: &AxisData, notes: &mut Vec<String>) -> Option<A::Output> {
    match analyzer.run(data) {
        Ok(output) => Some(output),
        Err(e) => {
            note_failure(analyzer.id(), data, &e, notes);
            None
        }
    }
}

fn note_failure(stage: &str, data: &AxisData, e: &AnalysisError, notes: &mut Vec<String>) {
    let axis = data.axis.map(Axis::name).unwrap_or("axis");
    tracing::warn!("{} skipped on {}: {}", stage, axis, e);
    notes.push(format!("{}: {} skipped ({})", axis, stage, e));
}

/// All per-axis analyses of one axis
pub fn analyze_axis(data: &AxisData, cfg: &AnalysisConfig) -> AxisAnalysis {
    let axis = data.axis.unwrap_or(Axis::Roll);
    let mut out = AxisAnalysis::empty(axis);
    let spectral_opts = SpectralOptions::from(cfg);
    let step_opts = StepOptions::from(cfg);

    out.error = run_or_note(
        &ErrorMetricsAnalyzer {
            chunk_size: cfg.chunk_size.max(1),
        },
        data,
        &mut out.notes,
    );
    out.steps = run_or_note(&StepResponseAnalyzer { options: step_opts }, data, &mut out.notes);
    out.harmonics = run_or_note(
        &HarmonicAnalyzer {
            spectral: spectral_opts,
            oscillation_min_hz: cfg.oscillation_min_hz,
            oscillation_ratio: cfg.oscillation_ratio,
        },
        data,
        &mut out.notes,
    );
    out.spectrum = data
        .gyro
        .as_deref()
        .map(|g| spectral::analyze(g, data.sample_rate, &spectral_opts));
    out.quality = data.setpoint.as_deref().map(|sp| {
        assess_data_quality(sp, cfg.chunk_size.max(1), cfg.variance_norm, cfg.stick_activity_norm)
    });

    if let Some(synth) = &cfg.synthesis {
        let headline = out.steps.as_ref().and_then(|s| s.headline.as_ref());
        match identify_axis(data, synth.order, headline) {
            Ok(model) => {
                match design(&model, synth.method, synth, axis, data.sample_rate) {
                    Ok(gains) => out.synthesized = Some(gains),
                    Err(e) => note_failure("synthesis", data, &e, &mut out.notes),
                }
                out.model = Some(model);
            }
            Err(e) => note_failure("identification", data, &e, &mut out.notes),
        }
    }

    out
}

/// Full pipeline: resolve columns, analyze every axis, assemble.
///
/// Always returns a complete recommendation; an empty log gives the current
/// settings back, clamped to the safe range, with a note.
pub fn generate_recommendation(log: &FlightLog, cfg: &AnalysisConfig) -> Recommendation {
    let current_pid = PidSettings::from_metadata(&log.metadata);
    let current_filters = FilterSettings::from_metadata(&log.metadata);

    if log.is_empty() {
        tracing::warn!("Log has no rows, returning current settings");
        let mut rec = Recommendation::unchanged(current_pid, current_filters);
        let mut ex = Explanations::default();
        clamp_settings(&mut rec.recommended_pid, &mut ex);
        rec.explanations = ex.0;
        rec.notes.push("Log contains no rows; nothing to analyze".to_string());
        return rec;
    }

    let columns = ColumnMap::build(&log.headers);
    let sample_rate = log.sample_rate_hz(columns.time, cfg.default_looptime_us);
    tracing::info!(
        "Analyzing {} rows at {:.0} Hz ({} columns)",
        log.len(),
        sample_rate,
        log.headers.len()
    );

    let mut notes = Vec::new();
    for axis in Axis::ALL {
        let missing = columns.missing(axis);
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|s| s.column_name(axis)).collect();
            tracing::debug!("{} missing columns: {}", axis.name(), names.join(", "));
        }
    }

    let axis_data: Vec<AxisData> = Axis::ALL
        .iter()
        .map(|&axis| AxisData::extract(log, &columns, axis, sample_rate))
        .collect();

    // Each axis writes only its own slot; collect keeps roll/pitch/yaw order
    let axes: Vec<AxisAnalysis> = if cfg.parallel_axes {
        axis_data.par_iter().map(|d| analyze_axis(d, cfg)).collect()
    } else {
        axis_data.iter().map(|d| analyze_axis(d, cfg)).collect()
    };

    let filter_analysis = analyze_filters(&axis_data, &current_filters, &FilterOptions::from(cfg));

    let gyros: [Option<&[f64]>; 3] = [
        axis_data[0].gyro.as_deref(),
        axis_data[1].gyro.as_deref(),
        axis_data[2].gyro.as_deref(),
    ];
    let spectra: [Option<&SpectralAnalysis>; 3] = [
        axes[0].spectrum.as_ref(),
        axes[1].spectrum.as_ref(),
        axes[2].spectrum.as_ref(),
    ];
    let cross_axis = if gyros.iter().filter(|g| g.is_some()).count() >= 2 {
        Some(analyze_cross_axis(&gyros, &spectra, sample_rate, &CrossAxisOptions::from(cfg)))
    } else {
        notes.push("Fewer than two gyro axes logged; cross-axis analysis skipped".to_string());
        None
    };

    let inputs = AssemblyInputs {
        current_pid: &current_pid,
        current_filters: &current_filters,
        axes: &axes,
        filter_analysis: &filter_analysis,
        cross_axis: cross_axis.as_ref(),
        coupling_threshold: cfg.coupling_threshold,
        synthesis_method: cfg.synthesis.as_ref().map(|s| s.method),
    };
    let mut rec = assemble(&inputs);
    rec.notes.extend(notes);

    tracing::info!(
        "Recommendation ready: {} explanations, {} notes",
        rec.explanations.len(),
        rec.notes.len()
    );
    rec
}
