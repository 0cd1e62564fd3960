//! Harmonic distortion and oscillation detection on the tracking error.
//!
//! A well-tuned loop leaves a broadband, low-level error. A loop on the edge
//! of instability leaves a strong tone plus its harmonics.

use serde::Serialize;

use super::spectral::{self, SpectralOptions, Spectrum};
use super::*;
use crate::stream::safe_div;

/// Harmonics H2..H5 enter the distortion figure
const MAX_HARMONIC: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct HarmonicAnalysis {
    /// Strongest error tone at or above the oscillation floor, 0 if none
    pub fundamental_hz: f64,
    pub fundamental_magnitude: f64,
    /// Total harmonic distortion, percent of the fundamental
    pub thd_pct: f64,
    /// Fundamental to noise-floor ratio
    pub peak_to_floor: f64,
    pub oscillation_detected: bool,
}

/// Total harmonic distortion of `fundamental_hz` in `spectrum`, in percent.
///
/// Harmonics above Nyquist are skipped.
pub fn total_harmonic_distortion(spectrum: &Spectrum, fundamental_hz: f64) -> f64 {
    let h1 = spectrum.magnitude_at(fundamental_hz);
    if h1 <= 0.0 {
        return 0.0;
    }
    let nyquist = spectrum.sample_rate / 2.0;

    let harmonic_energy: f64 = (2..=MAX_HARMONIC)
        .map(|n| fundamental_hz * n as f64)
        .take_while(|&f| f < nyquist)
        .map(|f| spectrum.magnitude_at(f).powi(2))
        .sum();

    safe_div(harmonic_energy.sqrt(), h1) * 100.0
}

/// Find the dominant error tone and judge whether it is an oscillation
pub fn analyze_harmonics(
    error: &[f64],
    sample_rate: f64,
    opts: &SpectralOptions,
    oscillation_min_hz: f64,
    oscillation_ratio: f64,
) -> HarmonicAnalysis {
    let analysis = spectral::analyze(error, sample_rate, opts);
    let spectrum = &analysis.spectrum;
    if spectrum.is_empty() {
        return HarmonicAnalysis::default();
    }

    // Strongest bin above the stick-input band
    let fundamental = spectrum
        .points
        .iter()
        .filter(|p| p.frequency >= oscillation_min_hz)
        .max_by(|a, b| {
            a.magnitude
                .partial_cmp(&b.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let Some(fundamental) = fundamental.filter(|p| p.magnitude > 0.0) else {
        return HarmonicAnalysis::default();
    };

    let thd_pct = total_harmonic_distortion(spectrum, fundamental.frequency);
    let peak_to_floor = safe_div(fundamental.magnitude, analysis.noise_floor);
    let oscillation_detected = analysis.noise_floor > 0.0 && peak_to_floor > oscillation_ratio;

    if oscillation_detected {
        tracing::debug!(
            "Oscillation at {:.1} Hz ({:.1}x noise floor, THD {:.1}%)",
            fundamental.frequency,
            peak_to_floor,
            thd_pct
        );
    }

    HarmonicAnalysis {
        fundamental_hz: fundamental.frequency,
        fundamental_magnitude: fundamental.magnitude,
        thd_pct,
        peak_to_floor,
        oscillation_detected,
    }
}

/// Harmonic analyzer for the per-axis pipeline
#[derive(Clone, Debug)]
pub struct HarmonicAnalyzer {
    pub spectral: SpectralOptions,
    pub oscillation_min_hz: f64,
    pub oscillation_ratio: f64,
}

impl Default for HarmonicAnalyzer {
    fn default() -> Self {
        Self {
            spectral: SpectralOptions::default(),
            oscillation_min_hz: 10.0,
            oscillation_ratio: 8.0,
        }
    }
}

impl AxisAnalyzer for HarmonicAnalyzer {
    type Output = HarmonicAnalysis;

    fn id(&self) -> &str {
        "harmonics"
    }

    fn required_signals(&self) -> Vec<Signal> {
        vec![Signal::Setpoint, Signal::Gyro]
    }

    fn analyze(&self, data: &AxisData) -> Result<HarmonicAnalysis, AnalysisError> {
        let error = data
            .tracking_error()
            .ok_or_else(|| missing_column(data, Signal::Gyro))?;
        require_min_length(&error, 16, "harmonic analysis samples")?;

        Ok(analyze_harmonics(
            &error,
            data.sample_rate,
            &self.spectral,
            self.oscillation_min_hz,
            self.oscillation_ratio,
        ))
    }
}
