//! Analysis configuration.
//!
//! Every empirically tuned threshold lives here instead of being hard-coded in
//! the analyzers. Configs are JSON; missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::identification::ModelOrder;
use crate::synthesis::TuningMethod;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    /// Failed to parse the config JSON
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Tunables for the analysis pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Rows per chunk for streaming statistics
    pub chunk_size: usize,
    /// Setpoint jump between consecutive samples that starts a step event (raw units)
    pub step_threshold: f64,
    /// Steps with |target - start| at or below this are treated as noise
    pub min_step_magnitude: f64,
    /// Upper bound on samples collected per step response
    pub max_response_samples: usize,
    /// Start-up window excluded from peak detection
    pub startup_skip_ms: f64,
    /// Settling band as a fraction of the step size
    pub settle_band: f64,
    /// Samples the response must stay in band to count as settled
    pub settle_hold_samples: usize,
    /// FFT window length (rounded up to a power of two)
    pub fft_size: usize,
    /// Cap on FFT segments per signal
    pub max_segments: usize,
    /// Minimum normalized magnitude for a spectral peak
    pub peak_threshold: f64,
    /// Peaks kept per segment
    pub max_peaks: usize,
    /// Frequency clustering tolerance
    pub cluster_tolerance_hz: f64,
    /// Coupling score above which two axes are strongly coupled
    pub coupling_threshold: f64,
    /// Setpoint variance that counts as full excitation
    pub variance_norm: f64,
    /// Mean |d setpoint| per sample that counts as full stick activity
    pub stick_activity_norm: f64,
    /// Loop time assumed when neither metadata nor a time column gives one
    pub default_looptime_us: f64,
    /// Lowest frequency considered an oscillation rather than stick input
    pub oscillation_min_hz: f64,
    /// Peak-to-noise-floor ratio that flags an oscillation
    pub oscillation_ratio: f64,
    /// Frequencies above this are treated as noise rather than control signal
    pub noise_split_hz: f64,
    /// Run per-axis analysis on the rayon pool
    pub parallel_axes: bool,
    /// Model-based PID synthesis; `None` keeps recommendations as nudges to the current tune
    pub synthesis: Option<SynthesisConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            step_threshold: 30.0,
            min_step_magnitude: 5.0,
            max_response_samples: 200,
            startup_skip_ms: 5.0,
            settle_band: 0.05,
            settle_hold_samples: 10,
            fft_size: 1024,
            max_segments: 16,
            peak_threshold: 0.01,
            max_peaks: 5,
            cluster_tolerance_hz: 2.0,
            coupling_threshold: 0.6,
            variance_norm: 500.0,
            stick_activity_norm: 10.0,
            default_looptime_us: 312.0,
            oscillation_min_hz: 10.0,
            oscillation_ratio: 8.0,
            noise_split_hz: 100.0,
            parallel_axes: true,
            synthesis: None,
        }
    }
}

/// Model-based controller synthesis settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub order: ModelOrder,
    pub method: TuningMethod,
    /// Desired closed-loop time constant as a multiple of the model time constant
    pub lambda: f64,
    /// Extra margin against model error, 0 = none
    pub robustness: f64,
    pub ga: GaConfig,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            order: ModelOrder::First,
            method: TuningMethod::Imc,
            lambda: 1.0,
            robustness: 0.2,
            ga: GaConfig::default(),
        }
    }
}

/// Genetic-algorithm tuner settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaConfig {
    pub population: usize,
    pub generations: usize,
    pub seed: u64,
    /// Simulated step duration per candidate
    pub sim_duration_s: f64,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            population: 24,
            generations: 25,
            seed: 42,
            sim_duration_s: 0.3,
        }
    }
}

impl AnalysisConfig {
    /// Parse a config from JSON
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&content)?;
        tracing::info!("Loaded analysis config from {:?}", path);
        Ok(config)
    }

    /// Effective FFT size: a power of two, at least 16
    pub fn fft_size(&self) -> usize {
        self.fft_size.max(16).next_power_of_two()
    }
}
