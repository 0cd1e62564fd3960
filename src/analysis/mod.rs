//! Signal analysis for blackbox logs.
//!
//! Each analyzer works on one axis worth of already-extracted signals
//! ([`AxisData`]) and implements the [`AxisAnalyzer`] trait, so the pipeline
//! can check required signals up front and degrade per axis:
//! - a missing column skips the metric, it never aborts the run
//! - too little data falls back to a documented default
//! - empty sums and averages come out as 0, never NaN

pub mod cross_axis;
pub mod filters;
pub mod harmonics;
pub mod spectral;
pub mod statistics;
pub mod step_response;

use crate::columns::{Axis, ColumnMap, Signal};
use crate::log::FlightLog;
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur during analysis
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A required column is missing from the log
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// Not enough samples, steps or peaks to estimate a parameter
    #[error("Insufficient data for {what}: need {needed}, got {got}")]
    InsufficientData {
        what: String,
        needed: usize,
        got: usize,
    },

    /// Least-squares regression matrix is not invertible
    #[error("Singular regression matrix: {0}")]
    SingularModel(String),

    /// A computation produced no usable number
    #[error("Numerically degenerate: {0}")]
    NumericDegenerate(String),

    /// Invalid parameter configuration
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Signals of a single axis, extracted from the log once
#[derive(Clone, Debug, Default)]
pub struct AxisData {
    pub axis: Option<Axis>,
    pub sample_rate: f64,
    pub setpoint: Option<Vec<f64>>,
    pub gyro: Option<Vec<f64>>,
    pub gyro_unfilt: Option<Vec<f64>>,
    /// Logged error column, if the firmware wrote one
    pub error: Option<Vec<f64>>,
    pub p_term: Option<Vec<f64>>,
    pub i_term: Option<Vec<f64>>,
    pub d_term: Option<Vec<f64>>,
    pub f_term: Option<Vec<f64>>,
}

impl AxisData {
    /// Pull every resolved column for `axis` out of the log
    pub fn extract(log: &FlightLog, columns: &ColumnMap, axis: Axis, sample_rate: f64) -> Self {
        let take = |signal: Signal| columns.get(signal, axis).map(|idx| log.column_f64(idx));

        Self {
            axis: Some(axis),
            sample_rate,
            setpoint: take(Signal::Setpoint),
            gyro: take(Signal::Gyro),
            gyro_unfilt: take(Signal::GyroUnfilt),
            error: take(Signal::Error),
            p_term: take(Signal::PTerm),
            i_term: take(Signal::ITerm),
            d_term: take(Signal::DTerm),
            f_term: take(Signal::FTerm),
        }
    }

    pub fn signal(&self, signal: Signal) -> Option<&[f64]> {
        match signal {
            Signal::Setpoint => self.setpoint.as_deref(),
            Signal::Gyro => self.gyro.as_deref(),
            Signal::GyroUnfilt => self.gyro_unfilt.as_deref(),
            Signal::Error => self.error.as_deref(),
            Signal::PTerm => self.p_term.as_deref(),
            Signal::ITerm => self.i_term.as_deref(),
            Signal::DTerm => self.d_term.as_deref(),
            Signal::FTerm => self.f_term.as_deref(),
        }
    }

    /// Tracking error: the logged error column, else setpoint - gyro
    pub fn tracking_error(&self) -> Option<Vec<f64>> {
        if let Some(err) = &self.error {
            return Some(err.clone());
        }
        let setpoint = self.setpoint.as_ref()?;
        let gyro = self.gyro.as_ref()?;
        Some(setpoint.iter().zip(gyro).map(|(s, g)| s - g).collect())
    }

    pub fn len(&self) -> usize {
        self.gyro
            .as_ref()
            .or(self.setpoint.as_ref())
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn axis_label(&self) -> &'static str {
        self.axis.map(Axis::name).unwrap_or("axis")
    }
}

/// Core trait for per-axis analysis algorithms
pub trait AxisAnalyzer {
    type Output;

    /// Unique identifier for this analyzer
    fn id(&self) -> &str;

    /// Signals that must be present for `analyze` to run
    fn required_signals(&self) -> Vec<Signal>;

    /// Execute analysis on one axis
    fn analyze(&self, data: &AxisData) -> Result<Self::Output, AnalysisError>;

    /// Check required signals, then analyze
    fn run(&self, data: &AxisData) -> Result<Self::Output, AnalysisError> {
        for signal in self.required_signals() {
            require_signal(data, signal)?;
        }

        let (result, elapsed_ms) = timed_analyze(|| self.analyze(data));
        tracing::debug!(
            "{} on {} finished in {} ms",
            self.id(),
            data.axis_label(),
            elapsed_ms
        );
        result
    }
}

/// Helper function to measure analysis execution time
pub fn timed_analyze<F, T>(f: F) -> (T, u64)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_millis() as u64;
    (result, elapsed)
}

/// `MissingColumn` naming the canonical column of `signal` on this axis
pub fn missing_column(data: &AxisData, signal: Signal) -> AnalysisError {
    AnalysisError::MissingColumn(
        data.axis
            .map(|a| signal.column_name(a))
            .unwrap_or_else(|| signal.as_ref().to_string()),
    )
}

/// Helper to get a required signal or return an error
pub fn require_signal(data: &AxisData, signal: Signal) -> Result<&[f64], AnalysisError> {
    data.signal(signal).ok_or_else(|| missing_column(data, signal))
}

/// Helper to check minimum data length
pub fn require_min_length(data: &[f64], min_len: usize, what: &str) -> Result<(), AnalysisError> {
    if data.len() < min_len {
        Err(AnalysisError::InsufficientData {
            what: what.to_string(),
            needed: min_len,
            got: data.len(),
        })
    } else {
        Ok(())
    }
}
