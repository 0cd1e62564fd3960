//! Statistical analysis of tracking error and pilot input.
//!
//! Error metrics are gathered chunk by chunk with [`RunningStats`] and merged,
//! so an arbitrarily long log never needs a second buffer.

use serde::Serialize;

use super::*;
use crate::stream::{chunked_stats, fold_chunks, safe_div, RunningStats};

/// Tracking-error summary of one axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub rms: f64,
    /// Mean absolute error
    pub mean_abs: f64,
    pub max_abs: f64,
    pub samples: usize,
}

impl ErrorMetrics {
    pub fn from_stats(stats: &RunningStats) -> Self {
        Self {
            rms: stats.rms(),
            mean_abs: stats.mean_abs(),
            max_abs: stats.max_abs(),
            samples: stats.count,
        }
    }
}

/// Error metrics over `error`, streamed in chunks of `chunk_size`
pub fn compute_error_metrics(error: &[f64], chunk_size: usize) -> ErrorMetrics {
    ErrorMetrics::from_stats(&chunked_stats(error, chunk_size))
}

/// Container for correlation results
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub r: f64,         // Pearson correlation coefficient
    pub r_squared: f64, // Coefficient of determination
}

/// Compute Pearson correlation coefficient
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> CorrelationResult {
    let n = x.len().min(y.len());
    if n < 2 {
        return CorrelationResult::default();
    }
    let (x, y) = (&x[..n], &y[..n]);

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;

    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    let r = if denom > f64::EPSILON && cov.is_finite() {
        (cov / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    CorrelationResult {
        r,
        r_squared: r * r,
    }
}

/// How much usable excitation the pilot put into an axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DataQuality {
    pub setpoint_variance: f64,
    /// Mean |setpoint[i] - setpoint[i-1]|
    pub stick_activity: f64,
    /// 0 (no excitation) to 1 (plenty)
    pub confidence: f64,
}

/// Score the setpoint trace of one axis.
///
/// Confidence is the mean of the variance and stick-activity scores, each
/// normalized by its configured full-scale value and capped at 1.
pub fn assess_data_quality(
    setpoint: &[f64],
    chunk_size: usize,
    variance_norm: f64,
    stick_activity_norm: f64,
) -> DataQuality {
    if setpoint.len() < 2 {
        return DataQuality::default();
    }

    let setpoint_variance = chunked_stats(setpoint, chunk_size).variance();

    // Each chunk carries the sample before it so no difference is lost at a boundary
    let (diff_sum, diff_count) = fold_chunks(
        &setpoint[1..],
        chunk_size,
        (0.0, 0usize),
        |chunk, info| {
            let before = setpoint[info.start_offset];
            let mut prev = before;
            let mut sum = 0.0;
            for &v in chunk {
                sum += (v - prev).abs();
                prev = v;
            }
            (sum, chunk.len())
        },
        |a, b| (a.0 + b.0, a.1 + b.1),
    );
    let stick_activity = safe_div(diff_sum, diff_count as f64);

    let variance_score = safe_div(setpoint_variance, variance_norm).min(1.0);
    let activity_score = safe_div(stick_activity, stick_activity_norm).min(1.0);

    DataQuality {
        setpoint_variance,
        stick_activity,
        confidence: (variance_score + activity_score) / 2.0,
    }
}

/// Tracking-error statistics for the per-axis pipeline
#[derive(Clone, Debug)]
pub struct ErrorMetricsAnalyzer {
    pub chunk_size: usize,
}

impl Default for ErrorMetricsAnalyzer {
    fn default() -> Self {
        Self { chunk_size: 1000 }
    }
}

impl AxisAnalyzer for ErrorMetricsAnalyzer {
    type Output = ErrorMetrics;

    fn id(&self) -> &str {
        "error_metrics"
    }

    fn required_signals(&self) -> Vec<Signal> {
        // The logged error column is enough on its own
        Vec::new()
    }

    fn analyze(&self, data: &AxisData) -> Result<ErrorMetrics, AnalysisError> {
        let error = data.tracking_error().ok_or_else(|| {
            if data.setpoint.is_none() {
                missing_column(data, Signal::Setpoint)
            } else {
                missing_column(data, Signal::Gyro)
            }
        })?;
        require_min_length(&error, 1, "error samples")?;

        Ok(compute_error_metrics(&error, self.chunk_size))
    }
}
