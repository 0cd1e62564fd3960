//! quadtune - blackbox log analysis and tuning recommendations for multirotors
//!
//! This library turns a parsed flight-controller blackbox log into PID gain
//! and filter recommendations with a rationale for every change.
//!
//! ## Module Structure
//!
//! - [`log`] - Flight log data model (rows, headers, metadata)
//! - [`columns`] - Column resolution across firmware naming variants
//! - [`stream`] - Chunked iteration and mergeable running statistics
//! - [`config`] - Analysis thresholds and synthesis settings
//! - [`analysis`] - Signal analysis per axis
//!   - `spectral` - FFT, peak picking, noise classification
//!   - `step_response` - Step detection, damping, rise/settle/overshoot
//!   - `statistics` - Error metrics, correlation, data quality
//!   - `harmonics` - Harmonic distortion and oscillation detection
//!   - `cross_axis` - Coupling and oscillation propagation between axes
//!   - `filters` - Filter primitives and filter-stack analysis
//! - [`identification`] - First-order, second-order and ARX plant models
//! - [`synthesis`] - PID design rules and the genetic tuner
//! - [`recommend`] - Recommendation assembly and the full pipeline
//! - [`cli`] - PID header parsing and firmware CLI output

pub mod analysis;
pub mod cli;
pub mod columns;
pub mod config;
pub mod identification;
pub mod log;
pub mod recommend;
pub mod stream;
pub mod synthesis;

pub use recommend::{generate_recommendation, Recommendation};
