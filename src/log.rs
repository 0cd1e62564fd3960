//! Flight log data model.
//!
//! A [`FlightLog`] is the already-parsed form of a blackbox recording: an
//! ordered list of column headers, rows aligned with those headers, and the
//! header metadata block (looptime, PID strings, filter cutoffs, ...).
//! It is immutable once built and passed by reference into every analysis.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A single cell of a log row.
///
/// Blackbox decoders emit mostly numbers, but flag columns such as
/// `flightModeFlags` come through as text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(0.0)
    }
}

impl Value {
    /// Numeric view of the cell. Text is parsed if it looks numeric.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) if v.is_finite() => Some(*v),
            Value::Number(_) => None,
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// A metadata value from the log header block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Number(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(v) => Some(*v),
            MetaValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            MetaValue::Number(v) => {
                if v.fract() == 0.0 {
                    format!("{}", *v as i64)
                } else {
                    v.to_string()
                }
            }
            MetaValue::Text(s) => s.clone(),
        }
    }
}

/// Header metadata: looptime, PID strings, filter settings, motor config
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) {
        self.0.insert(key.into(), value);
    }

    /// Builder-style insert of a string value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, MetaValue::Text(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(MetaValue::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).map(MetaValue::as_string)
    }

    /// Loop time in microseconds per logged sample, if present and sane
    pub fn looptime_us(&self) -> Option<f64> {
        self.get_f64("looptime").filter(|v| *v > 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parsed flight log
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlightLog {
    /// Column names in file order
    pub headers: Vec<String>,
    /// One row per logged iteration, aligned with `headers`
    pub rows: Vec<Vec<Value>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl FlightLog {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Value>>, metadata: Metadata) -> Self {
        Self {
            headers,
            rows,
            metadata,
        }
    }

    /// Build a log from mapping-style rows (column name -> value).
    ///
    /// Columns missing from a record are filled with `0`.
    pub fn from_records(
        headers: Vec<String>,
        records: Vec<HashMap<String, Value>>,
        metadata: Metadata,
    ) -> Self {
        let rows = records
            .into_iter()
            .map(|mut record| {
                headers
                    .iter()
                    .map(|h| record.remove(h).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self {
            headers,
            rows,
            metadata,
        }
    }

    /// Build a log from numeric columns of equal length
    pub fn from_columns(columns: Vec<(&str, Vec<f64>)>, metadata: Metadata) -> Self {
        let len = columns.iter().map(|(_, c)| c.len()).max().unwrap_or(0);
        let headers = columns.iter().map(|(name, _)| name.to_string()).collect();
        let rows = (0..len)
            .map(|r| {
                columns
                    .iter()
                    .map(|(_, c)| Value::Number(c.get(r).copied().unwrap_or(0.0)))
                    .collect()
            })
            .collect();

        Self {
            headers,
            rows,
            metadata,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Extract a numeric column by index. Non-numeric or missing cells read as 0.
    pub fn column_f64(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.get(index).and_then(Value::as_f64).unwrap_or(0.0))
            .collect()
    }

    /// Sample rate in Hz.
    ///
    /// Taken from `looptime` when present; otherwise from the median spacing of
    /// the `time` column (microseconds); otherwise from `default_looptime_us`.
    pub fn sample_rate_hz(&self, time_column: Option<usize>, default_looptime_us: f64) -> f64 {
        if let Some(looptime) = self.metadata.looptime_us() {
            return 1_000_000.0 / looptime;
        }

        if let Some(idx) = time_column {
            let times = self.column_f64(idx);
            let mut deltas: Vec<f64> = times
                .windows(2)
                .map(|w| w[1] - w[0])
                .filter(|d| *d > 0.0)
                .collect();
            if !deltas.is_empty() {
                deltas.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let median = deltas[deltas.len() / 2];
                if median > 0.0 {
                    return 1_000_000.0 / median;
                }
            }
        }

        1_000_000.0 / default_looptime_us.max(1.0)
    }
}
