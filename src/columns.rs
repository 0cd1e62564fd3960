//! Column resolution for blackbox logs.
//!
//! Firmware versions and decoders disagree on column names (`gyroADC[0]`,
//! `gyro[0]`, `roll_gyro`, `gyroADC[0] (deg/s)`, ...). This module maps the
//! logical signal names the analyzers use onto whatever the log actually has.
//!
//! Resolution order for a logical name:
//! 1. exact header match
//! 2. case-insensitive match after trimming and stripping a unit suffix
//! 3. every alias in the logical name's alias group, exact then case-insensitive
//!
//! A miss is never an error here; callers skip the derived metric.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

/// Control axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Axis> {
        Axis::ALL.get(index).copied()
    }

    /// Lowercase name used in explanation keys and CLI parameter names
    pub fn name(self) -> &'static str {
        match self {
            Axis::Roll => "roll",
            Axis::Pitch => "pitch",
            Axis::Yaw => "yaw",
        }
    }
}

/// Per-axis logical signal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, AsRefStr)]
pub enum Signal {
    Setpoint = 0,
    Gyro = 1,
    GyroUnfilt = 2,
    Error = 3,
    PTerm = 4,
    ITerm = 5,
    DTerm = 6,
    FTerm = 7,
}

const SIGNAL_COUNT: usize = 8;

impl Signal {
    /// Canonical column name for this signal on the given axis
    pub fn column_name(self, axis: Axis) -> String {
        let i = axis.index();
        match self {
            Signal::Setpoint => format!("setpoint[{}]", i),
            Signal::Gyro => format!("gyroADC[{}]", i),
            Signal::GyroUnfilt => format!("gyroUnfilt[{}]", i),
            Signal::Error => format!("axisError[{}]", i),
            Signal::PTerm => format!("axisP[{}]", i),
            Signal::ITerm => format!("axisI[{}]", i),
            Signal::DTerm => format!("axisD[{}]", i),
            Signal::FTerm => format!("axisF[{}]", i),
        }
    }
}

/// Alias templates. `{i}` is the axis/motor index, `{axis}` the axis name.
const ALIAS_TEMPLATES: &[&[&str]] = &[
    &["setpoint[{i}]", "rateSetpoint[{i}]", "{axis}_setpoint", "setpoint_{axis}"],
    &["gyroADC[{i}]", "gyro[{i}]", "{axis}_gyro", "gyro_{axis}", "gyroData[{i}]"],
    &[
        "gyroUnfilt[{i}]",
        "gyroUnfiltered[{i}]",
        "gyroRaw[{i}]",
        "gyro_unfilt[{i}]",
        "{axis}_gyro_unfilt",
    ],
    &["axisError[{i}]", "error[{i}]", "pidError[{i}]", "{axis}_error"],
    &["axisP[{i}]", "pTerm[{i}]", "{axis}_p"],
    &["axisI[{i}]", "iTerm[{i}]", "{axis}_i"],
    &["axisD[{i}]", "dTerm[{i}]", "{axis}_d"],
    &["axisF[{i}]", "fTerm[{i}]", "ffTerm[{i}]", "{axis}_f"],
    &["motor[{i}]", "motors[{i}]", "motor_{i}"],
    &["eRPM[{i}]", "erpm[{i}]", "motorRpm[{i}]", "rpm[{i}]"],
];

/// Aliases without an index
const PLAIN_ALIASES: &[&[&str]] = &[
    &["time", "time_us", "timestamp"],
    &["rcCommand[3]", "throttle", "rcCommands[3]"],
];

/// Every alias group expanded for indices 0..4
static ALIAS_GROUPS: LazyLock<Vec<Vec<String>>> = LazyLock::new(|| {
    let mut groups = Vec::new();

    for template in ALIAS_TEMPLATES {
        for i in 0..4usize {
            let axis_name = Axis::from_index(i).map(Axis::name);
            let group: Vec<String> = template
                .iter()
                .filter(|t| !t.contains("{axis}") || axis_name.is_some())
                .map(|t| {
                    t.replace("{i}", &i.to_string())
                        .replace("{axis}", axis_name.unwrap_or_default())
                })
                .collect();
            groups.push(group);
        }
    }

    for plain in PLAIN_ALIASES {
        groups.push(plain.iter().map(|s| s.to_string()).collect());
    }

    groups
});

/// Reverse lookup: lowercase alias -> group index
static GROUP_INDEX: LazyLock<HashMap<String, usize>> = LazyLock::new(|| {
    let mut index = HashMap::new();
    for (gi, group) in ALIAS_GROUPS.iter().enumerate() {
        for name in group {
            index.entry(name.to_lowercase()).or_insert(gi);
        }
    }
    index
});

/// Trailing unit suffix, e.g. `gyroADC[0] (deg/s)`
static UNIT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\([^()]*\)\s*$").expect("static regex"));

/// Trim whitespace and strip a trailing unit suffix, then lowercase
pub fn normalize_header(header: &str) -> String {
    let trimmed = header.trim();
    let stripped = UNIT_SUFFIX
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

fn find_exact_or_folded(name: &str, headers: &[String], folded: &[String]) -> Option<usize> {
    if let Some(idx) = headers.iter().position(|h| h == name) {
        return Some(idx);
    }
    let target = name.trim().to_lowercase();
    folded.iter().position(|h| *h == target)
}

/// Resolve a logical column name against the log headers
pub fn resolve(logical: &str, headers: &[String]) -> Option<usize> {
    let folded: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    resolve_with_folded(logical, headers, &folded)
}

fn resolve_with_folded(logical: &str, headers: &[String], folded: &[String]) -> Option<usize> {
    if let Some(idx) = find_exact_or_folded(logical, headers, folded) {
        return Some(idx);
    }

    let group = GROUP_INDEX.get(&logical.trim().to_lowercase())?;
    ALIAS_GROUPS[*group]
        .iter()
        .find_map(|alias| find_exact_or_folded(alias, headers, folded))
}

/// Resolve a logical name and return the actual header string
pub fn resolve_name<'a>(logical: &str, headers: &'a [String]) -> Option<&'a str> {
    resolve(logical, headers).map(|i| headers[i].as_str())
}

/// Column indices for every logical signal, resolved once per log
#[derive(Clone, Debug, Default)]
pub struct ColumnMap {
    axes: [[Option<usize>; SIGNAL_COUNT]; 3],
    pub time: Option<usize>,
    pub throttle: Option<usize>,
    pub motors: [Option<usize>; 4],
    pub erpm: [Option<usize>; 4],
}

impl ColumnMap {
    /// Resolve all signals against a header list
    pub fn build(headers: &[String]) -> Self {
        let folded: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let lookup = |name: &str| resolve_with_folded(name, headers, &folded);

        let mut map = ColumnMap {
            time: lookup("time"),
            throttle: lookup("rcCommand[3]"),
            ..Default::default()
        };

        for axis in Axis::iter() {
            for signal in Signal::iter() {
                map.axes[axis.index()][signal as usize] = lookup(&signal.column_name(axis));
            }
        }

        for i in 0..4 {
            map.motors[i] = lookup(&format!("motor[{}]", i));
            map.erpm[i] = lookup(&format!("eRPM[{}]", i));
        }

        let resolved = map.axes.iter().flatten().filter(|c| c.is_some()).count();
        tracing::debug!(
            "Resolved {} of {} axis signals from {} headers",
            resolved,
            3 * SIGNAL_COUNT,
            headers.len()
        );

        map
    }

    pub fn get(&self, signal: Signal, axis: Axis) -> Option<usize> {
        self.axes[axis.index()][signal as usize]
    }

    pub fn has(&self, signal: Signal, axis: Axis) -> bool {
        self.get(signal, axis).is_some()
    }

    /// Signals that could not be found for an axis
    pub fn missing(&self, axis: Axis) -> Vec<Signal> {
        Signal::iter().filter(|s| !self.has(*s, axis)).collect()
    }
}
