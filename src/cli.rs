//! Flight-controller settings in and firmware CLI commands out.
//!
//! PID strings come from the log header as `P,I,D[,F]`. Recommendations go
//! back as `set <param> = <value>` lines closed by `save`, the format the
//! configurator's CLI tab accepts.

use serde::{Deserialize, Serialize};

use crate::columns::Axis;
use crate::log::Metadata;
use crate::recommend::Recommendation;
use crate::synthesis::PidGains;

pub use crate::analysis::filters::FilterSettings;

/// Parse `"45,80,30"` or `"45,80,30,120"`.
///
/// Whitespace around parts is ignored; a missing F reads as 0. Any
/// unparsable, negative or missing P/I/D gives `None`.
pub fn parse_pid_string(s: &str) -> Option<PidGains> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0))
        .collect::<Option<Vec<f64>>>()?;

    match parts.as_slice() {
        [p, i, d] => Some(PidGains::new(*p, *i, *d, 0.0)),
        [p, i, d, f] => Some(PidGains::new(*p, *i, *d, *f)),
        _ => None,
    }
}

/// PID gains of all three axes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidSettings {
    pub roll: PidGains,
    pub pitch: PidGains,
    pub yaw: PidGains,
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            roll: PidGains::new(45.0, 80.0, 30.0, 120.0),
            pitch: PidGains::new(47.0, 84.0, 34.0, 125.0),
            yaw: PidGains::new(45.0, 80.0, 0.0, 120.0),
        }
    }
}

impl PidSettings {
    /// Current gains from `rollPID` / `pitchPID` / `yawPID`; a missing or
    /// malformed key keeps that axis at the firmware default
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mut settings = Self::default();
        for axis in Axis::ALL {
            let key = format!("{}PID", axis.name());
            match metadata.get_str(&key).as_deref().map(parse_pid_string) {
                Some(Some(gains)) => *settings.get_mut(axis) = gains,
                Some(None) => tracing::warn!("Ignoring malformed {} header", key),
                None => {}
            }
        }
        settings
    }

    pub fn get(&self, axis: Axis) -> &PidGains {
        match axis {
            Axis::Roll => &self.roll,
            Axis::Pitch => &self.pitch,
            Axis::Yaw => &self.yaw,
        }
    }

    pub fn get_mut(&mut self, axis: Axis) -> &mut PidGains {
        match axis {
            Axis::Roll => &mut self.roll,
            Axis::Pitch => &mut self.pitch,
            Axis::Yaw => &mut self.yaw,
        }
    }
}

fn set_line(param: &str, value: f64) -> String {
    format!("set {} = {}", param, value.round() as i64)
}

/// Firmware CLI lines applying `rec`, ending with `save`
pub fn to_cli_commands(rec: &Recommendation) -> Vec<String> {
    let mut lines = Vec::new();

    for axis in Axis::ALL {
        let gains = rec.recommended_pid.get(axis);
        let name = axis.name();
        lines.push(set_line(&format!("p_{}", name), gains.p));
        lines.push(set_line(&format!("i_{}", name), gains.i));
        lines.push(set_line(&format!("d_{}", name), gains.d));
        lines.push(set_line(&format!("f_{}", name), gains.f));
    }

    let filters = &rec.recommended_filters;
    lines.push(set_line("gyro_lowpass_hz", filters.gyro_lowpass_hz));
    lines.push(set_line("dterm_lowpass_hz", filters.dterm_lowpass_hz));
    lines.push(set_line("dyn_notch_count", filters.dyn_notch_count as f64));
    lines.push(set_line("dyn_notch_q", filters.dyn_notch_q as f64));
    lines.push(set_line("dyn_notch_min_hz", filters.dyn_notch_min_hz));
    lines.push(set_line("dyn_notch_max_hz", filters.dyn_notch_max_hz));
    for (n, q) in filters.dyn_notch_q_per_peak.iter().enumerate() {
        lines.push(set_line(&format!("dyn_notch_q_{}", n + 1), *q as f64));
    }

    lines.push("save".to_string());
    lines
}
