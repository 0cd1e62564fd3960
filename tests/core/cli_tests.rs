//! Tests for reading PID settings from headers and writing CLI commands

use crate::common::metadata_with_pids;
use quadtune::cli::{parse_pid_string, to_cli_commands, FilterSettings, PidSettings};
use quadtune::recommend::Recommendation;
use quadtune::synthesis::PidGains;

#[test]
fn test_header_pid_round_trips_to_cli() {
    let metadata = metadata_with_pids("45,80,30", "47,84,34,125", "45,80,0,120");
    let pid = PidSettings::from_metadata(&metadata);
    let rec = Recommendation::unchanged(pid, FilterSettings::default());

    let lines = to_cli_commands(&rec);
    assert_eq!(&lines[..4], ["set p_roll = 45", "set i_roll = 80", "set d_roll = 30", "set f_roll = 0"]);
    assert!(lines.contains(&"set f_pitch = 125".to_string()));
    assert!(lines.contains(&"set d_yaw = 0".to_string()));
}

#[test]
fn test_cli_line_order() {
    let lines = to_cli_commands(&Recommendation::default());

    let pos = |needle: &str| {
        lines
            .iter()
            .position(|l| l.starts_with(needle))
            .unwrap_or_else(|| panic!("{} missing", needle))
    };
    assert!(pos("set p_roll") < pos("set p_pitch"));
    assert!(pos("set f_pitch") < pos("set p_yaw"));
    assert!(pos("set f_yaw") < pos("set gyro_lowpass_hz"));
    assert!(pos("set gyro_lowpass_hz") < pos("set dterm_lowpass_hz"));
    assert!(pos("set dyn_notch_max_hz") < pos("save"));
    assert_eq!(lines.last().map(String::as_str), Some("save"));
    assert_eq!(lines.iter().filter(|l| *l == "save").count(), 1);
}

#[test]
fn test_per_peak_q_lines() {
    let filters = FilterSettings {
        dyn_notch_q_per_peak: vec![500, 250],
        ..Default::default()
    };
    let mut rec = Recommendation::default();
    rec.recommended_filters = filters;

    let lines = to_cli_commands(&rec);
    assert!(lines.contains(&"set dyn_notch_q_1 = 500".to_string()));
    assert!(lines.contains(&"set dyn_notch_q_2 = 250".to_string()));
    assert!(!lines.iter().any(|l| l.starts_with("set dyn_notch_q_3")));
}

#[test]
fn test_fractional_gains_are_rounded() {
    let mut rec = Recommendation::default();
    rec.recommended_pid.roll = PidGains::new(44.6, 80.4, 29.5, 0.0);

    let lines = to_cli_commands(&rec);
    assert_eq!(lines[0], "set p_roll = 45");
    assert_eq!(lines[1], "set i_roll = 80");
    assert_eq!(lines[2], "set d_roll = 30");
}

#[test]
fn test_parse_pid_string_from_header_forms() {
    assert_eq!(parse_pid_string("45,80,30"), Some(PidGains::new(45.0, 80.0, 30.0, 0.0)));
    assert_eq!(parse_pid_string("45.5,80,30,0"), Some(PidGains::new(45.5, 80.0, 30.0, 0.0)));
    assert_eq!(parse_pid_string("45;80;30"), None);
}
