//! Tests for column resolution across firmware naming variants

use quadtune::columns::{resolve, resolve_name, Axis, ColumnMap, Signal};

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_resolve_prefers_exact_match() {
    let h = headers(&["GYROADC[0]", "gyroADC[0]"]);
    assert_eq!(resolve("gyroADC[0]", &h), Some(1));
}

#[test]
fn test_resolve_case_insensitive_with_unit_suffix() {
    let h = headers(&["time", " GyroADC[1] (deg/s)"]);
    assert_eq!(resolve("gyroADC[1]", &h), Some(1));
}

#[test]
fn test_resolve_through_aliases() {
    let h = headers(&["time", "roll_gyro", "pitch_setpoint"]);
    assert_eq!(resolve_name("gyroADC[0]", &h), Some("roll_gyro"));
    assert_eq!(resolve_name("setpoint[1]", &h), Some("pitch_setpoint"));
}

#[test]
fn test_resolve_missing_is_none() {
    let h = headers(&["time", "motor[0]"]);
    assert_eq!(resolve("gyroUnfilt[2]", &h), None);
}

#[test]
fn test_column_map_covers_every_axis() {
    let h = headers(&[
        "time",
        "setpoint[0]",
        "gyro[0]",
        "rateSetpoint[1]",
        "gyroADC[1]",
        "gyroUnfilt[1]",
        "axisD[2]",
        "rcCommand[3]",
        "motor[0]",
        "eRPM[3]",
    ]);
    let map = ColumnMap::build(&h);

    assert_eq!(map.time, Some(0));
    assert_eq!(map.throttle, Some(7));
    assert_eq!(map.motors[0], Some(8));
    assert_eq!(map.erpm[3], Some(9));
    assert_eq!(map.get(Signal::Gyro, Axis::Roll), Some(2));
    assert_eq!(map.get(Signal::Setpoint, Axis::Pitch), Some(3));
    assert!(map.has(Signal::GyroUnfilt, Axis::Pitch));
    assert!(!map.has(Signal::GyroUnfilt, Axis::Roll));
    assert_eq!(map.get(Signal::DTerm, Axis::Yaw), Some(6));
    assert!(map.missing(Axis::Yaw).contains(&Signal::Gyro));
}
