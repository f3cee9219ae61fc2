use std::fs::File;
use std::io::Write;

use micrologger_config::{CalibrationRow, MotorCalibration, load_calibration_csv};
use rstest::rstest;
use tempfile::tempdir;

fn row(step: u16, rpm: f64) -> CalibrationRow {
    CalibrationRow { step, rpm }
}

/// Points on `step = b + m * rpm`.
fn line(b: f64, m: f64, steps: &[u16]) -> Vec<CalibrationRow> {
    steps
        .iter()
        .map(|&s| row(s, (f64::from(s) - b) / m))
        .collect()
}

#[rstest]
fn exact_points_recover_line_per_segment() {
    let mut rows = line(111.0, 0.693, &[200, 500, 800]);
    rows.extend(line(118.0, 0.688, &[1200, 1500, 1900]));
    let cal = MotorCalibration::from_rows(&rows, 1000).unwrap();
    assert_eq!(cal.segments.len(), 2);
    let s0 = cal.segments[0];
    assert_eq!((s0.step_min, s0.step_max), (0, 1000));
    assert!((s0.b - 111.0).abs() < 1e-6);
    assert!((s0.m - 0.693).abs() < 1e-9);
    let s1 = cal.segments[1];
    assert_eq!((s1.step_min, s1.step_max), (1000, 2000));
    assert!((s1.b - 118.0).abs() < 1e-6);
    assert!((s1.rpm_min - (1000.0 - 118.0) / 0.688).abs() < 1e-6);
}

#[rstest]
fn outlier_is_rejected_by_refit() {
    let mut rows = line(100.0, 0.7, &[150, 250, 350, 450, 550, 650, 750, 850, 950]);
    // a stalled-looking measurement far below the line
    rows[4].rpm = 10.0;
    let cal = MotorCalibration::from_rows(&rows, 1000).unwrap();
    let s = cal.segments[0];
    assert!((s.m - 0.7).abs() < 1e-6, "m={}", s.m);
    assert!((s.b - 100.0).abs() < 1e-3, "b={}", s.b);
}

#[rstest]
#[case(vec![row(100, 50.0)], "at least two rows")]
#[case(vec![row(100, 50.0), row(100, 60.0)], "strictly increasing")]
#[case(vec![row(200, 50.0), row(100, 60.0)], "strictly increasing")]
#[case(vec![row(100, 50.0), row(200, f64::NAN)], "invalid rpm")]
#[case(vec![row(100, 500.0), row(200, 100.0)], "slope must be positive")]
#[case(vec![row(100, 50.0), row(200, 150.0), row(1500, 2000.0)], "needs at least two points")]
#[case(vec![row(100, 50.0), row(200, 150.0), row(2100, 3000.0), row(2500, 3500.0)], "segment 1000..2000")]
fn rejects_bad_tables(#[case] rows: Vec<CalibrationRow>, #[case] expected: &str) {
    let err = MotorCalibration::from_rows(&rows, 1000).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains(expected), "unexpected message: {msg}");
}

#[rstest]
fn loads_csv_with_strict_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("motor.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "step,rpm").unwrap();
    for r in line(111.0, 0.693, &[150, 400, 700, 950]) {
        writeln!(f, "{},{}", r.step, r.rpm).unwrap();
    }
    drop(f);
    let cal = load_calibration_csv(&path, 1000).unwrap();
    assert_eq!(cal.segments.len(), 1);
    assert!((cal.segments[0].m - 0.693).abs() < 1e-6);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("motor.csv");
    std::fs::write(&path, "pwm,speed\n100,50\n200,150\n").unwrap();
    let err = load_calibration_csv(&path, 1000).unwrap_err();
    assert!(format!("{err}").contains("headers 'step,rpm'"));
}

#[rstest]
fn reports_row_number_of_bad_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("motor.csv");
    std::fs::write(&path, "step,rpm\n100,50\nabc,150\n").unwrap();
    let err = load_calibration_csv(&path, 1000).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"));
}
