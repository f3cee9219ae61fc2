#![no_main]
use libfuzzer_sys::fuzz_target;
use micrologger_config::{CalibrationRow, MotorCalibration};

fuzz_target!(|input: (u16, Vec<(u16, f64)>)| {
    let (width, points) = input;
    let rows: Vec<CalibrationRow> = points
        .into_iter()
        .map(|(step, rpm)| CalibrationRow { step, rpm })
        .collect();
    if let Ok(cal) = MotorCalibration::from_rows(&rows, width) {
        for seg in &cal.segments {
            assert!(seg.m.is_finite() && seg.m > 0.0);
        }
    }
});
