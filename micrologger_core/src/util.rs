//! Unit helpers shared by the motor and photometer paths.

/// Number of microseconds in one millisecond.
pub const MICROS_PER_MILLI: u64 = 1_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Decoder pulses over an interval to rpm, with the decoder's pulses per
/// revolution folded into the constant. A zero interval reads as standstill.
#[inline]
pub fn rpm_from_pulses(pulses: u32, interval_us: u64) -> f64 {
    if interval_us == 0 {
        return 0.0;
    }
    600_000.0 * f64::from(pulses) / interval_us as f64
}

/// Raw ADC counts to parts per thousand of full scale.
#[inline]
pub fn to_ppt(counts: f64, resolution: u16) -> f64 {
    counts * 1000.0 / f64::from(resolution.max(1))
}

/// Parts per thousand of full scale to raw ADC counts.
#[inline]
pub fn from_ppt(ppt: f64, resolution: u16) -> f64 {
    ppt * f64::from(resolution.max(1)) / 1000.0
}
