#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, motor calibration parsing and persisted state for the
//! micrologger.
//!
//! - `Config` and its tables are deserialized from TOML and validated. Every
//!   table is optional and falls back to the instrument's stock values.
//! - The motor calibration CSV loader enforces headers and fits each step
//!   segment with a robust refit that rejects outliers before the final
//!   slope/intercept estimate.
//! - `PersistedState` is the on-disk snapshot of persist-flagged settings.
use std::path::{Path, PathBuf};

use serde::Deserialize;

mod state;

pub use state::{OpticalDensityState, PersistedState, StirrerState, ZeroState, load_state, save_state};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct I2cCfg {
    /// Linux bus number (`/dev/i2c-N`).
    pub bus: u8,
    /// Transactions slower than this are treated as a damaged bus.
    pub max_response_ms: u64,
    pub poll_interval_ms: u64,
    pub auto_connect: bool,
    pub beam_expander: u8,
    pub beam_pin: u8,
    pub gain_coarse: u8,
    /// Second rheostat in the cascade; absent for single-rheostat boards.
    pub gain_fine: Option<u8>,
    pub adc: u8,
}

impl Default for I2cCfg {
    fn default() -> Self {
        Self {
            bus: 1,
            max_response_ms: 200,
            poll_interval_ms: 1000,
            auto_connect: true,
            beam_expander: 0x20,
            beam_pin: 0,
            gain_coarse: 0x2E,
            gain_fine: Some(0x2F),
            adc: 0x4D,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotorCfg {
    pub min_rpm: f64,
    pub max_rpm: f64,
    /// Decoder sampling period.
    pub sample_interval_ms: u64,
    /// Evaluation period for stabilization, noResponse and trim.
    pub read_interval_ms: u64,
    /// Coefficient of variation below which the speed counts as stable.
    pub stable_cv: f64,
    pub percentile_low: f64,
    pub percentile_high: f64,
    pub pwm_channel: u8,
    pub pwm_frequency_hz: f64,
    /// Full-scale PWM duty in steps.
    pub pwm_resolution: u16,
    pub decoder_pin: u8,
    /// Measured `step,rpm` operating points; the stock table is used when absent.
    pub calibration_csv: Option<PathBuf>,
    pub calibration_segment_steps: u16,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            min_rpm: 50.0,
            max_rpm: 5000.0,
            sample_interval_ms: 50,
            read_interval_ms: 500,
            stable_cv: 0.15,
            percentile_low: 0.8,
            percentile_high: 1.0,
            pwm_channel: 0,
            pwm_frequency_hz: 25_000.0,
            pwm_resolution: 4095,
            decoder_pin: 17,
            calibration_csv: None,
            calibration_segment_steps: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StirrerCfg {
    pub setpoint_rpm: f64,
    /// rpm per second; 0 jumps straight to the target
    pub acceleration: f64,
    pub deceleration: f64,
    pub max_speed_rpm: f64,
    pub vortex_speed_rpm: f64,
    pub vortex_duration_s: u64,
    pub ramp_tick_ms: u64,
    pub restart_delay_ms: u64,
    pub max_restarts: u32,
}

impl Default for StirrerCfg {
    fn default() -> Self {
        Self {
            setpoint_rpm: 500.0,
            acceleration: 500.0,
            deceleration: 3000.0,
            max_speed_rpm: 5000.0,
            vortex_speed_rpm: 3000.0,
            vortex_duration_s: 5,
            ramp_tick_ms: 100,
            restart_delay_ms: 1000,
            max_restarts: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpticalDensityCfg {
    /// Re-read automatically once a valid zero exists.
    pub auto_read: bool,
    pub read_interval_s: u64,
    pub vortex: bool,
    pub stop_stirrer: bool,
    pub settle_ms: u64,
    pub warmup_ms: u64,
    pub sample_interval_ms: u64,
    pub signal_reads: u32,
    pub adc_resolution: u16,
    /// Mean signal above this many parts per thousand is saturated.
    pub saturation_ppt: f64,
}

impl Default for OpticalDensityCfg {
    fn default() -> Self {
        Self {
            auto_read: true,
            read_interval_s: 200,
            vortex: false,
            stop_stirrer: true,
            settle_ms: 1000,
            warmup_ms: 200,
            sample_interval_ms: 5,
            signal_reads: 100,
            adc_resolution: 4095,
            saturation_ppt: 950.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GainCfg {
    pub automatic: bool,
    pub target_ppt: f64,
    pub base_ohm: f64,
    pub rheostat_ohm: f64,
    pub rheostat_steps: u8,
    pub probe_steps: u16,
    /// Samples averaged per reading during the gain search.
    pub gain_reads: u32,
    pub max_fine_steps: u32,
}

impl Default for GainCfg {
    fn default() -> Self {
        Self {
            automatic: true,
            target_ppt: 920.0,
            base_ohm: 10_000.0,
            rheostat_ohm: 100_000.0,
            rheostat_steps: 127,
            probe_steps: 5,
            gain_reads: 10,
            max_fine_steps: 64,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StateCfg {
    /// Persisted-state file; persistence is off when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub i2c: I2cCfg,
    pub motor: MotorCfg,
    pub stirrer: StirrerCfg,
    pub optical_density: OpticalDensityCfg,
    pub gain: GainCfg,
    pub logging: Logging,
    pub state: StateCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // I2C
        if self.i2c.max_response_ms == 0 {
            eyre::bail!("i2c.max_response_ms must be >= 1");
        }
        if self.i2c.poll_interval_ms == 0 {
            eyre::bail!("i2c.poll_interval_ms must be >= 1");
        }
        if self.i2c.beam_pin > 7 {
            eyre::bail!("i2c.beam_pin must be in 0..=7");
        }
        for (key, addr) in [
            ("beam_expander", Some(self.i2c.beam_expander)),
            ("gain_coarse", Some(self.i2c.gain_coarse)),
            ("gain_fine", self.i2c.gain_fine),
            ("adc", Some(self.i2c.adc)),
        ] {
            if let Some(a) = addr
                && a > 0x7F
            {
                eyre::bail!("i2c.{key} must be a 7-bit address");
            }
        }
        if self.i2c.gain_fine == Some(self.i2c.gain_coarse) {
            eyre::bail!("i2c.gain_fine must differ from i2c.gain_coarse");
        }

        // Motor
        let m = &self.motor;
        if !(m.min_rpm > 0.0 && m.min_rpm < m.max_rpm) {
            eyre::bail!("motor.min_rpm must be > 0 and below motor.max_rpm");
        }
        if m.sample_interval_ms == 0 {
            eyre::bail!("motor.sample_interval_ms must be >= 1");
        }
        if m.read_interval_ms < m.sample_interval_ms {
            eyre::bail!("motor.read_interval_ms must be >= motor.sample_interval_ms");
        }
        if !(m.stable_cv > 0.0 && m.stable_cv < 1.0) {
            eyre::bail!("motor.stable_cv must be in (0.0, 1.0)");
        }
        if !(m.percentile_low >= 0.0 && m.percentile_low < m.percentile_high && m.percentile_high <= 1.0) {
            eyre::bail!("motor.percentile_low/high must satisfy 0 <= low < high <= 1");
        }
        if m.pwm_resolution == 0 {
            eyre::bail!("motor.pwm_resolution must be >= 1");
        }
        if m.pwm_frequency_hz <= 0.0 {
            eyre::bail!("motor.pwm_frequency_hz must be > 0");
        }
        if m.calibration_segment_steps == 0 {
            eyre::bail!("motor.calibration_segment_steps must be >= 1");
        }

        // Stirrer
        let s = &self.stirrer;
        if s.acceleration < 0.0 || s.deceleration < 0.0 {
            eyre::bail!("stirrer.acceleration/deceleration must be >= 0");
        }
        if s.max_speed_rpm <= 0.0 || s.max_speed_rpm > m.max_rpm {
            eyre::bail!("stirrer.max_speed_rpm must be in (0, motor.max_rpm]");
        }
        if s.setpoint_rpm < 0.0 || s.vortex_speed_rpm < 0.0 {
            eyre::bail!("stirrer.setpoint_rpm/vortex_speed_rpm must be >= 0");
        }
        if s.ramp_tick_ms == 0 {
            eyre::bail!("stirrer.ramp_tick_ms must be >= 1");
        }
        if s.restart_delay_ms == 0 {
            eyre::bail!("stirrer.restart_delay_ms must be >= 1");
        }
        if s.vortex_duration_s == 0 {
            eyre::bail!("stirrer.vortex_duration_s must be >= 1");
        }

        // Optical density
        let od = &self.optical_density;
        if od.read_interval_s == 0 {
            eyre::bail!("optical_density.read_interval_s must be >= 1");
        }
        if od.sample_interval_ms == 0 {
            eyre::bail!("optical_density.sample_interval_ms must be >= 1");
        }
        if od.signal_reads == 0 {
            eyre::bail!("optical_density.signal_reads must be >= 1");
        }
        if od.adc_resolution == 0 {
            eyre::bail!("optical_density.adc_resolution must be >= 1");
        }
        if !(od.saturation_ppt > 0.0 && od.saturation_ppt <= 1000.0) {
            eyre::bail!("optical_density.saturation_ppt must be in (0, 1000]");
        }

        // Gain
        let g = &self.gain;
        if g.rheostat_steps == 0 || g.rheostat_steps > 0x7F {
            eyre::bail!("gain.rheostat_steps must be in 1..=127");
        }
        if g.rheostat_ohm <= 0.0 || g.base_ohm < 0.0 {
            eyre::bail!("gain.rheostat_ohm must be > 0 and gain.base_ohm >= 0");
        }
        if !(g.target_ppt > 0.0 && g.target_ppt <= od.saturation_ppt) {
            eyre::bail!("gain.target_ppt must be > 0 and <= optical_density.saturation_ppt");
        }
        if g.probe_steps == 0 {
            eyre::bail!("gain.probe_steps must be >= 1");
        }
        if g.gain_reads == 0 {
            eyre::bail!("gain.gain_reads must be >= 1");
        }
        if g.max_fine_steps == 0 {
            eyre::bail!("gain.max_fine_steps must be >= 1");
        }

        Ok(())
    }
}

/// Motor calibration CSV schema.
///
/// Expected headers:
/// step,rpm
///
/// Example:
/// step,rpm
/// 250,200.0
/// 500,561.5
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub step: u16,
    pub rpm: f64,
}

/// One fitted segment, `step = b + m * rpm` for steps in `[step_min, step_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSegment {
    pub step_min: u16,
    pub step_max: u16,
    pub rpm_min: f64,
    pub rpm_max: f64,
    pub b: f64,
    pub m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorCalibration {
    pub segments: Vec<CalibrationSegment>,
}

/// Ordinary least squares `y = b + m * x`, in f64 for stability.
fn fit(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (px, py) in pts {
        let x = px - mean_x;
        let y = py - mean_y;
        sxx += x * x;
        sxy += x * y;
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (degenerate rpm variance)");
    }
    let m = sxy / sxx;
    if !m.is_finite() || m <= 0.0 {
        eyre::bail!("calibration slope must be positive and finite, got {m}");
    }
    Ok((mean_y - m * mean_x, m))
}

/// Single-step robust refit: drop points with |residual| > k * rms around the
/// initial line and refit the inliers with an online (Chan/Welford)
/// covariance update. `None` means keep the initial fit.
fn robust_refit(pts: &[(f64, f64)], b0: f64, m0: f64, rms: f64, k: f64) -> Option<(f64, f64)> {
    if !(rms.is_finite() && rms > 0.0 && k.is_finite() && k > 0.0) || pts.len() < 2 {
        return None;
    }
    let thr = k * rms;
    let mut n_in: usize = 0;
    let mut mean_x = 0.0f64;
    let mut mean_y = 0.0f64;
    let mut cxx = 0.0f64;
    let mut cxy = 0.0f64;
    for (x, y) in pts {
        if (y - (b0 + m0 * x)).abs() > thr {
            continue;
        }
        n_in += 1;
        let n = n_in as f64;
        let dx = x - mean_x;
        let dy = y - mean_y;
        mean_x += dx / n;
        mean_y += dy / n;
        cxx += dx * (x - mean_x);
        cxy += dx * (y - mean_y);
    }
    if n_in < 2 || n_in == pts.len() || !cxx.is_finite() || cxx == 0.0 {
        return None;
    }
    let m = cxy / cxx;
    if !m.is_finite() || m <= 0.0 {
        return None;
    }
    Some((mean_y - m * mean_x, m))
}

impl MotorCalibration {
    /// Group rows into `segment_steps`-wide step ranges starting at 0 and fit
    /// each range. Rows must be strictly increasing in step and every range up
    /// to the highest measured one needs at least two points.
    pub fn from_rows(rows: &[CalibrationRow], segment_steps: u16) -> eyre::Result<Self> {
        if segment_steps == 0 {
            eyre::bail!("calibration segment width must be >= 1");
        }
        if rows.len() < 2 {
            eyre::bail!("calibration requires at least two rows, got {}", rows.len());
        }
        for (i, pair) in rows.windows(2).enumerate() {
            if pair[1].step <= pair[0].step {
                eyre::bail!(
                    "calibration steps must be strictly increasing (rows {} and {})",
                    i + 2,
                    i + 3
                );
            }
        }
        if let Some(bad) = rows.iter().position(|r| !r.rpm.is_finite() || r.rpm < 0.0) {
            eyre::bail!("calibration row {} has an invalid rpm", bad + 2);
        }

        let width = usize::from(segment_steps);
        let last_group = rows.iter().map(|r| usize::from(r.step) / width).max().unwrap_or(0);
        let mut segments = Vec::with_capacity(last_group + 1);
        for group in 0..=last_group {
            let pts: Vec<(f64, f64)> = rows
                .iter()
                .filter(|r| usize::from(r.step) / width == group)
                .map(|r| (r.rpm, f64::from(r.step)))
                .collect();
            let step_min = group * width;
            let step_max = step_min + width;
            if pts.len() < 2 {
                eyre::bail!(
                    "calibration segment {step_min}..{step_max} needs at least two points, got {}",
                    pts.len()
                );
            }
            let (b0, m0) = fit(&pts)?;
            let sumsq: f64 = pts
                .iter()
                .map(|(x, y)| {
                    let r = y - (b0 + m0 * x);
                    r * r
                })
                .sum();
            let rms = (sumsq / pts.len() as f64).sqrt();
            let (b, m) = robust_refit(&pts, b0, m0, rms, 2.0).unwrap_or((b0, m0));
            let step_min = u16::try_from(step_min)
                .map_err(|_| eyre::eyre!("calibration step range exceeds u16"))?;
            let step_max = u16::try_from(step_max).unwrap_or(u16::MAX);
            segments.push(CalibrationSegment {
                step_min,
                step_max,
                rpm_min: ((f64::from(step_min) - b) / m).max(0.0),
                rpm_max: (f64::from(step_max) - b) / m,
                b,
                m,
            });
        }
        for pair in segments.windows(2) {
            if pair[1].rpm_max <= pair[0].rpm_max {
                eyre::bail!(
                    "calibration is not monotonic across steps {}..{}",
                    pair[0].step_min,
                    pair[1].step_max
                );
            }
        }
        Ok(Self { segments })
    }
}

pub fn load_calibration_csv(path: &Path, segment_steps: u16) -> eyre::Result<MotorCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["step", "rpm"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'step,rpm', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }

    MotorCalibration::from_rows(&rows, segment_steps)
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {:?}: {}", path, e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}
