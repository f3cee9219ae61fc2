//! Closed-loop stirrer motor: calibrated open-loop drive plus a slow,
//! statistically gated step correction from the speed decoder.

use micrologger_traits::{PulseCounter, PwmOutput};
use tracing::{debug, info, warn};

use crate::calibration::Calibration;
use crate::error::{MotorError, Report, Result};
use crate::hw_error::map_hw_error;
use crate::stats::{ExactHistogram, PercentileError, PercentileStats, RunningStats};
use crate::timer::Timer;
use crate::util::{MICROS_PER_MILLI, rpm_from_pulses};

/// Samples needed in an interval before it is evaluated at all.
const MIN_INTERVAL_SAMPLES: u64 = 5;
/// Tail samples needed before the percentile estimate is reported.
const MIN_ESTIMATE_SAMPLES: u64 = 5;
/// Tail samples needed before the estimate may correct the drive.
const MIN_CORRECTION_SAMPLES: u64 = 10;
/// Evaluated intervals before the no-response check applies.
const SETTLE_INTERVALS: u32 = 2;
/// Below this fraction of `min_rpm` the motor counts as not turning.
const NO_RESPONSE_FRACTION: f64 = 0.2;
/// Steps per rpm of slope applied by one correction.
const CORRECTION_GAIN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSettings {
    pub min_rpm: f64,
    pub max_rpm: f64,
    pub sample_interval_ms: u64,
    pub read_interval_ms: u64,
    /// Coefficient of variation below which the speed counts as settled.
    pub stable_cv: f64,
    pub percentile_low: f64,
    pub percentile_high: f64,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            min_rpm: 50.0,
            max_rpm: 5000.0,
            sample_interval_ms: 50,
            read_interval_ms: 500,
            stable_cv: 0.15,
            percentile_low: 0.8,
            percentile_high: 1.0,
        }
    }
}

pub struct MotorController<P, C> {
    drive: P,
    decoder: C,
    calibration: Calibration,
    settings: MotorSettings,
    target_rpm: f64,
    target_steps: u16,
    steps: u16,
    stats: RunningStats,
    histogram: ExactHistogram,
    stabilized: bool,
    speed_check_counter: u32,
    measured_rpm: f64,
    error: Option<MotorError>,
    sample_timer: Timer,
    read_timer: Timer,
    last_sample_ms: u64,
}

impl<P: PwmOutput, C: PulseCounter> MotorController<P, C> {
    pub fn new(drive: P, decoder: C, calibration: Calibration, settings: MotorSettings) -> Self {
        // histogram spans the rated range in whole rpm
        let top = settings.max_rpm.ceil().clamp(1.0, f64::from(i32::MAX)) as i32;
        Self {
            drive,
            decoder,
            calibration,
            settings,
            target_rpm: 0.0,
            target_steps: 0,
            steps: 0,
            stats: RunningStats::new(),
            histogram: ExactHistogram::new(0, top),
            stabilized: false,
            speed_check_counter: 0,
            measured_rpm: 0.0,
            error: None,
            sample_timer: Timer::new(),
            read_timer: Timer::new(),
            last_sample_ms: 0,
        }
    }

    pub fn settings(&self) -> &MotorSettings {
        &self.settings
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn target_rpm(&self) -> f64 {
        self.target_rpm
    }

    pub fn target_steps(&self) -> u16 {
        self.target_steps
    }

    /// Drive level currently applied, including corrections.
    pub fn steps(&self) -> u16 {
        self.steps
    }

    pub fn measured_rpm(&self) -> f64 {
        self.measured_rpm
    }

    pub fn error(&self) -> Option<MotorError> {
        self.error
    }

    pub fn stabilized(&self) -> bool {
        self.stabilized
    }

    pub fn speed_check_counter(&self) -> u32 {
        self.speed_check_counter
    }

    pub fn is_on(&self) -> bool {
        self.target_steps > 0
    }

    /// Command a speed. Non-positive rpm turns the motor off; anything else
    /// is clamped to the rated range.
    pub fn set_target_rpm(&mut self, rpm: f64, now_ms: u64) -> Result<()> {
        if !(rpm > 0.0) {
            return self.off(now_ms);
        }
        let rpm = rpm.clamp(self.settings.min_rpm, self.settings.max_rpm);
        self.target_rpm = rpm;
        self.target_steps = self.calibration.rpm_to_step(rpm);
        debug!(rpm, steps = self.target_steps, "motor target");
        self.command(self.target_steps, now_ms)
    }

    /// Command a raw drive level; 0 is off.
    pub fn set_target_steps(&mut self, steps: u16, now_ms: u64) -> Result<()> {
        if steps == 0 {
            return self.off(now_ms);
        }
        let steps = steps.min(self.calibration.max_steps());
        self.target_steps = steps;
        self.target_rpm = self.calibration.step_to_rpm(steps);
        debug!(rpm = self.target_rpm, steps, "motor target");
        self.command(steps, now_ms)
    }

    pub fn off(&mut self, now_ms: u64) -> Result<()> {
        self.target_rpm = 0.0;
        self.target_steps = 0;
        self.error = None;
        self.measured_rpm = 0.0;
        self.sample_timer.stop();
        self.read_timer.stop();
        self.apply(0, now_ms)
    }

    fn command(&mut self, steps: u16, now_ms: u64) -> Result<()> {
        self.apply(steps, now_ms)?;
        self.speed_check_counter = 0;
        self.sample_timer.start(now_ms, self.settings.sample_interval_ms);
        self.read_timer.start(now_ms, self.settings.read_interval_ms);
        Ok(())
    }

    /// Write the drive level and restart measurement from scratch.
    fn apply(&mut self, steps: u16, now_ms: u64) -> Result<()> {
        self.drive
            .set_duty(steps)
            .map_err(|e| Report::new(map_hw_error(e.as_ref())))?;
        self.steps = steps;
        self.stats.clear();
        self.histogram.clear();
        self.stabilized = false;
        self.decoder.take_pulses();
        self.last_sample_ms = now_ms;
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<u64> {
        crate::timer::earliest([self.sample_timer.deadline(), self.read_timer.deadline()])
    }

    /// Service the decoder sample and speed check timers.
    pub fn poll(&mut self, now_ms: u64) -> Result<()> {
        if !self.is_on() {
            return Ok(());
        }
        if self.sample_timer.fire_periodic(now_ms, self.settings.sample_interval_ms) {
            self.sample(now_ms);
        }
        if self.read_timer.fire_periodic(now_ms, self.settings.read_interval_ms) {
            self.check_speed(now_ms)?;
        }
        Ok(())
    }

    fn sample(&mut self, now_ms: u64) {
        let pulses = self.decoder.take_pulses();
        let dt_ms = now_ms.saturating_sub(self.last_sample_ms);
        self.last_sample_ms = now_ms;
        let rpm = rpm_from_pulses(pulses, dt_ms * MICROS_PER_MILLI);
        tracing::trace!(pulses, dt_ms, rpm, "decoder sample");
        self.stats.push(rpm);
        if self.stabilized {
            self.histogram.push(rpm);
        }
    }

    fn check_speed(&mut self, now_ms: u64) -> Result<()> {
        if self.stats.count() < MIN_INTERVAL_SAMPLES {
            return Ok(());
        }
        self.speed_check_counter += 1;

        if self.stabilized {
            if let Ok(p) = self.percentile() {
                if p.count >= MIN_ESTIMATE_SAMPLES {
                    self.measured_rpm = p.mean;
                }
            }
        } else {
            self.measured_rpm = self.stats.max();
            if self.stats.cv().is_some_and(|cv| cv < self.settings.stable_cv) {
                debug!(rpm = self.measured_rpm, "motor speed stabilized");
                self.stabilized = true;
                self.histogram.clear();
            }
        }

        if self.speed_check_counter >= SETTLE_INTERVALS {
            if self.stats.mean() < NO_RESPONSE_FRACTION * self.settings.min_rpm {
                if self.error.is_none() {
                    warn!(mean_rpm = self.stats.mean(), steps = self.steps, "motor not responding");
                }
                self.error = Some(MotorError::NoResponse);
            } else {
                self.error = None;
                self.correct(now_ms)?;
            }
        }
        self.stats.clear();
        Ok(())
    }

    fn percentile(&self) -> std::result::Result<PercentileStats, PercentileError> {
        self.histogram
            .percentile_stats(self.settings.percentile_low, self.settings.percentile_high)
    }

    /// Nudge the drive one fixed increment toward the target once the tail
    /// estimate is solid and the error exceeds one calibration step plus two
    /// standard errors. The increment does not scale with the error.
    fn correct(&mut self, now_ms: u64) -> Result<()> {
        if !self.stabilized {
            return Ok(());
        }
        let Ok(p) = self.percentile() else {
            return Ok(());
        };
        if p.count < MIN_CORRECTION_SAMPLES {
            return Ok(());
        }
        let m = self.calibration.slope(self.target_rpm);
        let diff = self.target_rpm - p.mean;
        if diff.abs() <= 1.0 / m + 2.0 * p.sem {
            return Ok(());
        }
        let delta = (CORRECTION_GAIN * m).round().max(1.0);
        let current = f64::from(self.steps);
        let next = if diff > 0.0 { current + delta } else { current - delta };
        // bounded to the PWM range before narrowing; never off while running
        let next = next.clamp(1.0, f64::from(self.calibration.max_steps())) as u16;
        if next == self.steps {
            return Ok(());
        }
        info!(
            target_rpm = self.target_rpm,
            measured_rpm = p.mean,
            from = self.steps,
            to = next,
            "motor speed corrected"
        );
        self.apply(next, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micrologger_hardware::{SimDecoder, SimMotor, SimMotorDrive};
    use micrologger_traits::ManualClock;

    fn setup() -> (ManualClock, SimMotor, MotorController<SimMotorDrive, SimDecoder>) {
        let clock = ManualClock::new();
        let sim = SimMotor::new(clock.clone());
        let motor = MotorController::new(
            sim.drive(),
            sim.decoder(),
            Calibration::default(),
            MotorSettings::default(),
        );
        (clock, sim, motor)
    }

    fn run<P: PwmOutput, C: PulseCounter>(clock: &ManualClock, motor: &mut MotorController<P, C>, until: u64) {
        while let Some(d) = motor.next_deadline() {
            if d > until {
                break;
            }
            clock.advance_ms(d.saturating_sub(clock.elapsed_ms()));
            motor.poll(d).unwrap();
        }
        clock.advance_ms(until.saturating_sub(clock.elapsed_ms()));
    }

    #[test]
    fn target_rpm_and_steps_stay_linked() {
        let (_clock, sim, mut motor) = setup();
        motor.set_target_rpm(600.0, 0).unwrap();
        assert_eq!(motor.target_steps(), 527);
        assert_eq!(sim.duty(), 527);
        motor.set_target_rpm(10.0, 0).unwrap();
        assert_eq!(motor.target_rpm(), 50.0);
        motor.set_target_steps(1494, 0).unwrap();
        assert!((motor.target_rpm() - 2000.0).abs() < 1.0);
        motor.set_target_steps(0, 0).unwrap();
        assert_eq!(motor.target_rpm(), 0.0);
        assert_eq!(sim.duty(), 0);
        assert_eq!(motor.next_deadline(), None);
    }

    #[test]
    fn stabilizes_at_constant_speed() {
        let (clock, _sim, mut motor) = setup();
        motor.set_target_rpm(500.0, 0).unwrap();
        run(&clock, &mut motor, 2000);
        assert!(motor.stabilized());
        assert!((motor.measured_rpm() - 500.0).abs() < 15.0, "{}", motor.measured_rpm());
        assert_eq!(motor.error(), None);
    }

    #[test]
    fn stalled_rotor_reports_no_response() {
        let (clock, sim, mut motor) = setup();
        sim.set_stalled(true);
        motor.set_target_rpm(500.0, 0).unwrap();
        run(&clock, &mut motor, 500);
        assert_eq!(motor.error(), None);
        run(&clock, &mut motor, 1000);
        assert_eq!(motor.error(), Some(MotorError::NoResponse));
        assert!(!motor.stabilized());
        sim.set_stalled(false);
        run(&clock, &mut motor, 2000);
        assert_eq!(motor.error(), None);
    }

    #[test]
    fn corrects_a_slow_motor_one_step_at_a_time() {
        let (clock, sim, mut motor) = setup();
        sim.set_speed_factor(0.97);
        motor.set_target_rpm(1000.0, 0).unwrap();
        let open_loop = motor.steps();
        let mut last = open_loop;
        let mut nudges = 0;
        for t in (500..=300_000).step_by(500) {
            run(&clock, &mut motor, t);
            let now = motor.steps();
            if now != last {
                // slope ~0.69 steps/rpm: every correction is a single step
                assert_eq!(i32::from(now).abs_diff(i32::from(last)), 1, "at {t} ms");
                nudges += 1;
                last = now;
            }
        }
        assert!(nudges >= 10, "{nudges}");
        assert!(motor.steps() > open_loop);
        assert!((sim.true_rpm() - 1000.0).abs() < 15.0, "{}", sim.true_rpm());
        assert_eq!(motor.target_steps(), open_loop);
    }

    struct Alternating(bool);

    impl PulseCounter for Alternating {
        fn take_pulses(&mut self) -> u32 {
            self.0 = !self.0;
            if self.0 { 30 } else { 2 }
        }
    }

    struct NullDrive;

    impl PwmOutput for NullDrive {
        fn set_duty(&mut self, _: u16) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    #[test]
    fn noisy_speed_never_stabilizes() {
        let clock = ManualClock::new();
        let mut motor = MotorController::new(
            NullDrive,
            Alternating(false),
            Calibration::default(),
            MotorSettings::default(),
        );
        motor.set_target_rpm(200.0, 0).unwrap();
        run(&clock, &mut motor, 10_000);
        assert!(!motor.stabilized());
        // running maximum while unsettled: 30 pulses per 50 ms
        assert!((motor.measured_rpm() - 360.0).abs() < 1e-9);
        assert_eq!(motor.error(), None);
    }
}
