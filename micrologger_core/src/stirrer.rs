//! Stirrer supervision: speed ramps, vortex bursts, pause/resume on behalf
//! of a measurement, and bounded restarts after a motor fault.
//!
//! The base `StirrerState` says what the motor is doing; the orthogonal
//! `StirrerEvent` says why it is away from its nominal setpoint.

use crossbeam_channel::Sender;
use micrologger_traits::{PulseCounter, PwmOutput};
use tracing::{debug, info, warn};

use crate::error::MotorError;
use crate::motor::MotorController;
use crate::timer::{Timer, earliest};
use crate::util::MILLIS_PER_SEC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StirrerState {
    Off,
    Accelerating,
    Decelerating,
    Running,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StirrerEvent {
    Paused,
    Vortexing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StirrerAction {
    Start,
    Stop,
    Pause,
    Resume,
    Vortex,
}

/// Messages the supervisor publishes to whoever wired a channel in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StirrerNotice {
    /// A ramp reached its target.
    Settled { state: StirrerState, rpm: f64 },
    /// The vortexing event cleared, whether completed, cancelled or refused.
    VortexComplete,
    Fault(MotorError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StirrerSettings {
    pub setpoint_rpm: f64,
    /// rpm per second while speeding up; 0 jumps.
    pub acceleration: f64,
    /// rpm per second while slowing down; 0 jumps.
    pub deceleration: f64,
    pub max_speed_rpm: f64,
    pub vortex_speed_rpm: f64,
    pub vortex_duration_ms: u64,
    pub ramp_tick_ms: u64,
    pub restart_delay_ms: u64,
    pub max_restarts: u32,
}

impl Default for StirrerSettings {
    fn default() -> Self {
        Self {
            setpoint_rpm: 500.0,
            acceleration: 500.0,
            deceleration: 3000.0,
            max_speed_rpm: 5000.0,
            vortex_speed_rpm: 3000.0,
            vortex_duration_ms: 5000,
            ramp_tick_ms: 100,
            restart_delay_ms: 1000,
            max_restarts: 5,
        }
    }
}

pub struct StirrerSupervisor<P, C> {
    motor: MotorController<P, C>,
    settings: StirrerSettings,
    state: StirrerState,
    event: Option<StirrerEvent>,
    on: bool,
    speed: f64,
    target: f64,
    vortex_peak: bool,
    restarts: u32,
    ramp_timer: Timer,
    vortex_timer: Timer,
    restart_timer: Timer,
    notices: Option<Sender<StirrerNotice>>,
}

impl<P: PwmOutput, C: PulseCounter> StirrerSupervisor<P, C> {
    pub fn new(motor: MotorController<P, C>, settings: StirrerSettings) -> Self {
        let mut settings = settings;
        settings.setpoint_rpm = settings.setpoint_rpm.clamp(0.0, settings.max_speed_rpm);
        settings.vortex_speed_rpm = settings.vortex_speed_rpm.clamp(0.0, settings.max_speed_rpm);
        Self {
            motor,
            settings,
            state: StirrerState::Off,
            event: None,
            on: false,
            speed: 0.0,
            target: 0.0,
            vortex_peak: false,
            restarts: 0,
            ramp_timer: Timer::new(),
            vortex_timer: Timer::new(),
            restart_timer: Timer::new(),
            notices: None,
        }
    }

    /// Publish notices on `tx`.
    pub fn with_notices(mut self, tx: Sender<StirrerNotice>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn motor(&self) -> &MotorController<P, C> {
        &self.motor
    }

    pub fn settings(&self) -> &StirrerSettings {
        &self.settings
    }

    pub fn state(&self) -> StirrerState {
        self.state
    }

    pub fn event(&self) -> Option<StirrerEvent> {
        self.event
    }

    /// Whether the stirrer should be stirring when nothing interferes.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Speed currently commanded to the motor along the ramp.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn handle(&mut self, action: StirrerAction, now_ms: u64) {
        debug!(?action, state = ?self.state, event = ?self.event, "stirrer action");
        match action {
            StirrerAction::Start => {
                self.on = true;
                self.restarts = 0;
                if self.event.is_none() {
                    self.change_speed(self.settings.setpoint_rpm, now_ms);
                }
            }
            StirrerAction::Stop => {
                self.on = false;
                self.restart_timer.stop();
                self.end_vortex();
                self.change_speed(0.0, now_ms);
            }
            StirrerAction::Pause => {
                self.end_vortex();
                self.restart_timer.stop();
                self.event = Some(StirrerEvent::Paused);
                if self.state == StirrerState::Error {
                    // the motor is already stopped; the fault stays until a restart clears it
                    self.notify(StirrerNotice::Settled {
                        state: self.state,
                        rpm: self.speed,
                    });
                    return;
                }
                self.change_speed(0.0, now_ms);
            }
            StirrerAction::Resume => {
                if self.event == Some(StirrerEvent::Paused) {
                    self.event = None;
                }
                if !self.on || self.event.is_some() {
                    return;
                }
                if self.state == StirrerState::Error {
                    // a restart cancelled by the pause is re-armed, never run early
                    if !self.restart_timer.running() {
                        self.arm_restart(now_ms);
                    }
                    return;
                }
                self.change_speed(self.settings.setpoint_rpm, now_ms);
            }
            StirrerAction::Vortex => {
                if self.event == Some(StirrerEvent::Paused) || self.state == StirrerState::Error {
                    debug!(state = ?self.state, "vortex refused");
                    self.notify(StirrerNotice::VortexComplete);
                    return;
                }
                self.event = Some(StirrerEvent::Vortexing);
                self.vortex_peak = false;
                self.change_speed(self.settings.vortex_speed_rpm, now_ms);
            }
        }
    }

    /// Re-apply a persisted on/off state after boot.
    pub fn resume_state(&mut self, on: bool, now_ms: u64) {
        if on {
            self.handle(StirrerAction::Start, now_ms);
        }
    }

    pub fn set_setpoint(&mut self, rpm: f64, now_ms: u64) {
        self.settings.setpoint_rpm = rpm.clamp(0.0, self.settings.max_speed_rpm);
        if self.on && self.event.is_none() && self.state != StirrerState::Error {
            self.change_speed(self.settings.setpoint_rpm, now_ms);
        }
    }

    pub fn set_vortex_speed(&mut self, rpm: f64, now_ms: u64) {
        self.settings.vortex_speed_rpm = rpm.clamp(0.0, self.settings.max_speed_rpm);
        if self.event == Some(StirrerEvent::Vortexing) && !self.vortex_peak {
            self.change_speed(self.settings.vortex_speed_rpm, now_ms);
        }
    }

    pub fn set_acceleration(&mut self, rpm_per_s: f64) {
        self.settings.acceleration = rpm_per_s.max(0.0);
    }

    pub fn set_deceleration(&mut self, rpm_per_s: f64) {
        self.settings.deceleration = rpm_per_s.max(0.0);
    }

    pub fn set_vortex_duration_ms(&mut self, ms: u64) {
        self.settings.vortex_duration_ms = ms;
    }

    /// Cancel the ramp and vortex timers and head for `target`.
    fn change_speed(&mut self, target: f64, now_ms: u64) {
        self.ramp_timer.stop();
        self.vortex_timer.stop();
        self.target = target.clamp(0.0, self.settings.max_speed_rpm);
        if (self.target - self.speed).abs() < f64::EPSILON {
            self.arrive(now_ms);
            return;
        }
        let (state, rate) = if self.target > self.speed {
            (StirrerState::Accelerating, self.settings.acceleration)
        } else {
            (StirrerState::Decelerating, self.settings.deceleration)
        };
        self.state = state;
        if rate <= 0.0 {
            self.speed = self.target;
            if self.apply(now_ms) {
                self.arrive(now_ms);
            }
        } else {
            self.ramp_timer.start(now_ms, self.settings.ramp_tick_ms);
        }
    }

    fn tick(&mut self, now_ms: u64) {
        let rate = if self.target > self.speed {
            self.settings.acceleration
        } else {
            self.settings.deceleration
        };
        let step = (rate * self.settings.ramp_tick_ms as f64 / MILLIS_PER_SEC as f64).max(1.0);
        self.speed = if self.target > self.speed {
            (self.speed + step).min(self.target)
        } else {
            (self.speed - step).max(self.target)
        };
        if !self.apply(now_ms) {
            return;
        }
        if (self.target - self.speed).abs() < f64::EPSILON {
            self.arrive(now_ms);
        } else {
            self.ramp_timer.start(now_ms, self.settings.ramp_tick_ms);
        }
    }

    /// Push the ramp speed to the motor. False when the drive failed and the
    /// supervisor went to `Error`.
    fn apply(&mut self, now_ms: u64) -> bool {
        match self.motor.set_target_rpm(self.speed, now_ms) {
            Ok(()) => true,
            Err(e) => {
                warn!(rpm = self.speed, error = %e, "stirrer drive failed");
                self.fault(MotorError::DriveFailed, now_ms);
                false
            }
        }
    }

    fn arrive(&mut self, now_ms: u64) {
        self.state = if self.speed > 0.0 {
            StirrerState::Running
        } else {
            StirrerState::Off
        };
        if self.event == Some(StirrerEvent::Vortexing) {
            if self.vortex_peak {
                self.end_vortex();
            } else {
                self.vortex_peak = true;
                self.vortex_timer.start(now_ms, self.settings.vortex_duration_ms);
            }
        }
        debug!(state = ?self.state, rpm = self.speed, "stirrer settled");
        self.notify(StirrerNotice::Settled {
            state: self.state,
            rpm: self.speed,
        });
    }

    fn end_vortex(&mut self) {
        if self.event == Some(StirrerEvent::Vortexing) {
            self.event = None;
            self.vortex_peak = false;
            self.vortex_timer.stop();
            self.notify(StirrerNotice::VortexComplete);
        }
    }

    fn fault(&mut self, error: MotorError, now_ms: u64) {
        self.ramp_timer.stop();
        self.vortex_timer.stop();
        self.end_vortex();
        self.event = None;
        self.speed = 0.0;
        if let Err(e) = self.motor.off(now_ms) {
            warn!(error = %e, "failed to stop motor");
        }
        self.state = StirrerState::Error;
        warn!(%error, restarts = self.restarts, "stirrer fault");
        self.notify(StirrerNotice::Fault(error));
        if self.on {
            self.arm_restart(now_ms);
        }
    }

    fn arm_restart(&mut self, now_ms: u64) {
        if self.restarts < self.settings.max_restarts {
            self.restart_timer.start(now_ms, self.settings.restart_delay_ms);
        } else {
            warn!(max_restarts = self.settings.max_restarts, "stirrer restarts exhausted");
        }
    }

    fn notify(&self, notice: StirrerNotice) {
        if let Some(tx) = &self.notices {
            // the receiver goes away only when the instrument is torn down
            let _ = tx.send(notice);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        earliest([
            self.ramp_timer.deadline(),
            self.vortex_timer.deadline(),
            self.restart_timer.deadline(),
            self.motor.next_deadline(),
        ])
    }

    pub fn poll(&mut self, now_ms: u64) {
        if self.restart_timer.fire(now_ms) {
            self.restarts += 1;
            info!(attempt = self.restarts, rpm = self.settings.setpoint_rpm, "stirrer restart");
            self.change_speed(self.settings.setpoint_rpm, now_ms);
        }
        if self.vortex_timer.fire(now_ms) {
            let nominal = if self.on { self.settings.setpoint_rpm } else { 0.0 };
            self.change_speed(nominal, now_ms);
        }
        if self.ramp_timer.fire(now_ms) {
            self.tick(now_ms);
        }
        if let Err(e) = self.motor.poll(now_ms) {
            warn!(error = %e, "motor poll failed");
            self.fault(MotorError::DriveFailed, now_ms);
            return;
        }
        if self.state != StirrerState::Error {
            if let Some(error) = self.motor.error() {
                self.fault(error, now_ms);
                return;
            }
        }
        if self.restarts > 0 && self.state == StirrerState::Running && self.motor.stabilized() {
            debug!(restarts = self.restarts, "stirrer recovered");
            self.restarts = 0;
        }
    }
}
