//! The assembled instrument: stirrer and optical density pipeline on one
//! cooperative timeline, with cross-component messages routed between them.

use std::time::Instant;

use crossbeam_channel::Receiver;
use micrologger_config::{OpticalDensityState, PersistedState, StirrerState as SavedStirrer, ZeroState};
use micrologger_traits::{PulseCounter, PwmOutput, SignalSource};
use tracing::{trace, warn};

use crate::error::{MotorError, OdError, Report, Result};
use crate::i2c::{DeviceHealth, SharedClock};
use crate::lights::LightsControl;
use crate::optical_density::{
    OdAction, OdReading, OdStatus, OpticalDensityPipeline, PipelineRequest, ZeroReference,
};
use crate::stirrer::{StirrerAction, StirrerEvent, StirrerNotice, StirrerState, StirrerSupervisor};
use crate::timer::earliest;
use crate::util::MILLIS_PER_SEC;

pub type DynDrive = Box<dyn PwmOutput + Send>;
pub type DynDecoder = Box<dyn PulseCounter + Send>;
pub type DynSignal = Box<dyn SignalSource + Send>;
pub type DynLights = Box<dyn LightsControl + Send>;

/// Upper bound on message rounds per poll; a cycle between the stirrer and
/// the pipeline would otherwise spin forever.
const MAX_ROUTING_ROUNDS: usize = 64;

/// Snapshot of everything an operator may want to see.
#[derive(Debug, Clone)]
pub struct Health {
    pub now_ms: u64,
    pub stirrer_state: StirrerState,
    pub stirrer_event: Option<StirrerEvent>,
    pub stirrer_on: bool,
    pub speed_rpm: f64,
    pub measured_rpm: f64,
    pub motor_steps: u16,
    pub motor_error: Option<MotorError>,
    pub restarts: u32,
    pub od_status: OdStatus,
    pub od_error: Option<OdError>,
    pub zero: ZeroReference,
    pub reading: Option<OdReading>,
    pub gain_ohm: f64,
    pub next_read_ms: Option<u64>,
    pub devices: Vec<DeviceHealth>,
}

pub struct MicroLogger {
    pub(crate) clock: SharedClock,
    pub(crate) epoch: Instant,
    pub(crate) stirrer: StirrerSupervisor<DynDrive, DynDecoder>,
    pub(crate) od: OpticalDensityPipeline<DynSignal, DynLights>,
    pub(crate) notices: Receiver<StirrerNotice>,
    pub(crate) requests: Receiver<PipelineRequest>,
}

impl std::fmt::Debug for MicroLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroLogger")
            .field("now_ms", &self.now_ms())
            .field("stirrer", &self.stirrer.state())
            .field("optical_density", &self.od.status())
            .finish_non_exhaustive()
    }
}

impl MicroLogger {
    /// Milliseconds since the instrument was built.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn stirrer(&self) -> &StirrerSupervisor<DynDrive, DynDecoder> {
        &self.stirrer
    }

    pub fn optical_density(&self) -> &OpticalDensityPipeline<DynSignal, DynLights> {
        &self.od
    }

    /// Service every component due at the current time and let the
    /// resulting messages settle. Returns the time polled at.
    pub fn poll(&mut self) -> u64 {
        let now = self.now_ms();
        self.stirrer.poll(now);
        self.route(now);
        self.od.poll(now);
        self.route(now);
        now
    }

    /// Earliest time any component needs servicing.
    pub fn next_deadline(&self) -> Option<u64> {
        earliest([self.stirrer.next_deadline(), self.od.next_deadline()])
    }

    /// Deliver stirrer notices to the pipeline and pipeline requests to the
    /// stirrer until both queues are empty.
    fn route(&mut self, now: u64) {
        for _ in 0..MAX_ROUTING_ROUNDS {
            let mut moved = false;
            while let Ok(notice) = self.notices.try_recv() {
                trace!(?notice, "stirrer notice");
                self.od.on_stirrer(notice, now);
                moved = true;
            }
            while let Ok(request) = self.requests.try_recv() {
                trace!(?request, "pipeline request");
                match request {
                    PipelineRequest::Stirrer(action) => self.stirrer.handle(action, now),
                }
                moved = true;
            }
            if !moved {
                return;
            }
        }
        warn!(rounds = MAX_ROUTING_ROUNDS, "message routing did not settle");
    }

    pub fn stirrer_action(&mut self, action: StirrerAction) {
        let now = self.now_ms();
        self.stirrer.handle(action, now);
        self.route(now);
    }

    pub fn od_action(&mut self, action: OdAction) -> Result<()> {
        let now = self.now_ms();
        let result = self.od.handle(action, now);
        self.route(now);
        result.map_err(Report::new)
    }

    pub fn set_stirrer_setpoint(&mut self, rpm: f64) {
        let now = self.now_ms();
        self.stirrer.set_setpoint(rpm, now);
        self.route(now);
    }

    pub fn set_vortex_speed(&mut self, rpm: f64) {
        let now = self.now_ms();
        self.stirrer.set_vortex_speed(rpm, now);
        self.route(now);
    }

    pub fn set_gain_ohm(&mut self, ohm: f64) -> Result<()> {
        self.od.set_gain_ohm(ohm).map_err(Report::new)
    }

    pub fn set_automatic_gain(&mut self, on: bool) {
        self.od.set_automatic_gain(on);
    }

    pub fn set_target_ppt(&mut self, ppt: f64) {
        self.od.set_target_ppt(ppt);
    }

    pub fn set_read_interval_s(&mut self, s: u64) {
        let now = self.now_ms();
        self.od.set_read_interval_ms(s.saturating_mul(MILLIS_PER_SEC), now);
    }

    /// Connect every I2C device and report its state.
    pub fn self_check(&mut self) -> Vec<DeviceHealth> {
        self.od.self_check()
    }

    pub fn health(&self) -> Health {
        let motor = self.stirrer.motor();
        Health {
            now_ms: self.now_ms(),
            stirrer_state: self.stirrer.state(),
            stirrer_event: self.stirrer.event(),
            stirrer_on: self.stirrer.is_on(),
            speed_rpm: self.stirrer.speed(),
            measured_rpm: motor.measured_rpm(),
            motor_steps: motor.steps(),
            motor_error: motor.error(),
            restarts: self.stirrer.restarts(),
            od_status: self.od.status(),
            od_error: self.od.error(),
            zero: *self.od.zero(),
            reading: self.od.reading().copied(),
            gain_ohm: self.od.gain_ohm(),
            next_read_ms: self.od.next_read_deadline(),
            devices: self.od.devices(),
        }
    }

    /// Every persist-flagged property.
    pub fn snapshot(&self) -> PersistedState {
        let s = self.stirrer.settings();
        let od = self.od.settings();
        let zero = self.od.zero();
        PersistedState {
            stirrer: Some(SavedStirrer {
                on: self.stirrer.is_on(),
                setpoint_rpm: s.setpoint_rpm,
                acceleration: s.acceleration,
                deceleration: s.deceleration,
                vortex_speed_rpm: s.vortex_speed_rpm,
                vortex_duration_s: s.vortex_duration_ms / MILLIS_PER_SEC,
            }),
            optical_density: Some(OpticalDensityState {
                read_interval_s: od.read_interval_ms / MILLIS_PER_SEC,
                vortex: od.vortex,
                stop_stirrer: od.stop_stirrer,
                gain_automatic: od.automatic_gain,
                target_ppt: od.target_ppt,
                gain_ohm: self.od.gain_ohm(),
                zero: zero.valid.then_some(ZeroState {
                    signal: zero.signal,
                    background: zero.background,
                    timestamp_ms: zero.timestamp_ms,
                }),
            }),
        }
    }

    /// Apply a persisted snapshot at boot. A stirrer saved as on ramps back
    /// to its setpoint.
    pub fn restore(&mut self, state: &PersistedState) {
        let now = self.now_ms();
        if let Some(s) = &state.stirrer {
            self.stirrer.set_acceleration(s.acceleration);
            self.stirrer.set_deceleration(s.deceleration);
            self.stirrer.set_vortex_speed(s.vortex_speed_rpm, now);
            self.stirrer.set_vortex_duration_ms(s.vortex_duration_s.saturating_mul(MILLIS_PER_SEC));
            self.stirrer.set_setpoint(s.setpoint_rpm, now);
            self.stirrer.resume_state(s.on, now);
        }
        if let Some(o) = &state.optical_density {
            self.od.set_vortex(o.vortex);
            self.od.set_stop_stirrer(o.stop_stirrer);
            self.od.set_automatic_gain(o.gain_automatic);
            self.od.set_target_ppt(o.target_ppt);
            self.od
                .set_read_interval_ms(o.read_interval_s.saturating_mul(MILLIS_PER_SEC), now);
            let zero = o.zero.map(|z| ZeroReference {
                valid: true,
                signal: z.signal,
                background: z.background,
                timestamp_ms: z.timestamp_ms,
            });
            self.od.restore(o.gain_ohm, zero, now);
        }
        self.route(now);
    }
}
