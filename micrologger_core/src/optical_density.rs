//! Optical density measurement: zero calibration, periodic reads and
//! automatic photodiode gain search.
//!
//! Every sequence walks an explicit [`Stage`] list. `process` enters the
//! current stage; a stage either finishes on the spot and the walk moves on,
//! or waits for a timer, a signal reading or a stirrer notice, after which
//! `process(now, true)` resumes from the following stage. Every exit path,
//! success or abort, goes through `end`, which hands the stirrer and the
//! lights back.

use crossbeam_channel::Sender;
use micrologger_traits::SignalSource;
use tracing::{debug, info, warn};

use crate::devices::BeamSwitch;
use crate::error::{I2cError, MicroLoggerError, OdError};
use crate::gain::GainStage;
use crate::i2c::{DeviceHealth, I2cDevice};
use crate::lights::LightsControl;
use crate::signal::{SignalReader, SignalReading};
use crate::stirrer::{StirrerAction, StirrerNotice, StirrerState};
use crate::timer::{Timer, earliest};
use crate::util::{MILLIS_PER_SEC, from_ppt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdStatus {
    Idle,
    Reading,
    Optimizing,
    Zeroing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdAction {
    Zero,
    BeamOn,
    BeamOff,
    OptimizeGain,
    Reset,
    Read,
}

/// Requests the pipeline makes of its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRequest {
    Stirrer(StirrerAction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Read,
    Zero,
    /// Gain search; `then_zero` continues into a zero calibration.
    Gain { then_zero: bool },
}

impl Sequence {
    fn status(self) -> OdStatus {
        match self {
            Self::Read => OdStatus::Reading,
            Self::Zero => OdStatus::Zeroing,
            Self::Gain { .. } => OdStatus::Optimizing,
        }
    }

    /// Error reported when a dependency fails mid-sequence.
    fn failure(self) -> OdError {
        match self {
            Self::Read => OdError::FailedRead,
            Self::Zero => OdError::FailedZero,
            Self::Gain { .. } => OdError::FailedGain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Start,
    Vortex,
    AwaitVortex,
    StopStirrer,
    AwaitStop,
    Settle,
    PauseLights,
    BeamOn,
    Warmup,
    ReadSignal,
    BeamOff,
    Cooldown,
    ReadBackground,
    Compute,
    GainBaseline,
    GainProbe,
    GainApply,
    GainFine,
    GainRestore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Waiting on a timer, reading or notice.
    Stay,
    Advance,
    Abort(OdError),
}

/// The stage after `stage` in a `kind` sequence. A gain search feeding a
/// zero hands over to the zero sequence at `BeamOn`.
pub fn next_stage(kind: Sequence, stage: Stage) -> (Sequence, Stage) {
    use Stage::*;
    let next = match stage {
        Idle | Compute => Idle,
        Start => Vortex,
        Vortex => AwaitVortex,
        AwaitVortex => StopStirrer,
        StopStirrer => AwaitStop,
        AwaitStop => Settle,
        Settle => PauseLights,
        PauseLights => BeamOn,
        BeamOn => Warmup,
        Warmup => match kind {
            Sequence::Gain { .. } => GainBaseline,
            Sequence::Read | Sequence::Zero => ReadSignal,
        },
        ReadSignal => BeamOff,
        BeamOff => Cooldown,
        Cooldown => ReadBackground,
        ReadBackground => Compute,
        GainBaseline => GainProbe,
        GainProbe => GainApply,
        GainApply => GainFine,
        GainFine => GainRestore,
        GainRestore => match kind {
            Sequence::Gain { then_zero: true } => return (Sequence::Zero, BeamOn),
            _ => Idle,
        },
    };
    (kind, next)
}

/// Transmittance and optical density of a reading against a zero
/// reference. No light above background reads as `T = 0`, `OD = NaN`.
pub fn transmittance(signal: f64, background: f64, zero: &ZeroReference) -> (f64, f64) {
    let num = signal - background;
    let denom = zero.signal - zero.background;
    if !(num > 0.0) || !(denom > 0.0) {
        return (0.0, f64::NAN);
    }
    let t = num / denom;
    (t, -t.log10())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZeroReference {
    pub valid: bool,
    pub signal: f64,
    pub background: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdReading {
    pub signal: f64,
    pub background: f64,
    pub transmittance: f64,
    pub od: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdSettings {
    /// Re-read on `read_interval_ms` once zeroed.
    pub auto_read: bool,
    pub read_interval_ms: u64,
    /// Vortex the culture before measuring.
    pub vortex: bool,
    /// Stop the stirrer while measuring.
    pub stop_stirrer: bool,
    pub settle_ms: u64,
    pub warmup_ms: u64,
    pub signal_reads: u32,
    pub automatic_gain: bool,
    pub target_ppt: f64,
    pub probe_steps: u16,
    pub gain_reads: u32,
    pub max_fine_steps: u32,
}

impl Default for OdSettings {
    fn default() -> Self {
        Self {
            auto_read: true,
            read_interval_ms: 200 * MILLIS_PER_SEC,
            vortex: false,
            stop_stirrer: true,
            settle_ms: 1000,
            warmup_ms: 200,
            signal_reads: 100,
            automatic_gain: true,
            target_ppt: 920.0,
            probe_steps: 5,
            gain_reads: 10,
            max_fine_steps: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GainSearch {
    baseline: f64,
    slope: f64,
    best_steps: u16,
    best_dist: f64,
    direction: i32,
    trial: u16,
    fine_steps: u32,
}

#[derive(Debug)]
struct Run {
    kind: Sequence,
    stage: Stage,
    beam_before: bool,
    vortex_requested: bool,
    stirrer_paused: bool,
    stop_requested: bool,
    lights_paused: bool,
    signal: f64,
    background: f64,
    search: GainSearch,
}

pub struct OpticalDensityPipeline<S, L> {
    beam: BeamSwitch,
    gain: GainStage,
    signal: SignalReader<S>,
    lights: L,
    settings: OdSettings,
    requests: Option<Sender<PipelineRequest>>,
    run: Option<Run>,
    error: Option<OdError>,
    zero: ZeroReference,
    reading: Option<OdReading>,
    /// Gain last settled on by a search or set by hand.
    gain_ohm: f64,
    stage_timer: Timer,
    read_timer: Timer,
}

impl<S: SignalSource, L: LightsControl> OpticalDensityPipeline<S, L> {
    pub fn new(
        beam: BeamSwitch,
        gain: GainStage,
        signal: SignalReader<S>,
        lights: L,
        settings: OdSettings,
    ) -> Self {
        let gain_ohm = gain.total_ohm();
        let mut pipeline = Self {
            beam,
            gain,
            signal,
            lights,
            settings,
            requests: None,
            run: None,
            error: None,
            zero: ZeroReference::default(),
            reading: None,
            gain_ohm,
            stage_timer: Timer::new(),
            read_timer: Timer::new(),
        };
        pipeline.settings.target_ppt = pipeline.clamp_ppt(settings.target_ppt);
        pipeline
    }

    /// Route stirrer requests through `tx`.
    pub fn with_requests(mut self, tx: Sender<PipelineRequest>) -> Self {
        self.requests = Some(tx);
        self
    }

    pub fn status(&self) -> OdStatus {
        self.run.as_ref().map_or(OdStatus::Idle, |r| r.kind.status())
    }

    pub fn stage(&self) -> Stage {
        self.run.as_ref().map_or(Stage::Idle, |r| r.stage)
    }

    pub fn error(&self) -> Option<OdError> {
        self.error
    }

    pub fn zero(&self) -> &ZeroReference {
        &self.zero
    }

    pub fn reading(&self) -> Option<&OdReading> {
        self.reading.as_ref()
    }

    pub fn next_read_deadline(&self) -> Option<u64> {
        self.read_timer.deadline()
    }

    pub fn settings(&self) -> &OdSettings {
        &self.settings
    }

    pub fn gain(&self) -> &GainStage {
        &self.gain
    }

    pub fn beam(&self) -> &BeamSwitch {
        &self.beam
    }

    pub fn gain_ohm(&self) -> f64 {
        self.gain_ohm
    }

    /// Link state of the beam switch and every gain rheostat.
    pub fn devices(&self) -> Vec<DeviceHealth> {
        std::iter::once(self.beam.link().health())
            .chain(self.gain.rheostats().map(|r| r.link().health()))
            .collect()
    }

    /// Reconnect every device and push its desired state.
    pub fn self_check(&mut self) -> Vec<DeviceHealth> {
        if let Err(e) = self.beam.reconnect() {
            debug!(error = %e, "beam switch check failed");
        }
        for r in self.gain.rheostats_mut() {
            if let Err(e) = r.reconnect() {
                debug!(device = r.link().name(), error = %e, "rheostat check failed");
            }
        }
        self.devices()
    }

    /// Highest target the search may aim for: the saturation ceiling.
    pub fn max_ppt(&self) -> f64 {
        self.signal.settings().saturation_ppt
    }

    fn clamp_ppt(&self, ppt: f64) -> f64 {
        ppt.clamp(0.0, self.max_ppt())
    }

    pub fn set_target_ppt(&mut self, ppt: f64) {
        self.settings.target_ppt = self.clamp_ppt(ppt);
    }

    pub fn set_automatic_gain(&mut self, on: bool) {
        self.settings.automatic_gain = on;
    }

    pub fn set_vortex(&mut self, on: bool) {
        self.settings.vortex = on;
    }

    pub fn set_stop_stirrer(&mut self, on: bool) {
        self.settings.stop_stirrer = on;
    }

    pub fn set_auto_read(&mut self, on: bool, now_ms: u64) {
        self.settings.auto_read = on;
        self.restart_read_timer(now_ms);
    }

    /// Change the read period; the schedule restarts from `now_ms`.
    pub fn set_read_interval_ms(&mut self, ms: u64, now_ms: u64) {
        self.settings.read_interval_ms = ms.max(1);
        self.restart_read_timer(now_ms);
    }

    /// Manual gain; refused while the gain is automatic.
    pub fn set_gain_ohm(&mut self, ohm: f64) -> Result<(), MicroLoggerError> {
        if self.settings.automatic_gain {
            return Err(MicroLoggerError::Rejected("gain is automatic"));
        }
        self.apply_gain_ohm(ohm)
    }

    /// Re-apply a persisted gain and zero reference after boot. The gain
    /// goes first so restoring it does not invalidate the zero.
    pub fn restore(&mut self, gain_ohm: f64, zero: Option<ZeroReference>, now_ms: u64) {
        if let Err(e) = self.apply_gain_ohm(gain_ohm) {
            warn!(error = %e, "failed to restore gain");
        }
        if let Some(z) = zero.filter(|z| z.signal > z.background) {
            self.zero = ZeroReference { valid: true, ..z };
            self.restart_read_timer(now_ms);
        }
    }

    fn apply_gain_ohm(&mut self, ohm: f64) -> Result<(), MicroLoggerError> {
        let steps = self.gain.steps_for_ohm(ohm);
        let result = self.apply_gain_steps(steps);
        self.gain_ohm = self.gain.total_ohm();
        result.map_err(|error| MicroLoggerError::I2c {
            address: self.gain.rheostats().next().map_or(0, |r| r.link().address()),
            error,
        })
    }

    /// Every gain change invalidates the zero reference.
    fn apply_gain_steps(&mut self, steps: u16) -> Result<(), I2cError> {
        let before = self.gain.steps();
        let result = self.gain.set_steps(steps);
        if self.gain.steps() != before {
            self.invalidate_zero();
        }
        result
    }

    fn invalidate_zero(&mut self) {
        if self.zero.valid {
            debug!("zero invalidated by gain change");
            self.zero.valid = false;
            self.read_timer.stop();
        }
    }

    fn restart_read_timer(&mut self, now_ms: u64) {
        self.read_timer.stop();
        if self.settings.auto_read && self.zero.valid {
            self.read_timer.start(now_ms, self.settings.read_interval_ms);
        }
    }

    pub fn handle(&mut self, action: OdAction, now_ms: u64) -> Result<(), MicroLoggerError> {
        debug!(?action, status = ?self.status(), "optical density action");
        match action {
            OdAction::Zero => {
                let kind = if self.settings.automatic_gain {
                    Sequence::Gain { then_zero: true }
                } else {
                    Sequence::Zero
                };
                self.start(kind, now_ms);
            }
            OdAction::OptimizeGain => self.start(Sequence::Gain { then_zero: false }, now_ms),
            OdAction::Read => self.start(Sequence::Read, now_ms),
            OdAction::BeamOn | OdAction::BeamOff => {
                if self.run.is_some() {
                    return Err(MicroLoggerError::Rejected("measurement in progress"));
                }
                let address = self.beam.link().address();
                self.beam
                    .set_on(action == OdAction::BeamOn)
                    .map_err(|error| MicroLoggerError::I2c { address, error })?;
            }
            OdAction::Reset => {
                self.end(now_ms, None);
                self.error = None;
                let address = self.beam.link().address();
                self.beam
                    .set_on(false)
                    .map_err(|error| MicroLoggerError::I2c { address, error })?;
                self.apply_gain_ohm(self.gain_ohm)?;
            }
        }
        Ok(())
    }

    /// Begin `kind`, superseding whatever sequence is in flight. The
    /// superseded run's hand-back duties carry over.
    fn start(&mut self, kind: Sequence, now_ms: u64) {
        let carried = self.run.take().map(|old| {
            debug!(sequence = ?old.kind, stage = ?old.stage, "sequence superseded");
            (old.beam_before, old.stirrer_paused, old.lights_paused)
        });
        self.stage_timer.stop();
        self.signal.cancel();
        let (beam_before, stirrer_paused, lights_paused) =
            carried.unwrap_or((self.beam.is_on(), false, false));
        self.error = None;
        self.run = Some(Run {
            kind,
            stage: Stage::Start,
            beam_before,
            vortex_requested: false,
            stirrer_paused,
            stop_requested: false,
            lights_paused,
            signal: 0.0,
            background: 0.0,
            search: GainSearch::default(),
        });
        info!(sequence = ?kind, "optical density sequence started");
        self.process(now_ms, false);
    }

    /// Enter the current stage, or with `completed` move past it, and keep
    /// walking until a stage has to wait.
    pub fn process(&mut self, now_ms: u64, completed: bool) {
        let mut completed = completed;
        loop {
            let Some((kind, stage)) = self.run.as_ref().map(|r| (r.kind, r.stage)) else {
                return;
            };
            let transition = if completed {
                Transition::Advance
            } else {
                self.enter(kind, stage, now_ms)
            };
            completed = false;
            match transition {
                Transition::Stay => return,
                Transition::Abort(e) => {
                    self.end(now_ms, Some(e));
                    return;
                }
                Transition::Advance => {
                    let (kind, next) = next_stage(kind, stage);
                    if next == Stage::Idle {
                        self.end(now_ms, None);
                        return;
                    }
                    if let Some(run) = self.run.as_mut() {
                        run.kind = kind;
                        run.stage = next;
                    }
                    debug!(stage = ?next, sequence = ?kind, "optical density stage");
                }
            }
        }
    }

    fn enter(&mut self, kind: Sequence, stage: Stage, now_ms: u64) -> Transition {
        match stage {
            Stage::Idle => Transition::Stay,
            Stage::Start => {
                if kind == Sequence::Read && !self.zero.valid {
                    warn!("read requested without a valid zero");
                    return Transition::Abort(OdError::FailedRead);
                }
                Transition::Advance
            }
            Stage::Vortex => {
                if self.settings.vortex {
                    self.request(PipelineRequest::Stirrer(StirrerAction::Vortex));
                    self.with_run(|r| r.vortex_requested = true);
                }
                Transition::Advance
            }
            Stage::AwaitVortex => self.wait_for(|r| r.vortex_requested),
            Stage::StopStirrer => {
                if self.settings.stop_stirrer {
                    self.request(PipelineRequest::Stirrer(StirrerAction::Pause));
                    self.with_run(|r| {
                        r.stirrer_paused = true;
                        r.stop_requested = true;
                    });
                }
                Transition::Advance
            }
            Stage::AwaitStop => self.wait_for(|r| r.stop_requested),
            Stage::Settle => self.delay(now_ms, self.settings.settle_ms),
            Stage::PauseLights => {
                let already = self.run.as_ref().is_some_and(|r| r.lights_paused);
                if !already {
                    self.lights.pause();
                    self.with_run(|r| r.lights_paused = true);
                }
                Transition::Advance
            }
            Stage::BeamOn => self.switch_beam(true, kind),
            Stage::BeamOff => self.switch_beam(false, kind),
            Stage::Warmup | Stage::Cooldown => self.delay(now_ms, self.settings.warmup_ms),
            Stage::ReadSignal | Stage::ReadBackground => {
                self.signal.start(now_ms, self.settings.signal_reads);
                Transition::Stay
            }
            Stage::Compute => self.compute(kind, now_ms),
            Stage::GainBaseline => self.gain_trial(0, now_ms),
            Stage::GainProbe => self.gain_trial(self.settings.probe_steps, now_ms),
            Stage::GainApply => {
                let search = self.search();
                let target = self.target_counts();
                let estimate = ((target - search.baseline) / search.slope).round();
                // clamped to the cascade range before narrowing
                let steps = estimate.clamp(0.0, f64::from(self.gain.max_steps())) as u16;
                debug!(baseline = search.baseline, slope = search.slope, steps, "gain extrapolated");
                self.gain_trial(steps, now_ms)
            }
            Stage::GainFine => {
                let search = self.search();
                if search.direction == 0 || search.fine_steps >= self.settings.max_fine_steps {
                    return Transition::Advance;
                }
                let next = i32::from(search.best_steps) + search.direction;
                let Ok(next) = u16::try_from(next) else {
                    return Transition::Advance;
                };
                if next > self.gain.max_steps() {
                    return Transition::Advance;
                }
                self.with_run(|r| r.search.trial = next);
                self.gain_trial(next, now_ms)
            }
            Stage::GainRestore => {
                self.gain_ohm = self.gain.total_ohm();
                info!(
                    steps = self.gain.steps(),
                    ohm = self.gain_ohm,
                    target_ppt = self.settings.target_ppt,
                    "gain optimized"
                );
                if kind == (Sequence::Gain { then_zero: true }) {
                    return Transition::Advance;
                }
                let before = self.run.as_ref().is_some_and(|r| r.beam_before);
                self.switch_beam(before, kind)
            }
        }
    }

    fn with_run(&mut self, f: impl FnOnce(&mut Run)) {
        if let Some(run) = self.run.as_mut() {
            f(run);
        }
    }

    fn search(&self) -> GainSearch {
        self.run.as_ref().map(|r| r.search).unwrap_or_default()
    }

    fn wait_for(&self, pending: impl Fn(&Run) -> bool) -> Transition {
        if self.run.as_ref().is_some_and(pending) {
            Transition::Stay
        } else {
            Transition::Advance
        }
    }

    fn delay(&mut self, now_ms: u64, ms: u64) -> Transition {
        if ms == 0 {
            return Transition::Advance;
        }
        self.stage_timer.start(now_ms, ms);
        Transition::Stay
    }

    fn switch_beam(&mut self, on: bool, kind: Sequence) -> Transition {
        match self.beam.set_on(on) {
            Ok(()) => Transition::Advance,
            Err(e) => {
                warn!(on, error = %e, "beam switch failed");
                Transition::Abort(kind.failure())
            }
        }
    }

    fn gain_trial(&mut self, steps: u16, now_ms: u64) -> Transition {
        if let Err(e) = self.apply_gain_steps(steps) {
            warn!(steps, error = %e, "gain write failed");
            return Transition::Abort(OdError::FailedGain);
        }
        self.signal.start(now_ms, self.settings.gain_reads);
        Transition::Stay
    }

    fn target_counts(&self) -> f64 {
        from_ppt(self.settings.target_ppt, self.signal.settings().adc_resolution)
    }

    fn compute(&mut self, kind: Sequence, now_ms: u64) -> Transition {
        let Some((signal, background)) = self.run.as_ref().map(|r| (r.signal, r.background)) else {
            return Transition::Stay;
        };
        if kind == Sequence::Zero {
            if !(signal > background) {
                warn!(signal, background, "zero has no light above background");
                return Transition::Abort(OdError::FailedZero);
            }
            self.zero = ZeroReference {
                valid: true,
                signal,
                background,
                timestamp_ms: now_ms,
            };
            info!(signal, background, "zero calibrated");
            return Transition::Advance;
        }
        let (t, od) = transmittance(signal, background, &self.zero);
        self.reading = Some(OdReading {
            signal,
            background,
            transmittance: t,
            od,
            timestamp_ms: now_ms,
        });
        info!(signal, background, transmittance = t, od, "optical density read");
        Transition::Advance
    }

    fn on_reading(&mut self, now_ms: u64, reading: SignalReading) {
        let Some((kind, stage, search)) = self.run.as_ref().map(|r| (r.kind, r.stage, r.search)) else {
            return;
        };
        let target = self.target_counts();
        let mean = reading.mean;
        match stage {
            Stage::ReadSignal => {
                if reading.saturated {
                    warn!(ppt = reading.ppt, "signal saturated");
                    self.end(now_ms, Some(OdError::Saturated));
                    return;
                }
                self.with_run(|r| r.signal = mean);
            }
            Stage::ReadBackground => self.with_run(|r| r.background = mean),
            Stage::GainBaseline => {
                if mean >= target {
                    warn!(baseline = mean, target, "signal above target at minimum gain");
                    self.end(now_ms, Some(OdError::FailedGain));
                    return;
                }
                self.with_run(|r| r.search.baseline = mean);
            }
            Stage::GainProbe => {
                let slope = (mean - search.baseline) / f64::from(self.settings.probe_steps.max(1));
                if !(slope > 0.0) {
                    warn!(baseline = search.baseline, probe = mean, "gain has no effect on signal");
                    self.end(now_ms, Some(OdError::FailedGain));
                    return;
                }
                self.with_run(|r| r.search.slope = slope);
            }
            Stage::GainApply => {
                let steps = self.gain.steps();
                // direction is fixed here; on a monotonic response it never flips mid-search
                let direction = if mean < target {
                    1
                } else if mean > target {
                    -1
                } else {
                    0
                };
                self.with_run(|r| {
                    r.search.best_steps = steps;
                    r.search.best_dist = (mean - target).abs();
                    r.search.direction = direction;
                });
            }
            Stage::GainFine => {
                let dist = (mean - target).abs();
                if dist < search.best_dist {
                    self.with_run(|r| {
                        r.search.best_steps = r.search.trial;
                        r.search.best_dist = dist;
                        r.search.fine_steps += 1;
                    });
                    self.process(now_ms, false);
                    return;
                }
                // not better: settle on the previous step
                if let Err(e) = self.apply_gain_steps(search.best_steps) {
                    warn!(error = %e, "gain revert failed");
                    self.end(now_ms, Some(kind.failure()));
                    return;
                }
            }
            _ => return,
        }
        self.process(now_ms, true);
    }

    /// Feed a stirrer notice to a sequence waiting on the stirrer.
    pub fn on_stirrer(&mut self, notice: StirrerNotice, now_ms: u64) {
        let Some(stage) = self.run.as_ref().map(|r| r.stage) else {
            return;
        };
        let done = matches!(
            (stage, notice),
            (
                Stage::AwaitVortex,
                StirrerNotice::VortexComplete | StirrerNotice::Fault(_)
            ) | (
                Stage::AwaitStop,
                StirrerNotice::Settled {
                    state: StirrerState::Off | StirrerState::Error,
                    ..
                } | StirrerNotice::Fault(_)
            )
        );
        if done {
            self.with_run(|r| {
                r.vortex_requested = false;
                r.stop_requested = false;
            });
            self.process(now_ms, true);
        }
    }

    /// Return to idle, restoring the beam and handing the stirrer and the
    /// lights back.
    fn end(&mut self, now_ms: u64, error: Option<OdError>) {
        let Some(run) = self.run.take() else {
            return;
        };
        self.stage_timer.stop();
        self.signal.cancel();
        if self.beam.is_on() != run.beam_before {
            if let Err(e) = self.beam.set_on(run.beam_before) {
                warn!(error = %e, "failed to restore beam");
            }
        }
        if run.stirrer_paused {
            self.request(PipelineRequest::Stirrer(StirrerAction::Resume));
        }
        if run.lights_paused {
            self.lights.resume();
        }
        self.error = error;
        match error {
            Some(e) => warn!(sequence = ?run.kind, stage = ?run.stage, error = %e, "optical density sequence aborted"),
            None => debug!(sequence = ?run.kind, "optical density sequence finished"),
        }
        if error.is_none() && run.kind == Sequence::Zero {
            self.restart_read_timer(now_ms);
        }
    }

    fn request(&self, request: PipelineRequest) {
        if let Some(tx) = &self.requests {
            // the receiver goes away only when the instrument is torn down
            let _ = tx.send(request);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        earliest([
            self.stage_timer.deadline(),
            self.signal.next_deadline(),
            if self.settings.auto_read { self.read_timer.deadline() } else { None },
            self.beam.link().next_deadline(),
            self.gain.next_deadline(),
        ])
    }

    pub fn poll(&mut self, now_ms: u64) {
        self.beam.poll(now_ms);
        self.gain.poll(now_ms);

        if let Some(kind) = self.run.as_ref().map(|r| r.kind) {
            let dependency = I2cError::worst(self.beam.link().error(), self.gain.error());
            if dependency.is_some_and(I2cError::disconnects) {
                warn!(error = ?dependency, "photometer device lost");
                self.end(now_ms, Some(kind.failure()));
            }
        }

        if self.stage_timer.fire(now_ms) {
            self.process(now_ms, true);
        }
        if let Some(result) = self.signal.poll(now_ms) {
            match result {
                Ok(reading) => self.on_reading(now_ms, reading),
                Err(e) => {
                    warn!(error = %e, "signal read failed");
                    let failure = self.run.as_ref().map_or(OdError::FailedRead, |r| r.kind.failure());
                    self.end(now_ms, Some(failure));
                }
            }
        }
        if self.settings.auto_read
            && self.zero.valid
            && self.read_timer.fire_periodic(now_ms, self.settings.read_interval_ms)
        {
            if self.run.is_none() {
                self.start(Sequence::Read, now_ms);
            } else {
                debug!("scheduled read skipped; sequence in progress");
            }
        }
    }
}
