//! Averaged photodiode readings, taken one ADC sample per tick so a reading
//! never blocks the scheduler.

use micrologger_traits::SignalSource;

use crate::error::MicroLoggerError;
use crate::hw_error::map_hw_error;
use crate::stats::RunningStats;
use crate::timer::Timer;
use crate::util::to_ppt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSettings {
    pub adc_resolution: u16,
    pub sample_interval_ms: u64,
    /// Mean at or above this many parts per thousand is saturated.
    pub saturation_ppt: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            adc_resolution: 4095,
            sample_interval_ms: 5,
            saturation_ppt: 950.0,
        }
    }
}

/// Result of one averaged reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReading {
    /// Mean ADC counts.
    pub mean: f64,
    pub std_dev: f64,
    pub count: u64,
    /// Mean in parts per thousand of full scale.
    pub ppt: f64,
    pub saturated: bool,
}

pub struct SignalReader<S> {
    source: S,
    settings: SignalSettings,
    stats: RunningStats,
    remaining: u32,
    timer: Timer,
}

impl<S: SignalSource> SignalReader<S> {
    pub fn new(source: S, settings: SignalSettings) -> Self {
        Self {
            source,
            settings,
            stats: RunningStats::new(),
            remaining: 0,
            timer: Timer::new(),
        }
    }

    pub fn settings(&self) -> &SignalSettings {
        &self.settings
    }

    /// Begin averaging `reads` samples; the first is taken at `now_ms`.
    /// Restarting discards any reading in progress.
    pub fn start(&mut self, now_ms: u64, reads: u32) {
        self.stats.clear();
        self.remaining = reads.max(1);
        self.timer.start(now_ms, 0);
    }

    pub fn cancel(&mut self) {
        self.remaining = 0;
        self.timer.stop();
    }

    pub fn busy(&self) -> bool {
        self.remaining > 0
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// Take the sample that is due, if any. Returns the finished reading
    /// once the last sample is in; a failed sample ends the reading early.
    pub fn poll(&mut self, now_ms: u64) -> Option<Result<SignalReading, MicroLoggerError>> {
        if !self.busy() || !self.timer.fire(now_ms) {
            return None;
        }
        match self.source.sample() {
            Ok(v) => {
                tracing::trace!(value = v, "signal sample");
                self.stats.push(f64::from(v));
            }
            Err(e) => {
                self.cancel();
                return Some(Err(map_hw_error(e.as_ref())));
            }
        }
        self.remaining -= 1;
        if self.remaining > 0 {
            self.timer.start(now_ms, self.settings.sample_interval_ms);
            return None;
        }
        let mean = self.stats.mean();
        let ppt = to_ppt(mean, self.settings.adc_resolution);
        Some(Ok(SignalReading {
            mean,
            std_dev: self.stats.std_dev(),
            count: self.stats.count(),
            ppt,
            saturated: ppt >= self.settings.saturation_ppt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Script(VecDeque<Result<u16, &'static str>>);

    impl SignalSource for Script {
        fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
            match self.0.pop_front() {
                Some(Ok(v)) => Ok(v),
                Some(Err(m)) => Err(m.into()),
                None => Err("exhausted".into()),
            }
        }
    }

    fn drain(r: &mut SignalReader<Script>, mut now: u64) -> (u64, Result<SignalReading, MicroLoggerError>) {
        loop {
            if let Some(res) = r.poll(now) {
                return (now, res);
            }
            now = r.next_deadline().unwrap_or(now + 1);
        }
    }

    #[test]
    fn averages_on_the_sample_cadence() {
        let samples = [100, 110, 90, 100].map(Ok).into_iter().collect();
        let mut r = SignalReader::new(Script(samples), SignalSettings::default());
        r.start(1000, 4);
        assert!(r.busy());
        let (done_at, res) = drain(&mut r, 1000);
        let reading = res.unwrap();
        assert_eq!(done_at, 1015);
        assert_eq!(reading.count, 4);
        assert!((reading.mean - 100.0).abs() < 1e-9);
        assert!(!reading.saturated);
        assert!(!r.busy());
    }

    #[test]
    fn flags_saturation_at_ceiling() {
        let samples = std::iter::repeat_n(Ok(3891), 3).collect();
        let mut r = SignalReader::new(Script(samples), SignalSettings::default());
        r.start(0, 3);
        let (_, res) = drain(&mut r, 0);
        assert!(res.unwrap().saturated);
    }

    #[test]
    fn sample_failure_ends_reading() {
        let samples = [Ok(5), Err("adc gone")].into_iter().collect();
        let mut r = SignalReader::new(Script(samples), SignalSettings::default());
        r.start(0, 10);
        let (_, res) = drain(&mut r, 0);
        assert!(matches!(res, Err(MicroLoggerError::Hardware(m)) if m.contains("adc gone")));
        assert!(!r.busy());
    }
}
