//! Piecewise-linear motor calibration between PWM steps and rpm.
//!
//! Each segment covers a step range `[step_min, step_max)` and models
//! `step = b + m * rpm`. Segments are contiguous from step 0 and the last one
//! extends to the full PWM range.

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub step_min: u16,
    pub step_max: u16,
    pub b: f64,
    pub m: f64,
}

impl Segment {
    /// Lowest rpm this segment maps into its own step range.
    pub fn rpm_min(&self) -> f64 {
        (f64::from(self.step_min) - self.b) / self.m
    }

    /// Rpm at the upper step bound (exclusive).
    pub fn rpm_max(&self) -> f64 {
        (f64::from(self.step_max) - self.b) / self.m
    }

    fn contains_step(&self, step: u16) -> bool {
        step >= self.step_min && step < self.step_max
    }

    fn contains_rpm(&self, rpm: f64) -> bool {
        rpm >= self.rpm_min() && rpm < self.rpm_max()
    }
}

/// Stock fit for the stirrer's BLDC driver at 12-bit, 25 kHz PWM.
const STOCK: [(u16, u16, f64, f64); 4] = [
    (0, 1000, 111.0, 0.693),
    (1000, 2000, 118.0, 0.688),
    (2000, 3000, 75.9, 0.702),
    (3000, 4000, 123.0, 0.691),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    segments: Vec<Segment>,
    max_steps: u16,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::stock(4095)
    }
}

impl Calibration {
    /// The stock table with its last segment stretched to `max_steps`.
    pub fn stock(max_steps: u16) -> Self {
        let segments = STOCK
            .iter()
            .map(|&(step_min, step_max, b, m)| Segment {
                step_min,
                step_max,
                b,
                m,
            })
            .collect();
        // the stock table is contiguous from 0 with positive slopes
        Self::new(segments, max_steps).unwrap_or(Self {
            segments: Vec::new(),
            max_steps,
        })
    }

    /// Validate contiguity and slopes; the last segment is extended (or cut)
    /// so the table ends at `max_steps`.
    pub fn new(mut segments: Vec<Segment>, max_steps: u16) -> Result<Self, BuildError> {
        let Some(first) = segments.first() else {
            return Err(BuildError::InvalidConfig("calibration has no segments"));
        };
        if first.step_min != 0 {
            return Err(BuildError::InvalidConfig("calibration must start at step 0"));
        }
        if segments.iter().any(|s| !(s.m.is_finite() && s.m > 0.0 && s.b.is_finite())) {
            return Err(BuildError::InvalidConfig("calibration slopes must be positive"));
        }
        if segments.windows(2).any(|w| w[0].step_max != w[1].step_min) {
            return Err(BuildError::InvalidConfig("calibration segments must be contiguous"));
        }
        segments.retain(|s| s.step_min <= max_steps);
        if let Some(last) = segments.last_mut() {
            last.step_max = max_steps.saturating_add(1);
        }
        Ok(Self {
            segments,
            max_steps,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn max_steps(&self) -> u16 {
        self.max_steps
    }

    fn segment_for_rpm(&self, rpm: f64) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.contains_rpm(rpm))
            .or_else(|| self.segments.iter().rev().find(|s| rpm >= s.rpm_min()))
            .or_else(|| self.segments.first())
    }

    fn segment_for_step(&self, step: u16) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.contains_step(step))
            .or_else(|| self.segments.last())
    }

    /// Drive level for `rpm`; zero or negative rpm is off.
    pub fn rpm_to_step(&self, rpm: f64) -> u16 {
        if !(rpm > 0.0) {
            return 0;
        }
        let Some(seg) = self.segment_for_rpm(rpm) else {
            return 0;
        };
        let step = (seg.b + seg.m * rpm).round();
        // clamped to the PWM range before narrowing
        step.clamp(0.0, f64::from(self.max_steps)) as u16
    }

    /// Speed expected at drive level `step`; step 0 is standstill.
    pub fn step_to_rpm(&self, step: u16) -> f64 {
        if step == 0 {
            return 0.0;
        }
        self.segment_for_step(step)
            .map_or(0.0, |seg| ((f64::from(step) - seg.b) / seg.m).max(0.0))
    }

    /// Steps per rpm around `rpm`.
    pub fn slope(&self, rpm: f64) -> f64 {
        self.segment_for_rpm(rpm).map_or(1.0, |s| s.m)
    }
}
