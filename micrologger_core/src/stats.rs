//! Incremental statistics used by the motor speed estimator.
//!
//! - `RunningStats`: Welford mean/variance plus a running maximum.
//! - `ExactHistogram`: integer-binned frequency counts over a clipped range,
//!   with an upper/lower percentile window estimator.

use thiserror::Error;

/// Online mean and variance (Welford) with the largest sample seen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
        if self.n == 1 || x > self.max {
            self.max = x;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Largest sample, or 0.0 when empty.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            0.0
        } else {
            self.m2 / (self.n - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard error of the mean.
    pub fn sem(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.std_dev() / (self.n as f64).sqrt()
        }
    }

    /// Coefficient of variation; undefined for fewer than two samples or a
    /// non-positive mean.
    pub fn cv(&self) -> Option<f64> {
        (self.n >= 2 && self.mean > 0.0).then(|| self.std_dev() / self.mean)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PercentileError {
    #[error("percentile window {low}..{high} is invalid")]
    InvalidWindow { low: f64, high: f64 },
    #[error("histogram is empty")]
    Empty,
    #[error("percentile window holds no samples")]
    EmptyWindow,
}

/// Statistics of the samples inside a percentile window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileStats {
    pub mean: f64,
    pub std_dev: f64,
    pub sem: f64,
    pub count: u64,
}

/// Frequency counts for integer values in `[min, max]`. Values outside the
/// range are clipped to the nearest end.
#[derive(Debug, Clone)]
pub struct ExactHistogram {
    min: i32,
    bins: Vec<u32>,
    total: u64,
}

impl ExactHistogram {
    pub fn new(min: i32, max: i32) -> Self {
        let (lo, hi) = if max >= min { (min, max) } else { (max, min) };
        let width = usize::try_from(i64::from(hi) - i64::from(lo) + 1).unwrap_or(1);
        Self {
            min: lo,
            bins: vec![0; width],
            total: 0,
        }
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.min + (self.bins.len() as i32 - 1)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.bins.fill(0);
        self.total = 0;
    }

    /// Count `value` rounded to the nearest integer; NaN is ignored.
    pub fn push(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        let clipped = value.round().clamp(f64::from(self.min), f64::from(self.max()));
        // clipped lies inside [min, max], so the offset indexes a bin
        let idx = (clipped - f64::from(self.min)) as usize;
        if let Some(bin) = self.bins.get_mut(idx) {
            *bin = bin.saturating_add(1);
            self.total += 1;
        }
    }

    /// Mean, deviation and standard error of the samples whose rank falls in
    /// `[round(total * low), round(total * high))`, ranks counted upward from
    /// the smallest value.
    pub fn percentile_stats(&self, low: f64, high: f64) -> Result<PercentileStats, PercentileError> {
        if !(low >= 0.0 && high <= 1.0 && low < high) {
            return Err(PercentileError::InvalidWindow { low, high });
        }
        if self.total == 0 {
            return Err(PercentileError::Empty);
        }
        let start_n = (self.total as f64 * low).round() as u64;
        let end_n = (self.total as f64 * high).round() as u64;

        let mut seen = 0u64;
        let mut n = 0u64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for (i, &c) in self.bins.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let first = seen;
            seen += u64::from(c);
            if seen <= start_n {
                continue;
            }
            if first >= end_n {
                break;
            }
            let take = seen.min(end_n) - first.max(start_n);
            let v = f64::from(self.min) + i as f64;
            n += take;
            sum += v * take as f64;
            sum_sq += v * v * take as f64;
        }
        if n == 0 {
            return Err(PercentileError::EmptyWindow);
        }
        let nf = n as f64;
        let mean = sum / nf;
        let std_dev = if n > 1 {
            ((sum_sq - nf * mean * mean) / (nf - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
        Ok(PercentileStats {
            mean,
            std_dev,
            sem: std_dev / nf.sqrt(),
            count: n,
        })
    }
}
