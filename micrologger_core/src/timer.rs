//! One-shot deadlines on the instrument's millisecond timeline.

/// A one-shot scheduled callback. `fire` delivers exactly one expiry per
/// `start`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<u64>,
}

impl Timer {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// A timer already due at `at_ms`.
    pub const fn armed_at(at_ms: u64) -> Self {
        Self {
            deadline: Some(at_ms),
        }
    }

    /// Arm (or re-arm) the timer `delay_ms` after `now_ms`.
    pub fn start(&mut self, now_ms: u64, delay_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(delay_ms));
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// True once when the deadline has passed; the timer is then disarmed.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(d) if d <= now_ms => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Like `fire`, but re-arms one `period_ms` after the missed deadline so
    /// a periodic schedule keeps its phase. Falls forward to `now_ms` when
    /// more than one period was missed.
    pub fn fire_periodic(&mut self, now_ms: u64, period_ms: u64) -> bool {
        let Some(d) = self.deadline else {
            return false;
        };
        if d > now_ms {
            return false;
        }
        let period = period_ms.max(1);
        let mut next = d.saturating_add(period);
        if next <= now_ms {
            next = now_ms.saturating_add(period);
        }
        self.deadline = Some(next);
        true
    }
}

/// Earliest of several optional deadlines.
pub fn earliest<I: IntoIterator<Item = Option<u64>>>(deadlines: I) -> Option<u64> {
    deadlines.into_iter().flatten().min()
}
