//! Growth-light collaborator. Measurements pause the lights so stray light
//! does not reach the photodiode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub trait LightsControl {
    fn pause(&mut self);
    fn resume(&mut self);
}

/// Records the paused state; clones share it, so a caller can hand one to
/// the instrument and keep another to observe.
#[derive(Debug, Clone, Default)]
pub struct LightsLatch {
    paused: Arc<AtomicBool>,
    pauses: Arc<AtomicU32>,
}

impl LightsLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Number of times the lights were paused.
    pub fn pauses(&self) -> u32 {
        self.pauses.load(Ordering::Relaxed)
    }
}

impl LightsControl for LightsLatch {
    fn pause(&mut self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            self.pauses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("lights paused");
        }
    }

    fn resume(&mut self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            tracing::debug!("lights resumed");
        }
    }
}

impl<L: LightsControl + ?Sized> LightsControl for Box<L> {
    fn pause(&mut self) {
        (**self).pause();
    }

    fn resume(&mut self) {
        (**self).resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let observer = LightsLatch::new();
        let mut lights = observer.clone();
        lights.pause();
        lights.pause();
        assert!(observer.is_paused());
        assert_eq!(observer.pauses(), 1);
        lights.resume();
        assert!(!observer.is_paused());
    }
}
