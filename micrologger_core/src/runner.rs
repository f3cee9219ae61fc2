//! Cooperative scheduler loop: sleep until the earliest component deadline,
//! poll, repeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::instrument::MicroLogger;
use crate::optical_density::OdStatus;

/// Longest single sleep, so a stop request is noticed promptly even when no
/// component is due.
const MAX_SLEEP_MS: u64 = 250;

/// Polls in a row that may leave the clock unchanged before the loop yields
/// for a millisecond.
const SPIN_LIMIT: u32 = 1_000;

/// Run until `until_ms`, the stop flag, or `done` says to stop. Returns the
/// time of the last poll.
fn drive<F>(logger: &mut MicroLogger, until_ms: u64, stop: &AtomicBool, mut done: F) -> u64
where
    F: FnMut(&MicroLogger) -> bool,
{
    let mut spins = 0u32;
    let mut last = logger.now_ms();
    loop {
        let now = logger.poll();
        if now >= until_ms || stop.load(Ordering::Relaxed) || done(logger) {
            return now;
        }

        if now == last {
            spins += 1;
        } else {
            spins = 0;
            last = now;
        }

        let next = logger
            .next_deadline()
            .unwrap_or(until_ms)
            .min(until_ms)
            .min(now.saturating_add(MAX_SLEEP_MS));
        if next > now {
            logger.clock().sleep(Duration::from_millis(next - now));
        } else if spins >= SPIN_LIMIT {
            tracing::trace!(now, "scheduler yielding");
            logger.clock().sleep(Duration::from_millis(1));
            spins = 0;
        }
    }
}

/// Run the instrument until `until_ms` (instrument time) or until `stop` is
/// raised.
pub fn run_until(logger: &mut MicroLogger, until_ms: u64, stop: &AtomicBool) -> u64 {
    tracing::debug!(until_ms, "scheduler start");
    let end = drive(logger, until_ms, stop, |_| false);
    tracing::debug!(end, "scheduler stop");
    end
}

/// Run until the optical density pipeline has no sequence in flight, for at
/// most `timeout_ms`. Returns whether it went idle.
pub fn run_until_idle(logger: &mut MicroLogger, timeout_ms: u64, stop: &AtomicBool) -> bool {
    let until = logger.now_ms().saturating_add(timeout_ms);
    drive(logger, until, stop, |l| {
        l.optical_density().status() == OdStatus::Idle
    });
    logger.optical_density().status() == OdStatus::Idle
}
