//! Bookkeeping for the status LED heartbeat.
//!
//! The indicator is a liveness signal only; it has no coupling to the data path. The firmware
//! polls [`Heartbeat`] with the current time and mirrors the reported phase onto the LED, if the
//! board has one. Boards without an indicator simply never poll.

use embassy_time::{Duration, Instant};

/// How long each heartbeat phase lasts.
pub const TOGGLE_PERIOD: Duration = Duration::from_micros(1_000_000);

/// Tracks the last toggle time and the current indicator phase.
#[derive(Debug)]
pub struct Heartbeat {
    last_toggle: Instant,
    lit: bool,
}

impl Heartbeat {
    /// Create a heartbeat whose first period starts at `now`, with the indicator dark.
    pub fn new(now: Instant) -> Self {
        Self {
            last_toggle: now,
            lit: false,
        }
    }

    /// Current indicator phase.
    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// Flip the phase if a full period has elapsed since the last toggle.
    ///
    /// Returns the new phase when a toggle occurred, `None` otherwise. Toggles happen at most once
    /// per [`TOGGLE_PERIOD`], however often this is polled. `now` must not move backwards.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        if now.duration_since(self.last_toggle) > TOGGLE_PERIOD {
            self.lit = !self.lit;
            self.last_toggle = now;
            Some(self.lit)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(micros: u64) -> Instant {
        Instant::from_micros(micros)
    }

    #[test]
    fn does_not_toggle_within_a_period() {
        let mut heartbeat = Heartbeat::new(at(0));
        assert_eq!(None, heartbeat.poll(at(1)), "Expected left but got right");
        assert_eq!(
            None,
            heartbeat.poll(at(1_000_000)),
            "A period must fully elapse before the phase flips"
        );
    }

    #[test]
    fn toggles_once_after_a_period() {
        let mut heartbeat = Heartbeat::new(at(0));
        assert_eq!(
            Some(true),
            heartbeat.poll(at(1_000_001)),
            "Expected left but got right"
        );
        assert_eq!(
            None,
            heartbeat.poll(at(1_500_000)),
            "At most one toggle per period window"
        );
    }

    #[test]
    fn phase_alternates() {
        let mut heartbeat = Heartbeat::new(at(0));
        assert!(!heartbeat.is_lit(), "The indicator starts dark");
        assert_eq!(Some(true), heartbeat.poll(at(1_100_000)), "Expected left but got right");
        assert_eq!(Some(false), heartbeat.poll(at(2_200_000)), "Expected left but got right");
        assert_eq!(Some(true), heartbeat.poll(at(3_300_000)), "Expected left but got right");
    }
}
