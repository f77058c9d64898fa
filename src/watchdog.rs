//! Connection watchdog (§4.3).
//!
//! A `Watchdog` does not own a clock; the caller supplies the current
//! timestamp on every check, mirroring the teacher's `execute_watchdog`
//! counter in `i2c::nonblocking` except driven by a monotonic timestamp
//! instead of a per-poll decrement, since the master/slave tick interval
//! here is not fixed the way a peripheral's ISR rate is.

use fugit::MillisDurationU32;

/// Counts down against a caller-supplied monotonic millisecond clock.
/// Expiry is a level, not an edge: `expired` stays true on every check
/// after the deadline until `arm` or `disarm` is called again.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    deadline_ms: u32,
    timeout: MillisDurationU32,
    running: bool,
}

impl Watchdog {
    /// A disarmed watchdog that never expires until `arm` is called.
    pub const fn new(timeout: MillisDurationU32) -> Self {
        Watchdog {
            deadline_ms: 0,
            timeout,
            running: false,
        }
    }

    /// Replace the configured timeout. Does not implicitly (re)start it.
    pub fn set_timeout(&mut self, timeout: MillisDurationU32) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> MillisDurationU32 {
        self.timeout
    }

    /// Start (or restart) the countdown from `now_ms`.
    pub fn arm(&mut self, now_ms: u32) {
        self.deadline_ms = now_ms.wrapping_add(self.timeout.to_millis());
        self.running = true;
    }

    pub fn disarm(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Milliseconds remaining before expiry, saturating at zero. `None`
    /// if the watchdog isn't running.
    pub fn remaining_ms(&self, now_ms: u32) -> Option<u32> {
        if !self.running {
            return None;
        }
        let diff = self.deadline_ms.wrapping_sub(now_ms) as i32;
        Some(if diff > 0 { diff as u32 } else { 0 })
    }

    /// Whether the deadline has passed as of `now_ms`. A disarmed
    /// watchdog never expires. Comparison tolerates `u32` wraparound by
    /// treating the difference as signed, so it stays correct across a
    /// clock rollover as long as `now_ms` never jumps by more than
    /// `i32::MAX`.
    pub fn expired(&self, now_ms: u32) -> bool {
        self.running && (now_ms.wrapping_sub(self.deadline_ms) as i32) >= 0
    }
}
