//! The congestion window controller.
//!
//! Classic additive-increase/multiplicative-decrease in the TCP Reno shape:
//!
//! 1. **Slow start**: below `ssthresh`, every ACK grows `cwnd` by one full
//!    segment (exponential per round trip).
//! 2. **Congestion avoidance**: at or above `ssthresh`, every ACK grows
//!    `cwnd` by `1/cwnd` (roughly one segment per round trip).
//! 3. **Timeout**: `ssthresh` halves (floored at 2) and `cwnd` collapses
//!    to 1.
//! 4. **Fast recovery**: on a third duplicate ACK, `ssthresh` halves the
//!    same way but `cwnd` restarts at `ssthresh` instead of 1: a single
//!    lost segment signals a hole, not a dead path.

use tracing::debug;

/// Initial congestion window, in segments.
const CWND_INIT: f64 = 1.0;

/// Initial slow-start threshold, in segments. Large enough that the first
/// round trips probe exponentially until loss reveals the real capacity.
const SSTHRESH_INIT: f64 = 64.0;

/// `cwnd` never drops below one segment.
const CWND_FLOOR: f64 = 1.0;

/// `ssthresh` never drops below two segments.
const SSTHRESH_FLOOR: f64 = 2.0;

/// Congestion window state for the transfer sender.
#[derive(Debug, Clone)]
pub struct WindowController {
    /// Current congestion window, in segments. Fractional growth during
    /// congestion avoidance is tracked here; the usable window is the floor.
    cwnd: f64,
    /// Slow-start threshold, in segments.
    ssthresh: f64,
}

impl WindowController {
    /// Creates a controller at the initial window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cwnd: CWND_INIT,
            ssthresh: SSTHRESH_INIT,
        }
    }

    /// Returns the current congestion window.
    #[must_use]
    pub const fn cwnd(&self) -> f64 {
        self.cwnd
    }

    /// Returns the current slow-start threshold.
    #[must_use]
    pub const fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    /// Returns the usable window in whole segments.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // cwnd >= 1, bounded.
    pub fn window(&self) -> usize {
        self.cwnd.floor() as usize
    }

    /// Returns true while the window is still probing exponentially.
    #[must_use]
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// A new acknowledgment arrived: grow the window.
    pub fn on_ack(&mut self) {
        if self.in_slow_start() {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
        debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "window grew");
        self.assert_invariants();
    }

    /// The retransmission/inactivity timer fired: collapse the window.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(SSTHRESH_FLOOR);
        self.cwnd = CWND_FLOOR;
        debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "timeout collapse");
        self.assert_invariants();
    }

    /// A third duplicate ACK arrived: halve, but stay at the threshold.
    pub fn on_triple_dup_ack(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(SSTHRESH_FLOOR);
        self.cwnd = self.ssthresh.max(CWND_FLOOR);
        debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "fast recovery");
        self.assert_invariants();
    }

    fn assert_invariants(&self) {
        debug_assert!(self.cwnd >= CWND_FLOOR, "cwnd below floor");
        debug_assert!(self.ssthresh >= SSTHRESH_FLOOR, "ssthresh below floor");
    }
}

impl Default for WindowController {
    fn default() -> Self {
        Self::new()
    }
}
