//! The sender state machine.
//!
//! This is a pure state machine: it takes payloads, acknowledgment replies,
//! and the current time, and produces [`SenderAction`]s. The driving loop
//! owns the socket and the input stream and performs the actual I/O, so the
//! machine can be exercised deterministically in tests.

use skiff_core::Seq;
use skiff_flow::{DupAckTracker, WindowController};
use tracing::{debug, trace};

use crate::buffer::TransmitBuffer;
use crate::limits::{
    EOF_BURST, INACTIVITY_TIMEOUT_US, PAYLOAD_BYTES_MAX, RETRANSMIT_INTERVAL_US,
};
use crate::segment::{AckReply, Segment};

/// Output actions from the sender state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    /// Put a segment on the wire.
    Transmit(Segment),
    /// The stream is fully delivered and terminated; the driver can exit.
    Finished,
}

/// Configuration for the sender.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum payload bytes per segment.
    pub payload_bytes_max: usize,

    /// Retransmission interval per congestion-window unit, in microseconds.
    /// An outstanding segment is resent after `interval * cwnd` of silence.
    pub retransmit_interval_us: u64,

    /// Inactivity timeout in microseconds: this long without any ACK
    /// collapses the congestion window.
    pub inactivity_timeout_us: u64,

    /// Number of EOF segments sent at termination.
    pub eof_burst: usize,
}

impl SenderConfig {
    /// Creates a configuration with the protocol defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            payload_bytes_max: PAYLOAD_BYTES_MAX,
            retransmit_interval_us: RETRANSMIT_INTERVAL_US,
            inactivity_timeout_us: INACTIVITY_TIMEOUT_US,
            eof_burst: EOF_BURST,
        }
    }

    /// Sets the inactivity timeout.
    #[must_use]
    pub const fn with_inactivity_timeout_us(mut self, timeout_us: u64) -> Self {
        self.inactivity_timeout_us = timeout_us;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any field is out of range.
    pub fn validate(&self) -> skiff_core::Result<()> {
        if self.payload_bytes_max == 0 || self.payload_bytes_max > PAYLOAD_BYTES_MAX {
            return Err(skiff_core::Error::InvalidArgument {
                name: "payload_bytes_max",
                reason: "must be in 1..=1000",
            });
        }
        if self.retransmit_interval_us == 0 {
            return Err(skiff_core::Error::InvalidArgument {
                name: "retransmit_interval_us",
                reason: "must be positive",
            });
        }
        if self.inactivity_timeout_us < self.retransmit_interval_us {
            return Err(skiff_core::Error::InvalidArgument {
                name: "inactivity_timeout_us",
                reason: "must be >= retransmit_interval_us",
            });
        }
        if self.eof_burst == 0 {
            return Err(skiff_core::Error::InvalidArgument {
                name: "eof_burst",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters surfaced by the CLI at exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Segments transmitted for the first time (including EOFs).
    pub segments_sent: u64,
    /// Timer-driven retransmissions.
    pub retransmits: u64,
    /// Duplicate-ACK-driven retransmissions.
    pub fast_retransmits: u64,
    /// Inactivity timeouts (window collapses).
    pub timeouts: u64,
    /// Acknowledgment replies processed.
    pub acks: u64,
}

/// The transfer sender state machine.
#[derive(Debug)]
pub struct Sender {
    config: SenderConfig,
    window: WindowController,
    dup_acks: DupAckTracker,
    buffer: TransmitBuffer,
    /// Byte offset the next payload will be sent at.
    next_seq: Seq,
    /// Payloads still accepted in the current refill burst. Recharged to
    /// `floor(cwnd)` each time the outstanding set drains.
    refill_budget: usize,
    /// Last time any acknowledgment arrived (the inactivity clock).
    last_ack_us: u64,
    /// The input stream is exhausted; no more payloads will be offered.
    input_done: bool,
    /// The EOF burst went out; the machine is terminal.
    finished: bool,
    stats: SenderStats,
}

impl Sender {
    /// Creates a sender. `now_us` seeds the inactivity clock.
    #[must_use]
    pub fn new(config: SenderConfig, now_us: u64) -> Self {
        let window = WindowController::new();
        let refill_budget = window.window();
        Self {
            config,
            window,
            dup_acks: DupAckTracker::new(),
            buffer: TransmitBuffer::new(),
            next_seq: Seq::ZERO,
            refill_budget,
            last_ack_us: now_us,
            input_done: false,
            finished: false,
            stats: SenderStats::default(),
        }
    }

    /// Returns the current congestion window.
    #[must_use]
    pub fn cwnd(&self) -> f64 {
        self.window.cwnd()
    }

    /// Returns the transfer counters.
    #[must_use]
    pub const fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Returns true once the EOF burst has been emitted.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of payloads the sender can accept right now.
    ///
    /// The window refills only once every outstanding segment has been
    /// acknowledged: draining the outstanding set recharges the budget to
    /// `floor(cwnd)`, and each accepted payload consumes one unit.
    #[must_use]
    pub const fn wanted_payloads(&self) -> usize {
        if self.finished || self.input_done {
            0
        } else {
            self.refill_budget
        }
    }

    /// Accepts one payload, assigns it the next byte offset, and transmits
    /// it.
    pub fn push_payload(&mut self, data: String, now_us: u64) -> Vec<SenderAction> {
        debug_assert!(!self.finished, "payload after termination");
        debug_assert!(!data.is_empty(), "empty payload");
        debug_assert!(
            data.len() <= self.config.payload_bytes_max,
            "payload exceeds {} bytes",
            self.config.payload_bytes_max
        );
        debug_assert!(self.refill_budget > 0, "payload outside the window");
        self.refill_budget -= 1;

        let segment = Segment::data(self.next_seq, data);
        self.next_seq = self.next_seq.advance(segment.data.len());
        trace!(seq = %segment.sequence, bytes = segment.data.len(), "transmitting");
        self.buffer.insert(segment.clone(), now_us);
        self.stats.segments_sent += 1;
        vec![SenderAction::Transmit(segment)]
    }

    /// Signals that the input stream is exhausted. Termination happens as
    /// soon as the outstanding set drains.
    pub fn input_exhausted(&mut self) -> Vec<SenderAction> {
        self.input_done = true;
        if self.buffer.is_empty() && !self.finished {
            self.finish()
        } else {
            Vec::new()
        }
    }

    /// Processes one acknowledgment reply.
    pub fn handle_ack(&mut self, reply: &AckReply, now_us: u64) -> Vec<SenderAction> {
        if self.finished {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.last_ack_us = now_us;
        self.stats.acks += 1;

        // Delivery beyond the receiver's cursor means a hole: count the
        // duplicate and fast-retransmit on the third.
        if reply.ack > reply.expected_seq && self.dup_acks.record(reply.expected_seq) {
            if let Some(segment) = self.buffer.segment(reply.expected_seq).cloned() {
                debug!(seq = %segment.sequence, "fast retransmit");
                self.buffer.mark_sent(segment.sequence, now_us);
                self.window.on_triple_dup_ack();
                self.stats.fast_retransmits += 1;
                actions.push(SenderAction::Transmit(segment));
            }
        }

        if self.buffer.acknowledge(reply.ack).is_some() {
            self.window.on_ack();
            // The hole (if this was one) is filled; stale duplicates must
            // not fire later.
            self.dup_acks.advance(reply.ack);
            trace!(ack = %reply.ack, cwnd = self.window.cwnd(), "acknowledged");
        }

        if self.buffer.is_empty() {
            if self.input_done {
                actions.extend(self.finish());
            } else {
                // The whole window was acknowledged: open the next burst.
                self.refill_budget = self.window.window();
            }
        }
        actions
    }

    /// Runs the timer checks: per-segment retransmission and the global
    /// inactivity timeout.
    pub fn poll(&mut self, now_us: u64) -> Vec<SenderAction> {
        if self.finished {
            return Vec::new();
        }

        let mut actions = Vec::new();

        // An outstanding segment is resent after 0.2 * cwnd seconds.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // cwnd >= 1, bounded.
        let interval_us =
            (self.config.retransmit_interval_us as f64 * self.window.cwnd()) as u64;
        for seq in self.buffer.due_for_retransmit(now_us, interval_us) {
            if let Some(segment) = self.buffer.segment(seq).cloned() {
                debug!(seq = %seq, "retransmit after {interval_us}us");
                self.buffer.mark_sent(seq, now_us);
                self.stats.retransmits += 1;
                actions.push(SenderAction::Transmit(segment));
            }
        }

        if now_us.saturating_sub(self.last_ack_us) >= self.config.inactivity_timeout_us {
            debug!("inactivity timeout, collapsing window");
            self.window.on_timeout();
            self.stats.timeouts += 1;
            self.last_ack_us = now_us;
        }

        actions
    }

    /// Emits the EOF burst and marks the machine terminal.
    fn finish(&mut self) -> Vec<SenderAction> {
        debug_assert!(!self.finished, "double termination");
        debug_assert!(self.buffer.is_empty(), "termination with segments in flight");

        let eof = Segment::end_of_stream(self.next_seq);
        let mut actions = vec![SenderAction::Transmit(eof); self.config.eof_burst];
        self.stats.segments_sent += self.config.eof_burst as u64;
        self.finished = true;
        debug!(seq = %self.next_seq, burst = self.config.eof_burst, "end of stream");
        actions.push(SenderAction::Finished);
        actions
    }
}
