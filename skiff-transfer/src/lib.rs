//! Reliable transfer sender core.
//!
//! Delivers a byte stream over an unreliable datagram channel: segments are
//! checksummed JSON text objects, the outstanding set is bounded by a
//! congestion window ([`skiff_flow`]), losses are repaired by per-segment
//! retransmission timers and by fast retransmit on duplicate ACKs, and the
//! stream ends with a burst of EOF segments.
//!
//! The [`Sender`] performs no I/O: the driver feeds it payloads, replies,
//! and the current time, and transmits the [`SenderAction`]s it returns.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod buffer;
mod segment;
mod sender;

pub use buffer::TransmitBuffer;
pub use segment::{AckReply, CodecError, CodecResult, Segment};
pub use sender::{Sender, SenderAction, SenderConfig, SenderStats};

/// Hard limits of the transfer protocol.
pub mod limits {
    /// Maximum payload bytes per segment.
    pub const PAYLOAD_BYTES_MAX: usize = 1000;

    /// Maximum encoded datagram size in bytes.
    pub const DATAGRAM_BYTES_MAX: usize = 1500;

    /// Number of EOF segments sent back-to-back at termination. The burst
    /// mitigates loss of the final datagram; the receiver is idempotent on
    /// EOF.
    pub const EOF_BURST: usize = 5;

    /// Retransmission interval per congestion-window unit, in microseconds.
    /// An outstanding segment is resent after `0.2 * cwnd` seconds of
    /// silence.
    pub const RETRANSMIT_INTERVAL_US: u64 = 200_000;

    /// Global inactivity timeout, in microseconds. One second without any
    /// acknowledgment collapses the congestion window.
    pub const INACTIVITY_TIMEOUT_US: u64 = 1_000_000;
}
