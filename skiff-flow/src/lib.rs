//! Congestion control for the skiff reliable transfer sender.
//!
//! Two small pure components:
//!
//! - [`WindowController`] maintains the congestion window (`cwnd`) and the
//!   slow-start threshold (`ssthresh`), reacting to ACK, duplicate-ACK, and
//!   timeout events.
//! - [`DupAckTracker`] counts duplicate acknowledgments per missing byte
//!   offset and reports when a fast retransmit is due.
//!
//! Neither component performs I/O or reads the clock; the sender feeds them
//! events and consumes their decisions.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod dupack;
mod window;

pub use dupack::{DupAckTracker, DUP_ACK_THRESHOLD};
pub use window::WindowController;
