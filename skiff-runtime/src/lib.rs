//! Tokio drivers for the skiff protocol cores.
//!
//! The state machines in [`skiff_transfer`] and [`skiff_raft`] perform no
//! I/O; this crate owns the sockets and clocks and drives them:
//!
//! - [`run_sender`] pumps the transfer sender against a connected datagram
//!   endpoint and a chunked input stream.
//! - [`run_replica`] pumps the consensus replica against the unix-domain
//!   endpoint the deployment binds to the replica's id.
//!
//! Both loops are single-threaded and cooperative: one bounded poll on the
//! endpoint, then timer work, then back around.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod endpoint;
mod framing;
mod input;
mod replica_loop;
mod sender_loop;

pub use endpoint::{DatagramEndpoint, EndpointError, EndpointResult, ReplicaEndpoint};
pub use input::ChunkedReader;
pub use replica_loop::run_replica;
pub use sender_loop::run_sender;

use std::time::Duration;

/// Bounded endpoint poll: timers run at least this often.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
