//! The two endpoint types the drivers multiplex.
//!
//! - [`DatagramEndpoint`]: a connected UDP socket carrying one JSON segment
//!   per datagram, with a bounded reply poll.
//! - [`ReplicaEndpoint`]: a unix-domain stream connection to the socket the
//!   deployment binds at the replica's own id, carrying newline-delimited
//!   JSON envelopes. A background task reads lines into a channel so the
//!   main loop's bounded poll is cancel-safe.
//!
//! Both drop malformed traffic at the boundary: a corrupt datagram or an
//! undecodable line is logged and forgotten, never fatal.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UdpSocket, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use skiff_core::ReplicaId;
use skiff_raft::Envelope;
use skiff_transfer::limits::DATAGRAM_BYTES_MAX;
use skiff_transfer::{AckReply, CodecError, Segment};

use crate::framing;

/// Depth of the incoming-envelope channel between the reader task and the
/// replica loop.
const INCOMING_CHANNEL_DEPTH: usize = 256;

/// Endpoint errors.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// Failed to reach the given address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The address we tried.
        addr: String,
        /// The underlying error.
        source: io::Error,
    },

    /// The stream endpoint hung up.
    #[error("endpoint closed")]
    Closed,

    /// A local encoding failure (oversize segment).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for endpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// A connected datagram socket speaking the transfer wire format.
pub struct DatagramEndpoint {
    socket: UdpSocket,
}

impl DatagramEndpoint {
    /// Binds an ephemeral local port and connects it to `target`
    /// (`HOST:PORT`).
    ///
    /// # Errors
    /// Returns an error if the bind or connect fails.
    pub async fn connect(target: &str) -> EndpointResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|source| {
            EndpointError::Connect {
                addr: "0.0.0.0:0".to_owned(),
                source,
            }
        })?;
        socket
            .connect(target)
            .await
            .map_err(|source| EndpointError::Connect {
                addr: target.to_owned(),
                source,
            })?;
        Ok(Self { socket })
    }

    /// Sends one segment as a single datagram. A short send is logged and
    /// left to the retransmission machinery.
    ///
    /// # Errors
    /// Returns an error if encoding fails or the socket rejects the send.
    pub async fn send_segment(&self, segment: &Segment) -> EndpointResult<()> {
        let datagram = segment.encode()?;
        let sent = self.socket.send(datagram.as_bytes()).await?;
        if sent < datagram.len() {
            warn!(sent, expected = datagram.len(), "short datagram send");
        }
        Ok(())
    }

    /// Waits up to `wait` for one acknowledgment reply. Timeouts, transient
    /// socket errors, and undecodable datagrams all yield `None`.
    pub async fn poll_reply(&self, wait: Duration) -> Option<AckReply> {
        let mut buf = [0_u8; DATAGRAM_BYTES_MAX];
        let received = match tokio::time::timeout(wait, self.socket.recv(&mut buf)).await {
            Err(_elapsed) => return None,
            Ok(Err(error)) => {
                // Connected UDP surfaces ICMP failures here; the
                // retransmission timers cover the gap.
                debug!(%error, "datagram receive failed");
                return None;
            }
            Ok(Ok(received)) => received,
        };

        let Ok(text) = std::str::from_utf8(&buf[..received]) else {
            debug!("dropping non-UTF-8 datagram");
            return None;
        };
        match AckReply::decode(text) {
            Ok(reply) => Some(reply),
            Err(error) => {
                debug!(%error, "dropping undecodable reply");
                None
            }
        }
    }
}

/// The replica's connection to its unix-domain endpoint.
pub struct ReplicaEndpoint {
    incoming: mpsc::Receiver<Envelope>,
    writer: OwnedWriteHalf,
}

impl ReplicaEndpoint {
    /// Connects to the stream socket bound at this replica's id and spawns
    /// the reader task.
    ///
    /// # Errors
    /// Returns an error if the connect fails.
    pub async fn connect(id: &ReplicaId) -> EndpointResult<Self> {
        let stream = UnixStream::connect(id.as_str()).await.map_err(|source| {
            EndpointError::Connect {
                addr: id.as_str().to_owned(),
                source,
            }
        })?;
        let (read_half, writer) = stream.into_split();

        let (tx, incoming) = mpsc::channel(INCOMING_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            loop {
                match framing::read_json::<_, Envelope>(&mut reader).await {
                    Ok(Some(envelope)) => {
                        if tx.send(envelope).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!("endpoint closed by peer");
                        return;
                    }
                    Err(error) => {
                        warn!(%error, "endpoint read failed");
                        return;
                    }
                }
            }
        });

        Ok(Self { incoming, writer })
    }

    /// Waits up to `wait` for the next envelope. `Ok(None)` means nothing
    /// arrived within the poll window.
    ///
    /// # Errors
    /// Returns [`EndpointError::Closed`] once the endpoint hangs up and the
    /// channel drains.
    pub async fn recv(&mut self, wait: Duration) -> EndpointResult<Option<Envelope>> {
        match tokio::time::timeout(wait, self.incoming.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(EndpointError::Closed),
        }
    }

    /// Writes one envelope as a JSON line.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn send(&mut self, envelope: &Envelope) -> EndpointResult<()> {
        framing::write_json(&mut self.writer, envelope).await?;
        Ok(())
    }
}
