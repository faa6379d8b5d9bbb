//! The consensus replica's event loop.

use std::time::Instant;

use tracing::info;

use skiff_raft::Replica;

use crate::endpoint::{EndpointError, EndpointResult, ReplicaEndpoint};
use crate::POLL_INTERVAL;

/// Drives the replica until the endpoint closes or the process is
/// interrupted.
///
/// One cooperative cycle: apply/timers via `tick`, one bounded endpoint
/// poll, dispatch whatever the state machine produced.
///
/// # Errors
/// Returns an error if the endpoint fails; a clean hang-up or ctrl-c exits
/// with `Ok`.
pub async fn run_replica(
    mut replica: Replica,
    mut endpoint: ReplicaEndpoint,
) -> EndpointResult<()> {
    let started = Instant::now();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let out = replica.tick(now_us(started));
        for envelope in out {
            endpoint.send(&envelope).await?;
        }

        tokio::select! {
            _ = &mut shutdown => {
                info!(id = %replica.id(), "interrupted, shutting down");
                return Ok(());
            }
            received = endpoint.recv(POLL_INTERVAL) => match received {
                Ok(Some(envelope)) => {
                    let out = replica.handle_message(envelope, now_us(started));
                    for envelope in out {
                        endpoint.send(&envelope).await?;
                    }
                }
                Ok(None) => {}
                Err(EndpointError::Closed) => {
                    info!(id = %replica.id(), "endpoint closed, shutting down");
                    return Ok(());
                }
                Err(error) => return Err(error),
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation)] // Microseconds since start fit u64 for centuries.
fn now_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
