//! The transfer sender's event loop.

use std::time::Instant;

use tokio::io::AsyncRead;
use tracing::info;

use skiff_transfer::limits::PAYLOAD_BYTES_MAX;
use skiff_transfer::{Sender, SenderAction, SenderStats};

use crate::endpoint::{DatagramEndpoint, EndpointResult};
use crate::input::ChunkedReader;
use crate::POLL_INTERVAL;

/// Drives the sender until the stream is delivered and terminated.
///
/// One cooperative cycle: run the timers, top up the window from the input,
/// poll the endpoint briefly for one acknowledgment, repeat.
///
/// # Errors
/// Returns an error on endpoint failure or non-UTF-8 input.
pub async fn run_sender<R>(
    mut sender: Sender,
    endpoint: DatagramEndpoint,
    input: R,
) -> EndpointResult<SenderStats>
where
    R: AsyncRead + Unpin,
{
    let started = Instant::now();
    let mut chunks = ChunkedReader::new(input, PAYLOAD_BYTES_MAX);

    loop {
        let actions = sender.poll(now_us(started));
        dispatch(&endpoint, actions).await?;

        while sender.wanted_payloads() > 0 {
            match chunks.next_chunk().await? {
                Some(chunk) => {
                    let actions = sender.push_payload(chunk, now_us(started));
                    dispatch(&endpoint, actions).await?;
                }
                None => {
                    let actions = sender.input_exhausted();
                    dispatch(&endpoint, actions).await?;
                    break;
                }
            }
        }

        if sender.is_finished() {
            let stats = sender.stats();
            info!(
                segments = stats.segments_sent,
                retransmits = stats.retransmits,
                fast_retransmits = stats.fast_retransmits,
                timeouts = stats.timeouts,
                "transfer complete"
            );
            return Ok(stats);
        }

        if let Some(reply) = endpoint.poll_reply(POLL_INTERVAL).await {
            let actions = sender.handle_ack(&reply, now_us(started));
            dispatch(&endpoint, actions).await?;
        }
    }
}

/// Transmits the actions the state machine produced.
async fn dispatch(endpoint: &DatagramEndpoint, actions: Vec<SenderAction>) -> EndpointResult<()> {
    for action in actions {
        match action {
            SenderAction::Transmit(segment) => endpoint.send_segment(&segment).await?,
            SenderAction::Finished => {}
        }
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // Microseconds since start fit u64 for centuries.
fn now_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
