//! Reliable transfer sender binary.
//!
//! Reads the payload from standard input, delivers it to the receiver at
//! `HOST:PORT` over the datagram channel, and exits 0 once the stream is
//! acknowledged and terminated. Diagnostics go to standard error.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use clap::Parser;
use tracing::{info, Level};

use skiff_runtime::{run_sender, DatagramEndpoint};
use skiff_transfer::{Sender, SenderConfig};

/// Reliable datagram transfer sender.
#[derive(Parser, Debug)]
#[command(name = "send")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Receiver address as HOST:PORT.
    target: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = SenderConfig::new();
    config.validate()?;

    info!(receiver = %args.target, "starting transfer");
    let endpoint = DatagramEndpoint::connect(&args.target).await?;
    let sender = Sender::new(config, 0);
    run_sender(sender, endpoint, tokio::io::stdin()).await?;

    Ok(())
}
