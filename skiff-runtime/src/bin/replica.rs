//! Consensus replica binary.
//!
//! `replica <my-id> <peer-id>...` joins the fixed cluster by connecting to
//! the unix-domain socket the deployment binds at this replica's id, then
//! runs the consensus loop until interrupted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use clap::Parser;
use tracing::{info, Level};

use skiff_core::ReplicaId;
use skiff_raft::{RaftConfig, Replica};
use skiff_runtime::{run_replica, ReplicaEndpoint};

/// Replicated key/value consensus replica.
#[derive(Parser, Debug)]
#[command(name = "replica")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// This replica's id.
    id: String,

    /// Ids of the other replicas in the cluster.
    peers: Vec<String>,

    /// Seed for the election-jitter RNG; defaults to entropy.
    #[arg(long)]
    seed: Option<u64>,

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

    let id = ReplicaId::new(args.id);
    let peers = args.peers.into_iter().map(ReplicaId::new).collect();
    let config = RaftConfig::new(id.clone(), peers)
        .with_seed(args.seed.unwrap_or_else(rand::random));
    config.validate()?;

    info!(id = %id, cluster = config.cluster_size(), "starting replica");
    let endpoint = ReplicaEndpoint::connect(&id).await?;
    let replica = Replica::new(config, 0);
    run_replica(replica, endpoint).await?;

    Ok(())
}
