//! Replica configuration.

use skiff_core::ReplicaId;

use crate::limits::{
    APPEND_ENTRIES_BATCH_MAX, APPEND_RETRY_US, CLUSTER_SIZE_MAX, ELECTION_TIMEOUT_BASE_US,
    HEARTBEAT_INTERVAL_US, PRE_ELECTION_QUEUE_MAX,
};

/// Configuration for one consensus replica.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This replica's id.
    pub id: ReplicaId,

    /// The other replicas in the cluster (excluding this one). Membership is
    /// fixed at startup.
    pub peers: Vec<ReplicaId>,

    /// Base election timeout in microseconds; the timeout is drawn from
    /// `[base, 2 * base]` on every reset.
    pub election_timeout_base_us: u64,

    /// Heartbeat interval in microseconds.
    pub heartbeat_interval_us: u64,

    /// Maximum entries per appendEntries message.
    pub append_batch_max: usize,

    /// Retry interval for an unanswered in-flight appendEntries.
    pub append_retry_us: u64,

    /// Bound on the pre-election client queue.
    pub pre_election_queue_max: usize,

    /// Seed for the election-jitter RNG. Fixed seeds make simulations
    /// deterministic.
    pub seed: u64,
}

impl RaftConfig {
    /// Creates a configuration with the protocol's default timing.
    ///
    /// # Panics
    /// Panics if the id is the reserved broadcast id, appears among the
    /// peers, the peer list has duplicates, or the cluster is too large.
    #[must_use]
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>) -> Self {
        assert!(!id.is_broadcast(), "replica id must not be the broadcast id");
        assert!(!peers.contains(&id), "peer list must not contain this replica");
        assert!(
            !peers.iter().any(ReplicaId::is_broadcast),
            "peer list must not contain the broadcast id"
        );
        let mut deduped = peers.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), peers.len(), "peer list has duplicates");
        assert!(
            peers.len() < CLUSTER_SIZE_MAX,
            "cluster size {} exceeds maximum {}",
            peers.len() + 1,
            CLUSTER_SIZE_MAX
        );

        Self {
            id,
            peers,
            election_timeout_base_us: ELECTION_TIMEOUT_BASE_US,
            heartbeat_interval_us: HEARTBEAT_INTERVAL_US,
            append_batch_max: APPEND_ENTRIES_BATCH_MAX,
            append_retry_us: APPEND_RETRY_US,
            pre_election_queue_max: PRE_ELECTION_QUEUE_MAX,
            seed: 0,
        }
    }

    /// Sets the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets a custom election timeout base (tests use shorter timers).
    #[must_use]
    pub const fn with_election_timeout_base_us(mut self, base_us: u64) -> Self {
        self.election_timeout_base_us = base_us;
        self.heartbeat_interval_us = base_us / 2;
        self
    }

    /// Returns the number of replicas in the cluster, including this one.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Returns the quorum size (strict majority of the cluster).
    #[must_use]
    pub fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any field is inconsistent.
    pub fn validate(&self) -> skiff_core::Result<()> {
        if self.election_timeout_base_us == 0 {
            return Err(skiff_core::Error::InvalidArgument {
                name: "election_timeout_base_us",
                reason: "must be positive",
            });
        }
        if self.heartbeat_interval_us >= self.election_timeout_base_us {
            return Err(skiff_core::Error::InvalidArgument {
                name: "heartbeat_interval_us",
                reason: "must be less than the election timeout base",
            });
        }
        if self.append_batch_max == 0 {
            return Err(skiff_core::Error::InvalidArgument {
                name: "append_batch_max",
                reason: "must be positive",
            });
        }
        if self.pre_election_queue_max == 0 {
            return Err(skiff_core::Error::InvalidArgument {
                name: "pre_election_queue_max",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}
