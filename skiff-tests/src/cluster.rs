//! An in-memory cluster: replicas, a message router, and a virtual clock.
//!
//! Messages are delivered instantly within a step unless a partition blocks
//! the pair. Anything addressed outside the replica id space lands in the
//! client inbox for assertions.

use std::collections::{BTreeMap, HashSet, VecDeque};

use skiff_core::ReplicaId;
use skiff_raft::{Body, Envelope, RaftConfig, Replica};

/// A deterministic in-memory cluster of consensus replicas.
pub struct Cluster {
    replicas: BTreeMap<ReplicaId, Replica>,
    now_us: u64,
    /// Unordered pairs that cannot exchange messages.
    blocked: HashSet<(ReplicaId, ReplicaId)>,
    /// Replies delivered to ids outside the replica space.
    pub client_inbox: Vec<Envelope>,
}

impl Cluster {
    /// Creates a cluster of `size` replicas with ids `0000`, `0001`, ...
    /// Each replica gets a distinct fixed seed, so runs are deterministic.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let ids: Vec<ReplicaId> = (0..size).map(|i| ReplicaId::new(format!("{i:04X}"))).collect();
        let replicas = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let peers = ids.iter().filter(|peer| *peer != id).cloned().collect();
                let config = RaftConfig::new(id.clone(), peers)
                    .with_seed(0xC0FF_EE00 + u64::try_from(i).expect("small cluster"));
                (id.clone(), Replica::new(config, 0))
            })
            .collect();

        Self {
            replicas,
            now_us: 0,
            blocked: HashSet::new(),
            client_inbox: Vec::new(),
        }
    }

    /// Returns the virtual time.
    #[must_use]
    pub const fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Returns the replica with the given id.
    ///
    /// # Panics
    /// Panics if the id is unknown.
    #[must_use]
    pub fn replica(&self, id: &ReplicaId) -> &Replica {
        &self.replicas[id]
    }

    /// Returns the ids of replicas that currently believe they lead.
    #[must_use]
    pub fn leaders(&self) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|replica| replica.is_leader())
            .map(|replica| replica.id().clone())
            .collect()
    }

    /// Blocks message exchange between two replicas.
    pub fn partition(&mut self, a: &ReplicaId, b: &ReplicaId) {
        self.blocked.insert(Self::pair(a, b));
    }

    /// Removes all partitions.
    pub fn heal(&mut self) {
        self.blocked.clear();
    }

    /// Injects a client request addressed to one replica.
    pub fn client_send(&mut self, client: &str, to: &ReplicaId, body: Body) {
        let envelope = Envelope::new(
            ReplicaId::new(client),
            to.clone(),
            ReplicaId::broadcast(),
            body,
        );
        self.deliver(envelope);
    }

    /// Advances the clock by `dt_us` and runs one cooperative pass: every
    /// replica ticks, and all resulting traffic is delivered to quiescence.
    pub fn step(&mut self, dt_us: u64) {
        self.now_us += dt_us;

        let ids: Vec<ReplicaId> = self.replicas.keys().cloned().collect();
        let mut queue: VecDeque<Envelope> = VecDeque::new();
        for id in &ids {
            let out = self
                .replicas
                .get_mut(id)
                .expect("known replica")
                .tick(self.now_us);
            queue.extend(out);
        }

        while let Some(envelope) = queue.pop_front() {
            queue.extend(self.route(envelope));
        }
    }

    /// Runs `steps` passes of `dt_us` each.
    pub fn run(&mut self, steps: usize, dt_us: u64) {
        for _ in 0..steps {
            self.step(dt_us);
        }
    }

    /// Runs until `predicate` holds, up to `max_steps` passes.
    pub fn run_until(
        &mut self,
        max_steps: usize,
        dt_us: u64,
        mut predicate: impl FnMut(&Self) -> bool,
    ) -> bool {
        for _ in 0..max_steps {
            if predicate(self) {
                return true;
            }
            self.step(dt_us);
        }
        predicate(self)
    }

    /// Delivers one envelope immediately, draining any traffic it causes.
    fn deliver(&mut self, envelope: Envelope) {
        let mut queue: VecDeque<Envelope> = self.route(envelope).into();
        while let Some(next) = queue.pop_front() {
            queue.extend(self.route(next));
        }
    }

    /// Routes one envelope to its destination(s), honoring partitions.
    /// Returns whatever the recipients produced.
    fn route(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let mut produced = Vec::new();

        if envelope.dst.is_broadcast() {
            let ids: Vec<ReplicaId> = self.replicas.keys().cloned().collect();
            for id in ids {
                if id == envelope.src || self.is_blocked(&envelope.src, &id) {
                    continue;
                }
                let mut copy = envelope.clone();
                copy.dst = id.clone();
                let out = self
                    .replicas
                    .get_mut(&id)
                    .expect("known replica")
                    .handle_message(copy, self.now_us);
                produced.extend(out);
            }
            return produced;
        }

        if self.replicas.contains_key(&envelope.dst) {
            if self.is_blocked(&envelope.src, &envelope.dst) {
                return produced;
            }
            let dst = envelope.dst.clone();
            let out = self
                .replicas
                .get_mut(&dst)
                .expect("known replica")
                .handle_message(envelope, self.now_us);
            produced.extend(out);
            return produced;
        }

        // Not a replica: it is a client reply.
        self.client_inbox.push(envelope);
        produced
    }

    fn is_blocked(&self, a: &ReplicaId, b: &ReplicaId) -> bool {
        if self.replicas.contains_key(a) && self.replicas.contains_key(b) {
            self.blocked.contains(&Self::pair(a, b))
        } else {
            // Clients are never partitioned from replicas.
            false
        }
    }

    fn pair(a: &ReplicaId, b: &ReplicaId) -> (ReplicaId, ReplicaId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}
