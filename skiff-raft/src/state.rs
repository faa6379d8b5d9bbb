//! The replica state machine.
//!
//! One [`Replica`] is driven by a single cooperative loop: the driver feeds
//! it incoming envelopes via [`Replica::handle_message`] and advances its
//! timers via [`Replica::tick`]; both return the envelopes to transmit. The
//! replica performs no I/O and reads no clocks, which makes multi-replica
//! simulations deterministic.
//!
//! Role is implicit: the replica is leader when its leader field names
//! itself, a candidate while it holds a non-empty vote tally, and a follower
//! otherwise.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skiff_core::{LogIndex, ReplicaId, Term};
use tracing::{debug, info, warn};

use crate::config::RaftConfig;
use crate::log::{LogEntry, RaftLog};
use crate::message::{Body, Envelope};
use crate::store::KvStore;

/// An appendEntries RPC the leader is waiting on.
#[derive(Debug, Clone, Copy)]
struct Inflight {
    /// Number of entries carried by the RPC.
    entries_sent: usize,
    /// When it was sent.
    sent_at_us: u64,
}

/// Per-follower replication state, held only while leader.
#[derive(Debug, Clone)]
struct Progress {
    /// Index of the next entry to send to this follower.
    next_index: LogIndex,
    /// Highest index known replicated on this follower.
    match_index: LogIndex,
    /// The outstanding RPC, if any.
    inflight: Option<Inflight>,
}

/// One consensus replica: term state, replicated log, key/value store, and
/// the election, replication, and client subsystems.
#[derive(Debug)]
pub struct Replica {
    config: RaftConfig,
    term: Term,
    voted_for: Option<ReplicaId>,
    log: RaftLog,
    store: KvStore,
    commit_index: LogIndex,
    last_applied: LogIndex,
    /// The current leader; the broadcast id while unknown.
    leader: ReplicaId,
    /// Vote tally while campaigning; empty otherwise.
    votes: HashMap<ReplicaId, bool>,
    /// Per-peer replication state; populated only while leader.
    progress: HashMap<ReplicaId, Progress>,
    /// Client requests buffered while no leader is known.
    pending: VecDeque<Envelope>,
    /// Deadline for starting the next election.
    election_deadline_us: u64,
    /// When the last heartbeat was broadcast.
    heartbeat_sent_us: u64,
    rng: StdRng,
}

impl Replica {
    /// Creates a replica as a leaderless follower. `now_us` seeds the
    /// election timer.
    #[must_use]
    pub fn new(config: RaftConfig, now_us: u64) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let mut replica = Self {
            config,
            term: Term::ZERO,
            voted_for: None,
            log: RaftLog::new(),
            store: KvStore::new(),
            commit_index: LogIndex::NONE,
            last_applied: LogIndex::NONE,
            leader: ReplicaId::broadcast(),
            votes: HashMap::new(),
            progress: HashMap::new(),
            pending: VecDeque::new(),
            election_deadline_us: 0,
            heartbeat_sent_us: 0,
            rng,
        };
        replica.reset_election_timer(now_us);
        replica
    }

    /// Returns this replica's id.
    #[must_use]
    pub const fn id(&self) -> &ReplicaId {
        &self.config.id
    }

    /// Returns the current term.
    #[must_use]
    pub const fn term(&self) -> Term {
        self.term
    }

    /// Returns the current leader, the broadcast id while unknown.
    #[must_use]
    pub const fn leader(&self) -> &ReplicaId {
        &self.leader
    }

    /// Returns true if this replica believes it is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.leader == self.config.id
    }

    /// Returns the commit index.
    #[must_use]
    pub const fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    /// Returns the last applied index.
    #[must_use]
    pub const fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    /// Returns the replicated log.
    #[must_use]
    pub const fn log(&self) -> &RaftLog {
        &self.log
    }

    /// Returns the applied key/value state.
    #[must_use]
    pub const fn store(&self) -> &KvStore {
        &self.store
    }

    /// Processes one incoming envelope.
    pub fn handle_message(&mut self, envelope: Envelope, now_us: u64) -> Vec<Envelope> {
        if envelope.dst != self.config.id && !envelope.dst.is_broadcast() {
            debug!(dst = %envelope.dst, "dropping message for another replica");
            return Vec::new();
        }

        let src = envelope.src.clone();
        match envelope.body.clone() {
            Body::Get { .. } | Body::Put { .. } => self.handle_client_request(envelope, now_us),
            Body::RequestVote {
                term,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(&src, term, last_log_index, last_log_term, now_us),
            Body::Vote { term, vote } => self.handle_vote(&src, term, vote, now_us),
            Body::AppendEntries {
                term,
                entries,
                leader_commit,
                prev_log_term,
                prev_log_index,
            } => self.handle_append_entries(
                &src,
                term,
                entries,
                leader_commit,
                prev_log_term,
                prev_log_index,
                now_us,
            ),
            Body::AppendEntriesReply { term, success } => {
                self.handle_append_entries_reply(&src, term, success, now_us)
            }
            Body::Ok { .. } | Body::Fail { .. } | Body::Redirect { .. } => {
                // Client replies are not addressed to replicas.
                debug!(src = %src, "ignoring client-facing reply");
                Vec::new()
            }
        }
    }

    /// Advances the replica's timers: applies committed entries, performs
    /// leader duties (heartbeat, follower catch-up, commit advancement), or
    /// starts an election when the timer expires.
    pub fn tick(&mut self, now_us: u64) -> Vec<Envelope> {
        let mut out = self.apply_committed();

        if self.is_leader() {
            if now_us.saturating_sub(self.heartbeat_sent_us) >= self.config.heartbeat_interval_us
            {
                out.push(self.heartbeat(now_us));
            }
            out.extend(self.update_followers(now_us));
            self.update_commit_index();
        } else if now_us >= self.election_deadline_us {
            out.extend(self.start_election(now_us));
        }

        self.assert_invariants();
        out
    }

    // ------------------------------------------------------------------
    // Election subsystem
    // ------------------------------------------------------------------

    /// Begins a new candidacy: bump the term, vote for self, solicit votes.
    fn start_election(&mut self, now_us: u64) -> Vec<Envelope> {
        self.leader = ReplicaId::broadcast();
        self.votes.clear();
        self.progress.clear();
        self.term = self.term.next();
        self.voted_for = Some(self.config.id.clone());
        self.votes.insert(self.config.id.clone(), true);
        self.reset_election_timer(now_us);
        info!(term = %self.term, "election timeout, starting election");

        let mut out = vec![self.message(
            ReplicaId::broadcast(),
            Body::RequestVote {
                term: self.term,
                last_log_index: self.log.last_index(),
                last_log_term: self.log.last_term(),
            },
        )];

        // A single-replica cluster is its own quorum.
        if self.granted_votes() >= self.config.quorum_size() {
            out.extend(self.become_leader(now_us));
        }
        out
    }

    /// Handles a vote solicitation.
    fn handle_request_vote(
        &mut self,
        candidate: &ReplicaId,
        term: Term,
        last_log_index: LogIndex,
        last_log_term: Term,
        now_us: u64,
    ) -> Vec<Envelope> {
        if term > self.term {
            self.adopt_term(term);
        }

        let grant = term >= self.term
            && self
                .voted_for
                .as_ref()
                .is_none_or(|voted| voted == candidate)
            && self.log.candidate_up_to_date(last_log_term, last_log_index);

        if grant {
            debug!(candidate = %candidate, term = %self.term, "granting vote");
            self.voted_for = Some(candidate.clone());
        }
        self.reset_election_timer(now_us);

        vec![self.message(
            candidate.clone(),
            Body::Vote {
                term: self.term,
                vote: grant,
            },
        )]
    }

    /// Tallies a vote response.
    fn handle_vote(&mut self, voter: &ReplicaId, term: Term, vote: bool, now_us: u64) -> Vec<Envelope> {
        if term > self.term {
            // Someone is ahead of us; this candidacy is over.
            self.adopt_term(term);
            self.reset_election_timer(now_us);
            return Vec::new();
        }
        if !self.is_candidate() || term < self.term {
            return Vec::new();
        }

        self.votes.insert(voter.clone(), vote);
        if vote && self.granted_votes() >= self.config.quorum_size() {
            return self.become_leader(now_us);
        }
        Vec::new()
    }

    /// Assumes leadership: initialize per-peer progress, announce with an
    /// immediate heartbeat, and drain the pre-election queue.
    fn become_leader(&mut self, now_us: u64) -> Vec<Envelope> {
        info!(term = %self.term, "won election, becoming leader");
        self.leader = self.config.id.clone();
        self.votes.clear();
        self.progress = self
            .config
            .peers
            .iter()
            .cloned()
            .map(|peer| {
                (
                    peer,
                    Progress {
                        next_index: self.log.next_index(),
                        match_index: LogIndex::NONE,
                        inflight: None,
                    },
                )
            })
            .collect();

        let mut out = vec![self.heartbeat(now_us)];
        out.extend(self.drain_pending(now_us));
        out
    }

    // ------------------------------------------------------------------
    // Replication subsystem
    // ------------------------------------------------------------------

    /// Builds the broadcast heartbeat: an empty appendEntries carrying the
    /// leader's log tail as the prev fields.
    fn heartbeat(&mut self, now_us: u64) -> Envelope {
        self.heartbeat_sent_us = now_us;
        self.message(
            ReplicaId::broadcast(),
            Body::AppendEntries {
                term: self.term,
                entries: Vec::new(),
                leader_commit: self.commit_index,
                prev_log_term: self.log.last_term(),
                prev_log_index: self.log.last_index(),
            },
        )
    }

    /// Sends log suffixes to followers that are behind, respecting one
    /// in-flight RPC per peer with a retry after silence.
    fn update_followers(&mut self, now_us: u64) -> Vec<Envelope> {
        let mut out = Vec::new();
        for peer in self.config.peers.clone() {
            let Some(progress) = self.progress.get(&peer) else {
                continue;
            };
            if self.log.last_index() < progress.next_index {
                continue;
            }
            let retry_ok = progress.inflight.is_none_or(|inflight| {
                now_us.saturating_sub(inflight.sent_at_us) > self.config.append_retry_us
            });
            if !retry_ok {
                continue;
            }

            let next_index = progress.next_index;
            let entries = self.log.entries_from(next_index, self.config.append_batch_max);
            let entries_sent = entries.len();
            let prev_log_index = next_index.prev();
            debug!(peer = %peer, count = entries_sent, next = %next_index, "replicating");
            let envelope = self.message(
                peer.clone(),
                Body::AppendEntries {
                    term: self.term,
                    entries,
                    leader_commit: self.commit_index,
                    prev_log_term: self.log.term_at(prev_log_index),
                    prev_log_index,
                },
            );
            out.push(envelope);
            if let Some(progress) = self.progress.get_mut(&peer) {
                progress.inflight = Some(Inflight {
                    entries_sent,
                    sent_at_us: now_us,
                });
            }
        }
        out
    }

    /// Handles an appendEntries RPC as a follower (or steps down to one).
    #[allow(clippy::too_many_arguments)]
    fn handle_append_entries(
        &mut self,
        src: &ReplicaId,
        term: Term,
        entries: Vec<LogEntry>,
        leader_commit: LogIndex,
        prev_log_term: Term,
        prev_log_index: LogIndex,
        now_us: u64,
    ) -> Vec<Envelope> {
        let mut out = Vec::new();
        self.reset_election_timer(now_us);

        if term >= self.term {
            if term > self.term {
                self.adopt_term(term);
            }
            if self.leader != *src {
                info!(leader = %src, term = %self.term, "following leader");
            }
            self.leader = src.clone();
            self.votes.clear();
            self.progress.clear();
            out.extend(self.drain_pending(now_us));
        }

        // Empty entries is a heartbeat: term and leader are adopted above,
        // nothing to reply.
        if entries.is_empty() {
            return out;
        }

        let log_ok = prev_log_index.is_none()
            || (self.log.last_index() >= prev_log_index
                && self.log.term_at(prev_log_index) == prev_log_term);
        if term < self.term || !log_ok {
            debug!(prev = %prev_log_index, "rejecting entries");
            out.push(self.message(
                src.clone(),
                Body::AppendEntriesReply {
                    term: self.term,
                    success: false,
                },
            ));
            return out;
        }

        // Walk the batch past entries we already hold (same position, same
        // term), then splice: truncate after the last valid position and
        // append the rest.
        let mut last_valid = prev_log_index;
        let mut redundant = 0;
        for entry in &entries {
            let position = last_valid.next();
            match self.log.get(position) {
                Some(local) if local.term == entry.term => {
                    redundant += 1;
                    last_valid = position;
                }
                _ => break,
            }
        }

        for removed in self.log.truncate_after(last_valid) {
            // A put this replica accepted as leader is being overwritten:
            // tell the client to retry with the real leader.
            if removed.received_by == self.config.id {
                warn!(mid = %removed.mid, "entry overwritten, redirecting client");
                out.push(self.message(removed.client, Body::Redirect { mid: removed.mid }));
            }
        }
        for entry in entries.into_iter().skip(redundant) {
            self.log.append(entry);
        }

        if leader_commit > self.commit_index {
            self.commit_index = self.log.last_index().min(leader_commit);
        }

        out.push(self.message(
            src.clone(),
            Body::AppendEntriesReply {
                term: self.term,
                success: true,
            },
        ));
        out
    }

    /// Handles a follower's reply to appendEntries.
    fn handle_append_entries_reply(
        &mut self,
        src: &ReplicaId,
        term: Term,
        success: bool,
        now_us: u64,
    ) -> Vec<Envelope> {
        if !self.is_leader() {
            return Vec::new();
        }

        if success {
            if let Some(progress) = self.progress.get_mut(src) {
                if let Some(inflight) = progress.inflight.take() {
                    let advanced = match i64::try_from(inflight.entries_sent) {
                        Ok(count) => LogIndex::new(progress.next_index.get() + count),
                        Err(_) => unreachable!("batch size fits in i64"),
                    };
                    progress.next_index = advanced;
                    progress.match_index = advanced.prev();
                    debug!(peer = %src, matched = %progress.match_index, "follower advanced");
                }
            }
        } else if term > self.term {
            // A reply's source is a follower, not the new leader: step down
            // and wait for the next appendEntries to learn who leads.
            info!(term = %term, "stepping down on higher-term reply");
            self.adopt_term(term);
            self.reset_election_timer(now_us);
        } else if let Some(progress) = self.progress.get_mut(src) {
            // Linear backoff: walk one entry back and retry later.
            if progress.next_index > LogIndex::ZERO {
                progress.next_index = progress.next_index.prev();
            }
            progress.inflight = None;
        }
        Vec::new()
    }

    /// Leader-side commit advancement: walk forward while a quorum holds
    /// the candidate entry, committing at entries of the current term. An
    /// inherited older-term entry is never committed directly; it commits
    /// together with the first current-term entry that gains quorum.
    fn update_commit_index(&mut self) {
        debug_assert!(self.is_leader(), "commit advancement is a leader duty");
        let mut candidate = self.commit_index.next();
        while candidate <= self.log.last_index() {
            let holders = 1 + self
                .progress
                .values()
                .filter(|progress| progress.match_index >= candidate)
                .count();
            if holders < self.config.quorum_size() {
                break;
            }
            if self.log.term_at(candidate) == self.term {
                debug!(index = %candidate, "commit index advanced");
                self.commit_index = candidate;
            }
            candidate = candidate.next();
        }
    }

    // ------------------------------------------------------------------
    // Commit & apply
    // ------------------------------------------------------------------

    /// Applies committed entries to the store, in order, at most once. The
    /// leader answers the originating client as each put applies.
    fn apply_committed(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while self.last_applied < self.commit_index {
            let index = self.last_applied.next();
            let Some(entry) = self.log.get(index).cloned() else {
                debug_assert!(false, "committed entry {index} missing from log");
                break;
            };
            debug!(index = %index, key = %entry.key, "applying");
            self.store.put(entry.key, entry.value);
            self.last_applied = index;
            if self.is_leader() {
                out.push(self.message(entry.client, Body::Ok {
                    mid: entry.mid,
                    value: None,
                }));
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Client interface
    // ------------------------------------------------------------------

    /// Handles a client get/put: queue while no leader is known, redirect
    /// from followers, serve on the leader.
    fn handle_client_request(&mut self, envelope: Envelope, _now_us: u64) -> Vec<Envelope> {
        if self.leader.is_broadcast() {
            if self.pending.len() >= self.config.pre_election_queue_max {
                warn!("pre-election queue full, failing request");
                let mid = envelope.body.mid().unwrap_or_default().to_owned();
                return vec![self.message(envelope.src, Body::Fail { mid })];
            }
            self.pending.push_back(envelope);
            return Vec::new();
        }

        let mid = envelope.body.mid().unwrap_or_default().to_owned();
        if !self.is_leader() {
            return vec![self.message(envelope.src, Body::Redirect { mid })];
        }

        match envelope.body {
            Body::Get { key, .. } => {
                let value = self.store.get(&key).unwrap_or_default().to_owned();
                vec![self.message(envelope.src, Body::Ok {
                    mid,
                    value: Some(value),
                })]
            }
            Body::Put { key, value, .. } => {
                self.log.append(LogEntry {
                    term: self.term,
                    key,
                    value,
                    client: envelope.src,
                    mid,
                    received_by: self.config.id.clone(),
                });
                // The ok goes out when the entry commits and applies.
                Vec::new()
            }
            _ => unreachable!("client path only handles get and put"),
        }
    }

    /// Replays requests buffered before a leader was known.
    fn drain_pending(&mut self, now_us: u64) -> Vec<Envelope> {
        let mut out = Vec::new();
        let queued: Vec<Envelope> = self.pending.drain(..).collect();
        for envelope in queued {
            out.extend(self.handle_client_request(envelope, now_us));
        }
        out
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Adopts a higher term: reset the vote, abandon any candidacy or
    /// leadership, forget the (now possibly stale) leader.
    fn adopt_term(&mut self, term: Term) {
        debug_assert!(term > self.term, "terms only move forward");
        if self.is_leader() {
            info!(term = %term, "higher term observed, stepping down");
        }
        self.term = term;
        self.voted_for = None;
        self.votes.clear();
        self.progress.clear();
        self.leader = ReplicaId::broadcast();
    }

    /// True while campaigning (own vote recorded, no leader learned).
    fn is_candidate(&self) -> bool {
        !self.votes.is_empty()
    }

    fn granted_votes(&self) -> usize {
        self.votes.values().filter(|granted| **granted).count()
    }

    /// Draws a fresh randomized election deadline in `[base, 2 * base]`.
    fn reset_election_timer(&mut self, now_us: u64) {
        let base = self.config.election_timeout_base_us;
        self.election_deadline_us = now_us + self.rng.gen_range(base..=2 * base);
    }

    /// Wraps a payload in an envelope carrying this replica's leader view.
    fn message(&self, dst: ReplicaId, body: Body) -> Envelope {
        Envelope::new(self.config.id.clone(), dst, self.leader.clone(), body)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.commit_index <= self.log.last_index(),
            "commit index beyond log"
        );
        debug_assert!(
            self.last_applied <= self.commit_index,
            "applied beyond commit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{self, ELECTION_TIMEOUT_BASE_US};

    /// Any election deadline drawn at time T fires by T + 2 * base + 1.
    const TIMEOUT_US: u64 = 2 * ELECTION_TIMEOUT_BASE_US + 1;

    fn id(s: &str) -> ReplicaId {
        ReplicaId::new(s)
    }

    /// A replica "0000" in a three-node cluster with peers "0001", "0002".
    fn replica3() -> Replica {
        let config = RaftConfig::new(id("0000"), vec![id("0001"), id("0002")]).with_seed(7);
        Replica::new(config, 0)
    }

    /// An envelope addressed to the replica under test.
    fn env(src: &str, body: Body) -> Envelope {
        Envelope::new(id(src), id("0000"), ReplicaId::broadcast(), body)
    }

    fn entry(term: i64, mid: &str, received_by: &str) -> LogEntry {
        LogEntry {
            term: Term::new(term),
            key: format!("key-{mid}"),
            value: format!("value-{mid}"),
            client: id("C1"),
            mid: mid.to_owned(),
            received_by: id(received_by),
        }
    }

    fn append(term: i64, prev_index: i64, prev_term: i64, entries: Vec<LogEntry>, commit: i64) -> Body {
        Body::AppendEntries {
            term: Term::new(term),
            entries,
            leader_commit: LogIndex::new(commit),
            prev_log_term: Term::new(prev_term),
            prev_log_index: LogIndex::new(prev_index),
        }
    }

    fn put(mid: &str, key: &str, value: &str) -> Body {
        Body::Put {
            mid: mid.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }

    fn get(mid: &str, key: &str) -> Body {
        Body::Get {
            mid: mid.to_owned(),
            key: key.to_owned(),
        }
    }

    /// Elects "0000" leader of the three-node cluster at `TIMEOUT_US`.
    fn make_leader() -> (Replica, u64) {
        let mut replica = replica3();
        let now = TIMEOUT_US;
        let out = replica.tick(now);
        assert!(out
            .iter()
            .any(|e| matches!(e.body, Body::RequestVote { .. }) && e.dst.is_broadcast()));

        let out = replica.handle_message(
            env("0001", Body::Vote { term: Term::new(1), vote: true }),
            now,
        );
        assert!(replica.is_leader());
        // Winning the election announces with an immediate heartbeat.
        assert!(out.iter().any(|e| matches!(
            e.body,
            Body::AppendEntries { ref entries, .. } if entries.is_empty()
        )));
        (replica, now)
    }

    #[test]
    fn test_new_replica_is_leaderless_follower() {
        let replica = replica3();
        assert_eq!(replica.term(), Term::ZERO);
        assert!(replica.leader().is_broadcast());
        assert!(!replica.is_leader());
        assert_eq!(replica.commit_index(), LogIndex::NONE);
        assert_eq!(replica.last_applied(), LogIndex::NONE);
    }

    #[test]
    fn test_election_timeout_starts_election() {
        let mut replica = replica3();

        // Before any deadline can have passed, nothing happens.
        assert!(replica.tick(ELECTION_TIMEOUT_BASE_US - 1).is_empty());

        let out = replica.tick(TIMEOUT_US);
        assert_eq!(replica.term(), Term::new(1));
        assert!(!replica.is_leader());
        let votes: Vec<_> = out
            .iter()
            .filter(|e| matches!(e.body, Body::RequestVote { .. }))
            .collect();
        assert_eq!(votes.len(), 1);
        assert!(votes[0].dst.is_broadcast());
        match votes[0].body {
            Body::RequestVote {
                term,
                last_log_index,
                last_log_term,
            } => {
                assert_eq!(term, Term::new(1));
                assert!(last_log_index.is_none());
                assert!(last_log_term.is_none());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_quorum_of_votes_elects_leader() {
        let (replica, _) = make_leader();
        assert_eq!(replica.term(), Term::new(1));
        assert_eq!(replica.leader(), replica.id());
    }

    #[test]
    fn test_denied_votes_do_not_elect() {
        let mut replica = replica3();
        replica.tick(TIMEOUT_US);

        let out = replica.handle_message(
            env("0001", Body::Vote { term: Term::new(1), vote: false }),
            TIMEOUT_US,
        );
        assert!(out.is_empty());
        assert!(!replica.is_leader());

        // The second granted vote (with our own) reaches quorum.
        replica.handle_message(
            env("0002", Body::Vote { term: Term::new(1), vote: true }),
            TIMEOUT_US,
        );
        assert!(replica.is_leader());
    }

    #[test]
    fn test_higher_term_vote_ends_candidacy() {
        let mut replica = replica3();
        replica.tick(TIMEOUT_US);
        assert_eq!(replica.term(), Term::new(1));

        replica.handle_message(
            env("0001", Body::Vote { term: Term::new(5), vote: false }),
            TIMEOUT_US,
        );
        assert_eq!(replica.term(), Term::new(5));
        assert!(!replica.is_leader());

        // A late grant for the old term must not elect.
        replica.handle_message(
            env("0002", Body::Vote { term: Term::new(1), vote: true }),
            TIMEOUT_US,
        );
        assert!(!replica.is_leader());
    }

    #[test]
    fn test_single_replica_cluster_elects_itself() {
        let config = RaftConfig::new(id("0000"), Vec::new()).with_seed(3);
        let mut replica = Replica::new(config, 0);
        replica.tick(TIMEOUT_US);
        assert!(replica.is_leader());
        assert_eq!(replica.term(), Term::new(1));
    }

    #[test]
    fn test_vote_granted_once_per_term() {
        let mut replica = replica3();

        let out = replica.handle_message(
            env(
                "0001",
                Body::RequestVote {
                    term: Term::new(1),
                    last_log_index: LogIndex::NONE,
                    last_log_term: Term::NONE,
                },
            ),
            1000,
        );
        assert!(matches!(
            out[0].body,
            Body::Vote { term, vote: true } if term == Term::new(1)
        ));

        // A different candidate in the same term is denied.
        let out = replica.handle_message(
            env(
                "0002",
                Body::RequestVote {
                    term: Term::new(1),
                    last_log_index: LogIndex::NONE,
                    last_log_term: Term::NONE,
                },
            ),
            2000,
        );
        assert!(matches!(out[0].body, Body::Vote { vote: false, .. }));

        // The same candidate asking again is granted again.
        let out = replica.handle_message(
            env(
                "0001",
                Body::RequestVote {
                    term: Term::new(1),
                    last_log_index: LogIndex::NONE,
                    last_log_term: Term::NONE,
                },
            ),
            3000,
        );
        assert!(matches!(out[0].body, Body::Vote { vote: true, .. }));
    }

    #[test]
    fn test_vote_denied_to_stale_term() {
        let mut replica = replica3();
        // Learn term 2 from a heartbeat.
        replica.handle_message(env("0002", append(2, -1, -1, Vec::new(), -1)), 1000);
        assert_eq!(replica.term(), Term::new(2));

        let out = replica.handle_message(
            env(
                "0001",
                Body::RequestVote {
                    term: Term::new(1),
                    last_log_index: LogIndex::NONE,
                    last_log_term: Term::NONE,
                },
            ),
            2000,
        );
        assert!(matches!(
            out[0].body,
            Body::Vote { term, vote: false } if term == Term::new(2)
        ));
    }

    #[test]
    fn test_vote_denied_to_stale_log() {
        let mut replica = replica3();
        replica.handle_message(
            env("0001", append(1, -1, -1, vec![entry(1, "M1", "0001")], -1)),
            1000,
        );
        assert_eq!(replica.log().len(), 1);

        // An empty-logged candidate with a higher term is denied on log
        // freshness, though the term is adopted.
        let out = replica.handle_message(
            env(
                "0002",
                Body::RequestVote {
                    term: Term::new(2),
                    last_log_index: LogIndex::NONE,
                    last_log_term: Term::NONE,
                },
            ),
            2000,
        );
        assert_eq!(replica.term(), Term::new(2));
        assert!(matches!(out[0].body, Body::Vote { vote: false, .. }));

        // A candidate whose tail matches ours is granted.
        let out = replica.handle_message(
            env(
                "0002",
                Body::RequestVote {
                    term: Term::new(2),
                    last_log_index: LogIndex::ZERO,
                    last_log_term: Term::new(1),
                },
            ),
            3000,
        );
        assert!(matches!(out[0].body, Body::Vote { vote: true, .. }));
    }

    #[test]
    fn test_heartbeat_resets_election_timer() {
        let mut replica = replica3();
        replica.handle_message(env("0001", append(1, -1, -1, Vec::new(), -1)), 200_000);
        assert_eq!(replica.leader(), &id("0001"));

        // The deadline was re-drawn at 200ms; it cannot fire before 350ms.
        assert!(replica.tick(300_001).is_empty());
        assert_eq!(replica.term(), Term::new(1));

        // With no further heartbeats the election eventually fires.
        let out = replica.tick(200_000 + TIMEOUT_US);
        assert!(out.iter().any(|e| matches!(e.body, Body::RequestVote { .. })));
        assert_eq!(replica.term(), Term::new(2));
    }

    #[test]
    fn test_heartbeat_gets_no_reply() {
        let mut replica = replica3();
        let out = replica.handle_message(env("0001", append(1, 5, 1, Vec::new(), -1)), 1000);
        // Prev fields on a heartbeat are ignored entirely; no reply is sent.
        assert!(out.is_empty());
        assert_eq!(replica.leader(), &id("0001"));
    }

    #[test]
    fn test_append_entries_accept_and_reapply() {
        let mut replica = replica3();
        let batch = vec![entry(1, "M1", "0001"), entry(1, "M2", "0001")];

        let out = replica.handle_message(env("0001", append(1, -1, -1, batch.clone(), -1)), 1000);
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { success: true, .. }
        ));
        assert_eq!(replica.log().len(), 2);

        // Reapplying the identical message is a no-op that still succeeds.
        let out = replica.handle_message(env("0001", append(1, -1, -1, batch, -1)), 2000);
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { success: true, .. }
        ));
        assert_eq!(replica.log().len(), 2);
        assert_eq!(replica.log().term_at(LogIndex::new(1)), Term::new(1));
    }

    #[test]
    fn test_append_entries_rejects_gap() {
        let mut replica = replica3();
        let out = replica.handle_message(
            env("0001", append(1, 5, 1, vec![entry(1, "M1", "0001")], -1)),
            1000,
        );
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { success: false, .. }
        ));
        assert!(replica.log().is_empty());
    }

    #[test]
    fn test_append_entries_rejects_prev_term_mismatch() {
        let mut replica = replica3();
        replica.handle_message(
            env("0001", append(1, -1, -1, vec![entry(1, "M1", "0001")], -1)),
            1000,
        );

        let out = replica.handle_message(
            env("0001", append(1, 0, 3, vec![entry(1, "M2", "0001")], -1)),
            2000,
        );
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { success: false, .. }
        ));
        assert_eq!(replica.log().len(), 1);
    }

    #[test]
    fn test_stale_term_entries_rejected_with_current_term() {
        let mut replica = replica3();
        replica.handle_message(env("0002", append(2, -1, -1, Vec::new(), -1)), 1000);

        let out = replica.handle_message(
            env("0001", append(1, -1, -1, vec![entry(1, "M1", "0001")], -1)),
            2000,
        );
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { term, success: false } if term == Term::new(2)
        ));
        // The stale sender is not adopted as leader.
        assert_eq!(replica.leader(), &id("0002"));
    }

    #[test]
    fn test_follower_commit_follows_leader_commit() {
        let mut replica = replica3();
        replica.handle_message(
            env(
                "0001",
                append(1, -1, -1, vec![entry(1, "M1", "0001"), entry(1, "M2", "0001")], 0),
            ),
            1000,
        );
        assert_eq!(replica.commit_index(), LogIndex::ZERO);

        // leaderCommit beyond our log is clamped to the last index.
        replica.handle_message(
            env("0001", append(1, 1, 1, vec![entry(1, "M3", "0001")], 99)),
            2000,
        );
        assert_eq!(replica.commit_index(), LogIndex::new(2));

        // Applying happens on tick; followers send no client replies.
        let out = replica.tick(3000);
        assert!(out.is_empty());
        assert_eq!(replica.last_applied(), LogIndex::new(2));
        assert_eq!(replica.store().get("key-M1"), Some("value-M1"));
    }

    #[test]
    fn test_conflicting_suffix_truncated_with_redirects() {
        let (mut replica, now) = make_leader();
        replica.handle_message(env("C1", put("M1", "k", "1")), now);
        assert_eq!(replica.log().len(), 1);

        // A new leader at a higher term overwrites our uncommitted entry.
        let out = replica.handle_message(
            env("0001", append(2, -1, -1, vec![entry(2, "M9", "0001")], -1)),
            now + 1000,
        );

        assert!(!replica.is_leader());
        assert_eq!(replica.term(), Term::new(2));
        assert_eq!(replica.leader(), &id("0001"));

        // The overwritten put we accepted as leader redirects its client.
        assert!(out.iter().any(|e| {
            e.dst == id("C1") && matches!(e.body, Body::Redirect { ref mid } if mid == "M1")
        }));
        assert!(matches!(
            out.last().unwrap().body,
            Body::AppendEntriesReply { success: true, .. }
        ));
        assert_eq!(replica.log().len(), 1);
        assert_eq!(replica.log().get(LogIndex::ZERO).unwrap().mid, "M9");
    }

    #[test]
    fn test_put_replicates_commits_and_replies() {
        let (mut replica, now) = make_leader();

        let out = replica.handle_message(env("C1", put("M1", "k", "1")), now);
        assert!(out.is_empty(), "ok is deferred until the entry applies");
        assert_eq!(replica.log().len(), 1);

        // The next pass replicates to both followers.
        let out = replica.tick(now + 1);
        let appends: Vec<_> = out
            .iter()
            .filter(|e| matches!(e.body, Body::AppendEntries { ref entries, .. } if !entries.is_empty()))
            .collect();
        assert_eq!(appends.len(), 2);
        assert!(appends.iter().any(|e| e.dst == id("0001")));
        assert!(appends.iter().any(|e| e.dst == id("0002")));

        // One success reply reaches quorum; commit advances on the next
        // pass and the apply pass answers the client.
        replica.handle_message(
            env("0001", Body::AppendEntriesReply { term: Term::new(1), success: true }),
            now + 2,
        );
        replica.tick(now + 3);
        assert_eq!(replica.commit_index(), LogIndex::ZERO);

        let out = replica.tick(now + 4);
        assert!(out.iter().any(|e| {
            e.dst == id("C1")
                && matches!(e.body, Body::Ok { ref mid, value: None } if mid == "M1")
        }));
        assert_eq!(replica.store().get("k"), Some("1"));

        // A get on the leader serves the committed value immediately.
        let out = replica.handle_message(env("C1", get("M2", "k")), now + 5);
        assert!(matches!(
            out[0].body,
            Body::Ok { ref value, .. } if value.as_deref() == Some("1")
        ));
    }

    #[test]
    fn test_get_of_absent_key_returns_empty_string() {
        let (mut replica, now) = make_leader();
        let out = replica.handle_message(env("C1", get("M1", "nope")), now);
        assert!(matches!(
            out[0].body,
            Body::Ok { ref value, .. } if value.as_deref() == Some("")
        ));
    }

    #[test]
    fn test_follower_redirects_clients() {
        let mut replica = replica3();
        replica.handle_message(env("0001", append(1, -1, -1, Vec::new(), -1)), 1000);

        let out = replica.handle_message(env("C1", get("M1", "k")), 2000);
        assert_eq!(out[0].dst, id("C1"));
        assert_eq!(out[0].leader, id("0001"));
        assert!(matches!(out[0].body, Body::Redirect { ref mid } if mid == "M1"));
    }

    #[test]
    fn test_clients_queue_until_leader_known() {
        let mut replica = replica3();

        let out = replica.handle_message(env("C1", get("M1", "k")), 1000);
        assert!(out.is_empty(), "no leader yet: request is buffered");

        // Learning the leader drains the queue; the buffered get redirects.
        let out = replica.handle_message(env("0001", append(1, -1, -1, Vec::new(), -1)), 2000);
        assert!(out.iter().any(|e| {
            e.dst == id("C1")
                && e.leader == id("0001")
                && matches!(e.body, Body::Redirect { ref mid } if mid == "M1")
        }));
    }

    #[test]
    fn test_pre_election_queue_overflow_fails() {
        let mut config = RaftConfig::new(id("0000"), vec![id("0001"), id("0002")]).with_seed(7);
        config.pre_election_queue_max = 1;
        let mut replica = Replica::new(config, 0);

        assert!(replica.handle_message(env("C1", get("M1", "k")), 1000).is_empty());
        let out = replica.handle_message(env("C1", get("M2", "k")), 1100);
        assert!(matches!(out[0].body, Body::Fail { ref mid } if mid == "M2"));
    }

    #[test]
    fn test_higher_term_reply_steps_leader_down_without_adopting_source() {
        let (mut replica, now) = make_leader();

        replica.handle_message(
            env("0001", Body::AppendEntriesReply { term: Term::new(3), success: false }),
            now + 1,
        );
        assert!(!replica.is_leader());
        assert_eq!(replica.term(), Term::new(3));
        // The reply's source is a follower, not the new leader.
        assert!(replica.leader().is_broadcast());
    }

    #[test]
    fn test_failed_reply_backs_off_linearly() {
        let (mut replica, now) = make_leader();
        replica.handle_message(env("C1", put("M1", "k", "1")), now);
        replica.tick(now + 1);
        replica.handle_message(
            env("0001", Body::AppendEntriesReply { term: Term::new(1), success: true }),
            now + 2,
        );
        replica.handle_message(env("C1", put("M2", "k", "2")), now + 3);
        let out = replica.tick(now + 4);
        // 0001 is caught up: it receives only the new entry after prev 0.
        let to_first = out.iter().find(|e| e.dst == id("0001")).unwrap();
        assert!(matches!(
            to_first.body,
            Body::AppendEntries { ref entries, prev_log_index, .. }
                if entries.len() == 1 && prev_log_index == LogIndex::ZERO
        ));

        // A same-term rejection walks next_index back one entry, so the
        // retry starts one entry earlier.
        replica.handle_message(
            env("0001", Body::AppendEntriesReply { term: Term::new(1), success: false }),
            now + 5,
        );
        let out = replica.tick(now + 6);
        let to_first = out.iter().find(|e| e.dst == id("0001")).unwrap();
        assert!(matches!(
            to_first.body,
            Body::AppendEntries { ref entries, prev_log_index, .. }
                if entries.len() == 2 && prev_log_index.is_none()
        ));
    }

    #[test]
    fn test_inflight_rpc_retries_after_silence() {
        let (mut replica, now) = make_leader();
        replica.handle_message(env("C1", put("M1", "k", "1")), now);

        let out = replica.tick(now + 1);
        assert!(out.iter().any(|e| e.dst == id("0001")));

        // While the RPC is in flight nothing is re-sent.
        let out = replica.tick(now + 10_000);
        assert!(!out
            .iter()
            .any(|e| matches!(e.body, Body::AppendEntries { ref entries, .. } if !entries.is_empty())));

        // After the retry interval the same entries go out again.
        let out = replica.tick(now + 30_000);
        assert!(out
            .iter()
            .any(|e| matches!(e.body, Body::AppendEntries { ref entries, .. } if !entries.is_empty())));
    }

    #[test]
    fn test_inherited_entry_commits_only_indirectly() {
        // A follower holding a term-1 entry wins an election at term 2.
        let mut replica = replica3();
        replica.handle_message(
            env("0001", append(1, -1, -1, vec![entry(1, "M1", "0001")], -1)),
            1000,
        );
        let now = 1000 + TIMEOUT_US;
        replica.tick(now);
        replica.handle_message(
            env("0002", Body::Vote { term: Term::new(2), vote: true }),
            now,
        );
        assert!(replica.is_leader());
        assert_eq!(replica.term(), Term::new(2));

        // The inherited term-1 entry is already on a quorum, but the new
        // leader never commits it directly.
        replica.tick(now + 1);
        assert_eq!(replica.commit_index(), LogIndex::NONE);

        // A current-term put replicates; once it has quorum, the walk
        // commits the inherited entry together with it.
        replica.handle_message(env("C1", put("M2", "k", "2")), now + 2);
        replica.tick(now + 3);
        replica.handle_message(
            env("0001", Body::AppendEntriesReply { term: Term::new(2), success: true }),
            now + 4,
        );
        replica.tick(now + 5);
        assert_eq!(replica.commit_index(), LogIndex::new(1));

        // Both entries apply in order.
        let out = replica.tick(now + 6);
        assert_eq!(replica.last_applied(), LogIndex::new(1));
        assert_eq!(replica.store().get("key-M1"), Some("value-M1"));
        assert_eq!(replica.store().get("k"), Some("2"));
        assert!(out
            .iter()
            .any(|e| matches!(e.body, Body::Ok { ref mid, .. } if mid == "M2")));
    }

    #[test]
    fn test_leader_sends_periodic_heartbeats() {
        let (mut replica, now) = make_leader();

        let out = replica.tick(now + 1);
        assert!(!out
            .iter()
            .any(|e| matches!(e.body, Body::AppendEntries { .. })));

        let out = replica.tick(now + limits::HEARTBEAT_INTERVAL_US);
        let beats: Vec<_> = out
            .iter()
            .filter(|e| matches!(e.body, Body::AppendEntries { ref entries, .. } if entries.is_empty()))
            .collect();
        assert_eq!(beats.len(), 1);
        assert!(beats[0].dst.is_broadcast());
    }

    #[test]
    fn test_heartbeat_carries_real_prev_fields() {
        let (mut replica, now) = make_leader();
        replica.handle_message(env("C1", put("M1", "k", "1")), now);

        let out = replica.tick(now + limits::HEARTBEAT_INTERVAL_US);
        let beat = out
            .iter()
            .find(|e| matches!(e.body, Body::AppendEntries { ref entries, .. } if entries.is_empty()))
            .unwrap();
        assert!(matches!(
            beat.body,
            Body::AppendEntries { prev_log_index, prev_log_term, .. }
                if prev_log_index == LogIndex::ZERO && prev_log_term == Term::new(1)
        ));
    }

    #[test]
    fn test_messages_for_other_replicas_are_dropped() {
        let mut replica = replica3();
        let mut envelope = env("0001", append(1, -1, -1, Vec::new(), -1));
        envelope.dst = id("0005");
        let out = replica.handle_message(envelope, 1000);
        assert!(out.is_empty());
        assert!(replica.leader().is_broadcast());
        assert_eq!(replica.term(), Term::ZERO);
    }
}
