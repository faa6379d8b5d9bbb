//! Multi-replica consensus scenarios on the in-memory cluster.

use skiff_core::{LogIndex, ReplicaId, Term};
use skiff_raft::Body;

use crate::cluster::Cluster;

/// One cooperative pass of the real loop cadence.
const STEP_US: u64 = 10_000;

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

/// Runs until exactly one replica leads; panics if none emerges.
fn elect(cluster: &mut Cluster) -> ReplicaId {
    let elected = cluster.run_until(500, STEP_US, |c| c.leaders().len() == 1);
    assert!(elected, "no leader elected");
    cluster.leaders().remove(0)
}

#[test]
fn test_five_replicas_elect_exactly_one_leader() {
    let mut cluster = Cluster::new(5);
    let leader = elect(&mut cluster);

    let term = cluster.replica(&leader).term();
    assert!(term >= Term::new(1));

    // Heartbeats keep the cluster stable: half a second later the same
    // replica leads at the same term, and every replica knows it.
    cluster.run(50, STEP_US);
    assert_eq!(cluster.leaders(), vec![leader.clone()]);
    assert_eq!(cluster.replica(&leader).term(), term);
    for i in 0..5 {
        let id = ReplicaId::new(format!("{i:04X}"));
        assert_eq!(cluster.replica(&id).leader(), &leader);
        assert!(cluster.replica(&id).term() >= Term::new(1));
    }
}

#[test]
fn test_put_commits_and_get_serves_committed_state() {
    let mut cluster = Cluster::new(3);
    let leader = elect(&mut cluster);

    cluster.client_send("C1A0", &leader, put("M1", "a", "1"));
    cluster.run(5, STEP_US);

    // The put was acknowledged after quorum commit and application.
    assert!(cluster.client_inbox.iter().any(|e| {
        e.dst == ReplicaId::new("C1A0")
            && matches!(e.body, Body::Ok { ref mid, value: None } if mid == "M1")
    }));
    assert_eq!(cluster.replica(&leader).store().get("a"), Some("1"));
    assert_eq!(cluster.replica(&leader).commit_index(), LogIndex::ZERO);

    // A get at the leader answers from committed state immediately.
    cluster.client_send("C1A0", &leader, get("M2", "a"));
    assert!(cluster.client_inbox.iter().any(|e| {
        matches!(e.body, Body::Ok { ref mid, ref value } if mid == "M2" && value.as_deref() == Some("1"))
    }));

    // A get at a follower redirects, naming the leader.
    let follower = (0..3)
        .map(|i| ReplicaId::new(format!("{i:04X}")))
        .find(|id| *id != leader)
        .expect("two followers exist");
    cluster.client_send("C1A0", &follower, get("M3", "a"));
    let redirect = cluster
        .client_inbox
        .iter()
        .find(|e| matches!(e.body, Body::Redirect { ref mid } if mid == "M3"))
        .expect("follower redirects");
    assert_eq!(redirect.leader, leader);
}

#[test]
fn test_requests_queued_before_election_are_answered_after() {
    let mut cluster = Cluster::new(3);

    // No leader yet: the request is buffered, nothing reaches the client.
    let target = ReplicaId::new("0000");
    cluster.client_send("C1A0", &target, get("M0", "a"));
    assert!(cluster.client_inbox.is_empty());

    // Once a leader is known the queue drains: the client gets either the
    // value (target won) or a redirect (target follows).
    elect(&mut cluster);
    let reply = cluster
        .client_inbox
        .iter()
        .find(|e| e.body.mid() == Some("M0"))
        .expect("buffered request answered");
    assert!(matches!(
        reply.body,
        Body::Ok { .. } | Body::Redirect { .. }
    ));
}

#[test]
fn test_partition_new_leader_reconciliation_and_redirect() {
    let mut cluster = Cluster::new(5);
    let old_leader = elect(&mut cluster);
    let old_term = cluster.replica(&old_leader).term();

    // Commit a first write on the healthy cluster.
    cluster.client_send("C1A0", &old_leader, put("M1", "a", "1"));
    cluster.run(5, STEP_US);
    assert!(cluster
        .client_inbox
        .iter()
        .any(|e| matches!(e.body, Body::Ok { ref mid, .. } if mid == "M1")));

    // Isolate the leader; the four remaining peers are a majority.
    let others: Vec<ReplicaId> = (0..5)
        .map(|i| ReplicaId::new(format!("{i:04X}")))
        .filter(|id| *id != old_leader)
        .collect();
    for peer in &others {
        cluster.partition(&old_leader, peer);
    }

    // A write accepted by the cut-off leader cannot reach quorum.
    cluster.client_send("C2B0", &old_leader, put("M2", "b", "2"));
    cluster.run(5, STEP_US);
    assert!(!cluster
        .client_inbox
        .iter()
        .any(|e| e.body.mid() == Some("M2")));

    // The majority side elects a fresh leader at a higher term.
    let elected = cluster.run_until(1000, STEP_US, |c| {
        c.leaders()
            .iter()
            .any(|id| *id != old_leader && c.replica(id).term() > old_term)
    });
    assert!(elected, "majority partition elected no leader");
    let new_leader = cluster
        .leaders()
        .into_iter()
        .find(|id| *id != old_leader)
        .expect("new leader");

    // Heal. The old leader steps down on the first higher-term traffic,
    // and a fresh write forces reconciliation of its stale suffix.
    cluster.heal();
    cluster.run(20, STEP_US);
    assert_eq!(cluster.leaders(), vec![new_leader.clone()]);
    assert!(cluster.replica(&old_leader).term() > old_term);
    assert_eq!(cluster.replica(&old_leader).leader(), &new_leader);

    cluster.client_send("C3C0", &new_leader, put("M3", "c", "3"));
    cluster.run(10, STEP_US);

    // The overwritten write was redirected back to its client for retry.
    assert!(cluster.client_inbox.iter().any(|e| {
        e.dst == ReplicaId::new("C2B0")
            && matches!(e.body, Body::Redirect { ref mid } if mid == "M2")
    }));
    // The new write committed and was acknowledged.
    assert!(cluster
        .client_inbox
        .iter()
        .any(|e| matches!(e.body, Body::Ok { ref mid, .. } if mid == "M3")));

    // Leader Completeness: the committed first write survived the change
    // of leadership; the new leader serves it.
    cluster.client_send("C1A0", &new_leader, get("M4", "a"));
    assert!(cluster.client_inbox.iter().any(|e| {
        matches!(e.body, Body::Ok { ref mid, ref value } if mid == "M4" && value.as_deref() == Some("1"))
    }));

    // Log Matching: every replica converged on the same two entries.
    for i in 0..5 {
        let id = ReplicaId::new(format!("{i:04X}"));
        let log = cluster.replica(&id).log();
        assert_eq!(log.len(), 2, "replica {id} log diverged");
        assert_eq!(log.get(LogIndex::ZERO).unwrap().mid, "M1");
        assert_eq!(log.get(LogIndex::new(1)).unwrap().mid, "M3");
    }
}

#[test]
fn test_election_safety_under_repeated_partitions() {
    let mut cluster = Cluster::new(5);
    elect(&mut cluster);

    // Repeatedly isolate whoever leads and let the rest recover; at every
    // observation point at most one leader exists per term.
    for _ in 0..3 {
        let Some(leader) = cluster.leaders().first().cloned() else {
            cluster.run(50, STEP_US);
            continue;
        };
        let peers: Vec<ReplicaId> = (0..5)
            .map(|i| ReplicaId::new(format!("{i:04X}")))
            .filter(|id| *id != leader)
            .collect();
        for peer in &peers {
            cluster.partition(&leader, peer);
        }
        cluster.run_until(1000, STEP_US, |c| {
            c.leaders().iter().any(|id| *id != leader)
        });
        cluster.heal();
        cluster.run(50, STEP_US);

        let leaders = cluster.leaders();
        assert!(leaders.len() <= 1, "two leaders after heal: {leaders:?}");
        let mut terms: Vec<Term> = (0..5)
            .map(|i| cluster.replica(&ReplicaId::new(format!("{i:04X}"))).term())
            .collect();
        terms.sort_unstable();
        // Everyone converged on the highest term's leader.
        assert_eq!(terms.first(), terms.last());
    }
}
