//! The consensus wire format.
//!
//! Every message is one JSON text object with a common envelope (`src`,
//! `dst` with the reserved `FFFF` id broadcasting, and `leader`, the
//! sender's view, `FFFF` when unknown) plus a `type` tag selecting the
//! payload. Unknown
//! tags and missing fields are decode errors; the endpoint drops such
//! messages.

use serde::{Deserialize, Serialize};
use skiff_core::{LogIndex, ReplicaId, Term};

use crate::log::LogEntry;

/// One wire message: routing envelope plus typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The sender.
    pub src: ReplicaId,
    /// The recipient, or `FFFF` for broadcast.
    pub dst: ReplicaId,
    /// The sender's view of the current leader, `FFFF` when unknown.
    pub leader: ReplicaId,
    /// The typed payload, tagged by the `type` field.
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub const fn new(src: ReplicaId, dst: ReplicaId, leader: ReplicaId, body: Body) -> Self {
        Self {
            src,
            dst,
            leader,
            body,
        }
    }

    /// Returns true if the payload is a client request (get or put).
    #[must_use]
    pub const fn is_client_request(&self) -> bool {
        matches!(self.body, Body::Get { .. } | Body::Put { .. })
    }
}

/// The typed message payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Body {
    /// Client read.
    Get {
        /// The client's request id.
        #[serde(rename = "MID")]
        mid: String,
        /// Key to read.
        key: String,
    },

    /// Client write.
    Put {
        /// The client's request id.
        #[serde(rename = "MID")]
        mid: String,
        /// Key to write.
        key: String,
        /// Value to write.
        value: String,
    },

    /// Successful client reply. Carries a value only for gets.
    Ok {
        /// The request id being answered.
        #[serde(rename = "MID")]
        mid: String,
        /// The read value; absent for put acknowledgments.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    /// The request could not be accepted; the client should retry.
    Fail {
        /// The request id being answered.
        #[serde(rename = "MID")]
        mid: String,
    },

    /// The recipient is not the leader; the client should re-send to the
    /// leader named in the envelope (or retry later if `FFFF`).
    Redirect {
        /// The request id being answered.
        #[serde(rename = "MID")]
        mid: String,
    },

    /// Log replication RPC. Empty `entries` is a heartbeat.
    AppendEntries {
        /// The leader's term.
        term: Term,
        /// Entries to replicate, starting after `prevLogIndex`.
        entries: Vec<LogEntry>,
        /// The leader's commit index.
        #[serde(rename = "leaderCommit")]
        leader_commit: LogIndex,
        /// Term of the entry at `prevLogIndex` (`-1` below index 0).
        #[serde(rename = "prevLogTerm")]
        prev_log_term: Term,
        /// Index of the entry immediately preceding `entries`.
        #[serde(rename = "prevLogIndex")]
        prev_log_index: LogIndex,
    },

    /// Follower response to appendEntries.
    AppendEntriesReply {
        /// The follower's term, for the leader to update itself.
        term: Term,
        /// True if the consistency check passed and entries were accepted.
        success: bool,
    },

    /// Candidate vote solicitation.
    RequestVote {
        /// The candidate's term.
        term: Term,
        /// Index of the candidate's last log entry (`-1` if empty).
        #[serde(rename = "lastLogIndex")]
        last_log_index: LogIndex,
        /// Term of the candidate's last log entry (`-1` if empty).
        #[serde(rename = "lastLogTerm")]
        last_log_term: Term,
    },

    /// Response to requestVote.
    Vote {
        /// The voter's term.
        term: Term,
        /// True if the vote was granted.
        vote: bool,
    },
}

impl Body {
    /// Returns the client request id carried by client-facing payloads.
    #[must_use]
    pub fn mid(&self) -> Option<&str> {
        match self {
            Self::Get { mid, .. }
            | Self::Put { mid, .. }
            | Self::Ok { mid, .. }
            | Self::Fail { mid }
            | Self::Redirect { mid } => Some(mid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: Body) -> Envelope {
        Envelope::new(
            ReplicaId::new("0001"),
            ReplicaId::new("0002"),
            ReplicaId::new("0001"),
            body,
        )
    }

    #[test]
    fn test_get_wire_shape() {
        let encoded = serde_json::to_string(&envelope(Body::Get {
            mid: "M1".to_owned(),
            key: "k".to_owned(),
        }))
        .unwrap();
        assert_eq!(
            encoded,
            r#"{"src":"0001","dst":"0002","leader":"0001","type":"get","MID":"M1","key":"k"}"#
        );
    }

    #[test]
    fn test_put_round_trip() {
        let original = envelope(Body::Put {
            mid: "M2".to_owned(),
            key: "k".to_owned(),
            value: "v".to_owned(),
        });
        let encoded = serde_json::to_string(&original).unwrap();
        assert!(encoded.contains(r#""type":"put""#));
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
        assert!(decoded.is_client_request());
    }

    #[test]
    fn test_ok_omits_absent_value() {
        let put_ok = serde_json::to_string(&envelope(Body::Ok {
            mid: "M3".to_owned(),
            value: None,
        }))
        .unwrap();
        assert!(!put_ok.contains("value"));

        let get_ok = serde_json::to_string(&envelope(Body::Ok {
            mid: "M3".to_owned(),
            value: Some(String::new()),
        }))
        .unwrap();
        assert!(get_ok.contains(r#""value":"""#));
    }

    #[test]
    fn test_append_entries_wire_names() {
        let entry = LogEntry {
            term: Term::new(1),
            key: "k".to_owned(),
            value: "v".to_owned(),
            client: ReplicaId::new("C1"),
            mid: "M4".to_owned(),
            received_by: ReplicaId::new("0001"),
        };
        let encoded = serde_json::to_string(&envelope(Body::AppendEntries {
            term: Term::new(1),
            entries: vec![entry],
            leader_commit: LogIndex::NONE,
            prev_log_term: Term::NONE,
            prev_log_index: LogIndex::NONE,
        }))
        .unwrap();

        for key in [
            r#""type":"appendEntries""#,
            r#""leaderCommit":-1"#,
            r#""prevLogTerm":-1"#,
            r#""prevLogIndex":-1"#,
            r#""received_by":"0001""#,
        ] {
            assert!(encoded.contains(key), "missing {key} in {encoded}");
        }

        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        match decoded.body {
            Body::AppendEntries {
                prev_log_index,
                ref entries,
                ..
            } => {
                assert!(prev_log_index.is_none());
                assert_eq!(entries.len(), 1);
            }
            _ => panic!("wrong payload"),
        }
    }

    #[test]
    fn test_request_vote_round_trip() {
        let original = envelope(Body::RequestVote {
            term: Term::new(3),
            last_log_index: LogIndex::new(7),
            last_log_term: Term::new(2),
        });
        let encoded = serde_json::to_string(&original).unwrap();
        assert!(encoded.contains(r#""type":"requestVote""#));
        assert!(encoded.contains(r#""lastLogIndex":7"#));
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_vote_and_reply_tags() {
        let vote = serde_json::to_string(&envelope(Body::Vote {
            term: Term::new(1),
            vote: true,
        }))
        .unwrap();
        assert!(vote.contains(r#""type":"vote""#));

        let reply = serde_json::to_string(&envelope(Body::AppendEntriesReply {
            term: Term::new(1),
            success: false,
        }))
        .unwrap();
        assert!(reply.contains(r#""type":"appendEntriesReply""#));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let raw = r#"{"src":"0001","dst":"0002","leader":"FFFF","type":"hello"}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        // A put without a value must not parse.
        let raw = r#"{"src":"0001","dst":"0002","leader":"FFFF","type":"put","MID":"M1","key":"k"}"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }

    #[test]
    fn test_broadcast_destination() {
        let raw = r#"{"src":"0001","dst":"FFFF","leader":"FFFF","type":"requestVote","term":1,"lastLogIndex":-1,"lastLogTerm":-1}"#;
        let decoded: Envelope = serde_json::from_str(raw).unwrap();
        assert!(decoded.dst.is_broadcast());
        assert!(decoded.leader.is_broadcast());
    }

    #[test]
    fn test_mid_accessor() {
        assert_eq!(
            Body::Redirect {
                mid: "M9".to_owned()
            }
            .mid(),
            Some("M9")
        );
        assert_eq!(
            Body::Vote {
                term: Term::ZERO,
                vote: false
            }
            .mid(),
            None
        );
    }
}
