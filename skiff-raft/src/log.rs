//! Log entries and the in-memory replicated log.
//!
//! The log is 0-indexed. Wire values use `-1` ([`LogIndex::NONE`],
//! [`Term::NONE`]) for "before the first entry" and "empty log", and the
//! accessors here return those sentinels so callers never special-case
//! emptiness.

use serde::{Deserialize, Serialize};
use skiff_core::{LogIndex, ReplicaId, Term};

/// One state-machine command in the replicated log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term in which the entry was created.
    pub term: Term,
    /// Key being written.
    pub key: String,
    /// Value being written.
    pub value: String,
    /// Id of the client that issued the put.
    pub client: ReplicaId,
    /// The client's request id, echoed in the eventual reply.
    pub mid: String,
    /// Id of the replica that accepted the put while leader. Used to route
    /// redirects when the entry is overwritten by log reconciliation.
    pub received_by: ReplicaId,
}

/// The in-memory replicated log.
///
/// Only the owning replica mutates it: the leader appends on client puts,
/// followers splice their suffix during reconciliation.
#[derive(Debug, Default)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the index of the last entry, or [`LogIndex::NONE`].
    #[must_use]
    pub fn last_index(&self) -> LogIndex {
        match i64::try_from(self.entries.len()) {
            Ok(len) => LogIndex::new(len - 1),
            Err(_) => unreachable!("log length fits in i64"),
        }
    }

    /// Returns the term of the last entry, or [`Term::NONE`].
    #[must_use]
    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(Term::NONE, |entry| entry.term)
    }

    /// Returns the index one past the last entry (where the next append
    /// lands).
    #[must_use]
    pub fn next_index(&self) -> LogIndex {
        self.last_index().next()
    }

    /// Returns the entry at `index`, if present.
    #[must_use]
    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        Self::offset(index).and_then(|offset| self.entries.get(offset))
    }

    /// Returns the term at `index`, or [`Term::NONE`] for out-of-range
    /// indexes. By convention index `-1` has term `-1`.
    #[must_use]
    pub fn term_at(&self, index: LogIndex) -> Term {
        self.get(index).map_or(Term::NONE, |entry| entry.term)
    }

    /// Appends one entry.
    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Returns up to `max` entries starting at `start`, cloned for the wire.
    #[must_use]
    pub fn entries_from(&self, start: LogIndex, max: usize) -> Vec<LogEntry> {
        let Some(offset) = Self::offset(start) else {
            return Vec::new();
        };
        if offset >= self.entries.len() {
            return Vec::new();
        }
        let end = offset.saturating_add(max).min(self.entries.len());
        self.entries[offset..end].to_vec()
    }

    /// Truncates the log after `last_to_keep`, returning the removed suffix
    /// in order. `LogIndex::NONE` removes everything.
    pub fn truncate_after(&mut self, last_to_keep: LogIndex) -> Vec<LogEntry> {
        let keep = Self::offset(last_to_keep).map_or(0, |offset| offset + 1);
        if keep >= self.entries.len() {
            return Vec::new();
        }
        self.entries.split_off(keep)
    }

    /// Returns true if a log described by (`last_term`, `last_index`) is at
    /// least as up-to-date as this one: higher last term, or equal last term
    /// and at least as long. Used to gate vote grants.
    #[must_use]
    pub fn candidate_up_to_date(&self, last_term: Term, last_index: LogIndex) -> bool {
        last_term > self.last_term()
            || (last_term == self.last_term() && last_index >= self.last_index())
    }

    fn offset(index: LogIndex) -> Option<usize> {
        usize::try_from(index.get()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: i64, key: &str) -> LogEntry {
        LogEntry {
            term: Term::new(term),
            key: key.to_owned(),
            value: format!("value-{key}"),
            client: ReplicaId::new("C1"),
            mid: format!("mid-{key}"),
            received_by: ReplicaId::new("0000"),
        }
    }

    #[test]
    fn test_empty_log_sentinels() {
        let log = RaftLog::new();
        assert!(log.is_empty());
        assert_eq!(log.last_index(), LogIndex::NONE);
        assert_eq!(log.last_term(), Term::NONE);
        assert_eq!(log.next_index(), LogIndex::ZERO);
        assert_eq!(log.term_at(LogIndex::NONE), Term::NONE);
        assert_eq!(log.term_at(LogIndex::ZERO), Term::NONE);
    }

    #[test]
    fn test_append_and_lookup() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(2, "c"));

        assert_eq!(log.len(), 3);
        assert_eq!(log.last_index(), LogIndex::new(2));
        assert_eq!(log.last_term(), Term::new(2));
        assert_eq!(log.term_at(LogIndex::new(1)), Term::new(1));
        assert_eq!(log.get(LogIndex::new(2)).unwrap().key, "c");
        assert!(log.get(LogIndex::new(3)).is_none());
    }

    #[test]
    fn test_entries_from_respects_batch_limit() {
        let mut log = RaftLog::new();
        for i in 0..5 {
            log.append(entry(1, &format!("k{i}")));
        }

        let batch = log.entries_from(LogIndex::new(1), 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key, "k1");
        assert_eq!(batch[1].key, "k2");

        assert_eq!(log.entries_from(LogIndex::new(4), 50).len(), 1);
        assert!(log.entries_from(LogIndex::new(5), 50).is_empty());
        assert!(log.entries_from(LogIndex::NONE, 50).is_empty());
    }

    #[test]
    fn test_truncate_after_returns_removed_suffix() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(2, "c"));

        let removed = log.truncate_after(LogIndex::ZERO);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].key, "b");
        assert_eq!(removed[1].key, "c");
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_term(), Term::new(1));

        // Truncating at or past the end is a no-op.
        assert!(log.truncate_after(LogIndex::ZERO).is_empty());
        assert!(log.truncate_after(LogIndex::new(10)).is_empty());
    }

    #[test]
    fn test_truncate_everything() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        let removed = log.truncate_after(LogIndex::NONE);
        assert_eq!(removed.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_candidate_up_to_date() {
        let mut log = RaftLog::new();
        log.append(entry(1, "a"));
        log.append(entry(2, "b"));
        // Our log: last term 2, last index 1.

        // Higher last term always wins.
        assert!(log.candidate_up_to_date(Term::new(3), LogIndex::NONE));
        // Equal term needs at least our length.
        assert!(log.candidate_up_to_date(Term::new(2), LogIndex::new(1)));
        assert!(log.candidate_up_to_date(Term::new(2), LogIndex::new(5)));
        assert!(!log.candidate_up_to_date(Term::new(2), LogIndex::ZERO));
        // Lower term never wins, regardless of length.
        assert!(!log.candidate_up_to_date(Term::new(1), LogIndex::new(10)));
    }

    #[test]
    fn test_empty_log_grants_to_empty_candidate() {
        let log = RaftLog::new();
        assert!(log.candidate_up_to_date(Term::NONE, LogIndex::NONE));
    }
}
