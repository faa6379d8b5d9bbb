//! Strongly-typed identifiers for skiff entities.
//!
//! Explicit types prevent bugs from mixing up ordinals: a log index is not a
//! term is not a byte offset. Consensus ordinals are signed because the wire
//! format uses `-1` as the "nothing yet" sentinel (empty log, nothing
//! committed), so the sentinel must round-trip through JSON unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Macro to generate signed ordinal wrappers for the consensus wire format.
///
/// Each ordinal wraps an i64 and provides:
/// - Type safety (a `Term` cannot be compared with a `LogIndex`)
/// - The wire sentinel `NONE = -1`
/// - Transparent JSON serialization
macro_rules! define_ordinal {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// The wire sentinel for "no such value" (empty log, no commit).
            pub const NONE: Self = Self(-1);

            /// The first valid ordinal.
            pub const ZERO: Self = Self(0);

            /// Creates an ordinal from a raw i64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw i64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Returns true if this is the `-1` sentinel.
            #[inline]
            #[must_use]
            pub const fn is_none(self) -> bool {
                self.0 < 0
            }

            /// Returns the next ordinal in sequence.
            ///
            /// # Panics
            /// Panics if the ordinal would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < i64::MAX, "ordinal overflow");
                Self(self.0 + 1)
            }

            /// Returns the previous ordinal. `ZERO.prev()` is `NONE`, which
            /// is exactly the wire convention for the index before the first
            /// log entry.
            #[inline]
            #[must_use]
            pub const fn prev(self) -> Self {
                Self(self.0 - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.get()
            }
        }
    };
}

define_ordinal!(Term, "term", "A consensus term. Each term has at most one leader.");
define_ordinal!(LogIndex, "idx", "A 0-based index into the replicated log.");

/// A byte offset into the transfer stream.
///
/// Segments are identified by the offset of their first payload byte, so the
/// sequence number advances by the payload length, not by one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Seq(u64);

impl Seq {
    /// The offset of the first byte.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence number from a raw byte offset.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw byte offset.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the sequence number `len` payload bytes further on.
    ///
    /// # Panics
    /// Panics if the offset would overflow.
    #[inline]
    #[must_use]
    pub fn advance(self, len: usize) -> Self {
        let len = u64::try_from(len).expect("payload length fits in u64");
        assert!(self.0 <= u64::MAX - len, "sequence overflow");
        Self(self.0 + len)
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Seq {
    fn from(offset: u64) -> Self {
        Self::new(offset)
    }
}

/// Identifier of one consensus replica (or of a client in the same id space).
///
/// Ids are short opaque strings assigned by the deployment. The reserved id
/// `FFFF` doubles on the wire as the broadcast destination and as the
/// unknown-leader sentinel.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

/// The reserved broadcast / unknown-leader id.
const BROADCAST_ID: &str = "FFFF";

impl ReplicaId {
    /// Creates a replica id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the reserved `FFFF` id: broadcast as a destination, unknown
    /// as a leader field.
    #[must_use]
    pub fn broadcast() -> Self {
        Self(BROADCAST_ID.to_owned())
    }

    /// Returns true if this is the reserved `FFFF` id.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ID
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica({})", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ReplicaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
