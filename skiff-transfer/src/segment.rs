//! Segment wire model and codec.
//!
//! One JSON text object per datagram, UTF-8. A data segment:
//!
//! ```json
//! {"sequence": 1000, "data": "...", "ack": false, "eof": false, "checksum": "..."}
//! ```
//!
//! The checksum is the MD5 hex digest of the concatenation of the other four
//! fields' string forms, in the order `sequence ++ data ++ ack ++ eof`, with
//! booleans rendered lowercase as in JSON. The receiver's reply carries the
//! acknowledged sequence number and its next expected byte:
//!
//! ```json
//! {"ack": 1000, "expected_seq": 2000}
//! ```

use serde::{Deserialize, Serialize};
use skiff_core::Seq;
use thiserror::Error;

use crate::limits::DATAGRAM_BYTES_MAX;

/// Codec errors. Malformed datagrams are dropped by the caller, never fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The datagram was not a well-formed segment object.
    #[error("malformed segment: {0}")]
    Json(#[from] serde_json::Error),

    /// The embedded checksum does not match the recomputed digest.
    #[error("checksum mismatch for sequence {sequence}")]
    ChecksumMismatch {
        /// Sequence number of the corrupt segment.
        sequence: Seq,
    },

    /// The encoded segment exceeds the datagram size cap.
    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge {
        /// Actual encoded size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// One transfer segment: a payload (or EOF marker) plus integrity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Segment {
    /// Byte offset of the first payload byte.
    pub sequence: Seq,
    /// Payload text. Empty for EOF segments.
    pub data: String,
    /// Direction flag; always false for sender-to-receiver segments.
    pub ack: bool,
    /// End-of-stream marker.
    pub eof: bool,
    /// MD5 hex digest of the other four fields' string forms.
    pub checksum: String,
}

impl Segment {
    /// Builds a data segment with a freshly computed checksum.
    #[must_use]
    pub fn data(sequence: Seq, data: String) -> Self {
        let checksum = digest(sequence, &data, false, false);
        Self {
            sequence,
            data,
            ack: false,
            eof: false,
            checksum,
        }
    }

    /// Builds an EOF segment at the end-of-stream offset.
    #[must_use]
    pub fn end_of_stream(sequence: Seq) -> Self {
        let checksum = digest(sequence, "", false, true);
        Self {
            sequence,
            data: String::new(),
            ack: false,
            eof: true,
            checksum,
        }
    }

    /// Returns true if the embedded checksum matches the recomputed digest.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.checksum == digest(self.sequence, &self.data, self.ack, self.eof)
    }

    /// Encodes the segment as a JSON datagram.
    ///
    /// # Errors
    /// Returns an error if the encoded form exceeds the datagram cap.
    pub fn encode(&self) -> CodecResult<String> {
        let encoded = serde_json::to_string(self)?;
        if encoded.len() > DATAGRAM_BYTES_MAX {
            return Err(CodecError::DatagramTooLarge {
                size: encoded.len(),
                max: DATAGRAM_BYTES_MAX,
            });
        }
        Ok(encoded)
    }

    /// Decodes and verifies a segment from a JSON datagram.
    ///
    /// # Errors
    /// Returns an error on malformed JSON, missing fields, or a checksum
    /// mismatch.
    pub fn decode(datagram: &str) -> CodecResult<Self> {
        let segment: Self = serde_json::from_str(datagram)?;
        if !segment.verify() {
            return Err(CodecError::ChecksumMismatch {
                sequence: segment.sequence,
            });
        }
        Ok(segment)
    }
}

/// The receiver's acknowledgment reply.
///
/// `ack` names one delivered segment (matched against the outstanding set);
/// `expected_seq` is the receiver's cumulative cursor, the next byte it is
/// waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckReply {
    /// Sequence number of the segment being acknowledged.
    pub ack: Seq,
    /// The next byte offset the receiver expects.
    pub expected_seq: Seq,
}

impl AckReply {
    /// Creates a reply.
    #[must_use]
    pub const fn new(ack: Seq, expected_seq: Seq) -> Self {
        Self { ack, expected_seq }
    }

    /// Encodes the reply as a JSON datagram.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a reply from a JSON datagram.
    ///
    /// # Errors
    /// Returns an error on malformed JSON or missing fields.
    pub fn decode(datagram: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(datagram)?)
    }
}

/// MD5 hex digest over `sequence ++ data ++ ack ++ eof` string forms.
fn digest(sequence: Seq, data: &str, ack: bool, eof: bool) -> String {
    let input = format!("{}{data}{ack}{eof}", sequence.get());
    format!("{:x}", md5::compute(input))
}
