//! Shared error type for configuration and invariant failures.
//!
//! Wire-level failures (malformed datagrams, framing errors) live in the
//! crates that own the codec; this type covers the cross-cutting cases.

use std::fmt;

/// The result type for fallible skiff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared across the skiff crates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument {
            name: "payload_bytes_max",
            reason: "must be positive",
        };
        assert_eq!(
            format!("{err}"),
            "invalid argument 'payload_bytes_max': must be positive"
        );
    }
}
