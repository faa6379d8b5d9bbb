//! Core types shared by the skiff protocol crates.
//!
//! Both protocol cores (the reliable transfer sender and the consensus
//! replica) exchange JSON text objects on the wire, so every identifier here
//! serializes transparently as its underlying JSON value.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{LogIndex, ReplicaId, Seq, Term};
