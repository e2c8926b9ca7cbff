//! The soakgen payloads
//!
//! This library computes which log record soakgen emits and when. Nothing in
//! here performs I/O. See [`RecordDistribution`].

#![deny(clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod distribution;

pub use distribution::RecordDistribution;

/// Errors related to record generation
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested record size cannot hold even an empty record.
    #[error("Record size {size} is smaller than the smallest possible record, {minimum} bytes: {smallest}")]
    RecordTooSmall {
        /// Requested size of every record, in bytes
        size: usize,
        /// Size of a record with no padding at all, in bytes
        minimum: usize,
        /// The record with no padding, for debugging
        smallest: String,
    },
    /// Json record could not be encoded
    #[error("Json record could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
}
