//! Error type shared by readers and builders.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can arise when building, opening or querying a store.
///
/// A lookup that finds nothing is not an error: dictionaries return
/// [`crate::NOT_FOUND`] and index scans return empty sequences.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error (disk full, permission denied, ...).
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Structural problem with inputs or unsupported feature.
    #[error("{0}")]
    Invalid(&'static str),
    /// The file failed an integrity or bounds check.
    #[error("{0}")]
    Corrupt(String),
    /// Caller asked for an id or index outside the valid range.
    #[error("{what} {index} out of range (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: u64,
        limit: u64,
    },
    /// A term reached the second composite pass without being seen in the first.
    #[error("term not visited in the first pass: {0}")]
    UnseenTerm(String),
    /// Refusing to publish over an existing, non-empty destination.
    #[error("destination {} already exists", .0.display())]
    DestinationExists(PathBuf),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub(crate) fn corrupt(msg: impl Into<String>) -> StoreError {
    StoreError::Corrupt(msg.into())
}
