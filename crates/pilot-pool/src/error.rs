//! Error types for pool operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while claiming from or mutating the pool.
#[derive(Debug, Error)]
pub enum Error {
    /// The pool lock could not be acquired before the deadline.
    #[error("timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The pool document does not exist.
    #[error("pool document not found: {path}")]
    ConfigMissing { path: PathBuf },

    /// The pool document exists but could not be parsed.
    #[error("failed to parse pool document {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The consumer has no records left to take.
    #[error("no credentials left for consumer '{consumer}'")]
    EmptyPool { consumer: String },

    /// Every well-formed record for the consumer is already assigned.
    #[error("no unassigned credentials for consumer '{consumer}'")]
    NoUnassigned { consumer: String },

    /// The targeted record already carries an assigned device.
    #[error("record {index} is already assigned")]
    AlreadyAssigned { index: usize },

    /// The targeted record does not exist (stale index).
    #[error("record index {index} out of range (pool holds {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The targeted record has the wrong number of fields.
    #[error("record {index} is malformed")]
    MalformedRecord { index: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
