//! Error types for rulegen-core operations.
//!
//! Errors are split by who produces them:
//!
//! - [`Error`]: local failures (I/O, configuration, catalog, progress storage,
//!   serialization). These abort the operation that raised them.
//! - [`GenerateError`](crate::generate::GenerateError): a single remote
//!   generation attempt failed. These are classified as transient or fatal by a
//!   [`Classifier`](crate::retry::Classifier) and never abort the run.
//! - [`ChunkAssemblyError`]: an internal invariant of chunk reassembly was
//!   violated. It fails the owning job and is reported distinctly from remote
//!   failures.
//!
//! ```rust
//! use rulegen_core::Error;
//!
//! let err = Error::Storage("progress log is locked".to_string());
//! assert_eq!(err.to_string(), "Storage error: progress log is locked");
//! ```

use thiserror::Error;

/// The main error type for rulegen-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Building or using the HTTP client failed outside of a generation attempt.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Configuration is invalid or inaccessible.
    ///
    /// ## Common Causes
    ///
    /// - Invalid TOML syntax in `rulegen.toml`
    /// - Values outside their valid range (zero workers, `min_wait > max_wait`)
    /// - Missing API key environment variable
    #[error("Configuration error: {0}")]
    Config(String),

    /// The library catalog could not be loaded or a requested entry is absent.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Progress store operation failed.
    ///
    /// ## Common Causes
    ///
    /// - Another process holds the progress store lock
    /// - The progress log cannot be appended or synced
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Chunk reassembly invariant violation.
///
/// Raised by [`Chunker::join`](crate::chunker::Chunker::join) when the set of
/// chunk outputs is not exactly `0..expected`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkAssemblyError {
    /// An index in `0..expected` has no output.
    #[error("chunk assembly: missing chunk {index} of {expected}")]
    Missing {
        /// Index with no output.
        index: usize,
        /// Number of chunks the job was split into.
        expected: usize,
    },

    /// Two outputs claim the same index.
    #[error("chunk assembly: duplicate output for chunk {index}")]
    Duplicate {
        /// Index that appeared twice.
        index: usize,
    },

    /// An output carries an index outside `0..expected`.
    #[error("chunk assembly: chunk {index} out of range (expected {expected} chunks)")]
    OutOfRange {
        /// Offending index.
        index: usize,
        /// Number of chunks the job was split into.
        expected: usize,
    },
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
