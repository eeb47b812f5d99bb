//! CLI error handling with semantic exit codes.
//!
//! # Exit Code Categories
//!
//! | Code | Category | Description |
//! |------|----------|-------------|
//! | 0 | Success | Every selected library was generated |
//! | 1 | `Internal` | Unexpected/internal error |
//! | 2 | `Usage` | Invalid arguments or configuration |
//! | 3 | `NotFound` | Catalog, library or file not found |
//! | 4 | `Incomplete` | The run finished with failed or pending libraries |
//! | 5 | `Network` | The generation service could not be reached |
//! | 7 | `Integrity` | Progress store locked, unwritable or corrupt |
//!
//! ```bash
//! rulegen run
//! case $? in
//!     0) echo "done" ;;
//!     4) echo "some libraries failed, run again to retry" ;;
//!     *) echo "could not run" ;;
//! esac
//! ```

use std::fmt;

/// Semantic error category determining the exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCategory {
    /// Unexpected or internal error (exit code 1).
    Internal = 1,

    /// Invalid arguments or configuration (exit code 2).
    ///
    /// Covers flag validation, malformed `rulegen.toml` and a missing API key.
    Usage = 2,

    /// Requested resource not found (exit code 3).
    NotFound = 3,

    /// The run ended with at least one job failed or left pending (exit code 4).
    ///
    /// Every job was still attempted; a later run retries the unfinished ones.
    Incomplete = 4,

    /// Network failure outside of a single generation attempt (exit code 5).
    Network = 5,

    /// Local state is unusable (exit code 7).
    Integrity = 7,
}

impl ErrorCategory {
    /// Get the exit code for this category.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        self as u8
    }

    /// Category for a core library error.
    #[must_use]
    pub const fn from_core(err: &rulegen_core::Error) -> Self {
        use rulegen_core::Error;
        match err {
            Error::Config(_) | Error::Catalog(_) | Error::Serialization(_) => Self::Usage,
            Error::NotFound(_) => Self::NotFound,
            Error::Network(_) => Self::Network,
            Error::Storage(_) => Self::Integrity,
            Error::Io(_) => Self::Internal,
        }
    }

    /// Infer the error category from an error message.
    ///
    /// Fallback for errors that were never categorized.
    #[must_use]
    pub fn infer_from_message(msg: &str) -> Self {
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("network")
            || msg_lower.contains("connection")
            || msg_lower.contains("dns")
            || msg_lower.contains("unreachable")
        {
            return Self::Network;
        }

        if msg_lower.contains("not found")
            || msg_lower.contains("no such")
            || msg_lower.contains("does not exist")
        {
            return Self::NotFound;
        }

        if msg_lower.contains("corrupt")
            || msg_lower.contains("in use by another process")
            || msg_lower.contains("progress store")
        {
            return Self::Integrity;
        }

        if msg_lower.contains("invalid argument")
            || msg_lower.contains("invalid value")
            || msg_lower.contains("configuration")
        {
            return Self::Usage;
        }

        Self::Internal
    }
}

/// A CLI error with a semantic category for exit code mapping.
///
/// ```rust,ignore
/// use rulegen_cli::error::CliError;
///
/// let err = CliError::not_found("library 'react' is not in the catalog");
/// assert_eq!(err.exit_code(), 3);
/// ```
#[derive(Debug)]
pub struct CliError {
    /// The semantic category of this error.
    pub category: ErrorCategory,
    /// The underlying error with full context.
    pub source: anyhow::Error,
}

impl CliError {
    /// Create a new CLI error with explicit category.
    pub fn new(category: ErrorCategory, source: impl Into<anyhow::Error>) -> Self {
        Self {
            category,
            source: source.into(),
        }
    }

    /// Create a usage error.
    pub fn usage(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorCategory::Usage, source)
    }

    /// Create a not-found error.
    pub fn not_found(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorCategory::NotFound, source)
    }

    /// Create an incomplete-run error.
    pub fn incomplete(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorCategory::Incomplete, source)
    }

    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.category.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Determine the exit code from an `anyhow::Error`.
///
/// An explicit [`CliError`] wins, then the first core error in the chain,
/// then the message heuristic.
#[must_use]
pub fn exit_code_from_error(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }

    if let Some(core_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<rulegen_core::Error>())
    {
        return ErrorCategory::from_core(core_err).exit_code();
    }

    ErrorCategory::infer_from_message(&err.to_string()).exit_code()
}
