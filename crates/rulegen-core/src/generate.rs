//! The generation operation seen by the orchestration core.
//!
//! [`Generator`] is the seam between the scheduler and the remote
//! text-generation service. The scheduler only ever calls it through the rate
//! limiter and the retry policy.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::JobId;

/// One generation call: a single chunk of a single job.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// Owning job.
    pub job_id: &'a JobId,
    /// Index of the chunk this prompt was built from.
    pub chunk_index: usize,
    /// Number of chunks in the owning job.
    pub chunk_count: usize,
    /// Full prompt text.
    pub prompt: String,
    /// Size of the chunk material in characters.
    pub size_hint: usize,
}

impl GenerationRequest<'_> {
    /// Whether this request carries the first chunk of its job.
    #[must_use]
    pub const fn is_first_chunk(&self) -> bool {
        self.chunk_index == 0
    }
}

/// A single generation attempt failed.
///
/// Whether the failure is retried is decided by a
/// [`Classifier`](crate::retry::Classifier), not by the variant alone.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    /// Transport failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The service answered with a non-success status.
    #[error("service returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error body or reason phrase.
        message: String,
    },

    /// The service answered but the body was unusable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request itself was rejected before it was sent.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Remote text generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for one chunk prompt.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerateError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerateError> {
        (**self).generate(request).await
    }
}
