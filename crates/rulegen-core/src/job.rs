//! Job and chunk data model.
//!
//! A [`Job`] is one library's generation request. Its payload is split into
//! ordered [`Chunk`]s by the [`Chunker`](crate::chunker::Chunker); each chunk
//! becomes one generation call and the outputs are joined back in index order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chunker::Chunker;

/// Unique job identifier: `category/subcategory/library`.
///
/// ## Example
///
/// ```rust
/// use rulegen_core::JobId;
///
/// let id = JobId::from_parts("frontend_frameworks", "react", "react");
/// assert_eq!(id.as_str(), "frontend_frameworks/react/react");
/// assert_eq!(id.library(), "react");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an already-formed identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the identifier for a catalog entry.
    #[must_use]
    pub fn from_parts(category: &str, subcategory: &str, library: &str) -> Self {
        Self(format!("{category}/{subcategory}/{library}"))
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments of the identifier.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment (the library name for catalog jobs).
    #[must_use]
    pub fn library(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a job.
///
/// `Pending -> InProgress -> {Succeeded, Failed}`. Terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Pending,
    /// Owned by a worker.
    InProgress,
    /// All chunks generated and joined in order.
    Succeeded,
    /// Fatal error, exhausted retries or chunk assembly failure.
    Failed(String),
}

impl JobStatus {
    /// Returns true if no transition can leave this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Succeeded | Self::Failed(_) | Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in_progress"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Ordered fragment of a job's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the parent job, starting at 0.
    pub index: usize,
    /// Fragment text.
    pub text: String,
}

/// One unit of work: a single library's generation request.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique key.
    pub id: JobId,
    /// Shared instructions prepended to every chunk prompt.
    pub preamble: String,
    /// Splittable prompt material.
    pub payload: String,
    /// Current state.
    pub status: JobStatus,
    /// Generation attempts made so far, across all chunks.
    pub attempts: u32,
    /// Chunks produced by the last split; empty until the job is picked up.
    pub chunks: Vec<Chunk>,
}

impl Job {
    /// Create a pending job.
    #[must_use]
    pub fn new(id: JobId, preamble: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id,
            preamble: preamble.into(),
            payload: payload.into(),
            status: JobStatus::Pending,
            attempts: 0,
            chunks: Vec::new(),
        }
    }

    /// Move to `next`, returning false (and leaving the state untouched) if the
    /// transition is not legal.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(&next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Split the payload into chunks with `chunker`, replacing any previous split.
    pub fn split(&mut self, chunker: &Chunker) -> &[Chunk] {
        self.chunks = chunker.split(&self.payload);
        &self.chunks
    }

    /// Render the prompt for one chunk.
    ///
    /// A part marker is inserted only when the job has more than one chunk.
    #[must_use]
    pub fn prompt_for(&self, chunk: &Chunk, total: usize) -> String {
        let mut prompt = String::with_capacity(self.preamble.len() + chunk.text.len() + 64);
        prompt.push_str(&self.preamble);
        if !prompt.is_empty() && !prompt.ends_with('\n') {
            prompt.push('\n');
        }
        if total > 1 {
            prompt.push_str(&format!(
                "\nThis is part {} of {} of the source material. Cover only what this part adds.\n",
                chunk.index + 1,
                total
            ));
        }
        prompt.push('\n');
        prompt.push_str(&chunk.text);
        prompt
    }
}
