//! # rulegen-core
//!
//! Resumable, rate-limited orchestration for generating per-library rule
//! documents with a remote text-generation service.
//!
//! Hundreds of independent, failure-prone remote calls are driven to
//! completion by a fixed worker pool. Every call goes through one shared rate
//! limiter and a bounded retry policy; every terminal job status is written to
//! a durable progress log, so an interrupted run resumes without redoing
//! finished work.
//!
//! ## Architecture
//!
//! - **Rate limiting**: [`RateLimiter`], a windowed token bucket shared by all workers
//! - **Retry**: [`run_with_retry`] with a configurable transient/fatal [`Classifier`]
//! - **Chunking**: [`Chunker`] splits oversized payloads and joins outputs in order
//! - **Progress**: [`ProgressStore`], an fsync'd append-only JSON-lines log
//! - **Scheduling**: [`JobQueue`] and [`Scheduler`], one tokio task per worker
//! - **Research**: [`ResearchClient`] fills a [`ResearchCache`] before generation
//! - **Collaborators**: [`Catalog`], [`PromptBuilder`], [`LlmClient`], [`MdcWriter`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rulegen_core::{
//!     Catalog, Config, LibraryFilter, LlmClient, MdcWriter, ProgressStore, PromptBuilder,
//!     Scheduler,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> rulegen_core::Result<()> {
//! let config = Config::load("rulegen.toml".as_ref())?;
//! config.validate()?;
//!
//! let catalog = Catalog::load(&config.paths.libraries)?;
//! let prompts = PromptBuilder::from_file(&config.paths.instructions)
//!     .with_research_dir(&config.paths.research_dir);
//! let jobs = catalog
//!     .select(&LibraryFilter::default())
//!     .iter()
//!     .map(|entry| prompts.build_job(entry))
//!     .collect();
//!
//! let store = Arc::new(ProgressStore::open(&config.paths.progress_file)?);
//! let scheduler = Scheduler::new(
//!     config.scheduler_config(),
//!     LlmClient::from_config(&config.api)?,
//!     MdcWriter::new(&config.paths.output_dir),
//!     store,
//! );
//! let summary = scheduler.run(jobs, &CancellationToken::new()).await?;
//! println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//! # Ok(())
//! # }
//! ```

/// Library catalog loading and filtering
pub mod catalog;
/// Payload splitting and ordered reassembly
pub mod chunker;
/// Configuration file handling
pub mod config;
/// Error types and result aliases
pub mod error;
/// The generation seam used by the scheduler
pub mod generate;
/// Jobs, chunks and job status
pub mod job;
/// OpenAI-compatible generation client
pub mod llm;
/// Durable progress log
pub mod progress;
/// Prompt construction
pub mod prompt;
/// Work queue with per-job exclusivity
pub mod queue;
/// Best-practice research fetched before generation
pub mod research;
/// Shared rate limiter
pub mod rate_limit;
/// Bounded retry with backoff
pub mod retry;
/// Worker pool
pub mod scheduler;
/// `.mdc` document writer
pub mod writer;

pub use catalog::{Catalog, LibraryEntry, LibraryFilter};
pub use chunker::Chunker;
pub use config::{ApiConfig, Config, PathsConfig, ProcessingConfig, ResearchConfig};
pub use error::{ChunkAssemblyError, Error, Result};
pub use generate::{GenerateError, GenerationRequest, Generator};
pub use job::{Chunk, Job, JobId, JobStatus};
pub use llm::{LlmClient, RuleDocument};
pub use progress::{ProgressRecord, ProgressStore, ProgressSummary, RecordStatus};
pub use prompt::PromptBuilder;
pub use queue::JobQueue;
pub use research::{Research, ResearchCache, ResearchClient, ResearchSummary, Researcher};
pub use rate_limit::{RateLimitConfig, RateLimiter, RateLimiterStats};
pub use retry::{
    Attempted, Classifier, FailureClass, RetryError, RetryPolicy, StatusClassifier,
    run_with_retry,
};
pub use scheduler::{OutputSink, ProgressCallback, RunSummary, Scheduler, SchedulerConfig};
pub use writer::MdcWriter;
