//! Worker pool that drives jobs to a terminal state.
//!
//! A [`Scheduler`] filters out jobs the [`ProgressStore`] already records as
//! succeeded, queues the rest and runs a fixed number of workers over the
//! queue. Each worker owns one job at a time:
//!
//! 1. mark it in progress (in memory and in the store)
//! 2. split its payload with the [`Chunker`]
//! 3. run every chunk through the [`RateLimiter`] and [`run_with_retry`]
//! 4. join the chunk outputs in index order and hand the text to the
//!    [`OutputSink`]
//! 5. mark it succeeded, or failed with the reason of the first failing chunk
//!
//! A failing job never stops the pool. Cancelling the token stops the
//! hand-out of new jobs; jobs already in flight finish their current
//! retry cycle and are left in progress, which the store reloads as pending.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rulegen_core::{ProgressStore, Scheduler, SchedulerConfig};
//! use tokio::task::JoinSet;
//! use tokio_util::sync::CancellationToken;
//!
//! let store = Arc::new(ProgressStore::open("progress.jsonl")?);
//! let scheduler = Scheduler::new(SchedulerConfig::default(), client, writer, store)
//!     .with_progress(|done, total| eprintln!("{done}/{total}"));
//! let summary = scheduler.run(jobs, &CancellationToken::new()).await?;
//! println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunker::Chunker;
use crate::generate::{GenerationRequest, Generator};
use crate::job::{Chunk, Job, JobId, JobStatus};
use crate::progress::ProgressStore;
use crate::queue::JobQueue;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::{Classifier, RetryError, RetryPolicy, StatusClassifier, run_with_retry};
use crate::{Error, Result};

/// Progress callback, called with `(completed, total)` after each job
/// reaches a terminal state.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Destination for the text of succeeded jobs.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist the joined output of `job`.
    ///
    /// May be called again for the same job in a later run; implementations
    /// must tolerate repeated writes.
    async fn write(&self, job: &Job, text: &str) -> Result<()>;
}

#[async_trait]
impl<S: OutputSink + ?Sized> OutputSink for Arc<S> {
    async fn write(&self, job: &Job, text: &str) -> Result<()> {
        (**self).write(job, text).await
    }
}

/// Operational parameters for one [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Concurrent workers (at least 1).
    pub workers: usize,
    /// Shared budget for outbound generation calls.
    pub rate_limit: RateLimitConfig,
    /// Retry bounds for every chunk.
    pub retry: RetryPolicy,
    /// Maximum chunk size in characters.
    pub max_chunk_size: usize,
    /// Overlap used when a chunk has to be cut by character count.
    pub chunk_overlap: usize,
    /// Chunks of one job generated concurrently (at least 1).
    pub chunk_concurrency: usize,
    /// Transient vs fatal decision for failed attempts.
    pub classifier: Arc<dyn Classifier>,
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("workers", &self.workers)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("chunk_concurrency", &self.chunk_concurrency)
            .finish_non_exhaustive()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            max_chunk_size: 50_000,
            chunk_overlap: 200,
            chunk_concurrency: 1,
            classifier: Arc::new(StatusClassifier::default()),
        }
    }
}

/// Outcome of one [`Scheduler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs that succeeded in this run.
    pub succeeded: usize,
    /// Jobs that failed in this run.
    pub failed: usize,
    /// Jobs left pending by a shutdown (never started or interrupted).
    pub pending: usize,
    /// Jobs skipped because the store already records them as succeeded.
    pub skipped: usize,
    /// Generation attempts made across all jobs.
    pub attempts: u64,
    /// Time workers spent waiting on the rate limiter.
    pub rate_limit_wait: Duration,
    /// Failed jobs and their reasons.
    pub failures: Vec<(JobId, String)>,
}

impl RunSummary {
    /// True when nothing failed and nothing was left pending.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0 && self.pending == 0
    }

    /// Jobs considered by the run, including skipped ones.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.pending + self.skipped
    }
}

enum Outcome {
    Succeeded,
    Failed(String),
    Interrupted,
}

enum ChunkFailure {
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    interrupted: usize,
    failures: Vec<(JobId, String)>,
}

/// Per-run counters shared by the worker tasks.
#[derive(Default)]
struct RunState {
    completed: AtomicUsize,
    attempts: AtomicU32,
    tally: Mutex<Tally>,
}

/// Everything a worker task needs, shared behind one `Arc`.
struct Engine<G, S> {
    config: SchedulerConfig,
    chunker: Chunker,
    limiter: RateLimiter,
    generator: G,
    sink: S,
    store: Arc<ProgressStore>,
}

/// Fixed-size worker pool over a [`JobQueue`].
///
/// Each worker is its own tokio task, so generation, output writes and
/// progress records of different jobs run in parallel on a multi-threaded
/// runtime.
pub struct Scheduler<G: Generator, S: OutputSink> {
    engine: Arc<Engine<G, S>>,
    progress_callback: Option<ProgressCallback>,
}

impl<G: Generator, S: OutputSink> fmt::Debug for Scheduler<G, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.engine.config)
            .field("store", &self.engine.store)
            .finish_non_exhaustive()
    }
}

impl<G: Generator + 'static, S: OutputSink + 'static> Scheduler<G, S> {
    /// Create a scheduler with its own rate limiter.
    #[must_use]
    pub fn new(config: SchedulerConfig, generator: G, sink: S, store: Arc<ProgressStore>) -> Self {
        let engine = Engine {
            chunker: Chunker::new(config.max_chunk_size, config.chunk_overlap),
            limiter: RateLimiter::new(config.rate_limit),
            config,
            generator,
            sink,
            store,
        };
        Self {
            engine: Arc::new(engine),
            progress_callback: None,
        }
    }

    /// Set progress callback.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Number of jobs in `jobs` that still need work.
    pub fn pending_count(&self, jobs: &[Job]) -> Result<usize> {
        let mut count = 0;
        for job in jobs {
            if !self.engine.store.is_done(&job.id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Drive every not-yet-succeeded job in `jobs` to a terminal state.
    ///
    /// Returns an error only when the progress store cannot be read; job
    /// failures are reported in the summary.
    pub async fn run(&self, jobs: Vec<Job>, cancel: &CancellationToken) -> Result<RunSummary> {
        let queue = JobQueue::new();
        let mut skipped = 0;
        for job in jobs {
            if self.engine.store.is_done(&job.id)? {
                debug!(job = %job.id, "already succeeded, skipping");
                skipped += 1;
                continue;
            }
            let id = job.id.clone();
            if !queue.push(job) {
                warn!(job = %id, "duplicate job id ignored");
            }
        }

        let total = queue.len();
        let workers = self.engine.config.workers.max(1).min(total.max(1));
        info!(
            jobs = total,
            skipped,
            workers,
            "starting generation run"
        );

        let stats_before = self.engine.limiter.stats();
        let queue = Arc::new(queue);
        let state = Arc::new(RunState::default());

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let engine = Arc::clone(&self.engine);
            let queue = Arc::clone(&queue);
            let state = Arc::clone(&state);
            let cancel = cancel.clone();
            let callback = self.progress_callback.clone();
            pool.spawn(async move {
                engine
                    .worker(worker, &queue, &cancel, total, &state, callback.as_ref())
                    .await;
            });
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker task ended abnormally");
            }
        }

        let not_started = queue.drain_pending().len();
        let tally = std::mem::take(&mut *state.tally.lock().unwrap_or_else(PoisonError::into_inner));
        let stats_after = self.engine.limiter.stats();

        let accounted = tally.succeeded + tally.failed + tally.interrupted + not_started;
        let lost = total.saturating_sub(accounted);
        if lost > 0 {
            error!(lost, "jobs held by a crashed worker are left pending");
        }

        let summary = RunSummary {
            succeeded: tally.succeeded,
            failed: tally.failed,
            pending: tally.interrupted + not_started + lost,
            skipped,
            attempts: u64::from(state.attempts.load(Ordering::Relaxed)),
            rate_limit_wait: stats_after.total_wait.saturating_sub(stats_before.total_wait),
            failures: tally.failures,
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            pending = summary.pending,
            skipped = summary.skipped,
            "generation run finished"
        );
        Ok(summary)
    }
}

impl<G: Generator, S: OutputSink> Engine<G, S> {
    async fn worker(
        &self,
        worker: usize,
        queue: &JobQueue,
        cancel: &CancellationToken,
        total: usize,
        state: &RunState,
        progress_callback: Option<&ProgressCallback>,
    ) {
        loop {
            if cancel.is_cancelled() {
                queue.close();
                debug!(worker, "shutdown requested, worker stopping");
                break;
            }
            let Some(mut job) = queue.pop() else {
                break;
            };

            let outcome = self.process(&mut job, cancel).await;
            queue.finish(&job.id);
            state.attempts.fetch_add(job.attempts, Ordering::Relaxed);

            let terminal = {
                let mut tally = state.tally.lock().unwrap_or_else(PoisonError::into_inner);
                match outcome {
                    Outcome::Succeeded => {
                        tally.succeeded += 1;
                        true
                    },
                    Outcome::Failed(reason) => {
                        tally.failed += 1;
                        tally.failures.push((job.id.clone(), reason));
                        true
                    },
                    Outcome::Interrupted => {
                        tally.interrupted += 1;
                        false
                    },
                }
            };
            if !terminal {
                continue;
            }

            let done = state.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(cb) = progress_callback {
                cb(done, total);
            }
        }
    }

    async fn process(&self, job: &mut Job, cancel: &CancellationToken) -> Outcome {
        job.transition(JobStatus::InProgress);
        if let Err(err) = self.record(&job.id, &job.status).await {
            error!(job = %job.id, error = %err, "could not record job start");
            let reason = format!("progress store: {err}");
            job.transition(JobStatus::Failed(reason.clone()));
            return Outcome::Failed(reason);
        }

        let chunks = job.split(&self.chunker).to_vec();
        let expected = chunks.len();
        debug!(job = %job.id, chunks = expected, "job started");

        let attempts = AtomicU32::new(0);
        let result = self.generate_chunks(job, &chunks, cancel, &attempts).await;
        job.attempts += attempts.into_inner();

        let next = match result {
            Err(ChunkFailure::Cancelled) => {
                info!(job = %job.id, "job interrupted by shutdown, left for the next run");
                return Outcome::Interrupted;
            },
            Err(ChunkFailure::Failed(reason)) => JobStatus::Failed(reason),
            Ok(outputs) => match Chunker::join(outputs, expected) {
                Err(err) => JobStatus::Failed(err.to_string()),
                Ok(text) => match self.sink.write(job, &text).await {
                    Ok(()) => JobStatus::Succeeded,
                    Err(err) => JobStatus::Failed(format!("output: {err}")),
                },
            },
        };

        job.transition(next);
        if let Err(err) = self.record(&job.id, &job.status).await {
            error!(job = %job.id, error = %err, "could not record job outcome");
            return Outcome::Failed(format!("progress store: {err}"));
        }

        match &job.status {
            JobStatus::Failed(reason) => {
                warn!(job = %job.id, attempts = job.attempts, reason = %reason, "job failed");
                Outcome::Failed(reason.clone())
            },
            _ => {
                info!(job = %job.id, attempts = job.attempts, "job succeeded");
                Outcome::Succeeded
            },
        }
    }

    /// Generate every chunk, stopping at the first failure.
    async fn generate_chunks(
        &self,
        job: &Job,
        chunks: &[Chunk],
        cancel: &CancellationToken,
        attempts: &AtomicU32,
    ) -> std::result::Result<Vec<(usize, String)>, ChunkFailure> {
        let total = chunks.len();
        let futures: Vec<_> = chunks
            .iter()
            .map(|chunk| self.generate_chunk(job, chunk, total, cancel, attempts))
            .collect();
        let mut pending = stream::iter(futures).buffer_unordered(self.config.chunk_concurrency.max(1));

        let mut outputs = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            outputs.push(result?);
        }
        Ok(outputs)
    }

    async fn generate_chunk(
        &self,
        job: &Job,
        chunk: &Chunk,
        total: usize,
        cancel: &CancellationToken,
        attempts: &AtomicU32,
    ) -> std::result::Result<(usize, String), ChunkFailure> {
        if cancel.is_cancelled() {
            return Err(ChunkFailure::Cancelled);
        }

        let prompt = job.prompt_for(chunk, total);
        let prompt = &prompt;
        let size_hint = chunk.text.chars().count();

        let result = run_with_retry(
            &self.config.retry,
            self.config.classifier.as_ref(),
            cancel,
            |attempt| async move {
                let waited = self.limiter.acquire().await;
                attempts.fetch_add(1, Ordering::Relaxed);
                debug!(
                    job = %job.id,
                    chunk = chunk.index,
                    attempt,
                    waited_ms = waited.as_millis() as u64,
                    "generation attempt"
                );
                let request = GenerationRequest {
                    job_id: &job.id,
                    chunk_index: chunk.index,
                    chunk_count: total,
                    prompt: prompt.clone(),
                    size_hint,
                };
                self.generator.generate(&request).await
            },
        )
        .await;

        match result {
            Ok(done) => Ok((chunk.index, done.value)),
            Err(RetryError::Cancelled { .. }) => Err(ChunkFailure::Cancelled),
            Err(err) => {
                let reason = if total > 1 {
                    format!("chunk {} of {total}: {err}", chunk.index + 1)
                } else {
                    err.to_string()
                };
                Err(ChunkFailure::Failed(reason))
            },
        }
    }

    async fn record(&self, id: &JobId, status: &JobStatus) -> Result<()> {
        let store = Arc::clone(&self.store);
        let id = id.clone();
        let status = status.clone();
        tokio::task::spawn_blocking(move || store.mark(&id, &status))
            .await
            .map_err(|e| Error::Storage(format!("progress writer task failed: {e}")))?
    }
}
