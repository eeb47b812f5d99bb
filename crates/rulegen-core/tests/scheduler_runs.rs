//! End-to-end scheduler behaviour over a real progress log.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rulegen_core::{
    GenerateError, GenerationRequest, Generator, Job, JobId, JobStatus, OutputSink,
    ProgressStore, RateLimitConfig, RecordStatus, RetryPolicy, Scheduler, SchedulerConfig,
    StatusClassifier,
};
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Transient,
    Fatal,
    CancelThenSucceed,
}

/// Generator that records every call and follows a per-job script.
struct RecordingGenerator {
    script: HashMap<JobId, Behaviour>,
    calls: Mutex<Vec<(JobId, Instant)>>,
    cancel: CancellationToken,
}

impl RecordingGenerator {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            script: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            cancel,
        }
    }

    fn with(mut self, id: &str, behaviour: Behaviour) -> Self {
        self.script.insert(JobId::new(id), behaviour);
        self
    }

    fn calls_for(&self, id: &str) -> usize {
        let id = JobId::new(id);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == id)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn call_times(&self) -> Vec<Instant> {
        let mut times: Vec<Instant> = self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect();
        times.sort();
        times
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerateError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.job_id.clone(), Instant::now()));

        match self
            .script
            .get(request.job_id)
            .copied()
            .unwrap_or(Behaviour::Succeed)
        {
            Behaviour::Succeed => Ok(format!("rules for {}", request.job_id)),
            Behaviour::Transient => Err(GenerateError::Status {
                status: 503,
                message: "overloaded".into(),
            }),
            Behaviour::Fatal => Err(GenerateError::Status {
                status: 400,
                message: "bad request".into(),
            }),
            Behaviour::CancelThenSucceed => {
                self.cancel.cancel();
                Ok(format!("rules for {}", request.job_id))
            },
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    written: Mutex<Vec<JobId>>,
}

#[async_trait]
impl OutputSink for CollectingSink {
    async fn write(&self, job: &Job, _text: &str) -> rulegen_core::Result<()> {
        self.written.lock().unwrap().push(job.id.clone());
        Ok(())
    }
}

fn config(workers: usize, calls_per_second: u32, retry: RetryPolicy) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        rate_limit: RateLimitConfig::per_second(calls_per_second),
        retry,
        max_chunk_size: 10_000,
        chunk_overlap: 0,
        chunk_concurrency: 1,
        classifier: Arc::new(StatusClassifier::default()),
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50))
}

fn jobs(ids: &[&str]) -> Vec<Job> {
    ids.iter()
        .map(|id| Job::new(JobId::new(*id), "preamble", "payload"))
        .collect()
}

fn progress_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("progress.jsonl")
}

#[tokio::test(start_paused = true)]
async fn second_run_makes_no_calls_for_succeeded_jobs() {
    let dir = TempDir::new().unwrap();
    let ids = ["c/s/1", "c/s/2", "c/s/3", "c/s/4"];

    {
        let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
        let generator = Arc::new(RecordingGenerator::new(CancellationToken::new()));
        let scheduler = Scheduler::new(
            config(2, 100, quick_retry()),
            Arc::clone(&generator),
            CollectingSink::default(),
            store,
        );
        let summary = scheduler
            .run(jobs(&ids), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 4);
        assert_eq!(generator.total_calls(), 4);
    }

    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator = Arc::new(RecordingGenerator::new(CancellationToken::new()));
    let scheduler = Scheduler::new(
        config(2, 100, quick_retry()),
        Arc::clone(&generator),
        CollectingSink::default(),
        store,
    );
    let summary = scheduler
        .run(jobs(&ids), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.succeeded, 0);
    assert!(summary.is_complete());
    assert_eq!(generator.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn resume_processes_only_unfinished_jobs() {
    let dir = TempDir::new().unwrap();
    {
        // State left behind by a run that was killed part-way.
        let store = ProgressStore::open(progress_path(&dir)).unwrap();
        store.mark(&JobId::new("c/s/done"), &JobStatus::InProgress).unwrap();
        store.mark(&JobId::new("c/s/done"), &JobStatus::Succeeded).unwrap();
        store
            .mark(&JobId::new("c/s/failed"), &JobStatus::Failed("timeout".into()))
            .unwrap();
        store.mark(&JobId::new("c/s/interrupted"), &JobStatus::InProgress).unwrap();
    }

    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator = Arc::new(RecordingGenerator::new(CancellationToken::new()));
    let sink = Arc::new(CollectingSink::default());
    let scheduler = Scheduler::new(
        config(3, 100, quick_retry()),
        Arc::clone(&generator),
        Arc::clone(&sink),
        Arc::clone(&store),
    );

    let summary = scheduler
        .run(
            jobs(&["c/s/done", "c/s/failed", "c/s/interrupted", "c/s/new"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(generator.calls_for("c/s/done"), 0);
    assert_eq!(generator.calls_for("c/s/failed"), 1);
    assert_eq!(generator.calls_for("c/s/interrupted"), 1);
    assert_eq!(generator.calls_for("c/s/new"), 1);

    let all = store.load_all().unwrap();
    assert!(
        all.values()
            .all(|record| record.status == RecordStatus::Succeeded)
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_handout_and_next_run_finishes() {
    let dir = TempDir::new().unwrap();
    let ids = ["c/s/1", "c/s/2", "c/s/3"];
    let cancel = CancellationToken::new();

    {
        let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
        let generator = Arc::new(
            RecordingGenerator::new(cancel.clone()).with("c/s/1", Behaviour::CancelThenSucceed),
        );
        let scheduler = Scheduler::new(
            config(1, 100, quick_retry()),
            Arc::clone(&generator),
            CollectingSink::default(),
            Arc::clone(&store),
        );
        let summary = scheduler.run(jobs(&ids), &cancel).await.unwrap();

        // The in-flight attempt completed; nothing new was handed out.
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.pending, 2);
        assert!(!summary.is_complete());
        assert_eq!(generator.total_calls(), 1);
    }

    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator = Arc::new(RecordingGenerator::new(CancellationToken::new()));
    let scheduler = Scheduler::new(
        config(1, 100, quick_retry()),
        Arc::clone(&generator),
        CollectingSink::default(),
        store,
    );
    let summary = scheduler
        .run(jobs(&ids), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(generator.calls_for("c/s/1"), 0);
}

#[tokio::test(start_paused = true)]
async fn interrupted_during_backoff_is_left_pending() {
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator =
        Arc::new(RecordingGenerator::new(cancel.clone()).with("c/s/flaky", Behaviour::Transient));
    let scheduler = Scheduler::new(
        config(
            1,
            100,
            RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(1)),
        ),
        Arc::clone(&generator),
        CollectingSink::default(),
        Arc::clone(&store),
    );

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let summary = scheduler.run(jobs(&["c/s/flaky"]), &cancel).await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(generator.calls_for("c/s/flaky"), 1);

    let record = store.get(&JobId::new("c/s/flaky")).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::InProgress);
    assert_eq!(record.resumed_status(), JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn fatal_first_attempt_fails_without_backoff() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator =
        Arc::new(RecordingGenerator::new(CancellationToken::new()).with("c/s/bad", Behaviour::Fatal));
    let scheduler = Scheduler::new(
        config(1, 100, RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10))),
        Arc::clone(&generator),
        CollectingSink::default(),
        store,
    );

    let started = Instant::now();
    let summary = scheduler
        .run(jobs(&["c/s/bad"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.attempts, 1);
    assert_eq!(generator.calls_for("c/s/bad"), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(summary.failures[0].1.contains("fatal after 1 attempt"));
}

/// 5 jobs, 2 calls/s, 3 workers, job 3 always transient, 3 attempts, 1s min wait.
#[tokio::test(start_paused = true)]
async fn example_scenario_rate_limit_and_backoff() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::open(progress_path(&dir)).unwrap());
    let generator = Arc::new(
        RecordingGenerator::new(CancellationToken::new()).with("c/s/3", Behaviour::Transient),
    );
    let sink = Arc::new(CollectingSink::default());
    let scheduler = Scheduler::new(
        config(3, 2, RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10))),
        Arc::clone(&generator),
        Arc::clone(&sink),
        Arc::clone(&store),
    );

    let started = Instant::now();
    let summary = scheduler
        .run(
            jobs(&["c/s/1", "c/s/2", "c/s/3", "c/s/4", "c/s/5"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, JobId::new("c/s/3"));
    assert!(summary.failures[0].1.contains("gave up after 3 attempt(s)"));
    assert_eq!(generator.calls_for("c/s/3"), 3);
    assert_eq!(generator.total_calls(), 7);
    assert_eq!(sink.written.lock().unwrap().len(), 4);

    // 1s + 2s of backoff for job 3; 7 calls at 2/s need at least 3s.
    assert!(elapsed >= Duration::from_secs(3), "finished in {elapsed:?}");
    assert!(summary.rate_limit_wait > Duration::ZERO);

    let times = generator.call_times();
    for (i, start) in times.iter().enumerate() {
        let in_window = times[i..]
            .iter()
            .take_while(|t| **t < *start + Duration::from_secs(1))
            .count();
        assert!(in_window <= 2, "{in_window} calls inside one second");
    }

    let record = store.get(&JobId::new("c/s/3")).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert!(record.reason.unwrap().contains("503"));
}
