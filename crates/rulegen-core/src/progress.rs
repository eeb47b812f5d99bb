//! Durable per-job progress tracking.
//!
//! The store is an append-only JSON-lines log. Every [`ProgressStore::mark`]
//! appends one record and syncs it to disk before returning, so a returned
//! `mark` survives the process being killed immediately afterwards. The latest
//! record for an id wins.
//!
//! ## Storage Layout
//!
//! ```text
//! mdc_generation_progress.jsonl    # one ProgressRecord per line
//! mdc_generation_progress.lock     # advisory lock held while the store is open
//! ```
//!
//! Opening the store compacts the log to one record per id (temp file +
//! rename), which also drops a torn trailing line left by a crash. Lines that
//! fail to parse are skipped with a warning, so any readable subset of records
//! loads.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rulegen_core::{JobId, JobStatus, ProgressStore};
//!
//! let store = ProgressStore::open("progress.jsonl")?;
//! let id = JobId::new("frontend_frameworks/react/react");
//! store.mark(&id, &JobStatus::Succeeded)?;
//! assert!(store.is_done(&id)?);
//! # Ok::<(), rulegen_core::Error>(())
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::job::{JobId, JobStatus};
use crate::{Error, Result};

/// Persisted status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Returned to the queue (not done).
    Pending,
    /// Owned by a worker when last written; treated as pending on reload.
    InProgress,
    /// Completed; never reprocessed.
    Succeeded,
    /// Failed; retried by the next run.
    Failed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// One line of the progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Job identifier.
    pub id: JobId,
    /// Status at `updated_at`.
    pub status: RecordStatus,
    /// Failure reason, for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Build a record for `status`, timestamped now.
    #[must_use]
    pub fn new(id: JobId, status: &JobStatus) -> Self {
        let (status, reason) = match status {
            JobStatus::Pending => (RecordStatus::Pending, None),
            JobStatus::InProgress => (RecordStatus::InProgress, None),
            JobStatus::Succeeded => (RecordStatus::Succeeded, None),
            JobStatus::Failed(reason) => (RecordStatus::Failed, Some(reason.clone())),
        };
        Self {
            id,
            status,
            reason,
            updated_at: Utc::now(),
        }
    }

    /// Status as seen by a fresh run: interrupted work is pending again.
    #[must_use]
    pub fn resumed_status(&self) -> JobStatus {
        match self.status {
            RecordStatus::Succeeded => JobStatus::Succeeded,
            RecordStatus::Failed => {
                JobStatus::Failed(self.reason.clone().unwrap_or_default())
            },
            RecordStatus::Pending | RecordStatus::InProgress => JobStatus::Pending,
        }
    }
}

/// Counts of records by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    /// Jobs recorded as succeeded.
    pub succeeded: usize,
    /// Jobs recorded as failed.
    pub failed: usize,
    /// Jobs interrupted while in progress or returned to the queue.
    pub interrupted: usize,
}

impl ProgressSummary {
    /// Total records.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.interrupted
    }
}

struct State {
    log: File,
    records: HashMap<JobId, ProgressRecord>,
    /// Set when a failed append could not be rolled back; the log may end in
    /// a torn line, so further appends are refused until the store reopens.
    broken: Option<String>,
}

/// File operations an append needs to stay all-or-nothing.
trait AppendLog: Write {
    fn len(&self) -> std::io::Result<u64>;
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
    fn sync(&mut self) -> std::io::Result<()>;
}

impl AppendLog for File {
    fn len(&self) -> std::io::Result<u64> {
        self.metadata().map(|meta| meta.len())
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

/// Append `line` and sync it. On failure the log is cut back to its previous
/// length; if that also fails the error says so and the log is left torn.
fn append_synced(log: &mut impl AppendLog, line: &[u8]) -> std::result::Result<(), AppendError> {
    let before = log.len().map_err(AppendError::Clean)?;
    let Err(err) = log.write_all(line).and_then(|()| log.sync()) else {
        return Ok(());
    };
    match log.truncate(before).and_then(|()| log.sync()) {
        Ok(()) => Err(AppendError::Clean(err)),
        Err(rollback) => Err(AppendError::Torn { err, rollback }),
    }
}

#[derive(Debug)]
enum AppendError {
    /// Nothing of the record remains in the log.
    Clean(std::io::Error),
    /// Part of the record may remain in the log.
    Torn {
        err: std::io::Error,
        rollback: std::io::Error,
    },
}

/// Append-only, crash-consistent progress store.
///
/// ## Thread Safety
///
/// `mark` calls from concurrent workers are serialized by an internal mutex;
/// a second process opening the same store fails fast on the advisory lock.
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<State>,
    _lock: File,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    /// Open (or create) the store at `path`, taking its advisory lock and
    /// compacting the log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create progress directory: {e}"))
            })?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::Storage(format!("Failed to open progress lock: {e}")))?;
        lock.try_lock_exclusive().map_err(|_| {
            Error::Storage(format!(
                "progress store {} is in use by another process",
                path.display()
            ))
        })?;

        let records = Self::load_records(&path)?;
        write_compacted(&path, &records)?;
        info!(
            "Loaded {} progress records from {}",
            records.len(),
            path.display()
        );

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("Failed to open progress log: {e}")))?;

        Ok(Self {
            path,
            state: Mutex::new(State {
                log,
                records,
                broken: None,
            }),
            _lock: lock,
        })
    }

    /// Read the records at `path` without locking or compacting.
    ///
    /// A missing file yields an empty map.
    pub fn load_records(path: &Path) -> Result<HashMap<JobId, ProgressRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => {
                return Err(Error::Storage(format!(
                    "Failed to read progress log {}: {err}",
                    path.display()
                )));
            },
        };

        let mut records = HashMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let raw = match line {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("stopping progress log read at line {}: {err}", line_no + 1);
                    break;
                },
            };
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ProgressRecord>(&raw) {
                Ok(record) => {
                    records.insert(record.id.clone(), record);
                },
                Err(err) => warn!("skipping unreadable progress record on line {}: {err}", line_no + 1),
            }
        }
        Ok(records)
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `id` has succeeded.
    pub fn is_done(&self, id: &JobId) -> Result<bool> {
        Ok(self
            .state()?
            .records
            .get(id)
            .is_some_and(|record| record.status == RecordStatus::Succeeded))
    }

    /// Latest record for `id`.
    pub fn get(&self, id: &JobId) -> Result<Option<ProgressRecord>> {
        Ok(self.state()?.records.get(id).cloned())
    }

    /// Durably record `status` for `id`.
    ///
    /// Returns only after the record has been synced to disk.
    pub fn mark(&self, id: &JobId, status: &JobStatus) -> Result<()> {
        let record = ProgressRecord::new(id.clone(), status);
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| Error::Storage(format!("Failed to serialize progress record: {e}")))?;
        line.push(b'\n');

        let mut state = self.state()?;
        if let Some(reason) = &state.broken {
            return Err(Error::Storage(format!(
                "progress log is unusable after an earlier write failure ({reason}); reopen the store"
            )));
        }
        match append_synced(&mut state.log, &line) {
            Ok(()) => {},
            Err(AppendError::Clean(err)) => {
                return Err(Error::Storage(format!(
                    "Failed to append progress record: {err}"
                )));
            },
            Err(AppendError::Torn { err, rollback }) => {
                state.broken = Some(format!("{err}; rollback failed: {rollback}"));
                return Err(Error::Storage(format!(
                    "Failed to append progress record: {err} (rollback failed: {rollback})"
                )));
            },
        }
        state.records.insert(record.id.clone(), record);
        drop(state);

        debug!(job = %id, status = %status, "progress recorded");
        Ok(())
    }

    /// Snapshot of every record, keyed by id.
    pub fn load_all(&self) -> Result<HashMap<JobId, ProgressRecord>> {
        Ok(self.state()?.records.clone())
    }

    /// Count records by status.
    pub fn summary(&self) -> Result<ProgressSummary> {
        Ok(summarize(self.state()?.records.values()))
    }

    /// Remove records so the next run retries those jobs.
    ///
    /// With `failed_only`, succeeded records are kept. Returns the number of
    /// records removed.
    pub fn reset(&self, failed_only: bool) -> Result<usize> {
        let mut state = self.state()?;
        let before = state.records.len();
        if failed_only {
            state
                .records
                .retain(|_, record| record.status == RecordStatus::Succeeded);
        } else {
            state.records.clear();
        }
        let removed = before - state.records.len();

        write_compacted(&self.path, &state.records)?;
        state.log = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Storage(format!("Failed to reopen progress log: {e}")))?;
        state.broken = None;
        drop(state);

        info!("Removed {removed} progress records");
        Ok(removed)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Storage("progress store mutex poisoned".to_string()))
    }
}

/// Count records by status.
pub fn summarize<'a>(records: impl IntoIterator<Item = &'a ProgressRecord>) -> ProgressSummary {
    let mut summary = ProgressSummary::default();
    for record in records {
        match record.status {
            RecordStatus::Succeeded => summary.succeeded += 1,
            RecordStatus::Failed => summary.failed += 1,
            RecordStatus::Pending | RecordStatus::InProgress => summary.interrupted += 1,
        }
    }
    summary
}

fn write_compacted(path: &Path, records: &HashMap<JobId, ProgressRecord>) -> Result<()> {
    let tmp_path = path.with_extension("jsonl.tmp");
    let mut ordered: Vec<&ProgressRecord> = records.values().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let tmp = File::create(&tmp_path)
        .map_err(|e| Error::Storage(format!("Failed to create compacted progress log: {e}")))?;
    let mut buf = BufWriter::new(tmp);
    for record in ordered {
        serde_json::to_writer(&mut buf, record)?;
        buf.write_all(b"\n")?;
    }
    let file = buf
        .into_inner()
        .map_err(|e| Error::Storage(format!("Failed to flush compacted progress log: {e}")))?;
    file.sync_all()?;
    drop(file);

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path)
            .map_err(|e| Error::Storage(format!("Failed to replace progress log: {e}")))?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Storage(format!(
            "Failed to commit compacted progress log: {err}"
        )));
    }

    #[cfg(unix)]
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
