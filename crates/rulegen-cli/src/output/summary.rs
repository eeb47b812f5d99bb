//! Run and status summaries

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use rulegen_core::progress::summarize;
use rulegen_core::{JobId, ProgressRecord, RecordStatus, RunSummary};
use serde::Serialize;

/// A failed library as shown by `rulegen status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    /// Catalog id.
    pub id: String,
    /// Recorded failure reason.
    pub reason: String,
    /// When the failure was recorded.
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a progress log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Progress log path.
    pub progress_file: String,
    /// Libraries with a written document.
    pub succeeded: usize,
    /// Libraries whose last attempt failed.
    pub failed: usize,
    /// Libraries a previous run started but never finished.
    pub interrupted: usize,
    /// All recorded libraries.
    pub total: usize,
    /// Failed libraries, sorted by id. Empty unless requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureEntry>,
}

impl StatusReport {
    /// Build a report from loaded records.
    pub fn from_records(
        progress_file: &Path,
        records: &HashMap<JobId, ProgressRecord>,
        include_failures: bool,
    ) -> Self {
        let summary = summarize(records.values());
        let mut failures: Vec<FailureEntry> = if include_failures {
            records
                .values()
                .filter(|record| record.status == RecordStatus::Failed)
                .map(|record| FailureEntry {
                    id: record.id.to_string(),
                    reason: record.reason.clone().unwrap_or_default(),
                    updated_at: record.updated_at,
                })
                .collect()
        } else {
            Vec::new()
        };
        failures.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            progress_file: progress_file.display().to_string(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            interrupted: summary.interrupted,
            total: summary.total(),
            failures,
        }
    }
}

/// Print a status report as text.
pub fn render_status(writer: &mut impl Write, report: &StatusReport) -> Result<()> {
    writeln!(writer, "Progress: {}", report.progress_file)?;
    if report.total == 0 {
        writeln!(writer, "No libraries processed yet.")?;
        return Ok(());
    }

    writeln!(writer, "  Succeeded:   {}", report.succeeded.to_string().green())?;
    writeln!(writer, "  Failed:      {}", colored_count(report.failed))?;
    writeln!(writer, "  Interrupted: {}", report.interrupted.to_string().yellow())?;
    writeln!(writer, "  Total:       {}", report.total)?;

    if !report.failures.is_empty() {
        writeln!(writer, "\nFailed libraries:")?;
        for failure in &report.failures {
            writeln!(writer, "  {}: {}", failure.id.bold(), failure.reason)?;
        }
    }
    Ok(())
}

/// Print the outcome of a run.
pub fn render_run_summary(writer: &mut impl Write, summary: &RunSummary) -> Result<()> {
    writeln!(
        writer,
        "Generated {} of {} libraries ({} already done)",
        summary.succeeded.to_string().green(),
        summary.total(),
        summary.skipped
    )?;
    if summary.failed > 0 {
        writeln!(writer, "  Failed:  {}", colored_count(summary.failed))?;
    }
    if summary.pending > 0 {
        writeln!(
            writer,
            "  Pending: {} (interrupted, run again to finish)",
            summary.pending.to_string().yellow()
        )?;
    }
    writeln!(
        writer,
        "  Calls:   {} (waited {:.1}s for the rate limit)",
        summary.attempts,
        summary.rate_limit_wait.as_secs_f64()
    )?;

    for (id, reason) in &summary.failures {
        writeln!(writer, "  {} {}: {reason}", "x".red(), id.as_str().bold())?;
    }
    Ok(())
}

fn colored_count(count: usize) -> colored::ColoredString {
    if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().red()
    }
}
