//! `rulegen status`: show recorded progress

use anyhow::Result;
use rulegen_core::{Config, ProgressStore};

use crate::cli::OutputFormat;
use crate::output::{StatusReport, render_status};

/// Print a summary of the progress log.
///
/// Reads the log without taking its lock, so it also works while a run is
/// in progress.
pub fn execute(config: &Config, format: OutputFormat, show_failed: bool) -> Result<()> {
    let path = &config.paths.progress_file;
    let records = ProgressStore::load_records(path)?;
    let report = StatusReport::from_records(path, &records, show_failed);

    match format {
        OutputFormat::Text => render_status(&mut std::io::stdout().lock(), &report)?,
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
