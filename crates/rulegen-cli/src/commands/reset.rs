//! `rulegen reset`: forget recorded progress

use anyhow::Result;
use rulegen_core::{Config, ProgressStore};
use tracing::info;

/// Remove records from the progress log so the next run retries them.
pub fn execute(config: &Config, failed_only: bool) -> Result<()> {
    let store = ProgressStore::open(&config.paths.progress_file)?;
    let removed = store.reset(failed_only)?;
    info!(removed, failed_only, "reset progress");

    let what = if failed_only { "failed " } else { "" };
    println!(
        "Removed {removed} {what}record(s) from {}",
        store.path().display()
    );
    Ok(())
}
