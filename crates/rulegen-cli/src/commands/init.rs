//! `rulegen init`: write a default configuration file

use std::path::Path;

use anyhow::{Result, anyhow};
use colored::Colorize;
use rulegen_core::Config;

use crate::error::CliError;

/// Write the default configuration to `path`.
///
/// Refuses to replace an existing file unless `force` is set.
pub fn execute(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(CliError::usage(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }

    let config = Config::default();
    config.save(path)?;

    println!("{} {}", "Wrote".green(), path.display());
    println!(
        "Set {} to your API key, then run `rulegen run --test`.",
        config.api.api_key_env.bold()
    );
    Ok(())
}
