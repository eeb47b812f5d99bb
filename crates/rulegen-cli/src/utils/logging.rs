//! Logging initialization.
//!
//! Two layers share one registry: a compact layer on stderr (written around
//! the run progress bar) and, unless disabled, a non-ANSI layer writing
//! `rulegen.log` under the log directory with daily rotation. `RUST_LOG`
//! overrides the default filters of both.

use std::fs;

use anyhow::{Context, Result};
use colored::control as color_control;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::output::ConsoleWriter;

/// File name prefix of the rotated log.
pub const LOG_FILE_NAME: &str = "rulegen.log";

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,rulegen_core={level},rulegen_cli={level}"))
    })
}

/// Initialize logging and color control from CLI flags.
///
/// Returns the file appender guard, which must stay alive until exit so
/// buffered lines are flushed.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the global
/// subscriber is already set.
pub fn initialize_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let machine_output = matches!(
        cli.command,
        Commands::Status {
            format: OutputFormat::Json,
            ..
        }
    );

    let console_level = if cli.verbose {
        "debug"
    } else if cli.quiet || machine_output {
        "error"
    } else {
        "warn"
    };
    let console = fmt::layer()
        .with_target(false)
        .with_writer(ConsoleWriter::default)
        .with_filter(filter_for(console_level));

    // Status and init never touch the service; only runs are worth a file.
    let wants_file = !cli.no_log_file && matches!(cli.command, Commands::Run(_));
    let (file, guard) = if wants_file {
        fs::create_dir_all(&cli.log_dir).with_context(|| {
            format!("Failed to create log directory {}", cli.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&cli.log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter_for(if cli.verbose { "debug" } else { "info" }));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to set global default subscriber")?;

    let env_no_color = std::env::var("NO_COLOR").ok().is_some();
    if cli.no_color || env_no_color || machine_output {
        color_control::set_override(false);
    }
    Ok(guard)
}
