//! rulegen CLI library
//!
//! Argument parsing, logging setup and command dispatch for the `rulegen`
//! binary. The generation engine itself lives in `rulegen-core`.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod utils;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::utils::logging::initialize_logging;

/// Parse arguments and run the selected command.
///
/// # Errors
///
/// Returns the command's error; [`error::exit_code_from_error`] turns it into
/// a process exit code.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = initialize_logging(&cli)?;
    execute_command(cli).await
}

async fn execute_command(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Init { force } => commands::init_config(&cli.config, *force),
        Commands::Status { format, failed } => {
            let config = commands::load_config(&cli.config)?;
            commands::show_status(&config, *format, *failed)
        },
        Commands::Reset { failed_only } => {
            let config = commands::load_config(&cli.config)?;
            commands::reset_progress(&config, *failed_only)
        },
        Commands::Run(args) => {
            // Validated after flag overrides are applied.
            let config = rulegen_core::Config::load(&cli.config)?;
            commands::run_generation(config, args, cli.quiet).await
        },
    }
}
