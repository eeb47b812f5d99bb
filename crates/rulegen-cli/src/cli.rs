//! # CLI Structure and Argument Parsing
//!
//! `rulegen` generates one `.mdc` rule document per library listed in a JSON
//! catalog by calling a remote text-generation service. Runs are resumable:
//! finished libraries are recorded in a progress log and skipped next time.
//!
//! ## Usage Patterns
//!
//! ```bash
//! # Write a default rulegen.toml
//! rulegen init
//!
//! # Generate everything not yet done
//! rulegen run
//!
//! # Only one subcategory, with more workers
//! rulegen run --category frontend_frameworks --subcategory react --workers 8
//!
//! # Smoke test with a single library
//! rulegen run --test
//!
//! # Fetch research first (needs EXA_API_KEY), or skip it
//! EXA_API_KEY=... rulegen run
//! rulegen run --no-research --research-dir notes
//!
//! # Inspect and reset progress
//! rulegen status --failed
//! rulegen reset --failed-only
//! ```
//!
//! ## Logging
//!
//! Logs go to stderr (`-v` for debug, `-q` for errors only, `RUST_LOG` to
//! override) and to a daily rotated `rulegen.log` under `--log-dir`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rulegen_core::config::DEFAULT_CONFIG_FILE;

/// Main CLI structure for the `rulegen` command.
#[derive(Parser, Clone, Debug)]
#[command(name = "rulegen")]
#[command(version)]
#[command(about = "Resumable, rate-limited generation of per-library rule documents", long_about = None)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE, env = "RULEGEN_CONFIG")]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Directory for the rotated log file
    #[arg(long, global = true, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Disable the log file
    #[arg(long, global = true)]
    pub no_log_file: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Generate rule documents for every unfinished library
    Run(RunArgs),

    /// Show progress recorded so far
    Status {
        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// List failed libraries with their reasons
        #[arg(long)]
        failed: bool,
    },

    /// Forget recorded progress so the next run retries it
    Reset {
        /// Only forget failed libraries
        #[arg(long)]
        failed_only: bool,
    },

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Arguments for `rulegen run`.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Process a single library only
    ///
    /// Picks the filtered library if filters are given, react otherwise.
    #[arg(long)]
    pub test: bool,

    /// Only libraries in this category
    #[arg(long)]
    pub category: Option<String>,

    /// Only libraries in this subcategory
    #[arg(long)]
    pub subcategory: Option<String>,

    /// Only this library
    #[arg(long)]
    pub library: Option<String>,

    /// Output directory (overrides `paths.output_dir`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent workers (overrides `processing.max_workers`)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Calls allowed per rate-limit period (overrides `api.rate_limit_calls`)
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Research directory (overrides `paths.research_dir`)
    #[arg(long)]
    pub research_dir: Option<PathBuf>,

    /// Do not fetch research; cached and hand-written notes are still used
    #[arg(long)]
    pub no_research: bool,
}

/// Output format for `rulegen status`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON object on stdout
    Json,
}
