//! Terminal output for the CLI

pub mod progress;
pub mod summary;

pub use progress::{ConsoleWriter, RunProgress};
pub use summary::{StatusReport, render_run_summary, render_status};
