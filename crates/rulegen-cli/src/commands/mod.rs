//! Command implementations for the rulegen CLI
//!
//! Each command lives in its own submodule.

mod init;
mod reset;
mod run;
mod status;

pub use init::execute as init_config;
pub use reset::execute as reset_progress;
pub use run::{execute as run_generation, load_config};
pub use status::execute as show_status;
