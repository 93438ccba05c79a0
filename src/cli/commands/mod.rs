//! CLI command implementations

pub mod cache;
pub mod config;
pub mod fetch;
pub mod tunnels;

pub use cache::execute as cache;
pub use config::execute as config;
pub use fetch::{execute as fetch, FetchStatus};
pub use tunnels::execute as tunnels;

use crate::cli::args::Cli;
use clap::CommandFactory;
use clap_complete::Shell;

/// Print a completion script for `shell` to stdout
pub fn completions(shell: Shell) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
}
