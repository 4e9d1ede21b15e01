use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod command;
mod config;
mod error;
mod install;
mod invoke;
mod mrc;
mod paths;
mod registry;
mod resolve;
mod step;
#[cfg(test)]
mod testing;
mod util;
mod workflow;

use cli::{Command, RootArgs};

/// Environment variable holding a tracing filter directive.
const LOG_ENV: &str = "CRYOTEN_LOG";

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match &args.command {
        Command::Enhance(args) => workflow::run_enhance(args),
        Command::Install(args) => workflow::run_install(args),
        Command::Status(args) => workflow::run_status(args),
        Command::Env(args) => workflow::run_env(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
