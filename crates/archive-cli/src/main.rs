//! ZIM archiver CLI
//!
//! Loads the archive configuration and drives update cycles, status
//! reports and lock maintenance for each configured source.

mod cli;
mod commands;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}: logging disabled: {}", "warning".yellow().bold(), e);
    }
    tracing::debug!(config = %cli.config.display(), "starting");

    match cli.command {
        Commands::Update {
            sources,
            force,
            parallel,
        } => commands::run_update(&cli.config, &sources, force, parallel),
        Commands::Status { sources, json } => commands::run_status(&cli.config, &sources, json),
        Commands::Unlock { source } => commands::run_unlock(&cli.config, &source),
        Commands::Sources => commands::run_sources_list(&cli.config),
    }
}
