//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ZIM archiver - keep offline copies of Wikipedia and friends up to date
#[derive(Parser, Debug)]
#[command(name = "zim-archiver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (.toml, .json, .yaml)
    #[arg(short, long, global = true, env = "ZIM_ARCHIVER_CONFIG", default_value = "archive.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run one update cycle per source
    ///
    /// Examples:
    ///   zim-archiver update                  # every configured source
    ///   zim-archiver update wikipedia        # one source
    ///   zim-archiver update --force          # download even if up to date
    Update {
        /// Sources to update (default: all)
        sources: Vec<String>,

        /// Download even when the remote version is not newer
        #[arg(short, long)]
        force: bool,

        /// Run sources concurrently
        #[arg(short, long)]
        parallel: bool,
    },

    /// Show current version, history and backups per source
    Status {
        /// Sources to show (default: all)
        sources: Vec<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Remove a stale lock left by a crashed run
    Unlock {
        /// Source whose lock to clear
        source: String,
    },

    /// List configured sources
    Sources,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn update_parses_flags_and_sources() {
        let cli = Cli::try_parse_from([
            "zim-archiver",
            "--config",
            "/etc/zim.toml",
            "update",
            "wikipedia",
            "--force",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/zim.toml"));
        assert_eq!(
            cli.command,
            Commands::Update {
                sources: vec!["wikipedia".into()],
                force: true,
                parallel: false,
            }
        );
    }

    #[test]
    fn unlock_requires_source() {
        assert!(Cli::try_parse_from(["zim-archiver", "unlock"]).is_err());
    }
}
