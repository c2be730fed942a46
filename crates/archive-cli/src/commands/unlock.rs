//! Unlock command implementation

use std::path::Path;

use colored::Colorize;

use super::{load_config, select_connectors};
use crate::error::Result;

/// Clear a stale lock for one source. A live lock is never removed.
pub fn run_unlock(config_path: &Path, name: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let names = [name.to_string()];
    for connector in select_connectors(&config, &names)? {
        if connector.unlock()? {
            println!("{} removed stale lock for {}", "+".green(), name.cyan());
        } else {
            println!("{} no lock present for {}", "=".dimmed(), name.cyan());
        }
    }
    Ok(())
}
