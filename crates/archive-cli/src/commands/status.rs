//! Status command implementation

use std::path::Path;

use archive_core::SourceStatus;
use colored::Colorize;
use serde_json::json;

use super::{load_config, select_connectors};
use crate::error::Result;

/// Show the on-disk state of each selected source.
pub fn run_status(config_path: &Path, names: &[String], as_json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let statuses = select_connectors(&config, names)?
        .iter()
        .map(|c| c.status())
        .collect::<archive_core::Result<Vec<_>>>()?;

    if as_json {
        let value: Vec<_> = statuses.iter().map(status_json).collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for status in &statuses {
        print_status(status);
    }
    Ok(())
}

fn status_json(status: &SourceStatus) -> serde_json::Value {
    json!({
        "source": status.source,
        "current": status.current,
        "history_len": status.history_len,
        "backups": status.backups.iter().map(|b| &b.file_name).collect::<Vec<_>>(),
        "pending_commit": status.pending_commit,
        "lock_present": status.lock_present,
    })
}

fn print_status(status: &SourceStatus) {
    println!("{}", status.source.bold());
    match &status.current {
        Some(record) => {
            println!("  {}:  {}", "Current".dimmed(), record.version.green());
            println!("  {}:     {}", "File".dimmed(), record.path.display());
            println!("  {}:     {} bytes", "Size".dimmed(), record.size_bytes);
            println!("  {}: {}", "Checksum".dimmed(), record.checksum);
            println!("  {}:  {}", "Fetched".dimmed(), record.downloaded_at.to_rfc3339());
        }
        None => println!("  {}:  {}", "Current".dimmed(), "none".yellow()),
    }
    println!("  {}:  {} record(s)", "History".dimmed(), status.history_len);
    println!("  {}:  {}", "Backups".dimmed(), status.backups.len());
    for backup in &status.backups {
        println!("    {}", backup.file_name);
    }
    if status.pending_commit {
        println!(
            "  {} interrupted commit will be resumed on the next update",
            "!".yellow()
        );
    }
    if status.lock_present {
        println!(
            "  {} lock file present; if no update is running use {}",
            "!".yellow(),
            "zim-archiver unlock".cyan()
        );
    }
    println!();
}
