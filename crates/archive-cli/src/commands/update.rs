//! Update command implementation

use std::path::Path;

use archive_core::{CycleOutcome, CycleReport, run_sources};
use colored::Colorize;

use super::{load_config, select_connectors};
use crate::error::{CliError, Result};

/// Run one cycle for each selected source and summarise the results.
pub fn run_update(config_path: &Path, names: &[String], force: bool, parallel: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let connectors = select_connectors(&config, names)?;
    if connectors.is_empty() {
        println!("{}", "No sources configured".yellow());
        return Ok(());
    }

    let reports = run_sources(&connectors, force, parallel);
    for report in &reports {
        print_report(report);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        return Err(CliError::user(format!(
            "{} of {} source(s) failed",
            failed,
            reports.len()
        )));
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    let elapsed = format!("{:.1}s", report.duration.as_secs_f64());
    match &report.outcome {
        CycleOutcome::NoUpdate => println!(
            "{} {} up to date ({})",
            "=".dimmed(),
            report.source.cyan(),
            elapsed.dimmed()
        ),
        CycleOutcome::Updated(record) => println!(
            "{} {} updated to {} [{} bytes] ({})",
            "+".green(),
            report.source.cyan(),
            record.version.green().bold(),
            record.size_bytes,
            elapsed.dimmed()
        ),
        CycleOutcome::Failed(e) => println!(
            "{} {} failed at {}: {} ({})",
            "x".red(),
            report.source.cyan(),
            report
                .stages
                .iter()
                .rev()
                .find(|s| !s.is_terminal())
                .map(|s| s.to_string())
                .unwrap_or_default()
                .yellow(),
            e,
            elapsed.dimmed()
        ),
    }
}
