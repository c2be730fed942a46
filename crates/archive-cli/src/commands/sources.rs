//! Sources command implementation

use std::path::Path;

use colored::Colorize;

use super::load_config;
use crate::error::Result;

/// List configured sources.
pub fn run_sources_list(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    if config.sources.is_empty() {
        println!("{}", "No sources configured".yellow());
        return Ok(());
    }
    for source in &config.sources {
        println!("{}", source.name.cyan().bold());
        println!("  {}:     {}", "URL".dimmed(), source.source_url);
        println!("  {}: {}", "Pattern".dimmed(), source.file_pattern);
        println!("  {}: {}", "Storage".dimmed(), source.storage_path.display());
        println!("  {}:  {}", "Backup".dimmed(), source.backup_path.display());
        println!(
            "  {}:  max {}, check every {}h",
            "Limits".dimmed(),
            source.max_backups,
            source.check_interval().as_secs() / 3600
        );
    }
    Ok(())
}
