//! Command implementations

mod sources;
mod status;
mod unlock;
mod update;

pub use sources::run_sources_list;
pub use status::run_status;
pub use unlock::run_unlock;
pub use update::run_update;

use std::path::Path;

use archive_core::{ArchiveConfig, SourceConnector};

use crate::error::{CliError, Result};

/// Load and validate the configuration.
fn load_config(path: &Path) -> Result<ArchiveConfig> {
    if !path.exists() {
        return Err(CliError::user(format!(
            "configuration file not found: {}",
            path.display()
        )));
    }
    Ok(ArchiveConfig::load(path)?)
}

/// Connectors for the named sources, or for all sources when `names` is
/// empty. Unknown names are an error.
fn select_connectors(config: &ArchiveConfig, names: &[String]) -> Result<Vec<SourceConnector>> {
    if let Some(unknown) = names.iter().find(|n| config.source(n).is_none()) {
        return Err(CliError::user(format!("unknown source '{}'", unknown)));
    }
    let connectors = SourceConnector::all_from_config(config)?;
    Ok(connectors
        .into_iter()
        .filter(|c| names.is_empty() || names.iter().any(|n| n == c.name()))
        .collect())
}
