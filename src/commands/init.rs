use crate::commands::Out;
use crate::config::LibrarySettings;
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the opex home directory with:
/// - a downloads directory
/// - an initial `config.json` for `project` that reads from `library` and has no jobs yet
/// - the staging database
///
/// Jobs are added by editing `config.json`.
///
/// # Errors
/// - Returns an error if any file operations fail or if the directory was already initialized.
pub async fn init(opex_home: &Path, project: &str, library: LibrarySettings) -> Result<Out<()>> {
    let config = Config::create(opex_home, project, library)
        .await
        .context("Unable to create the data directory and configs")?;
    Ok(format!(
        "Successfully created the opex directory at {}, add jobs to {}",
        config.root().display(),
        config.config_path().display()
    )
    .into())
}
