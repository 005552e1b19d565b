//! The document library that source workbooks are fetched from and archived to.
//!
//! `Library` is implemented by `SharePoint`, which talks to a SharePoint site over its REST API,
//! and by `LocalLibrary`, which treats a directory tree as the library. Folder and file paths are
//! `/`-separated: server-relative for SharePoint, relative to the root directory for a
//! `LocalLibrary`.

mod local;
mod sharepoint;

pub(crate) use local::LocalLibrary;
pub(crate) use sharepoint::SharePoint;

use crate::config::LibrarySettings;
use crate::{Config, Result};
use anyhow::Context;
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::debug;

/// The folder that processed files are moved into, next to the monthly folders.
pub(crate) const ARCHIVED: &str = "Archived";

/// A file in the library.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct RemoteFile {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) created: Option<NaiveDateTime>,
}

#[async_trait::async_trait]
pub(crate) trait Library: Send + Sync {
    /// The files directly inside `folder`, sorted by name.
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>>;

    /// The names of the folders directly inside `folder`.
    async fn folders(&self, folder: &str) -> Result<Vec<String>>;

    /// Creates the folder `name` inside `parent`.
    async fn create_folder(&self, parent: &str, name: &str) -> Result<()>;

    /// Saves the content of `file` to `dest`, returning the number of bytes written.
    async fn download(&self, file: &RemoteFile, dest: &Path) -> Result<u64>;

    /// Moves the file at `from` to `to`, replacing any file already there.
    async fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// Creates `name` inside `parent` unless it is already there. Returns the folder's path.
    async fn ensure_folder(&self, parent: &str, name: &str) -> Result<String> {
        let existing = self.folders(parent).await?;
        if existing.iter().any(|f| f == name) {
            debug!("Folder '{name}' already exists in '{parent}'");
        } else {
            debug!("Creating folder '{name}' in '{parent}'");
            self.create_folder(parent, name).await?;
        }
        Ok(join(parent, name))
    }
}

/// Makes sure `<parent of src>/Archived/<name of src>` exists and returns its path, e.g.
/// `/OPEX/Oct 2026` is archived to `/OPEX/Archived/Oct 2026`.
pub(crate) async fn ensure_archive_folder(
    library: &dyn Library,
    src_folder: &str,
) -> Result<String> {
    let (base, leaf) = split(src_folder);
    let archived = library.ensure_folder(base, ARCHIVED).await?;
    library.ensure_folder(&archived, leaf).await
}

/// Builds the library configured in `config`. SharePoint needs an access `token`.
pub(crate) fn library(config: &Config, token: Option<&str>) -> Result<Box<dyn Library>> {
    match config.library() {
        LibrarySettings::SharePoint { site_url } => {
            let token = token.context(
                "The library is a SharePoint site but no access token was given, set \
                OPEX_SHAREPOINT_TOKEN or pass --sharepoint-token",
            )?;
            Ok(Box::new(SharePoint::new(&site_url, token)?))
        }
        LibrarySettings::Local { root } => Ok(Box::new(LocalLibrary::new(root))),
    }
}

/// Joins two library path segments with a single `/`.
pub(crate) fn join(parent: &str, name: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Splits a library path into its parent folder and its last segment.
pub(crate) fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", trimmed),
    }
}
