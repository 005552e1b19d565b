//! A `Library` backed by a local directory tree.

use crate::api::{join, Library, RemoteFile};
use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono::{DateTime, Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

#[derive(Debug, Clone)]
pub(crate) struct LocalLibrary {
    root: PathBuf,
}

impl LocalLibrary {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    async fn entries(&self, folder: &str) -> Result<Vec<(String, std::fs::Metadata)>> {
        let dir = self.resolve(folder);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Unable to read the folder {}", dir.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .with_context(|| format!("Unable to read an entry of {}", dir.display()))?
        {
            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("Unable to stat {}", entry.path().display()))?;
            entries.push((entry.file_name().to_string_lossy().into_owned(), metadata));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl Library for LocalLibrary {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        trace!("list_files for {folder}");
        Ok(self
            .entries(folder)
            .await?
            .into_iter()
            .filter(|(_, m)| m.is_file())
            .map(|(name, m)| RemoteFile {
                path: join(folder, &name),
                name,
                created: m.created().or_else(|_| m.modified()).ok().map(local_time),
            })
            .collect())
    }

    async fn folders(&self, folder: &str) -> Result<Vec<String>> {
        Ok(self
            .entries(folder)
            .await?
            .into_iter()
            .filter(|(_, m)| m.is_dir())
            .map(|(name, _)| name)
            .collect())
    }

    async fn create_folder(&self, parent: &str, name: &str) -> Result<()> {
        let parent_dir = self.resolve(parent);
        if !parent_dir.is_dir() {
            bail!("The folder {} does not exist", parent_dir.display());
        }
        utils::make_dir(parent_dir.join(name)).await
    }

    async fn download(&self, file: &RemoteFile, dest: &Path) -> Result<u64> {
        utils::copy(self.resolve(&file.path), dest).await
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        utils::rename(self.resolve(from), self.resolve(to)).await
    }
}

fn local_time(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}
