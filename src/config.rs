//! Configuration file handling.
//!
//! The configuration file is stored at `$OPEX_HOME/config.json`. It names the project and the
//! uploader recorded in the audit columns, says where the source workbooks live (a SharePoint
//! site or a local directory), and lists the jobs: which files to pick up each month and which
//! worksheets of them go to which staging tables.

use crate::db::{Db, DriftPolicy};
use crate::period::Period;
use crate::reshape::ReshapeOptions;
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const APP_NAME: &str = "opex";
const CONFIG_VERSION: u8 = 1;
const CONFIG_JSON: &str = "config.json";
const DOWNLOADS: &str = "downloads";
const OPEX_SQLITE: &str = "opex.sqlite";
const DEFAULT_UPLOADER: &str = "opex";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$OPEX_HOME` and from there it loads `$OPEX_HOME/config.json` and opens the staging
/// database.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    downloads: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    db: Db,
    sqlite_path: PathBuf,
}

impl Config {
    /// Creates the home directory and:
    /// - a downloads directory
    /// - an initial `config.json` for `project` reading from `library`, with no jobs
    /// - the staging database with its schema
    ///
    /// # Errors
    /// - Returns an error if any file operation fails or if a database already exists.
    pub async fn create(
        dir: impl Into<PathBuf>,
        project: &str,
        library: LibrarySettings,
    ) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the opex home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let downloads = root.join(DOWNLOADS);
        utils::make_dir(&downloads).await?;

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile::new(project, default_uploader(), library);
        config_file.save(&config_path).await?;

        let sqlite_path = root.join(OPEX_SQLITE);
        let db = Db::init(&sqlite_path)
            .await
            .context("Unable to create SQLite DB")?;

        Ok(Self {
            root,
            downloads,
            config_path,
            config_file,
            db,
            sqlite_path,
        })
    }

    /// Validates that the home directory and its config file exist, loads the config file and
    /// opens the staging database, migrating it when it is out of date.
    pub async fn load(opex_home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = opex_home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("Opex Home is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;

        let sqlite_path = root.join(OPEX_SQLITE);
        let db = Db::load(&sqlite_path)
            .await
            .context("Unable to load SQLite DB")?;

        let downloads = root.join(DOWNLOADS);
        if !downloads.is_dir() {
            bail!(
                "The downloads directory is missing '{}'",
                downloads.display()
            )
        }

        Ok(Self {
            root,
            downloads,
            config_path,
            config_file,
            db,
            sqlite_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    pub fn downloads(&self) -> &Path {
        &self.downloads
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    pub fn project(&self) -> &str {
        &self.config_file.project
    }

    pub fn uploader(&self) -> &str {
        &self.config_file.uploader
    }

    pub fn batch_id(&self) -> i64 {
        self.config_file.batch_id
    }

    pub fn phase_id(&self) -> i64 {
        self.config_file.phase_id
    }

    /// The library settings with a relative local root resolved against the home directory.
    pub fn library(&self) -> LibrarySettings {
        match &self.config_file.library {
            LibrarySettings::Local { root } if root.is_relative() => LibrarySettings::Local {
                root: self.root.join(root),
            },
            other => other.clone(),
        }
    }

    pub fn reshape(&self) -> &ReshapeOptions {
        &self.config_file.reshape
    }

    pub fn schema_drift(&self) -> DriftPolicy {
        self.config_file.schema_drift
    }

    pub fn jobs(&self) -> &[Job] {
        &self.config_file.jobs
    }

    pub fn job(&self, name: &str) -> Result<&Job> {
        self.config_file
            .jobs
            .iter()
            .find(|j| j.name == name)
            .with_context(|| {
                format!(
                    "There is no job named '{name}' in {}",
                    self.config_path.display()
                )
            })
    }

    /// Where the files of `job` are downloaded to: its `dest_folder` resolved against the home
    /// directory, or the downloads directory.
    pub fn dest_dir(&self, job: &Job) -> PathBuf {
        match &job.dest_folder {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => self.root.join(p),
            None => self.downloads.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_jobs(&mut self, jobs: Vec<Job>) -> Result<()> {
        self.config_file.jobs = jobs;
        self.config_file.save(&self.config_path).await
    }

    #[cfg(test)]
    pub(crate) async fn set_schema_drift(&mut self, policy: DriftPolicy) -> Result<()> {
        self.config_file.schema_drift = policy;
        self.config_file.save(&self.config_path).await
    }
}

/// Where source workbooks are fetched from and archived to.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibrarySettings {
    /// A SharePoint site, e.g. `https://contoso.sharepoint.com/sites/Finance`. Folder paths in jobs
    /// are server-relative, e.g. `/sites/Finance/Shared Documents/OPEX/`.
    #[serde(rename = "sharepoint")]
    SharePoint { site_url: String },
    /// A directory standing in for the document library. Job folder paths are relative to it.
    Local { root: PathBuf },
}

/// One monthly pickup: the files in `<src_folder><Mon YYYY>` whose names match
/// `<file_pattern>.<file_extension>` are downloaded and each of their `sheets` is loaded.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub src_folder: String,
    pub file_pattern: String,
    pub file_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_folder: Option<PathBuf>,
    pub sheets: Vec<SheetTarget>,
}

impl Job {
    /// The remote folder holding this month's files.
    pub fn source_folder(&self, period: &Period) -> String {
        let base = self.src_folder.trim_end_matches('/');
        format!("{base}/{}", period.folder_name())
    }

    /// A case-insensitive regex that matches whole file names.
    pub fn matcher(&self) -> Result<Regex> {
        let extension = self.file_extension.trim_start_matches('.');
        let pattern = format!("^(?:{})\\.{}$", self.file_pattern, regex::escape(extension));
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid file pattern for job '{}'", self.name))
    }
}

/// A worksheet and the staging table it loads into. Parses from `WORKSHEET=TABLE`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SheetTarget {
    pub worksheet: String,
    pub table: String,
}

impl SheetTarget {
    pub fn new(worksheet: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            worksheet: worksheet.into(),
            table: table.into(),
        }
    }
}

impl Display for SheetTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.worksheet, self.table)
    }
}

impl FromStr for SheetTarget {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (worksheet, table) = s
            .split_once('=')
            .with_context(|| format!("Expected WORKSHEET=TABLE, got '{s}'"))?;
        let (worksheet, table) = (worksheet.trim(), table.trim());
        ensure!(
            !worksheet.is_empty() && !table.is_empty(),
            "Expected WORKSHEET=TABLE, got '{s}'"
        );
        Ok(Self::new(worksheet, table))
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "opex",
///   "config_version": 1,
///   "project": "OPEX",
///   "uploader": "etl_service",
///   "batch_id": 1,
///   "phase_id": 1,
///   "library": {
///     "kind": "sharepoint",
///     "site_url": "https://contoso.sharepoint.com/sites/Finance"
///   },
///   "reshape": { "fill_down_column": "Domain_Category", "max_data_rows": 235, "aliases": {} },
///   "schema_drift": "evolve",
///   "jobs": [
///     {
///       "name": "fpo",
///       "src_folder": "/sites/Finance/Shared Documents/OPEX/",
///       "file_pattern": "OPEX_FPO.*",
///       "file_extension": "xlsx",
///       "sheets": [{ "worksheet": "FPO", "table": "STG_OPEX_FPO" }]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "opex"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    /// Project name used in log step names and the download register
    project: String,

    /// Written to the `Created_by` column and the execution log
    uploader: String,

    #[serde(default = "default_id")]
    batch_id: i64,

    #[serde(default = "default_id")]
    phase_id: i64,

    library: LibrarySettings,

    #[serde(default)]
    reshape: ReshapeOptions,

    #[serde(default)]
    schema_drift: DriftPolicy,

    #[serde(default)]
    jobs: Vec<Job>,
}

impl ConfigFile {
    fn new(project: &str, uploader: String, library: LibrarySettings) -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            project: project.to_string(),
            uploader,
            batch_id: default_id(),
            phase_id: default_id(),
            library,
            reshape: ReshapeOptions::default(),
            schema_drift: DriftPolicy::default(),
            jobs: Vec::new(),
        }
    }

    /// Loads and validates a ConfigFile.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if it belongs to another app.
    async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;

        ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        ensure!(
            config.config_version <= CONFIG_VERSION,
            "Config file version {} is newer than this program supports ({CONFIG_VERSION})",
            config.config_version
        );
        for job in &config.jobs {
            job.matcher()?;
        }

        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}

fn default_id() -> i64 {
    1
}

fn default_uploader() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| DEFAULT_UPLOADER.to_string())
}
