//! These structs provide the CLI interface for the opex CLI.

use crate::config::{LibrarySettings, SheetTarget};
use crate::period::Period;
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// opex: Loads monthly OPEX workbooks from a document library into staging tables.
///
/// Each configured job picks up the workbooks of the current month from a SharePoint folder (or a
/// local directory standing in for one), reshapes their wide period-by-measure worksheets into a
/// long table and loads that into a SQLite staging database. Processed files are moved to an
/// `Archived` folder and every step is recorded in the `process_log` table.
#[derive(Debug, Parser, Clone)]
#[command(name = "opex", version)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory, the configuration file and the staging database.
    ///
    /// This is the first command to run. Pass either --sharepoint-url to read from a SharePoint
    /// site or --library-dir to read from a local directory. Jobs are then added to
    /// $OPEX_HOME/config.json.
    Init(InitArgs),
    /// Run every configured job for the current month, each in its own process.
    Run(RunArgs),
    /// Run one job: download its matching files, load them and archive them.
    Download(DownloadArgs),
    /// Load worksheets of a local workbook into staging tables.
    Upload(UploadArgs),
    /// Reshape one worksheet and print the result as CSV without loading it.
    Reshape(ReshapeArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where opex data and configuration is held. Defaults to ~/opex
    #[arg(long, env = "OPEX_HOME", default_value_t = default_opex_home())]
    opex_home: DisplayPath,

    /// A bearer token for the SharePoint REST API. Not needed for a local library.
    #[arg(long, env = "OPEX_SHAREPOINT_TOKEN", hide_env_values = true)]
    sharepoint_token: Option<String>,
}

impl Common {
    pub fn new(log_level: LevelFilter, opex_home: PathBuf) -> Self {
        Self {
            log_level,
            opex_home: opex_home.into(),
            sharepoint_token: None,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn opex_home(&self) -> &DisplayPath {
        &self.opex_home
    }

    pub fn sharepoint_token(&self) -> Option<&str> {
        self.sharepoint_token.as_deref()
    }
}

/// (Not shown): Args for the `opex init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The name of the project, used in execution log step names, e.g. OPEX
    #[arg(long, default_value = "OPEX")]
    project: String,

    #[command(flatten)]
    library: LibraryArgs,
}

#[derive(Debug, ClapArgs, Clone)]
#[group(required = true, multiple = false)]
pub struct LibraryArgs {
    /// The SharePoint site to read from, e.g. https://contoso.sharepoint.com/sites/Finance
    #[arg(long)]
    sharepoint_url: Option<String>,

    /// A local directory to use as the document library instead of SharePoint.
    #[arg(long)]
    library_dir: Option<PathBuf>,
}

impl InitArgs {
    pub fn new(project: impl Into<String>, library: LibrarySettings) -> Self {
        let library = match library {
            LibrarySettings::SharePoint { site_url } => LibraryArgs {
                sharepoint_url: Some(site_url),
                library_dir: None,
            },
            LibrarySettings::Local { root } => LibraryArgs {
                sharepoint_url: None,
                library_dir: Some(root),
            },
        };
        Self {
            project: project.into(),
            library,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn library(&self) -> LibrarySettings {
        match (&self.library.sharepoint_url, &self.library.library_dir) {
            (Some(site_url), _) => LibrarySettings::SharePoint {
                site_url: site_url.clone(),
            },
            (None, Some(root)) => LibrarySettings::Local { root: root.clone() },
            // clap requires one of the two
            (None, None) => LibrarySettings::Local {
                root: PathBuf::from("."),
            },
        }
    }
}

/// (Not shown): Args for the `opex run` command.
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Process the month of this date (YYYY-MM-DD) instead of the current month.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl RunArgs {
    pub fn new(as_of: Option<NaiveDate>) -> Self {
        Self { as_of }
    }

    pub fn period(&self) -> Period {
        Period::from_option(self.as_of)
    }
}

/// (Not shown): Args for the `opex download` command.
#[derive(Debug, Parser, Clone)]
pub struct DownloadArgs {
    /// The name of the job in config.json.
    #[arg(long)]
    job: String,

    /// Write log rows under this execution id instead of starting a new one.
    #[arg(long)]
    exec_id: Option<i64>,

    /// Process the month of this date (YYYY-MM-DD) instead of the current month.
    #[arg(long)]
    as_of: Option<NaiveDate>,
}

impl DownloadArgs {
    pub fn new(job: impl Into<String>, exec_id: Option<i64>, as_of: Option<NaiveDate>) -> Self {
        Self {
            job: job.into(),
            exec_id,
            as_of,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn exec_id(&self) -> Option<i64> {
        self.exec_id
    }

    pub fn period(&self) -> Period {
        Period::from_option(self.as_of)
    }
}

/// (Not shown): Args for the `opex upload` command.
#[derive(Debug, Parser, Clone)]
pub struct UploadArgs {
    /// The workbook to load.
    #[arg(long)]
    file: PathBuf,

    /// A worksheet and its staging table as WORKSHEET=TABLE. Can be repeated.
    #[arg(long = "sheet", required = true)]
    sheets: Vec<SheetTarget>,

    /// Write log rows under this execution id instead of starting a new one.
    #[arg(long)]
    exec_id: Option<i64>,
}

impl UploadArgs {
    pub fn new(file: impl Into<PathBuf>, sheets: Vec<SheetTarget>, exec_id: Option<i64>) -> Self {
        Self {
            file: file.into(),
            sheets,
            exec_id,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn sheets(&self) -> &[SheetTarget] {
        &self.sheets
    }

    pub fn exec_id(&self) -> Option<i64> {
        self.exec_id
    }
}

/// (Not shown): Args for the `opex reshape` command.
#[derive(Debug, Parser, Clone)]
pub struct ReshapeArgs {
    /// The workbook to read.
    #[arg(long)]
    file: PathBuf,

    /// The worksheet to reshape.
    #[arg(long)]
    sheet: String,

    /// Write the CSV here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl ReshapeArgs {
    pub fn new(
        file: impl Into<PathBuf>,
        sheet: impl Into<String>,
        output: Option<PathBuf>,
    ) -> Self {
        Self {
            file: file.into(),
            sheet: sheet.into(),
            output,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }
}

fn default_opex_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("opex"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --opex-home or OPEX_HOME instead of relying on the default \
                opex home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("opex")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
