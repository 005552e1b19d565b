use crate::api::{self, Library, RemoteFile};
use crate::commands::upload::{load_workbook, UploadSummary};
use crate::commands::Out;
use crate::config::Job;
use crate::db::{DownloadedFile, ExecLog, Step};
use crate::period::Period;
use crate::{utils, Config, Result};
use anyhow::{bail, Context};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub name: String,
    pub local_path: PathBuf,
    pub archived_to: String,
    pub upload: UploadSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub job: String,
    pub period: String,
    pub source: String,
    pub archive: String,
    pub files: Vec<FileSummary>,
}

/// Runs one job for `period`: every file in the job's monthly folder whose name matches its
/// pattern is downloaded, registered, loaded into the staging tables and then moved to the
/// archive folder.
///
/// The first failure stops the job. Files handled before it stay downloaded, loaded and archived.
pub async fn download(
    config: Config,
    job: &str,
    exec_id: Option<i64>,
    period: Period,
    token: Option<&str>,
) -> Result<Out<DownloadSummary>> {
    let library = api::library(&config, token)?;
    download_from(&config, library.as_ref(), job, exec_id, period).await
}

pub(crate) async fn download_from(
    config: &Config,
    library: &dyn Library,
    job: &str,
    exec_id: Option<i64>,
    period: Period,
) -> Result<Out<DownloadSummary>> {
    let job = config.job(job)?;
    let exec_id = match exec_id {
        Some(id) => id,
        None => config.db().next_exec_id().await?,
    };
    let log = ExecLog::new(config, exec_id);
    let step = Step::new(format!("{}-{}", config.project(), job.name), "Download Job");

    log.started(&step).await?;
    match run_job(config, library, &log, job, period).await {
        Ok(summary) => {
            log.completed(&step, Some(summary.files.len() as u64)).await?;
            let message = format!(
                "Job '{}' processed {} file(s) from {}",
                job.name,
                summary.files.len(),
                summary.source
            );
            Ok(Out::new(message, summary))
        }
        Err(e) => {
            error!("Job '{}' failed: {e:#}", job.name);
            log.exception(&step, &e).await;
            Err(e)
        }
    }
}

async fn run_job(
    config: &Config,
    library: &dyn Library,
    log: &ExecLog,
    job: &Job,
    period: Period,
) -> Result<DownloadSummary> {
    let source = job.source_folder(&period);
    let archive = api::ensure_archive_folder(library, &source)
        .await
        .with_context(|| format!("Unable to prepare the archive folder for {source}"))?;
    let matcher = job.matcher()?;
    let dest_dir = config.dest_dir(job);
    utils::make_dir(&dest_dir).await?;

    let matching: Vec<RemoteFile> = library
        .list_files(&source)
        .await?
        .into_iter()
        .filter(|f| {
            let keep = matcher.is_match(&f.name);
            debug!("{} '{}'", if keep { "Matched" } else { "Skipped" }, f.name);
            keep
        })
        .collect();
    if matching.is_empty() {
        info!("No files matching '{}' found in {source}", matcher.as_str());
    } else {
        info!("Found {} file(s) to process in {source}", matching.len());
    }

    let mut files = Vec::with_capacity(matching.len());
    for file in matching {
        let local_path = dest_dir.join(local_name(&file.name)?);
        fetch(library, log, &file, &local_path).await?;
        config
            .db()
            .record_download(&DownloadedFile {
                file_name_pattern: job.file_pattern.clone(),
                file_name: file.name.clone(),
                downloaded_time: Local::now().naive_local(),
                period: period.code(),
                project: config.project().to_string(),
                file_creation_time: file.created,
            })
            .await?;

        let upload = load_workbook(config, log, &local_path, &job.sheets).await?;

        let archived_to = api::join(&archive, &file.name);
        archive_file(library, log, &file, &archived_to).await?;
        files.push(FileSummary {
            name: file.name,
            local_path,
            archived_to,
            upload,
        });
    }

    Ok(DownloadSummary {
        job: job.name.clone(),
        period: period.folder_name(),
        source,
        archive,
        files,
    })
}

async fn fetch(
    library: &dyn Library,
    log: &ExecLog,
    file: &RemoteFile,
    dest: &Path,
) -> Result<()> {
    let step = Step::new(&file.name, format!("Download File -> {}", file.name));
    log.started(&step).await?;
    match library.download(file, dest).await {
        Ok(bytes) => {
            info!("Downloaded {} ({bytes} bytes) to {}", file.path, dest.display());
            log.completed(&step, None).await
        }
        Err(e) => {
            log.exception(&step, &e).await;
            Err(e.context(format!("Unable to download {}", file.path)))
        }
    }
}

async fn archive_file(
    library: &dyn Library,
    log: &ExecLog,
    file: &RemoteFile,
    to: &str,
) -> Result<()> {
    let step = Step::new(&file.name, format!("Archive File -> {to}"));
    log.started(&step).await?;
    match library.move_file(&file.path, to).await {
        Ok(()) => {
            info!("Archived {} to {to}", file.path);
            log.completed(&step, None).await
        }
        Err(e) => {
            log.exception(&step, &e).await;
            Err(e.context(format!("Unable to move {} to {to}", file.path)))
        }
    }
}

/// A remote file name is only used locally when it is a plain file name.
fn local_name(name: &str) -> Result<&str> {
    match Path::new(name).file_name() {
        Some(n) if n == name && !name.contains('\\') => Ok(name),
        _ => bail!("Refusing to download '{name}' because it is not a plain file name"),
    }
}
