use crate::commands::Out;
use crate::config::Job;
use crate::db::{ExecLog, Step};
use crate::period::Period;
use crate::{Config, Result};
use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

/// The environment variable that passes a SharePoint access token to child processes.
pub(crate) const TOKEN_ENV: &str = "OPEX_SHAREPOINT_TOKEN";

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub exec_id: i64,
    pub period: String,
    pub jobs: Vec<JobResult>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &JobResult> {
        self.jobs.iter().filter(|j| !j.success)
    }
}

/// Starts one job of a run. Each job runs in isolation so a crash in one cannot take the others
/// down with it.
#[async_trait::async_trait]
pub(crate) trait Launcher: Send + Sync {
    async fn launch(&self, job: &Job, exec_id: i64, period: Period) -> Result<()>;
}

/// Runs each job as `opex download` in a child process of the current executable.
#[derive(Debug, Clone)]
pub(crate) struct ChildProcess {
    exe: PathBuf,
    opex_home: PathBuf,
    log_level: LevelFilter,
    token: Option<String>,
}

impl ChildProcess {
    pub(crate) fn new(
        config: &Config,
        log_level: LevelFilter,
        token: Option<&str>,
    ) -> Result<Self> {
        let exe = std::env::current_exe().context("Unable to locate the opex executable")?;
        Ok(Self {
            exe,
            opex_home: config.root().to_path_buf(),
            log_level,
            token: token.map(str::to_string),
        })
    }

    fn args(&self, job: &Job, exec_id: i64, period: Period) -> Vec<String> {
        vec![
            "--opex-home".into(),
            self.opex_home.to_string_lossy().into_owned(),
            "--log-level".into(),
            self.log_level.to_string().to_lowercase(),
            "download".into(),
            "--job".into(),
            job.name.clone(),
            "--exec-id".into(),
            exec_id.to_string(),
            "--as-of".into(),
            period.date().format("%Y-%m-%d").to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Launcher for ChildProcess {
    async fn launch(&self, job: &Job, exec_id: i64, period: Period) -> Result<()> {
        let mut command = Command::new(&self.exe);
        command.args(self.args(job, exec_id, period));
        if let Some(token) = &self.token {
            command.env(TOKEN_ENV, token);
        }
        let status = command
            .status()
            .await
            .with_context(|| format!("Unable to start the process for job '{}'", job.name))?;
        if !status.success() {
            bail!("The process for job '{}' exited with {status}", job.name);
        }
        Ok(())
    }
}

/// Runs every configured job for `period`, one after the other, under a single execution id.
///
/// A failing job is logged and the remaining jobs still run. The run fails if any job failed.
pub async fn run(
    config: Config,
    log_level: LevelFilter,
    token: Option<&str>,
    period: Period,
) -> Result<Out<RunSummary>> {
    let launcher = ChildProcess::new(&config, log_level, token)?;
    run_with(&config, &launcher, period).await
}

pub(crate) async fn run_with(
    config: &Config,
    launcher: &dyn Launcher,
    period: Period,
) -> Result<Out<RunSummary>> {
    let exec_id = config.db().next_exec_id().await?;
    let log = ExecLog::new(config, exec_id);
    let step = Step::new(format!("{}-Main Process", config.project()), "Main Process");
    log.started(&step).await?;
    info!(
        "Starting run {exec_id} of {} job(s) for {period}",
        config.jobs().len()
    );

    let mut jobs = Vec::with_capacity(config.jobs().len());
    for job in config.jobs() {
        info!("Running job '{}'", job.name);
        let result = match launcher.launch(job, exec_id, period).await {
            Ok(()) => JobResult {
                job: job.name.clone(),
                success: true,
                error: None,
            },
            Err(e) => {
                error!("Job '{}' failed: {e:#}", job.name);
                JobResult {
                    job: job.name.clone(),
                    success: false,
                    error: Some(format!("{e:#}")),
                }
            }
        };
        jobs.push(result);
    }

    let summary = RunSummary {
        exec_id,
        period: period.folder_name(),
        jobs,
    };
    let failed: Vec<&str> = summary.failed().map(|j| j.job.as_str()).collect();
    if failed.is_empty() {
        log.completed(&step, Some(summary.jobs.len() as u64)).await?;
        Ok(Out::new(
            format!(
                "Run {exec_id} finished {} job(s) for {period}",
                summary.jobs.len()
            ),
            summary,
        ))
    } else {
        let e = anyhow!("Run {exec_id} failed for job(s): {}", failed.join(", "));
        log.exception(&step, &e).await;
        Err(e)
    }
}
