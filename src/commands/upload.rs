use crate::commands::Out;
use crate::config::SheetTarget;
use crate::db::{ExecLog, LoadOutcome, Step, WriteMode};
use crate::reshape::{reshape, Audit, LongTable};
use crate::{workbook, Config, Result};
use anyhow::{ensure, Context};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const TABLE_LOAD: &str = "Table Load";

/// What happened to one worksheet.
#[derive(Debug, Clone, Serialize)]
pub struct SheetLoad {
    pub worksheet: String,
    pub table: String,
    pub rows: u64,
    pub mode: WriteMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
}

impl SheetLoad {
    fn new(target: &SheetTarget, outcome: &LoadOutcome) -> Self {
        let (added, missing) = outcome
            .diff()
            .map(|d| (d.added().to_vec(), d.missing().to_vec()))
            .unwrap_or_default();
        Self {
            worksheet: target.worksheet.clone(),
            table: outcome.table().to_string(),
            rows: outcome.rows(),
            mode: outcome.mode(),
            added_columns: added,
            missing_columns: missing,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub file: PathBuf,
    pub exec_id: i64,
    pub sheets: Vec<SheetLoad>,
}

impl UploadSummary {
    pub fn rows(&self) -> u64 {
        self.sheets.iter().map(|s| s.rows).sum()
    }
}

/// Loads each `(worksheet, table)` of `sheets` from the workbook at `file` into the staging
/// database. Log rows are written under `exec_id`, or under a new execution id when `None`.
///
/// The first worksheet that fails stops the upload. Worksheets loaded before it stay loaded.
pub async fn upload(
    config: Config,
    file: &Path,
    sheets: &[SheetTarget],
    exec_id: Option<i64>,
) -> Result<Out<UploadSummary>> {
    let exec_id = match exec_id {
        Some(id) => id,
        None => config.db().next_exec_id().await?,
    };
    let log = ExecLog::new(&config, exec_id);
    let summary = load_workbook(&config, &log, file, sheets).await?;
    Ok(Out::new(
        format!(
            "Loaded {} row(s) from {} worksheet(s) of {}",
            summary.rows(),
            summary.sheets.len(),
            file.display()
        ),
        summary,
    ))
}

pub(crate) async fn load_workbook(
    config: &Config,
    log: &ExecLog,
    file: &Path,
    sheets: &[SheetTarget],
) -> Result<UploadSummary> {
    ensure!(
        !sheets.is_empty(),
        "No worksheets were given to load from {}",
        file.display()
    );
    let mut loads = Vec::with_capacity(sheets.len());
    for target in sheets {
        let step =
            Step::new(format!("Load {}", target.table), TABLE_LOAD).with_target(&target.table);
        log.started(&step).await?;
        match load_sheet(config, file, target).await {
            Ok(outcome) => {
                log.completed(&step, Some(outcome.rows())).await?;
                info!(
                    "Worksheet '{}' loaded {} row(s) into '{}'",
                    target.worksheet,
                    outcome.rows(),
                    target.table
                );
                loads.push(SheetLoad::new(target, &outcome));
            }
            Err(e) => {
                error!(
                    "Loading worksheet '{}' into '{}' failed: {e:#}",
                    target.worksheet, target.table
                );
                log.exception(&step, &e).await;
                return Err(e.context(format!(
                    "Failed to load worksheet '{}' of {} into '{}'",
                    target.worksheet,
                    file.display(),
                    target.table
                )));
            }
        }
    }
    Ok(UploadSummary {
        file: file.to_path_buf(),
        exec_id: log.exec_id(),
        sheets: loads,
    })
}

async fn load_sheet(config: &Config, file: &Path, target: &SheetTarget) -> Result<LoadOutcome> {
    let table = read_and_reshape(config, file, &target.worksheet).await?;
    let outcome = config
        .db()
        .load_table(&target.table, &table, config.schema_drift())
        .await?;
    if let Some(diff) = outcome.diff() {
        warn!(
            "Columns of '{}' drifted from worksheet '{}': added {:?}, missing {:?}",
            target.table,
            target.worksheet,
            diff.added(),
            diff.missing()
        );
    }
    Ok(outcome)
}

/// Reads `worksheet` from `file` and reshapes it with the configured options.
pub(crate) async fn read_and_reshape(
    config: &Config,
    file: &Path,
    worksheet: &str,
) -> Result<LongTable> {
    let path = file.to_path_buf();
    let name = worksheet.to_string();
    let sheet = tokio::task::spawn_blocking(move || workbook::read_sheet(&path, &name))
        .await
        .context("The workbook reader stopped unexpectedly")??;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let audit = Audit::new(
        Local::now().naive_local(),
        config.uploader(),
        file_name,
        worksheet,
    );
    let table = reshape(&sheet, config.reshape(), audit)?;
    info!(
        "Worksheet '{worksheet}' reshaped into {} record(s) with anchor columns {:?}",
        table.len(),
        table.anchor_columns()
    );
    Ok(table)
}
