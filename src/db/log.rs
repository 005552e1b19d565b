//! The execution log (`process_log`) and the register of downloaded files (`files_downloaded`).

use crate::config::Config;
use crate::db::Db;
use crate::Result;
use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub(crate) enum LogStatus {
    Started,
    Completed,
    Exception,
}

serde_plain::derive_display_from_serialize!(LogStatus);
serde_plain::derive_fromstr_from_deserialize!(LogStatus);

/// Identifies a unit of work in the execution log, e.g. `("Load STG_OPEX_FPO", "Table Load",
/// Some("STG_OPEX_FPO"))`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Step {
    name: String,
    kind: String,
    target: Option<String>,
}

impl Step {
    pub(crate) fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            target: None,
        }
    }

    pub(crate) fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// One row of `process_log`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct LogEntry {
    pub(crate) exec_id: i64,
    pub(crate) step_name: String,
    pub(crate) step_kind: String,
    pub(crate) target_name: Option<String>,
    pub(crate) row_count: Option<i64>,
    pub(crate) status: LogStatus,
    pub(crate) message: Option<String>,
    pub(crate) user_name: String,
    pub(crate) logged_at: String,
}

/// One row of `files_downloaded`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub(crate) struct DownloadedFile {
    pub(crate) file_name_pattern: String,
    pub(crate) file_name: String,
    pub(crate) downloaded_time: NaiveDateTime,
    pub(crate) period: String,
    pub(crate) project: String,
    pub(crate) file_creation_time: Option<NaiveDateTime>,
}

/// Writes the status rows of one execution.
#[derive(Debug, Clone)]
pub(crate) struct ExecLog {
    db: Db,
    exec_id: i64,
    user: String,
    batch_id: i64,
    phase_id: i64,
}

impl ExecLog {
    pub(crate) fn new(config: &Config, exec_id: i64) -> Self {
        Self {
            db: config.db().clone(),
            exec_id,
            user: config.uploader().to_string(),
            batch_id: config.batch_id(),
            phase_id: config.phase_id(),
        }
    }

    pub(crate) fn exec_id(&self) -> i64 {
        self.exec_id
    }

    pub(crate) async fn started(&self, step: &Step) -> Result<()> {
        self.insert(step, LogStatus::Started, None, None).await
    }

    pub(crate) async fn completed(&self, step: &Step, rows: Option<u64>) -> Result<()> {
        self.insert(step, LogStatus::Completed, rows, None).await
    }

    /// Records the failure of `step` with the text of `error`. A failure to write the row is
    /// logged and swallowed so that the original error reaches the caller.
    pub(crate) async fn exception(&self, step: &Step, error: &anyhow::Error) {
        let message = format!("{error:#}");
        if let Err(e) = self
            .insert(step, LogStatus::Exception, None, Some(&message))
            .await
        {
            warn!("Unable to record the failure of '{}': {e:#}", step.name);
        }
    }

    async fn insert(
        &self,
        step: &Step,
        status: LogStatus,
        rows: Option<u64>,
        message: Option<&str>,
    ) -> Result<()> {
        debug!(
            "exec {} | {} | {} | {status}",
            self.exec_id, step.name, step.kind
        );
        sqlx::query(
            "INSERT INTO process_log (exec_id, batch_id, phase_id, user_name, step_name, \
            step_kind, target_name, row_count, status, message, logged_at) \
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.exec_id)
        .bind(self.batch_id)
        .bind(self.phase_id)
        .bind(&self.user)
        .bind(&step.name)
        .bind(&step.kind)
        .bind(step.target.as_deref())
        .bind(rows.map(|r| r as i64))
        .bind(status.to_string())
        .bind(message)
        .bind(now())
        .execute(self.db.pool())
        .await
        .with_context(|| format!("Failed to write the {status} row for '{}'", step.name))?;
        Ok(())
    }
}

impl Db {
    /// One more than the highest execution id in the log.
    pub(crate) async fn next_exec_id(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(exec_id), 0) + 1 FROM process_log")
            .fetch_one(self.pool())
            .await
            .context("Failed to allocate an execution id")?;
        Ok(row.0)
    }

    pub(crate) async fn log_entries(&self, exec_id: i64) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT exec_id, step_name, step_kind, target_name, row_count, status, message, \
            user_name, logged_at FROM process_log WHERE exec_id = ? ORDER BY id",
        )
        .bind(exec_id)
        .fetch_all(self.pool())
        .await
        .with_context(|| format!("Failed to read the log of execution {exec_id}"))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            entries.push(LogEntry {
                exec_id: row.try_get("exec_id")?,
                step_name: row.try_get("step_name")?,
                step_kind: row.try_get("step_kind")?,
                target_name: row.try_get("target_name")?,
                row_count: row.try_get("row_count")?,
                status: status
                    .parse()
                    .with_context(|| format!("Unknown log status '{status}'"))?,
                message: row.try_get("message")?,
                user_name: row.try_get("user_name")?,
                logged_at: row.try_get("logged_at")?,
            });
        }
        Ok(entries)
    }

    pub(crate) async fn record_download(&self, file: &DownloadedFile) -> Result<()> {
        sqlx::query(
            "INSERT INTO files_downloaded (file_name_pattern, file_name, downloaded_time, period, \
            project, file_creation_time) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.file_name_pattern)
        .bind(&file.file_name)
        .bind(file.downloaded_time.format(TIMESTAMP_FORMAT).to_string())
        .bind(&file.period)
        .bind(&file.project)
        .bind(
            file.file_creation_time
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
        )
        .execute(self.pool())
        .await
        .with_context(|| format!("Failed to register the download of {}", file.file_name))?;
        Ok(())
    }

    pub(crate) async fn downloads(&self) -> Result<Vec<DownloadedFile>> {
        let rows = sqlx::query(
            "SELECT file_name_pattern, file_name, downloaded_time, period, project, \
            file_creation_time FROM files_downloaded ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .context("Failed to read the download register")?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            let downloaded: String = row.try_get("downloaded_time")?;
            let created: Option<String> = row.try_get("file_creation_time")?;
            files.push(DownloadedFile {
                file_name_pattern: row.try_get("file_name_pattern")?,
                file_name: row.try_get("file_name")?,
                downloaded_time: parse_timestamp(&downloaded)?,
                period: row.try_get("period")?,
                project: row.try_get("project")?,
                file_creation_time: created.as_deref().map(parse_timestamp).transpose()?,
            });
        }
        Ok(files)
    }
}

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid timestamp '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_exec_log_rows() {
        let env = TestEnv::new().await;
        let config = env.config();
        let db = config.db();

        let exec_id = db.next_exec_id().await.unwrap();
        assert_eq!(exec_id, 1);
        let log = ExecLog::new(&config, exec_id);
        let step = Step::new("Load STG_FPO", "Table Load").with_target("STG_FPO");
        log.started(&step).await.unwrap();
        log.completed(&step, Some(12)).await.unwrap();
        log.exception(&step, &anyhow::anyhow!("disk full")).await;

        let entries = db.log_entries(exec_id).await.unwrap();
        let statuses: Vec<LogStatus> = entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![LogStatus::Started, LogStatus::Completed, LogStatus::Exception]
        );
        assert_eq!(entries[1].row_count, Some(12));
        assert_eq!(entries[1].target_name.as_deref(), Some("STG_FPO"));
        assert_eq!(entries[2].message.as_deref(), Some("disk full"));
        assert_eq!(entries[0].user_name, config.uploader());

        assert_eq!(db.next_exec_id().await.unwrap(), 2);
        assert!(db.log_entries(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_register() {
        let env = TestEnv::new().await;
        let db = env.config().db().clone();
        let at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let file = DownloadedFile {
            file_name_pattern: "OPEX_.*".into(),
            file_name: "OPEX_FPO.xlsx".into(),
            downloaded_time: at,
            period: "Oct 2026".into(),
            project: "OPEX".into(),
            file_creation_time: None,
        };
        db.record_download(&file).await.unwrap();
        assert_eq!(db.downloads().await.unwrap(), vec![file]);
    }

    #[test]
    fn test_log_status_strings() {
        assert_eq!(LogStatus::Exception.to_string(), "Exception");
        assert_eq!("Started".parse::<LogStatus>().unwrap(), LogStatus::Started);
    }
}
