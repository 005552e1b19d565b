//! This module is responsible for reading, writing and managing the SQLite staging database: the
//! execution log, the download register and the staging tables that reshaped worksheets land in.

mod log;
mod migrations;
mod reconcile;
mod staging;

pub(crate) use log::{DownloadedFile, ExecLog, LogEntry, LogStatus, Step};
pub use reconcile::{previous_projection, DriftPolicy, SchemaDiff};
pub use staging::{LoadOutcome, SchemaColumn, SqlType, TargetTableSchema, WriteMode};

use crate::Result;
use anyhow::{bail, Context};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;

/// The schema version this build of the program expects.
const SCHEMA_VERSION: i32 = 1;

/// Tables owned by the program. Staging loads may not target them.
const RESERVED_TABLES: &[&str] = &["schema_version", "process_log", "files_downloaded"];

#[derive(Debug, Clone)]
pub(crate) struct Db {
    pool: SqlitePool,
}

impl Db {
    /// - Validates that there is a SQLite file at `path`
    /// - Connects to it
    /// - Updates the database schema with migrations if it is out-of-date
    pub(crate) async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The database file is missing: {}", path.display());
        }
        let db = Self {
            pool: connect(path, false).await?,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// - Validates that no file currently exists at `path`
    /// - Creates a new SQLite file at `path`
    /// - Initializes the database schema
    pub(crate) async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A database file already exists at {}", path.display());
        }
        let db = Self {
            pool: connect(path, true).await?,
        };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) async fn schema_version(&self) -> Result<i32> {
        let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query schema version")?;
        Ok(row.0)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await
            .context("Failed to create schema_version table")?;

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count schema_version rows")?;
        if row.0 == 0 {
            sqlx::query("INSERT INTO schema_version (version) VALUES (0)")
                .execute(&self.pool)
                .await
                .context("Failed to insert initial schema version")?;
        }

        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            bail!(
                "The database schema is at version {current} which is newer than this program \
                supports ({SCHEMA_VERSION})"
            );
        }
        migrations::run(&self.pool, current, SCHEMA_VERSION).await
    }
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    debug!("Connecting to SQLite database at {}", path.display());
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database {}", path.display()))
}

/// Quotes an identifier for use in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn check_table_name(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        bail!("The staging table name is empty");
    }
    let lower = table.to_ascii_lowercase();
    if lower.starts_with("sqlite_") || RESERVED_TABLES.contains(&lower.as_str()) {
        bail!("'{table}' is reserved and cannot be used as a staging table");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opex.sqlite");

        let db = Db::init(&path).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
        drop(db);

        let db = Db::load(&path).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_init_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opex.sqlite");
        std::fs::write(&path, b"").unwrap();
        assert!(Db::init(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Db::load(dir.path().join("nope.sqlite")).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("COST"), "\"COST\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_check_table_name() {
        assert!(check_table_name("STG_OPEX_FPO").is_ok());
        assert!(check_table_name("process_log").is_err());
        assert!(check_table_name("SQLITE_master").is_err());
        assert!(check_table_name("  ").is_err());
    }
}
