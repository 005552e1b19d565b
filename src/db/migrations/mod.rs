//! Schema migrations for the bookkeeping tables (`process_log`, `files_downloaded`).
//!
//! Each step lives in a pair of files in this directory:
//! - `migration_NN_up.sql` takes the schema from version `NN-1` to `NN`
//! - `migration_NN_down.sql` takes it back from `NN` to `NN-1`
//!
//! Staging tables are not managed here. Their columns follow the worksheets that feed them.

use anyhow::{bail, Context};
use sqlx::{Executor, SqlitePool};
use tracing::{debug, info};

use crate::Result;

struct Migration {
    /// The version reached by running `up`.
    version: i32,
    up: &'static str,
    down: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up: include_str!("migration_01_up.sql"),
    down: include_str!("migration_01_down.sql"),
}];

/// Moves the schema from `from` to `to`, one migration per transaction. Fails before touching
/// the database if any migration in between is missing.
pub(crate) async fn run(pool: &SqlitePool, from: i32, to: i32) -> Result<()> {
    if from == to {
        debug!("Schema is at version {to}, nothing to migrate");
        return Ok(());
    }
    let steps = plan(from, to)?;
    for (migration, upward) in steps {
        let (sql, reached) = if upward {
            (migration.up, migration.version)
        } else {
            (migration.down, migration.version - 1)
        };
        debug!(
            "Applying migration {:02} ({})",
            migration.version,
            if upward { "up" } else { "down" }
        );
        apply(pool, sql, reached).await?;
    }
    info!("Database schema migrated from version {from} to {to}");
    Ok(())
}

/// The ordered migrations needed to get from `from` to `to`, paired with their direction.
fn plan(from: i32, to: i32) -> Result<Vec<(&'static Migration, bool)>> {
    let upward = from < to;
    let versions: Vec<i32> = if upward {
        ((from + 1)..=to).collect()
    } else {
        ((to + 1)..=from).rev().collect()
    };
    versions
        .into_iter()
        .map(|version| match MIGRATIONS.iter().find(|m| m.version == version) {
            Some(m) => Ok((m, upward)),
            None => bail!(
                "Migration {version} is required to go from version {from} to {to} but does \
                not exist"
            ),
        })
        .collect()
}

async fn apply(pool: &SqlitePool, sql: &str, reached: i32) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin migration transaction")?;

    // migration files hold several statements
    tx.execute(sql)
        .await
        .context("Failed to execute migration SQL")?;

    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *tx)
        .await
        .context("Failed to clear schema_version")?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(reached)
        .execute(&mut *tx)
        .await
        .context("Failed to update schema_version")?;

    tx.commit()
        .await
        .context("Failed to commit migration transaction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    async fn scratch_db() -> (TempDir, SqlitePool) {
        let dir = TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("scratch.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        pool.execute(
            "CREATE TABLE schema_version (version INTEGER NOT NULL); \
             INSERT INTO schema_version (version) VALUES (0);",
        )
            .await
            .unwrap();
        (dir, pool)
    }

    async fn version(pool: &SqlitePool) -> i32 {
        let row: (i32,) = sqlx::query_as("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    async fn has_table(pool: &SqlitePool, name: &str) -> bool {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_one(pool)
                .await
                .unwrap();
        row.0 > 0
    }

    #[tokio::test]
    async fn test_up_then_down() {
        let (_dir, pool) = scratch_db().await;

        run(&pool, 0, 1).await.unwrap();
        assert_eq!(version(&pool).await, 1);
        assert!(has_table(&pool, "process_log").await);
        assert!(has_table(&pool, "files_downloaded").await);

        run(&pool, 1, 0).await.unwrap();
        assert_eq!(version(&pool).await, 0);
        assert!(!has_table(&pool, "process_log").await);
        assert!(!has_table(&pool, "files_downloaded").await);
    }

    #[tokio::test]
    async fn test_same_version_is_a_no_op() {
        let (_dir, pool) = scratch_db().await;
        run(&pool, 0, 1).await.unwrap();
        run(&pool, 1, 1).await.unwrap();
        assert_eq!(version(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_process_log_rejects_unknown_status() {
        let (_dir, pool) = scratch_db().await;
        run(&pool, 0, 1).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO process_log (exec_id, batch_id, phase_id, user_name, step_name, \
            step_kind, status, logged_at) VALUES (1, 1, 1, 'u', 's', 'k', 'Bogus', 'now')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_plan() {
        let up = plan(0, 1).unwrap();
        assert_eq!(up.len(), 1);
        assert!(up[0].1);

        let down = plan(1, 0).unwrap();
        assert_eq!(down.len(), 1);
        assert!(!down[0].1);

        assert!(plan(0, 2).is_err());
        assert!(plan(3, 1).is_err());
    }
}
