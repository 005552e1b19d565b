//! Staging-table writes: creating, replacing, evolving and appending to the tables that hold
//! reshaped worksheet rows.

use crate::db::reconcile::{plan, previous_projection, DriftPolicy, LoadPlan, SchemaDiff};
use crate::db::{check_table_name, quote_ident, Db};
use crate::reshape::{Cell, LongTable, COST, UPDATE_TO_STG};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::Row;
use std::fmt::{Display, Formatter};
use tracing::debug;

/// How rows are written to a staging table.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Insert after the existing rows, creating the table if needed.
    #[default]
    Append,
    /// Drop the table and recreate it from the new rows.
    Replace,
}

serde_plain::derive_display_from_serialize!(WriteMode);
serde_plain::derive_fromstr_from_deserialize!(WriteMode);

/// The declared type of a staging column.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub enum SqlType {
    Text,
    Real,
    Integer,
}

impl SqlType {
    /// Maps a declared column type to its SQLite affinity.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            SqlType::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            SqlType::Real
        } else {
            SqlType::Text
        }
    }
}

impl Display for SqlType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlType::Text => f.write_str("TEXT"),
            SqlType::Real => f.write_str("REAL"),
            SqlType::Integer => f.write_str("INTEGER"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SchemaColumn {
    name: String,
    data_type: SqlType,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> SqlType {
        self.data_type
    }
}

/// The ordered columns of an existing staging table.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TargetTableSchema {
    table: String,
    columns: Vec<SchemaColumn>,
}

impl TargetTableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<SchemaColumn>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// The result of loading one worksheet into its staging table.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct LoadOutcome {
    table: String,
    mode: WriteMode,
    rows: u64,
    diff: Option<SchemaDiff>,
}

impl LoadOutcome {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Present when the table's columns had to be evolved.
    pub fn diff(&self) -> Option<&SchemaDiff> {
        self.diff.as_ref()
    }
}

impl Db {
    /// The columns of `table` in declaration order, or `None` when the table does not exist.
    pub(crate) async fn table_schema(&self, table: &str) -> Result<Option<TargetTableSchema>> {
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
            .bind(table)
            .fetch_all(self.pool())
            .await
            .with_context(|| format!("Failed to read the columns of table '{table}'"))?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            columns.push(SchemaColumn::new(name, SqlType::from_declared(&declared)));
        }
        Ok(Some(TargetTableSchema::new(table, columns)))
    }

    /// Writes every row of `data` to `table` in one transaction. An empty `data` with
    /// `WriteMode::Replace` leaves an empty table with the right columns.
    pub(crate) async fn write(
        &self,
        table: &str,
        data: &LongTable,
        mode: WriteMode,
    ) -> Result<u64> {
        check_table_name(table)?;
        let plan = match mode {
            WriteMode::Replace => LoadPlan::Create,
            WriteMode::Append => match self.table_schema(table).await? {
                None => LoadPlan::Create,
                Some(_) => LoadPlan::Append,
            },
        };
        self.apply(table, data, &plan, mode == WriteMode::Replace).await
    }

    /// Reconciles the columns of `data` with `table` under `policy`, then appends.
    pub(crate) async fn load_table(
        &self,
        table: &str,
        data: &LongTable,
        policy: DriftPolicy,
    ) -> Result<LoadOutcome> {
        check_table_name(table)?;
        let existing = self.table_schema(table).await?;
        let columns = data.columns();
        let plan = plan(table, &columns, existing.as_ref(), policy)?;
        if let (LoadPlan::Evolve(_), Some(existing)) = (&plan, &existing) {
            debug!(
                "Previous schema of '{table}' projected onto the new columns: {:?}",
                previous_projection(&columns, &existing.column_names())
            );
        }
        let rows = match plan {
            LoadPlan::Create => self.write(table, data, WriteMode::Replace).await?,
            _ => self.apply(table, data, &plan, false).await?,
        };
        let (mode, diff) = match plan {
            LoadPlan::Create => (WriteMode::Replace, None),
            LoadPlan::Append => (WriteMode::Append, None),
            LoadPlan::Evolve(diff) => (WriteMode::Append, Some(diff)),
        };
        Ok(LoadOutcome {
            table: table.to_string(),
            mode,
            rows,
            diff,
        })
    }

    pub(crate) async fn count_rows(&self, table: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(self.pool())
            .await
            .with_context(|| format!("Failed to count the rows of table '{table}'"))?;
        Ok(row.0 as u64)
    }

    async fn apply(
        &self,
        table: &str,
        data: &LongTable,
        plan: &LoadPlan,
        replace: bool,
    ) -> Result<u64> {
        let quoted = quote_ident(table);
        let columns = data.columns();
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin staging transaction")?;

        match plan {
            LoadPlan::Create => {
                if replace {
                    sqlx::query(&format!("DROP TABLE IF EXISTS {quoted}"))
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("Failed to drop table '{table}'"))?;
                }
                let defs: Vec<String> = column_types(data)
                    .iter()
                    .map(|c| format!("{} {}", quote_ident(c.name()), c.data_type()))
                    .collect();
                sqlx::query(&format!("CREATE TABLE {quoted} ({})", defs.join(", ")))
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to create table '{table}'"))?;
                debug!("Created staging table '{table}' with {} columns", defs.len());
            }
            LoadPlan::Append => {}
            LoadPlan::Evolve(diff) => {
                let types = column_types(data);
                for added in diff.added() {
                    let data_type = types
                        .iter()
                        .find(|c| c.name() == added)
                        .map(SchemaColumn::data_type)
                        .unwrap_or(SqlType::Text);
                    sqlx::query(&format!(
                        "ALTER TABLE {quoted} ADD COLUMN {} {data_type}",
                        quote_ident(added)
                    ))
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to add column '{added}' to table '{table}'"))?;
                }
                debug!(
                    "Evolved table '{table}': added {:?}, missing {:?}",
                    diff.added(),
                    diff.missing()
                );
            }
        }

        let sql = insert_sql(&quoted, &columns);
        let mut count = 0u64;
        for row in data.rows() {
            bind_row(sqlx::query(&sql), row)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!("Failed to insert row {} into table '{table}'", count + 1)
                })?;
            count += 1;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit writes to table '{table}'"))?;
        debug!("Wrote {count} rows to table '{table}'");
        Ok(count)
    }
}

/// Column definitions for a new staging table. Anchor columns are REAL when every non-blank value
/// is a number, TEXT otherwise.
pub(crate) fn column_types(data: &LongTable) -> Vec<SchemaColumn> {
    let anchors = data.anchor_columns().iter().enumerate().map(|(ix, name)| {
        let mut values = data
            .records()
            .iter()
            .map(|r| &r.anchors()[ix])
            .filter(|c| !c.is_blank())
            .peekable();
        let numeric = values.peek().is_some() && values.all(Cell::is_number);
        let data_type = if numeric { SqlType::Real } else { SqlType::Text };
        SchemaColumn::new(name.clone(), data_type)
    });
    let trailing = crate::reshape::TRAILING_COLUMNS.iter().map(|name| {
        let data_type = match *name {
            COST => SqlType::Real,
            UPDATE_TO_STG => SqlType::Integer,
            _ => SqlType::Text,
        };
        SchemaColumn::new(*name, data_type)
    });
    anchors.chain(trailing).collect()
}

fn insert_sql(quoted_table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let params = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {quoted_table} ({}) VALUES ({params})",
        names.join(", ")
    )
}

fn bind_row<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    row: Vec<Cell>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for cell in row {
        query = match cell {
            Cell::Empty => query.bind(None::<String>),
            Cell::Number(n) => query.bind(n),
            Cell::Text(s) => query.bind(s),
            Cell::Bool(b) => query.bind(b),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::{reshape, Audit, RawSheet, ReshapeOptions};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn db() -> (TempDir, Db) {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("opex.sqlite")).await.unwrap();
        (dir, db)
    }

    fn t(s: &str) -> Cell {
        Cell::from(s)
    }

    fn long_table(top: Vec<Cell>, sub: Vec<Cell>, data: Vec<Vec<Cell>>) -> LongTable {
        let mut rows = vec![top, sub];
        rows.extend(data);
        let created = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let audit = Audit::new(created, "tester", "book.xlsx", "FPO");
        reshape(
            &RawSheet::new("FPO", rows),
            &ReshapeOptions::default(),
            audit,
        )
        .unwrap()
    }

    /// Region | Cost@Jan | Cost@Feb, two data rows.
    fn sample() -> LongTable {
        long_table(
            vec![
                Cell::Empty,
                t("Region"),
                Cell::Empty,
                t("Jan"),
                Cell::Empty,
                t("Feb"),
                Cell::Empty,
            ],
            vec![
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                t("Cost"),
                Cell::Empty,
                t("Cost"),
                Cell::Empty,
            ],
            vec![
                vec![
                    Cell::Empty,
                    t("North"),
                    Cell::Empty,
                    Cell::Number(10.0),
                    Cell::Empty,
                    Cell::Number(20.0),
                ],
                vec![
                    Cell::Empty,
                    t("South"),
                    Cell::Empty,
                    Cell::Empty,
                    Cell::Empty,
                    Cell::Number(40.0),
                ],
            ],
        )
    }

    /// Same as `sample` with an extra `Team` anchor column.
    fn sample_with_team() -> LongTable {
        long_table(
            vec![
                Cell::Empty,
                t("Region"),
                t("Team"),
                Cell::Empty,
                t("Jan"),
                Cell::Empty,
            ],
            vec![
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                t("Cost"),
                Cell::Empty,
            ],
            vec![vec![
                Cell::Empty,
                t("East"),
                t("Ops"),
                Cell::Empty,
                Cell::Number(5.0),
            ]],
        )
    }

    #[tokio::test]
    async fn test_write_replace_creates_typed_table() {
        let (_dir, db) = db().await;
        let table = sample();
        assert_eq!(
            db.write("STG_FPO", &table, WriteMode::Replace)
                .await
                .unwrap(),
            4
        );
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 4);

        let schema = db.table_schema("STG_FPO").await.unwrap().unwrap();
        assert_eq!(schema.column_names(), table.columns());
        let types: Vec<SqlType> = schema.columns().iter().map(|c| c.data_type()).collect();
        assert_eq!(types[0], SqlType::Text);
        assert_eq!(types[2], SqlType::Real);
        assert_eq!(types[5], SqlType::Integer);

        let rows: Vec<(String, String, Option<f64>, String)> = sqlx::query_as(
            "SELECT Region, PERIOD, COST, FileName FROM STG_FPO ORDER BY rowid",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(
            rows[0],
            ("North".into(), "Jan-Cost".into(), Some(10.0), "book.xlsx".into())
        );
        assert_eq!(
            rows[1],
            ("South".into(), "Jan-Cost".into(), None, "book.xlsx".into())
        );
        assert_eq!(
            rows[3],
            ("South".into(), "Feb-Cost".into(), Some(40.0), "book.xlsx".into())
        );
    }

    type StagedRow = (String, String, Option<f64>, String, i64, String, String);

    /// Every column except `Created_dttm`, in insertion order.
    async fn staged_rows(db: &Db) -> Vec<StagedRow> {
        sqlx::query_as(
            "SELECT Region, PERIOD, COST, Created_by, Update_TO_STG, FileName, COST_DESC \
             FROM STG_FPO ORDER BY rowid",
        )
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let (_dir, db) = db().await;
        let table = sample();
        db.write("STG_FPO", &table, WriteMode::Replace)
            .await
            .unwrap();
        let first = staged_rows(&db).await;
        assert_eq!(first.len(), 4);
        assert_eq!(
            first[0],
            (
                "North".into(),
                "Jan-Cost".into(),
                Some(10.0),
                "tester".into(),
                0,
                "book.xlsx".into(),
                "FPO".into()
            )
        );

        db.write("STG_FPO", &table, WriteMode::Replace)
            .await
            .unwrap();
        assert_eq!(staged_rows(&db).await, first);
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let (_dir, db) = db().await;
        let table = sample();
        db.write("STG_FPO", &table, WriteMode::Append).await.unwrap();
        db.write("STG_FPO", &table, WriteMode::Append).await.unwrap();
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_replace_with_no_rows_leaves_empty_table() {
        let (_dir, db) = db().await;
        db.write("STG_FPO", &sample(), WriteMode::Replace).await.unwrap();
        let empty = long_table(
            vec![Cell::Empty, t("Region"), Cell::Empty, t("Jan"), Cell::Empty],
            vec![Cell::Empty, Cell::Empty, Cell::Empty, t("Cost"), Cell::Empty],
            vec![],
        );
        assert_eq!(db.write("STG_FPO", &empty, WriteMode::Replace).await.unwrap(), 0);
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 0);
        assert!(db.table_schema("STG_FPO").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_evolves_schema() {
        let (_dir, db) = db().await;
        let first = db
            .load_table("STG_FPO", &sample(), DriftPolicy::Evolve)
            .await
            .unwrap();
        assert_eq!(first.mode(), WriteMode::Replace);
        assert_eq!(first.rows(), 4);
        assert!(first.diff().is_none());

        let second = db
            .load_table("STG_FPO", &sample_with_team(), DriftPolicy::Evolve)
            .await
            .unwrap();
        assert_eq!(second.mode(), WriteMode::Append);
        assert_eq!(second.diff().unwrap().added(), &["Team"]);
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 5);

        let teams: Vec<(Option<String>,)> =
            sqlx::query_as("SELECT Team FROM STG_FPO ORDER BY rowid")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(teams[0].0, None);
        assert_eq!(teams[4].0.as_deref(), Some("Ops"));
    }

    #[tokio::test]
    async fn test_load_rejects_drift() {
        let (_dir, db) = db().await;
        db.load_table("STG_FPO", &sample(), DriftPolicy::Reject)
            .await
            .unwrap();
        let err = db
            .load_table("STG_FPO", &sample_with_team(), DriftPolicy::Reject)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<crate::error::SchemaMismatch>().is_some());
        assert_eq!(db.count_rows("STG_FPO").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_load_anchor_named_like_trailing_column() {
        let (_dir, db) = db().await;
        let table = long_table(
            vec![
                Cell::Empty,
                t("Region"),
                t("Period"),
                Cell::Empty,
                t("Jan"),
                Cell::Empty,
            ],
            vec![
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                Cell::Empty,
                t("Cost"),
                Cell::Empty,
            ],
            vec![vec![
                Cell::Empty,
                t("East"),
                t("Q4"),
                Cell::Empty,
                Cell::Number(5.0),
            ]],
        );
        assert!(table.columns().iter().any(|c| c == "Period_2"));

        let outcome = db
            .load_table("STG_FPO", &table, DriftPolicy::Reject)
            .await
            .unwrap();
        assert_eq!(outcome.rows(), 1);
        let rows: Vec<(String, String, Option<f64>)> =
            sqlx::query_as("SELECT Period_2, PERIOD, COST FROM STG_FPO")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert_eq!(rows, vec![("Q4".into(), "Jan-Cost".into(), Some(5.0))]);
    }

    #[tokio::test]
    async fn test_write_refuses_reserved_table() {
        let (_dir, db) = db().await;
        assert!(db
            .write("process_log", &sample(), WriteMode::Replace)
            .await
            .is_err());
    }

    #[test]
    fn test_column_types_numeric_anchor() {
        let table = long_table(
            vec![t("Code"), t("Name"), Cell::Empty, t("Jan"), Cell::Empty],
            vec![Cell::Empty, Cell::Empty, Cell::Empty, t("Cost"), Cell::Empty],
            vec![vec![Cell::Number(1.0), t("a"), Cell::Empty, Cell::Number(2.0)]],
        );
        let types = column_types(&table);
        // labelled columns before the first boundary form the anchor block
        assert_eq!(types[0].name(), "Code");
        assert_eq!(types[0].data_type(), SqlType::Real);
        assert_eq!(types[1].name(), "Name");
        assert_eq!(types[1].data_type(), SqlType::Text);
    }

    #[test]
    fn test_sql_type_from_declared() {
        assert_eq!(SqlType::from_declared("INTEGER"), SqlType::Integer);
        assert_eq!(SqlType::from_declared("real"), SqlType::Real);
        assert_eq!(SqlType::from_declared("DOUBLE"), SqlType::Real);
        assert_eq!(SqlType::from_declared(""), SqlType::Text);
    }

    #[test]
    fn test_insert_sql() {
        assert_eq!(
            insert_sql("\"T\"", &["A".into(), "B C".into()]),
            "INSERT INTO \"T\" (\"A\", \"B C\") VALUES (?, ?)"
        );
    }
}
