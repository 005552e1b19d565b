//! Compares the columns of a reshaped worksheet with the columns of its existing staging table
//! and decides how the load proceeds.

use crate::db::TargetTableSchema;
use crate::error::SchemaMismatch;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do when a worksheet's columns differ from the staging table's columns.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftPolicy {
    /// Add the new columns to the table, then append. Table columns that the worksheet lacks are
    /// written as NULL.
    #[default]
    Evolve,
    /// Refuse the load with a `SchemaMismatch` error.
    Reject,
}

serde_plain::derive_display_from_serialize!(DriftPolicy);
serde_plain::derive_fromstr_from_deserialize!(DriftPolicy);

/// The column differences between a new worksheet result and an existing table. Names compare
/// ASCII case-insensitively, as SQLite identifiers do.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize)]
pub struct SchemaDiff {
    added: Vec<String>,
    missing: Vec<String>,
}

impl SchemaDiff {
    /// `added` keeps the order of `new_columns`, `missing` keeps the order of `existing`.
    pub fn new<S: AsRef<str>, T: AsRef<str>>(new_columns: &[S], existing: &[T]) -> Self {
        let known: HashSet<String> = existing.iter().map(|c| fold(c.as_ref())).collect();
        let incoming: HashSet<String> = new_columns.iter().map(|c| fold(c.as_ref())).collect();
        Self {
            added: new_columns
                .iter()
                .map(|c| c.as_ref())
                .filter(|c| !known.contains(&fold(c)))
                .map(String::from)
                .collect(),
            missing: existing
                .iter()
                .map(|c| c.as_ref())
                .filter(|c| !incoming.contains(&fold(c)))
                .map(String::from)
                .collect(),
        }
    }

    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn is_identical(&self) -> bool {
        self.added.is_empty() && self.missing.is_empty()
    }
}

/// For each column of `new_columns`, the matching column name in `existing`, or `None` when the
/// column is new.
pub fn previous_projection<S: AsRef<str>, T: AsRef<str>>(
    new_columns: &[S],
    existing: &[T],
) -> Vec<Option<String>> {
    new_columns
        .iter()
        .map(|c| {
            existing
                .iter()
                .find(|e| fold(e.as_ref()) == fold(c.as_ref()))
                .map(|e| e.as_ref().to_string())
        })
        .collect()
}

/// How rows reach a staging table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum LoadPlan {
    /// The table does not exist yet and is created from the worksheet's columns.
    Create,
    /// The columns already line up.
    Append,
    /// New columns are added to the table before appending.
    Evolve(SchemaDiff),
}

pub(crate) fn plan<S: AsRef<str>>(
    table: &str,
    new_columns: &[S],
    existing: Option<&TargetTableSchema>,
    policy: DriftPolicy,
) -> Result<LoadPlan> {
    let Some(existing) = existing else {
        return Ok(LoadPlan::Create);
    };
    let diff = SchemaDiff::new(new_columns, &existing.column_names());
    if diff.is_identical() {
        return Ok(LoadPlan::Append);
    }
    match policy {
        DriftPolicy::Evolve => Ok(LoadPlan::Evolve(diff)),
        DriftPolicy::Reject => Err(SchemaMismatch::new(table, diff.added, diff.missing).into()),
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}
