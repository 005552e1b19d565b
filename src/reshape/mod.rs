//! The sheet reshaper: turns a worksheet with a two-row header (group labels over period
//! sub-labels) into long records of `(anchor columns..., PERIOD, COST)` plus audit fields.

mod cell;
mod group;
mod header;
mod unpivot;

pub use cell::Cell;
pub use group::{partition, ColumnGroup, Layout};
pub use header::{normalize_group_label, resolve, ColumnSpec, Header};
pub use unpivot::{fill_down_column, unpivot, Audit, LongRecord, LongTable};
pub use unpivot::{
    COST, COST_DESC, CREATED_BY, CREATED_DTTM, FILE_NAME, PERIOD, TRAILING_COLUMNS, UPDATE_TO_STG,
};

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const DEFAULT_FILL_DOWN_COLUMN: &str = "Domain_Category";
const DEFAULT_MAX_DATA_ROWS: usize = 235;

/// The raw cell grid of one worksheet. Rows 0 and 1 are the header rows, everything after them is
/// data.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawSheet {
    name: String,
    rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    /// Trailing data rows in which every cell is blank are dropped.
    pub fn new(name: impl Into<String>, mut rows: Vec<Vec<Cell>>) -> Self {
        while rows.len() > 2 && rows.last().is_some_and(|r| r.iter().all(Cell::is_blank)) {
            rows.pop();
        }
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// The group-label row and the sub-label row. Missing rows are empty.
    pub fn header_rows(&self) -> (&[Cell], &[Cell]) {
        let top = self.rows.first().map(Vec::as_slice).unwrap_or_default();
        let sub = self.rows.get(1).map(Vec::as_slice).unwrap_or_default();
        (top, sub)
    }

    pub fn data_rows(&self) -> &[Vec<Cell>] {
        self.rows.get(2..).unwrap_or_default()
    }
}

/// Settings that control how worksheets are reshaped.
///
/// Example:
/// ```json
/// {
///   "fill_down_column": "Domain_Category",
///   "max_data_rows": 235,
///   "aliases": { "OPEX": "GranOPEX" }
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ReshapeOptions {
    /// Label of the anchor column whose blank cells are filled from the value above.
    pub fill_down_column: Option<String>,

    /// The maximum number of data rows read below the two header rows.
    pub max_data_rows: Option<usize>,

    /// Renames applied to resolved column labels, e.g. `{"OPEX": "GranOPEX"}`.
    pub aliases: BTreeMap<String, String>,
}

impl Default for ReshapeOptions {
    fn default() -> Self {
        Self {
            fill_down_column: Some(DEFAULT_FILL_DOWN_COLUMN.to_string()),
            max_data_rows: Some(DEFAULT_MAX_DATA_ROWS),
            aliases: BTreeMap::new(),
        }
    }
}

/// Resolves the header of `sheet`, partitions it into column groups and unpivots its data rows.
///
/// # Errors
/// Returns a `MalformedHeader` error when the header yields fewer than two boundary columns.
pub fn reshape(sheet: &RawSheet, options: &ReshapeOptions, audit: Audit) -> Result<LongTable> {
    let (top, sub) = sheet.header_rows();
    let top: Vec<String> = top
        .iter()
        .map(|c| normalize_group_label(&c.label(), sheet.name()))
        .collect();
    let sub: Vec<String> = sub.iter().map(Cell::label).collect();

    let mut header = resolve(&top, &sub);
    header.rename(&options.aliases);
    let layout = header.layout(sheet.name())?;
    debug!(
        "Worksheet '{}' has {} column group(s) over {} column(s)",
        sheet.name(),
        layout.groups().len(),
        header.width()
    );

    let data = sheet.data_rows();
    let data = match options.max_data_rows {
        Some(max) if data.len() > max => &data[..max],
        _ => data,
    };

    Ok(unpivot(
        &header,
        &layout,
        data,
        options.fill_down_column.as_deref(),
        audit,
    ))
}
