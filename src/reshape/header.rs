//! Resolves the two header rows of a worksheet into one combined label per column.
//!
//! Row 0 carries group labels (a blank cell continues the previous group) and row 1 carries
//! sub-labels, typically periods. A column whose combined label is empty is a boundary column.

use crate::error::MalformedHeader;
use crate::reshape::group::{partition, ColumnGroup, Layout};
use std::collections::BTreeMap;

/// The resolved header of one physical column.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct ColumnSpec {
    group: String,
    sub: String,
    label: String,
}

impl ColumnSpec {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn sub(&self) -> &str {
        &self.sub
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_boundary(&self) -> bool {
        self.label.is_empty()
    }

    pub fn is_measure(&self) -> bool {
        !self.sub.is_empty()
    }
}

/// The combined labels of a worksheet together with the positions of its boundary columns.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Header {
    columns: Vec<ColumnSpec>,
    boundaries: Vec<usize>,
}

impl Header {
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn labels(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.label()).collect()
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Renames non-empty labels found in `aliases`. Boundary columns are never renamed.
    pub fn rename(&mut self, aliases: &BTreeMap<String, String>) {
        if aliases.is_empty() {
            return;
        }
        for column in self.columns.iter_mut().filter(|c| !c.is_boundary()) {
            if let Some(alias) = aliases.get(&column.label) {
                column.label = alias.clone();
            }
        }
    }

    /// Partitions the columns into the anchor block and the measure blocks.
    ///
    /// Columns that precede the first boundary form a leading group of their own, so a sheet
    /// whose first column is labelled keeps those columns as its anchor block.
    pub fn layout(&self, sheet: &str) -> Result<Layout, MalformedHeader> {
        if self.boundaries.len() < 2 {
            return Err(MalformedHeader::new(sheet, self.boundaries.len()));
        }
        let mut groups = partition(&self.boundaries);
        if self.boundaries[0] > 0 {
            groups.insert(0, ColumnGroup::new(0, self.boundaries[0]));
        }
        Ok(Layout::new(groups))
    }
}

/// Walks the two header rows left to right and computes the combined label of every column.
///
/// The shorter row is padded with blanks. When the last label is not empty a trailing
/// blank-blank column is added so that the final group has a closing boundary.
pub fn resolve<S>(row0: &[S], row1: &[S]) -> Header
where
    S: AsRef<str>,
{
    let width = row0.len().max(row1.len());
    let mut columns = Vec::with_capacity(width + 1);
    let mut current_group = String::new();

    for i in 0..width {
        let top = row0.get(i).map(|s| s.as_ref().trim()).unwrap_or_default();
        let sub = row1.get(i).map(|s| s.as_ref().trim()).unwrap_or_default();
        if !top.is_empty() {
            current_group = top.to_string();
        }
        let label = match (top.is_empty(), sub.is_empty()) {
            (true, true) => String::new(),
            (false, true) => current_group.clone(),
            (_, false) => format!("{current_group}-{sub}"),
        };
        columns.push(ColumnSpec {
            group: current_group.clone(),
            sub: sub.to_string(),
            label,
        });
    }

    if columns.last().is_some_and(|c| !c.is_boundary()) {
        columns.push(ColumnSpec {
            group: current_group,
            ..ColumnSpec::default()
        });
    }

    let boundaries = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_boundary())
        .map(|(ix, _)| ix)
        .collect();

    Header {
        columns,
        boundaries,
    }
}

/// Cleans a group label from row 0: whitespace, the worksheet name and parentheses are removed.
/// For example `FPO (Q1 Act)` on sheet `FPO` becomes `Q1Act`.
pub fn normalize_group_label(raw: &str, sheet: &str) -> String {
    let mut label: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let sheet: String = sheet.chars().filter(|c| !c.is_whitespace()).collect();
    if !sheet.is_empty() {
        label = label.replace(&sheet, "");
    }
    label.retain(|c| c != '(' && c != ')');
    label
}
