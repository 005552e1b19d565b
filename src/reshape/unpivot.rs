//! Converts the wide layout of a worksheet (categories × periods) into long records.

use crate::reshape::group::Layout;
use crate::reshape::header::Header;
use crate::reshape::Cell;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

pub const PERIOD: &str = "PERIOD";
pub const COST: &str = "COST";
pub const CREATED_DTTM: &str = "Created_dttm";
pub const CREATED_BY: &str = "Created_by";
pub const UPDATE_TO_STG: &str = "Update_TO_STG";
pub const FILE_NAME: &str = "FileName";
pub const COST_DESC: &str = "COST_DESC";

/// Columns appended after the anchor columns, in output order.
pub const TRAILING_COLUMNS: &[&str] = &[
    PERIOD,
    COST,
    CREATED_DTTM,
    CREATED_BY,
    UPDATE_TO_STG,
    FILE_NAME,
    COST_DESC,
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Audit values stamped on every record of one worksheet pass.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Audit {
    created: NaiveDateTime,
    created_by: String,
    file_name: String,
    sheet_name: String,
}

impl Audit {
    pub fn new(
        created: NaiveDateTime,
        created_by: impl Into<String>,
        file_name: impl Into<String>,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            created,
            created_by: created_by.into(),
            file_name: file_name.into(),
            sheet_name: sheet_name.into(),
        }
    }

    pub fn created(&self) -> NaiveDateTime {
        self.created
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn cells(&self) -> [Cell; 5] {
        [
            Cell::Text(self.created.format(TIMESTAMP_FORMAT).to_string()),
            Cell::Text(self.created_by.clone()),
            Cell::Number(0.0),
            Cell::Text(self.file_name.clone()),
            Cell::Text(self.sheet_name.clone()),
        ]
    }
}

/// One output row: the anchor values of a source row plus one measure cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRecord {
    anchors: Vec<Cell>,
    period: String,
    cost: Cell,
}

impl LongRecord {
    pub fn anchors(&self) -> &[Cell] {
        &self.anchors
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn cost(&self) -> &Cell {
        &self.cost
    }
}

/// The long-format result of reshaping one worksheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongTable {
    anchor_columns: Vec<String>,
    audit: Audit,
    records: Vec<LongRecord>,
}

impl LongTable {
    pub fn anchor_columns(&self) -> &[String] {
        &self.anchor_columns
    }

    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    pub fn records(&self) -> &[LongRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Anchor columns followed by `PERIOD`, `COST` and the audit columns.
    pub fn columns(&self) -> Vec<String> {
        self.anchor_columns
            .iter()
            .cloned()
            .chain(TRAILING_COLUMNS.iter().map(|s| s.to_string()))
            .collect()
    }

    /// Full output rows in the same order as `columns`.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Cell>> + '_ {
        let audit = self.audit.cells();
        self.records.iter().map(move |record| {
            let mut row = Vec::with_capacity(self.anchor_columns.len() + TRAILING_COLUMNS.len());
            row.extend(record.anchors.iter().cloned());
            row.push(Cell::Text(record.period.clone()));
            row.push(record.cost.clone());
            row.extend(audit.iter().cloned());
            row
        })
    }
}

/// Emits one record per data cell of every measure block.
///
/// Output order is measure block, then data row, then column within the block. Blank measure
/// cells become `Cell::Empty`. The anchor column labelled `fill_down`, if present, is filled
/// downward from the last non-blank value above.
pub fn unpivot(
    header: &Header,
    layout: &Layout,
    data: &[Vec<Cell>],
    fill_down: Option<&str>,
    audit: Audit,
) -> LongTable {
    let anchor_ix: Vec<usize> = layout.anchor().map(|g| g.columns().collect()).unwrap_or_default();
    let labels: Vec<&str> = anchor_ix
        .iter()
        .map(|&ix| header.columns()[ix].label())
        .collect();

    let mut anchor_rows: Vec<Vec<Cell>> = data
        .iter()
        .map(|row| anchor_ix.iter().map(|&ix| cell_at(row, ix)).collect())
        .collect();

    if let Some(name) = fill_down {
        match labels.iter().position(|label| *label == name) {
            Some(pos) => {
                let mut column: Vec<Cell> = anchor_rows.iter().map(|r| r[pos].clone()).collect();
                fill_down_column(&mut column);
                for (row, value) in anchor_rows.iter_mut().zip(column) {
                    row[pos] = value;
                }
            }
            None => debug!("Fill-down column '{name}' is not part of the anchor block"),
        }
    }

    let mut records = Vec::with_capacity(data.len() * layout.measure_width());
    for group in layout.measures() {
        for (row, anchors) in data.iter().zip(anchor_rows.iter()) {
            for ix in group.columns() {
                let cost = cell_at(row, ix);
                records.push(LongRecord {
                    anchors: anchors.clone(),
                    period: header.columns()[ix].label().to_string(),
                    cost: if cost.is_blank() { Cell::Empty } else { cost },
                });
            }
        }
    }

    LongTable {
        anchor_columns: unique_names(&labels),
        audit,
        records,
    }
}

/// Replaces every blank cell with the nearest non-blank value above it. Leading blanks stay
/// blank.
pub fn fill_down_column(column: &mut [Cell]) {
    let mut last: Option<Cell> = None;
    for cell in column.iter_mut() {
        if cell.is_blank() {
            if let Some(value) = &last {
                *cell = value.clone();
            }
        } else {
            last = Some(cell.clone());
        }
    }
}

fn cell_at(row: &[Cell], ix: usize) -> Cell {
    row.get(ix).cloned().unwrap_or_default()
}

/// Makes anchor column names unique among themselves and distinct from the trailing columns by
/// appending `_2`, `_3`, ... to repeats. Names are compared ASCII case-insensitively, like SQLite
/// column names.
fn unique_names(labels: &[&str]) -> Vec<String> {
    let mut seen: HashSet<String> = TRAILING_COLUMNS
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .collect();
    labels
        .iter()
        .map(|label| {
            let mut name = label.to_string();
            let mut n = 2;
            while seen.contains(&name.to_ascii_lowercase()) {
                name = format!("{label}_{n}");
                n += 1;
            }
            seen.insert(name.to_ascii_lowercase());
            name
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reshape::header::resolve;
    use chrono::NaiveDate;

    fn audit() -> Audit {
        let created = NaiveDate::from_ymd_opt(2026, 10, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        Audit::new(created, "etl_user", "P10 OPEX FPO.xlsx", "FPO")
    }

    fn text(s: &str) -> Cell {
        Cell::from(s)
    }

    #[test]
    fn test_end_to_end_example() {
        let header = resolve(
            &["Region", "Category", "", "Jan", "", "", "Feb", ""],
            &["", "", "", "Cost", "Qty", "", "Cost", ""],
        );
        let layout = header.layout("FPO").unwrap();
        let data = vec![
            vec![
                text("EU"),
                text("Travel"),
                Cell::Empty,
                Cell::Number(10.0),
                Cell::Number(1.0),
                Cell::Empty,
                Cell::Number(20.0),
            ],
            vec![
                text("US"),
                text("Rent"),
                Cell::Empty,
                Cell::Number(30.0),
                Cell::Number(3.0),
                Cell::Empty,
                Cell::Number(40.0),
            ],
        ];
        let table = unpivot(&header, &layout, &data, None, audit());

        assert_eq!(table.len(), 6);
        assert_eq!(table.anchor_columns(), &["Region", "Category"]);
        let got: Vec<(String, String, String, Cell)> = table
            .records()
            .iter()
            .map(|r| {
                (
                    r.anchors()[0].to_string(),
                    r.anchors()[1].to_string(),
                    r.period().to_string(),
                    r.cost().clone(),
                )
            })
            .collect();
        let want = vec![
            ("EU", "Travel", "Jan-Cost", 10.0),
            ("EU", "Travel", "Jan-Qty", 1.0),
            ("US", "Rent", "Jan-Cost", 30.0),
            ("US", "Rent", "Jan-Qty", 3.0),
            ("EU", "Travel", "Feb-Cost", 20.0),
            ("US", "Rent", "Feb-Cost", 40.0),
        ];
        let want: Vec<(String, String, String, Cell)> = want
            .into_iter()
            .map(|(a, b, c, d)| (a.into(), b.into(), c.into(), Cell::Number(d)))
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn test_row_count_law() {
        // anchor: 1 column, measure blocks of 3, 1 and 2 columns, 4 data rows
        let header = resolve(
            &["", "Name", "", "P01", "", "", "", "P02", "", "P03", ""],
            &["", "", "", "a", "b", "c", "", "a", "", "a", "b"],
        );
        let layout = header.layout("S").unwrap();
        assert_eq!(layout.measure_width(), 6);
        let data: Vec<Vec<Cell>> = (0..4)
            .map(|r| (0..11).map(|c| Cell::Number((r * 100 + c) as f64)).collect())
            .collect();
        let table = unpivot(&header, &layout, &data, None, audit());
        assert_eq!(table.len(), 4 * 6);
    }

    #[test]
    fn test_fill_down_column() {
        let mut column = vec![text("A"), Cell::Empty, Cell::Empty, text("B"), Cell::Empty];
        fill_down_column(&mut column);
        assert_eq!(
            column,
            vec![text("A"), text("A"), text("A"), text("B"), text("B")]
        );
    }

    #[test]
    fn test_fill_down_leading_blank() {
        let mut column = vec![Cell::Empty, text(" "), text("A"), Cell::Empty];
        fill_down_column(&mut column);
        assert_eq!(column, vec![Cell::Empty, text(" "), text("A"), text("A")]);
    }

    #[test]
    fn test_unpivot_fills_designated_column_only() {
        let header = resolve(
            &["", "Name", "Domain_Category", "", "P01", ""],
            &["", "", "", "", "Cost", ""],
        );
        let layout = header.layout("S").unwrap();
        let data = vec![
            vec![Cell::Empty, text("a"), text("IT"), Cell::Empty, Cell::Number(1.0)],
            vec![Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty, Cell::Empty],
        ];
        let table = unpivot(&header, &layout, &data, Some("Domain_Category"), audit());
        assert_eq!(table.len(), 2);
        let second = &table.records()[1];
        assert_eq!(second.anchors(), &[Cell::Empty, text("IT")]);
        assert_eq!(second.cost(), &Cell::Empty);
    }

    #[test]
    fn test_unpivot_missing_cost_is_null() {
        let header = resolve(&["", "Name", "", "P01", ""], &["", "", "", "Cost", ""]);
        let layout = header.layout("S").unwrap();
        let data = vec![vec![Cell::Empty, text("a"), Cell::Empty, text("  ")]];
        let table = unpivot(&header, &layout, &data, None, audit());
        assert_eq!(table.records()[0].cost(), &Cell::Empty);
    }

    #[test]
    fn test_rows_and_columns() {
        let header = resolve(&["", "Name", "", "P01", ""], &["", "", "", "Cost", ""]);
        let layout = header.layout("S").unwrap();
        let data = vec![vec![Cell::Empty, text("a"), Cell::Empty, Cell::Number(5.0)]];
        let table = unpivot(&header, &layout, &data, None, audit());
        assert_eq!(
            table.columns(),
            vec![
                "Name",
                "PERIOD",
                "COST",
                "Created_dttm",
                "Created_by",
                "Update_TO_STG",
                "FileName",
                "COST_DESC"
            ]
        );
        let rows: Vec<Vec<Cell>> = table.rows().collect();
        assert_eq!(
            rows,
            vec![vec![
                text("a"),
                text("P01-Cost"),
                Cell::Number(5.0),
                text("2026-10-01 08:30:00"),
                text("etl_user"),
                Cell::Number(0.0),
                text("P10 OPEX FPO.xlsx"),
                text("FPO"),
            ]]
        );
    }

    #[test]
    fn test_unique_names() {
        assert_eq!(
            unique_names(&["A", "A", "PERIOD", "A_2"]),
            vec!["A", "A_2", "PERIOD_2", "A_2_2"]
        );
    }

    #[test]
    fn test_unique_names_ignores_case() {
        assert_eq!(
            unique_names(&["Region", "REGION", "Period", "Cost", "Filename", "created_by"]),
            vec![
                "Region",
                "REGION_2",
                "Period_2",
                "Cost_2",
                "Filename_2",
                "created_by_2"
            ]
        );
    }

    #[test]
    fn test_anchor_only_sheet_has_no_records() {
        let header = resolve(&["", "Name", ""], &["", "", ""]);
        let layout = header.layout("S").unwrap();
        let data = vec![vec![Cell::Empty, text("a")]];
        let table = unpivot(&header, &layout, &data, None, audit());
        assert!(table.is_empty());
        assert_eq!(table.anchor_columns(), &["Name"]);
    }
}
