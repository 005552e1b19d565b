//! Reads worksheets from Excel (or ODS) workbooks into `RawSheet` grids.

use crate::reshape::{Cell, RawSheet};
use crate::Result;
use anyhow::Context;
use calamine::{open_workbook_auto, Data, Range, Reader};
use std::path::Path;
use tracing::trace;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reads `sheet` from the workbook at `path`.
///
/// The returned grid is anchored at cell A1: leading empty rows and columns that calamine leaves
/// out of its used range are restored as blank cells so that column positions match the sheet.
pub fn read_sheet(path: &Path, sheet: &str) -> Result<RawSheet> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook {}", path.display()))?;
    let range = workbook.worksheet_range(sheet).with_context(|| {
        format!(
            "Failed to read worksheet '{sheet}' from {}, its worksheets are {:?}",
            path.display(),
            workbook.sheet_names()
        )
    })?;
    trace!("Worksheet '{sheet}' used range: {:?}", range.start());
    Ok(RawSheet::new(sheet, grid(&range)))
}

fn grid(range: &Range<Data>) -> Vec<Vec<Cell>> {
    let (row_offset, col_offset) = match range.start() {
        Some((row, col)) => (row as usize, col as usize),
        None => return Vec::new(),
    };
    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col_offset];
        cells.extend(row.iter().map(to_cell));
        rows.push(cells);
    }
    rows
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) => Cell::from(s.as_str()),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => Cell::Text(value.format(DATE_FORMAT).to_string()),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) | Data::Empty => Cell::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::write_workbook;
    use tempfile::TempDir;

    fn t(s: &str) -> Cell {
        Cell::from(s)
    }

    #[test]
    fn test_read_sheet_restores_leading_blanks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.xlsx");
        let rows = vec![
            vec![Cell::Empty, t("Name"), Cell::Empty, t("P01")],
            vec![Cell::Empty, Cell::Empty, Cell::Empty, t("Cost")],
            vec![Cell::Empty, t("a"), Cell::Empty, Cell::Number(1.5)],
        ];
        write_workbook(&path, &[("FPO", rows)]);

        let sheet = read_sheet(&path, "FPO").unwrap();
        assert_eq!(sheet.name(), "FPO");
        let (top, sub) = sheet.header_rows();
        assert_eq!(top[0], Cell::Empty);
        assert_eq!(top[1], t("Name"));
        assert_eq!(top[3], t("P01"));
        assert_eq!(sub[3], t("Cost"));
        assert_eq!(sheet.data_rows()[0][3], Cell::Number(1.5));
    }

    #[test]
    fn test_read_sheet_missing_sheet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.xlsx");
        write_workbook(
            &path,
            &[("FPO", vec![vec![t("x")]]), ("Capex", vec![vec![t("y")]])],
        );
        let err = read_sheet(&path, "Nope").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Nope"));
        assert!(message.contains(r#"["FPO", "Capex"]"#));
    }

    #[test]
    fn test_to_cell() {
        assert_eq!(to_cell(&Data::Int(3)), Cell::Number(3.0));
        assert_eq!(to_cell(&Data::String(String::new())), Cell::Empty);
        assert_eq!(to_cell(&Data::Bool(true)), Cell::Bool(true));
        assert_eq!(to_cell(&Data::Empty), Cell::Empty);
    }
}
