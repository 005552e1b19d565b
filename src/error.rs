use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// A worksheet whose two header rows do not yield at least two boundary columns. No column groups
/// can be formed from such a sheet, so nothing is loaded from it.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct MalformedHeader {
    sheet: String,
    boundaries: usize,
}

impl MalformedHeader {
    pub(crate) fn new(sheet: impl Into<String>, boundaries: usize) -> Self {
        Self {
            sheet: sheet.into(),
            boundaries,
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn boundaries(&self) -> usize {
        self.boundaries
    }
}

impl Display for MalformedHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Malformed header in worksheet '{}': found {} boundary column(s) but at least 2 are \
            needed to form column groups",
            self.sheet, self.boundaries
        )
    }
}

impl StdError for MalformedHeader {}

/// The columns of a reshaped worksheet differ from the columns of the staging table it targets
/// and the drift policy does not allow the difference.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct SchemaMismatch {
    table: String,
    added: Vec<String>,
    missing: Vec<String>,
}

impl SchemaMismatch {
    pub(crate) fn new(table: impl Into<String>, added: Vec<String>, missing: Vec<String>) -> Self {
        Self {
            table: table.into(),
            added,
            missing,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

impl Display for SchemaMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Columns of table '{}' do not match the worksheet (new: [{}], missing: [{}])",
            self.table,
            self.added.join(", "),
            self.missing.join(", ")
        )
    }
}

impl StdError for SchemaMismatch {}
