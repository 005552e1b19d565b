use crate::commands::upload::read_and_reshape;
use crate::commands::Out;
use crate::reshape::LongTable;
use crate::{Config, Result};
use anyhow::Context;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct ReshapeSummary {
    pub file: PathBuf,
    pub worksheet: String,
    pub anchor_columns: Vec<String>,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// Reshapes `worksheet` of `file` and writes the long table as CSV to `output`, or to stdout when
/// `output` is `None`. Nothing is written to the staging database.
pub async fn reshape(
    config: Config,
    file: &Path,
    worksheet: &str,
    output: Option<&Path>,
) -> Result<Out<ReshapeSummary>> {
    let table = read_and_reshape(&config, file, worksheet).await?;

    let w: Box<dyn Write> = match output {
        None => Box::new(io::stdout().lock()),
        Some(path) => {
            let f = std::fs::File::create(path)
                .with_context(|| format!("Unable to create {}", path.display()))?;
            Box::new(io::BufWriter::new(f))
        }
    };
    write_csv(&table, w)?;

    let summary = ReshapeSummary {
        file: file.to_path_buf(),
        worksheet: worksheet.to_string(),
        anchor_columns: table.anchor_columns().to_vec(),
        records: table.len(),
        output: output.map(Path::to_path_buf),
    };
    Ok(Out::new(
        format!(
            "Reshaped worksheet '{worksheet}' of {} into {} record(s)",
            file.display(),
            table.len()
        ),
        summary,
    ))
}

fn write_csv(table: &LongTable, w: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(table.columns())
        .context("Unable to write the CSV header")?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|c| c.to_string()))
            .context("Unable to write a CSV record")?;
    }
    wtr.flush().context("Unable to flush the CSV output")?;
    Ok(())
}
