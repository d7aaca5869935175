//! Structural synopsis of an uploaded tabular dataset.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, Xlsx, open_workbook};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::PipelineError;

const NULL_MARKERS: [&str; 6] = ["", "NA", "N/A", "NaN", "null", "None"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    Csv,
    Xlsx,
}

impl DatasetFormat {
    /// Detect the format from the file extension, before touching the file.
    pub fn detect(path: &Path) -> Result<Self, PipelineError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(DatasetFormat::Csv),
            Some("xlsx") => Ok(DatasetFormat::Xlsx),
            _ => Err(PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Empty,
    Boolean,
    Integer,
    Float,
    Text,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Empty => "empty",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        }
    }

    /// Widen `self` so that it also covers a cell of type `cell`.
    fn widen(self, cell: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, cell) {
            (current, Empty) => current,
            (Empty, next) => next,
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub non_null: usize,
    pub dtype: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub format: DatasetFormat,
    pub rows: usize,
    pub columns: Vec<ColumnSummary>,
}

impl DatasetSummary {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }

    /// Compact text rendering used to brief the manager.
    pub fn render(&self) -> String {
        let name_width = self
            .columns
            .iter()
            .map(|col| col.name.chars().count())
            .max()
            .unwrap_or(0)
            .max("Column".len());

        let mut output = String::new();
        let _ = writeln!(output, "Rows: {}", self.rows);
        let _ = writeln!(output, "Columns: {}", self.columns.len());
        let _ = writeln!(
            output,
            " #  {:<name_width$}  Non-Null Count  Type",
            "Column"
        );
        for (idx, column) in self.columns.iter().enumerate() {
            let count = format!("{} non-null", column.non_null);
            let _ = writeln!(
                output,
                "{:>2}  {:<name_width$}  {:<14}  {}",
                idx,
                column.name,
                count,
                column.dtype.as_str()
            );
        }
        output
    }
}

/// Load `path` and produce its structural synopsis.
#[instrument(name = "dataset.summarize", skip(path), fields(path = %path.display()))]
pub fn summarize_dataset(path: &Path) -> Result<DatasetSummary, PipelineError> {
    let format = DatasetFormat::detect(path)?;
    let (headers, rows) = match format {
        DatasetFormat::Csv => load_csv(path)?,
        DatasetFormat::Xlsx => load_xlsx(path)?,
    };

    let mut columns: Vec<ColumnSummary> = headers
        .into_iter()
        .map(|name| ColumnSummary {
            name,
            non_null: 0,
            dtype: ColumnType::Empty,
        })
        .collect();

    for row in &rows {
        for (column, cell) in columns.iter_mut().zip(row.iter()) {
            if *cell != ColumnType::Empty {
                column.non_null += 1;
            }
            column.dtype = column.dtype.widen(*cell);
        }
    }

    debug!(rows = rows.len(), columns = columns.len(), "dataset summarized");

    Ok(DatasetSummary {
        path: path.to_path_buf(),
        format,
        rows: rows.len(),
        columns,
    })
}

type Table = (Vec<String>, Vec<Vec<ColumnType>>);

fn load_csv(path: &Path) -> Result<Table, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| PipelineError::dataset_load(path, err))?;

    let headers = reader
        .headers()
        .map_err(|err| PipelineError::dataset_load(path, err))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| PipelineError::dataset_load(path, err))?;
        rows.push(record.iter().map(classify_text).collect());
    }
    Ok((headers, rows))
}

fn load_xlsx(path: &Path) -> Result<Table, PipelineError> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|err| PipelineError::dataset_load(path, err))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| PipelineError::dataset_load(path, "workbook has no worksheets"))?
        .map_err(|err| PipelineError::dataset_load(path, err))?;

    let mut rows_iter = range.rows();
    let headers = rows_iter
        .next()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .unwrap_or_default();
    let rows = rows_iter
        .map(|row| row.iter().map(classify_cell).collect())
        .collect();
    Ok((headers, rows))
}

fn classify_text(raw: &str) -> ColumnType {
    let value = raw.trim();
    if NULL_MARKERS.contains(&value) {
        ColumnType::Empty
    } else if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") {
        ColumnType::Boolean
    } else if value.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if value.parse::<f64>().is_ok() {
        ColumnType::Float
    } else {
        ColumnType::Text
    }
}

fn classify_cell(cell: &Data) -> ColumnType {
    match cell {
        Data::Empty => ColumnType::Empty,
        Data::Bool(_) => ColumnType::Boolean,
        Data::Int(_) => ColumnType::Integer,
        Data::Float(value) if value.fract() == 0.0 => ColumnType::Integer,
        Data::Float(_) => ColumnType::Float,
        Data::String(value) => classify_text(value),
        _ => ColumnType::Text,
    }
}
