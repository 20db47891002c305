use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use thiserror::Error;

use cardreg_core::ServiceError;

use crate::model::{error_code, Row};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal ingestion errors — nothing to process, the batch never starts.
#[derive(Error, Debug)]
pub enum IngestError {
    /// No generated machine-format workbook under the directory.
    #[error("no generated workbook found under {0}")]
    OutputNotFound(PathBuf),

    /// No generated card-data CSV under the directory.
    #[error("no card-data CSV found under {0}")]
    CsvNotFound(PathBuf),

    /// The resolved source contains zero data rows.
    #[error("source {0} contains no data rows")]
    NoRows(PathBuf),

    /// The source exists but could not be read or parsed.
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },
}

impl IngestError {
    /// Stable error code for result records and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            IngestError::OutputNotFound(_) => error_code::OUTPUT_NOT_FOUND,
            IngestError::CsvNotFound(_) => error_code::CSV_NOT_FOUND,
            IngestError::NoRows(_) => error_code::NO_ROWS,
            IngestError::Read { .. } => cardreg_core::error::error_code::STORAGE_ERROR,
        }
    }
}

impl From<IngestError> for ServiceError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::OutputNotFound(_) | IngestError::CsvNotFound(_) => {
                ServiceError::NotFound(e.to_string())
            }
            IngestError::NoRows(_) => ServiceError::Validation(e.to_string()),
            IngestError::Read { .. } => ServiceError::Storage(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Source resolution
// ---------------------------------------------------------------------------

// Naming conventions of the generated files dropped into a session
// directory by the upload pipeline.
const MACHINE_FORMAT_MARK: &str = "machine_format";
const CARD_DATA_MARK: &str = "card_data";

/// Resolve a directory or explicit file path to the concrete source file.
///
/// Directories prefer the generated machine-format workbook and fall back
/// to the generated card-data CSV. Explicit file paths are used as-is.
pub fn resolve_source(path: &Path) -> Result<PathBuf, IngestError> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        // Missing explicit path: classify by the extension the caller asked for.
        if path.extension().map(|e| e.eq_ignore_ascii_case("csv")).unwrap_or(false) {
            return Err(IngestError::CsvNotFound(path.to_path_buf()));
        }
        return Err(IngestError::OutputNotFound(path.to_path_buf()));
    }

    let mut names: Vec<PathBuf> = fs::read_dir(path)
        .map_err(|e| IngestError::Read { path: path.to_path_buf(), message: e.to_string() })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    names.sort();

    if let Some(found) = names.iter().find(|p| matches_name(p, MACHINE_FORMAT_MARK, "xlsx")) {
        return Ok(found.clone());
    }
    if let Some(found) = names.iter().find(|p| matches_name(p, CARD_DATA_MARK, "csv")) {
        return Ok(found.clone());
    }
    Err(IngestError::OutputNotFound(path.to_path_buf()))
}

fn matches_name(path: &Path, mark: &str, ext: &str) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    name.contains(mark) && name.ends_with(&format!(".{ext}"))
}

// ---------------------------------------------------------------------------
// Row reading
// ---------------------------------------------------------------------------

/// Read all data rows from a directory or file path.
///
/// Rows come back in source order, string-keyed by trimmed header, not
/// deduplicated. Fully blank rows are dropped. Synchronous local read,
/// no retries.
pub fn read_rows(path: &Path) -> Result<(PathBuf, Vec<Row>), IngestError> {
    let source = resolve_source(path)?;
    let is_workbook = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xlsm" | "xls"))
        .unwrap_or(false);

    let rows = if is_workbook {
        read_workbook(&source)?
    } else {
        read_csv(&source)?
    };

    if rows.is_empty() {
        return Err(IngestError::NoRows(source));
    }
    Ok((source, rows))
}

fn read_csv(path: &Path) -> Result<Vec<Row>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| IngestError::Read { path: path.to_path_buf(), message: e.to_string() })?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| IngestError::Read { path: path.to_path_buf(), message: e.to_string() })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| IngestError::Read { path: path.to_path_buf(), message: e.to_string() })?;
        let mut row = Row::new();
        let mut blank = true;
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").trim().to_string();
            if !value.is_empty() {
                blank = false;
            }
            row.insert(header.clone(), value);
        }
        if !blank {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<Row>, IngestError> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .map_err(|e: calamine::XlsxError| IngestError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| IngestError::Read {
            path: path.to_path_buf(),
            message: "workbook has no sheets".to_string(),
        })?
        .map_err(|e| IngestError::Read { path: path.to_path_buf(), message: e.to_string() })?;

    let mut iter = range.rows();
    let headers: Vec<String> = match iter.next() {
        Some(cells) => cells.iter().map(|c| cell_text(c)).collect(),
        None => return Ok(Vec::new()),
    };

    let mut rows = Vec::new();
    for cells in iter {
        let mut row = Row::new();
        let mut blank = true;
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = cells.get(i).map(cell_text).unwrap_or_default();
            if !value.is_empty() {
                blank = false;
            }
            row.insert(header.clone(), value);
        }
        if !blank {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
