//! CSV export of a batch result.
//!
//! Columns are fixed: `title, summary, tags, bullets, action_items, status, error_message`.
//! List fields are joined with a separator (default `"; "`); the `csv` writer
//! quotes any cell containing a comma, quote or line break.

use crate::record::{BatchResult, Record};
use std::fs::OpenOptions;
use std::path::Path;
use thiserror::Error;

pub const HEADER: [&str; 7] = [
    "title",
    "summary",
    "tags",
    "bullets",
    "action_items",
    "status",
    "error_message",
];

pub const DEFAULT_SEPARATOR: &str = "; ";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write export file: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize records to CSV bytes with the default separator.
pub fn export(batch: &BatchResult) -> Result<Vec<u8>, ExportError> {
    export_with_separator(batch, DEFAULT_SEPARATOR)
}

pub fn export_with_separator(
    batch: &BatchResult,
    separator: &str,
) -> Result<Vec<u8>, ExportError> {
    let mut writer = builder().from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for record in batch {
        writer.write_record(row(record, separator))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

/// Write the batch to `path`, replacing any existing file.
pub fn write_file(path: &Path, batch: &BatchResult, separator: &str) -> Result<(), ExportError> {
    let bytes = export_with_separator(batch, separator)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Append the batch to `path`, writing the header only if the file is new or empty.
pub fn append_file(path: &Path, batch: &BatchResult, separator: &str) -> Result<(), ExportError> {
    let needs_header = std::fs::metadata(path)
        .map(|m| m.len() == 0)
        .unwrap_or(true);

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = builder().from_writer(file);

    if needs_header {
        writer.write_record(HEADER)?;
    }
    for record in batch {
        writer.write_record(row(record, separator))?;
    }
    writer.flush()?;
    Ok(())
}

fn builder() -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder.has_headers(false).terminator(csv::Terminator::Any(b'\n'));
    builder
}

fn row(record: &Record, separator: &str) -> [String; 7] {
    [
        record.title.clone(),
        record.summary.clone(),
        record.tags.join(separator),
        record.bullets.join(separator),
        record.action_items.join(separator),
        record.status.as_str().to_string(),
        record.error_message.clone().unwrap_or_default(),
    ]
}
