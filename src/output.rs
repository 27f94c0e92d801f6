//! CSV and JSON persistence for collector dumps, stage tables and reports.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use csv::WriterBuilder;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Writes `rows` to a fresh CSV at `path`, replacing any existing file.
///
/// The table is written to a sibling temp file and renamed into place, so
/// readers never see a half-written table.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp)
            .with_context(|| format!("Failed to create '{}'", tmp.display()))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move table into '{}'", path.display()))?;
    debug!(path = %path.display(), rows = rows.len(), "Table written");
    Ok(())
}

/// Reads every row of a headed CSV file.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open '{}'", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T =
            result.with_context(|| format!("Bad row in '{}'", path.display()))?;
        rows.push(record);
    }
    Ok(rows)
}

/// Sorted list of `*.csv` files directly inside `dir`; empty if `dir` is missing.
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Writes `value` as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}

/// Reads a JSON document written by [`write_json`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    Ok(serde_json::from_slice(&content)?)
}
