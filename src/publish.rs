//! Uploads a processed day and the reports to S3.
//!
//! Layout: `date=<YYYY-MM-DD>/<path under the day dir>` for the day's tables,
//! `date=<YYYY-MM-DD>/report.json` for its report and `summary.json` at the
//! bucket root.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::StressConfig;
use crate::error::StageError;
use crate::output::read_json;
use crate::analyzers::types::SummaryReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishSummary {
    pub files: usize,
    pub bytes: usize,
}

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .send()
        .await?;

    Ok(())
}

/// Every regular file under `dir`, recursively, sorted.
pub fn files_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)
            .with_context(|| format!("Failed to list '{}'", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// S3 key of a day file, given its path relative to the day dir.
pub fn object_key(date: NaiveDate, relative: &Path, gzip: bool) -> String {
    let rel = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let key = format!("date={}/{rel}", date.format("%Y-%m-%d"));
    if gzip { format!("{key}.gz") } else { key }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Returns the upload body, gzip-compressed when asked.
pub fn encode_body(contents: Vec<u8>, gzip: bool) -> Result<Vec<u8>> {
    if !gzip {
        return Ok(contents);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&contents)?;
    Ok(encoder.finish()?)
}

async fn put_file(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    path: &Path,
    gzip: bool,
) -> Result<usize> {
    let contents = std::fs::read(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let body = encode_body(contents, gzip)?;
    let len = body.len();

    let content_type = if gzip { "application/gzip" } else { content_type(path) };
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await
        .with_context(|| format!("Failed to upload s3://{bucket}/{key}"))?;

    debug!(key, bytes = len, "Uploaded");
    Ok(len)
}

/// Uploads the day's tables and report, then the current summary.
#[tracing::instrument(skip(client, config), fields(date = %date))]
pub async fn publish_day(
    client: &aws_sdk_s3::Client,
    config: &StressConfig,
    bucket: &str,
    date: NaiveDate,
    gzip: bool,
) -> Result<PublishSummary> {
    let day = config.hist_day_dir(date);
    if !day.is_dir() {
        return Err(StageError::MissingInput(day).into());
    }

    let mut summary = PublishSummary::default();
    for path in files_under(&day)? {
        let relative = path.strip_prefix(&day)?;
        let key = object_key(date, relative, gzip);
        summary.bytes += put_file(client, bucket, &key, &path, gzip).await?;
        summary.files += 1;
    }

    let report = config.daily_report_path(date);
    if report.exists() {
        let key = object_key(date, Path::new("report.json"), gzip);
        summary.bytes += put_file(client, bucket, &key, &report, gzip).await?;
        summary.files += 1;
    }

    let summary_path = config.summary_report_path();
    if summary_path.exists() {
        let report: SummaryReport = read_json(&summary_path)?;
        write_json_to_s3(client, bucket, "summary.json", &report).await?;
        summary.files += 1;
    }

    info!(files = summary.files, bytes = summary.bytes, "S3 upload complete");
    Ok(summary)
}
