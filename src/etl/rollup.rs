//! Rolls one day of minute dumps into the historical day bundle.
//!
//! Vehicles get a `speed_kph` derived from consecutive GPS fixes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{DELAY_CSV, ROLLUP_JSON, VEHICLES_CSV, WEATHER_CSV, guard_output, require_input};
use crate::config::StressConfig;
use crate::geo::haversine_m;
use crate::output::{list_csv_files, read_rows, write_json, write_rows};
use crate::records::{DelayRecord, VehicleObservation, VehicleRecord, WeatherRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct RollupOptions {
    pub overwrite: bool,
    /// Proceed even if a label has fewer dumps than a full day.
    pub allow_partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelStatus {
    Written,
    Missing,
    Partial,
}

/// Outcome for one live label (vehicles, weather, delay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRollup {
    pub label: String,
    pub files: usize,
    pub expected: usize,
    pub rows: usize,
    pub status: LabelStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollupSummary {
    pub date: Option<NaiveDate>,
    pub labels: Vec<LabelRollup>,
}

impl RollupSummary {
    pub fn label(&self, label: &str) -> Option<&LabelRollup> {
        self.labels.iter().find(|l| l.label == label)
    }
}

/// Derives per-fix speeds.
///
/// Repeated fixes (same vehicle and timestamp, as stale feeds re-publish)
/// are dropped. Within each vehicle, in time order, speed is the haversine
/// distance from the previous fix over the elapsed time (at least 1 s), in
/// km/h. A vehicle's first fix has no speed.
pub fn derive_speeds(mut records: Vec<VehicleRecord>) -> Vec<VehicleObservation> {
    records.sort_by(|a, b| {
        a.vehicle_id
            .cmp(&b.vehicle_id)
            .then(a.timestamp.cmp(&b.timestamp))
    });
    records.dedup_by(|b, a| a.vehicle_id == b.vehicle_id && a.timestamp == b.timestamp);

    let mut out: Vec<VehicleObservation> = Vec::with_capacity(records.len());
    for rec in records {
        let speed_kph = match out.last() {
            Some(prev) if prev.vehicle_id == rec.vehicle_id => {
                let dist = haversine_m(prev.lat, prev.lon, rec.lat, rec.lon);
                let dt = (rec.timestamp - prev.timestamp).max(1) as f64;
                Some(dist / dt * 3.6)
            }
            _ => None,
        };
        let mut obs = VehicleObservation::from_record(rec);
        obs.speed_kph = speed_kph;
        out.push(obs);
    }
    out
}

fn read_all<T: DeserializeOwned>(files: &[PathBuf]) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    for f in files {
        // Empty dumps (no rows, no header) come from polls that saw nothing.
        if std::fs::metadata(f)?.len() == 0 {
            continue;
        }
        rows.extend(read_rows::<T>(f)?);
    }
    Ok(rows)
}

fn roll_label(label: &str, files: &[PathBuf], out: &Path) -> Result<usize> {
    match label {
        "vehicles" => {
            let rows = derive_speeds(read_all::<VehicleRecord>(files)?);
            write_rows(out, &rows)?;
            Ok(rows.len())
        }
        "delay" => {
            let rows = read_all::<DelayRecord>(files)?;
            write_rows(out, &rows)?;
            Ok(rows.len())
        }
        _ => {
            let rows = read_all::<WeatherRecord>(files)?;
            write_rows(out, &rows)?;
            Ok(rows.len())
        }
    }
}

fn output_name(label: &str) -> &'static str {
    match label {
        "vehicles" => VEHICLES_CSV,
        "delay" => DELAY_CSV,
        _ => WEATHER_CSV,
    }
}

/// Rolls `<live_root>/<date>/` into `<hist_root>/<date>/`.
///
/// # Errors
///
/// [`StageError::AlreadyExists`](crate::error::StageError) if the day was
/// already rolled up, [`StageError::MissingInput`](crate::error::StageError)
/// if the collectors never ran for it.
#[tracing::instrument(skip(config, opts), fields(date = %date))]
pub fn rollup_day(config: &StressConfig, date: NaiveDate, opts: RollupOptions) -> Result<RollupSummary> {
    let raw_day = config.live_day_dir(date);
    let hist_day = config.hist_day_dir(date);

    guard_output(&hist_day.join(ROLLUP_JSON), opts.overwrite)?;
    require_input(&raw_day)?;
    std::fs::create_dir_all(&hist_day)?;

    let mut summary = RollupSummary {
        date: Some(date),
        labels: Vec::new(),
    };

    for (label, expected) in config.expected.labels() {
        let files = list_csv_files(&raw_day.join(label))?;
        let mut entry = LabelRollup {
            label: label.to_string(),
            files: files.len(),
            expected,
            rows: 0,
            status: LabelStatus::Missing,
        };

        let out = hist_day.join(output_name(label));
        if files.is_empty() {
            warn!(label, "Missing, skipped");
        } else if files.len() < expected && !opts.allow_partial {
            warn!(label, files = files.len(), expected, "Partial day (use --allow-partial)");
            entry.status = LabelStatus::Partial;
        } else {
            entry.rows = roll_label(label, &files, &out)?;
            entry.status = LabelStatus::Written;
            info!(label, rows = entry.rows, files = files.len(), "Wrote {}", out.display());
        }

        // A table left by an earlier run would be read as this run's output.
        if entry.status != LabelStatus::Written && out.exists() {
            std::fs::remove_file(&out)
                .with_context(|| format!("Failed to remove stale '{}'", out.display()))?;
            info!(label, "Removed table from an earlier rollup");
        }

        summary.labels.push(entry);
    }

    write_json(&hist_day.join(ROLLUP_JSON), &summary)?;
    info!("Rollup finished");
    Ok(summary)
}
