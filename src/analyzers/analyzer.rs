use crate::analyzers::aggregate::{
    anomaly_counts, corridor_ranking, leaderboards, stress_stats, time_to_vanish, vanish_kpis,
};
use crate::analyzers::types::{
    Baseline, DailyReport, HeatmapCell, LatestDay, SummaryReport, TrendPoint,
};
use crate::config::StressConfig;
use crate::error::StageError;
use crate::etl::rollup::RollupSummary;
use crate::etl::{ROLLUP_JSON, SCORED_CSV, guard_output, require_input};
use crate::geo::SegmentIndex;
use crate::output::{read_json, read_rows, write_json};
use crate::records::VehicleMinute;
use crate::schedule::{load_route_names, load_shapes};
use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: u8 = 1;
const BASELINE_DAYS: usize = 7;

/// Builds the report of one scored day from its rows and the static tables.
pub fn build_daily_report(
    config: &StressConfig,
    date: NaiveDate,
    rows: &[VehicleMinute],
    completeness: Option<RollupSummary>,
) -> Result<DailyReport> {
    let th = &config.thresholds;
    let stress: Vec<f64> = rows.iter().filter_map(|r| r.row_stress).collect();

    let names = load_route_names(&config.static_dir)?;
    let shapes = load_shapes(&config.static_dir)?;
    let index = SegmentIndex::build(&shapes);
    debug!(segments = index.len(), "Segment index built");

    let vehicles: BTreeSet<&str> = rows.iter().map(|r| r.vehicle_id.as_str()).collect();
    let trips: BTreeSet<&str> = rows.iter().filter_map(|r| r.trip_id.as_deref()).collect();

    Ok(DailyReport {
        schema_version: SCHEMA_VERSION,
        date,
        generated_at: Utc::now(),
        rows: rows.len(),
        vehicles: vehicles.len(),
        trips: trips.len(),
        stress: stress_stats(&stress, th.stress_threshold),
        vanish: vanish_kpis(rows),
        time_to_vanish: time_to_vanish(rows),
        anomalies: anomaly_counts(rows),
        leaderboards: leaderboards(rows, &names, th.leaderboard_size),
        corridors: corridor_ranking(
            rows,
            &index,
            th.corridor_snap_m,
            th.stress_threshold,
            th.leaderboard_size,
        ),
        completeness: completeness.map(|c| c.labels).unwrap_or_default(),
    })
}

/// Reads every `daily/*.json` report, oldest first.
pub fn load_daily_reports(config: &StressConfig) -> Result<Vec<DailyReport>> {
    let dir = config.reports_dir.join("daily");
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json::<DailyReport>(&path) {
            Ok(r) => reports.push(r),
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable daily report, skipped"),
        }
    }
    reports.sort_by_key(|r| r.date);
    Ok(reports)
}

/// Trend, 7-day baseline, latest-day deltas and weekday × hour heatmap.
pub fn build_summary(reports: &[DailyReport], threshold: f64) -> SummaryReport {
    let trend: Vec<TrendPoint> = reports
        .iter()
        .map(|r| TrendPoint {
            date: r.date,
            share_above_threshold: r.stress.share_above_threshold,
            anchors: r.vanish.anchors,
            vanish_rate: r.vanish.rate,
        })
        .collect();

    let recent = &reports[reports.len().saturating_sub(BASELINE_DAYS)..];
    let baseline = if recent.is_empty() {
        Baseline::default()
    } else {
        let n = recent.len() as f64;
        Baseline {
            days: recent.len(),
            mean_anchors: recent.iter().map(|r| r.vanish.anchors as f64).sum::<f64>() / n,
            mean_rate: recent.iter().map(|r| r.vanish.rate).sum::<f64>() / n,
        }
    };

    let latest = reports.last().map(|r| LatestDay {
        date: r.date,
        anchors: r.vanish.anchors,
        vanish_rate: r.vanish.rate,
        worst_hour: r.vanish.worst_hour,
        delta_anchors: r.vanish.anchors as f64 - baseline.mean_anchors,
        delta_rate: r.vanish.rate - baseline.mean_rate,
    });

    // Monday-first weekday order, then hour.
    let mut cells: BTreeMap<(u32, u32), (String, usize)> = BTreeMap::new();
    for r in recent {
        let weekday = r.date.weekday();
        for (hour, &count) in r.vanish.anchors_by_hour.iter().enumerate() {
            if count == 0 {
                continue;
            }
            cells
                .entry((weekday.num_days_from_monday(), hour as u32))
                .or_insert_with(|| (weekday.to_string(), 0))
                .1 += count;
        }
    }
    let vanish_heatmap = cells
        .into_iter()
        .map(|((_, hour), (weekday, count))| HeatmapCell {
            weekday,
            hour,
            count,
        })
        .collect();

    SummaryReport {
        schema_version: SCHEMA_VERSION,
        generated_at: Utc::now(),
        threshold,
        trend,
        baseline,
        latest,
        vanish_heatmap,
    }
}

/// Rebuilds `summary.json` from all daily reports on disk.
pub fn rebuild_summary(config: &StressConfig) -> Result<SummaryReport> {
    let reports = load_daily_reports(config)?;
    let summary = build_summary(&reports, config.thresholds.stress_threshold);
    let path = config.summary_report_path();
    write_json(&path, &summary)?;
    info!(days = reports.len(), "Wrote {}", path.display());
    Ok(summary)
}

/// Writes the day's report, then refreshes the summary.
///
/// An existing daily report is kept unless `overwrite` is set; the summary is
/// refreshed either way.
#[tracing::instrument(skip(config), fields(date = %date))]
pub fn report_day(config: &StressConfig, date: NaiveDate, overwrite: bool) -> Result<DailyReport> {
    let path = config.daily_report_path(date);
    if let Err(e) = guard_output(&path, overwrite) {
        if StageError::is_already_exists(&e) {
            rebuild_summary(config)?;
        }
        return Err(e);
    }

    let scored = config.norms_dir(date).join(SCORED_CSV);
    require_input(&scored)?;
    let rows: Vec<VehicleMinute> = read_rows(&scored)?;

    let rollup_path = config.hist_day_dir(date).join(ROLLUP_JSON);
    let completeness = if rollup_path.exists() {
        Some(read_json::<RollupSummary>(&rollup_path)?)
    } else {
        warn!(path = %rollup_path.display(), "No rollup summary; completeness omitted");
        None
    };

    let report = build_daily_report(config, date, &rows, completeness)?;
    write_json(&path, &report)?;
    info!(
        rows = report.rows,
        anchors = report.vanish.anchors,
        share_above_threshold = report.stress.share_above_threshold,
        "Wrote {}",
        path.display()
    );

    rebuild_summary(config)?;
    Ok(report)
}
