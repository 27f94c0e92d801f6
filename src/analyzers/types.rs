//! Data types of the daily and summary reports.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::etl::rollup::LabelRollup;

/// Distribution of `row_stress` over a day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StressStats {
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p95: f64,
    pub threshold: f64,
    /// Share of rows strictly above `threshold`, 0..1.
    pub share_above_threshold: f64,
    /// Threshold (formatted to two decimals) → share of rows above it.
    pub share_above: BTreeMap<String, f64>,
    /// Level band → row count.
    pub levels: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VanishKpis {
    /// Unique (vehicle, trip) pairs with an anchor row.
    pub anchors: usize,
    pub vehicle_minutes: usize,
    /// Anchors per 1 000 vehicle-minutes.
    pub rate: f64,
    /// Local hour with the most anchors; `None` on a day without any.
    pub worst_hour: Option<u32>,
    /// Anchor rows per local hour, index 0 = 00:00.
    pub anchors_by_hour: Vec<usize>,
}

/// Minutes from a vanished pair's first observed row to its anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeToVanish {
    pub count: usize,
    pub median_min: Option<f64>,
    pub p25_min: Option<f64>,
    pub p75_min: Option<f64>,
    pub pct_within_2_min: f64,
    pub pct_over_30_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStress {
    pub route_id: String,
    pub route: String,
    pub rows: usize,
    pub avg_stress: f64,
    pub max_stress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteVanish {
    pub route_id: String,
    pub route: String,
    pub vanished_trips: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboards {
    pub worst_avg_stress: Vec<RouteStress>,
    pub worst_max_stress: Vec<RouteStress>,
    pub most_vanished: Vec<RouteVanish>,
}

/// One shape segment ranked by the stress of rows snapped onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorStress {
    pub segment_id: String,
    pub shape_id: String,
    pub start: (f64, f64),
    pub end: (f64, f64),
    pub rows: usize,
    pub avg_stress: f64,
    /// Share of snapped rows above the stress threshold.
    pub pct_above_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCounts {
    pub vanished_trips: usize,
    pub stuck_rows: usize,
    pub stuck_vehicles: usize,
    pub severe_delay_rows: usize,
}

/// Everything known about one service day, written to `daily/<date>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub schema_version: u8,
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub rows: usize,
    pub vehicles: usize,
    pub trips: usize,
    pub stress: StressStats,
    pub vanish: VanishKpis,
    pub time_to_vanish: TimeToVanish,
    pub anomalies: AnomalyCounts,
    pub leaderboards: Leaderboards,
    pub corridors: Vec<CorridorStress>,
    pub completeness: Vec<LabelRollup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub share_above_threshold: f64,
    pub anchors: usize,
    pub vanish_rate: f64,
}

/// Means over the last (up to) seven reported days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub days: usize,
    pub mean_anchors: f64,
    pub mean_rate: f64,
}

/// The newest day against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestDay {
    pub date: NaiveDate,
    pub anchors: usize,
    pub vanish_rate: f64,
    pub worst_hour: Option<u32>,
    pub delta_anchors: f64,
    pub delta_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub weekday: String,
    pub hour: u32,
    pub count: usize,
}

/// Cross-day view, rebuilt from every daily report into `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub threshold: f64,
    pub trend: Vec<TrendPoint>,
    pub baseline: Baseline,
    pub latest: Option<LatestDay>,
    pub vanish_heatmap: Vec<HeatmapCell>,
}
