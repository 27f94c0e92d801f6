//! GTFS static schedule tables.
//!
//! Only the columns the pipeline needs are read; extra columns in the feed's
//! text files are ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use crate::error::StageError;
use crate::output::read_rows;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TripInfo {
    pub route_id: String,
    #[serde(default)]
    pub direction_id: Option<u32>,
    #[serde(default)]
    pub shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    route_id: String,
    #[serde(default)]
    direction_id: Option<u32>,
    #[serde(default)]
    shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    #[serde(default)]
    arrival_time: Option<String>,
    #[serde(default)]
    departure_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShapeRow {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

/// `trips.txt`: trip_id → route, direction and shape.
///
/// # Errors
///
/// Returns [`StageError::MissingInput`] if the file does not exist.
pub fn load_trips(static_dir: &Path) -> Result<HashMap<String, TripInfo>> {
    let path = static_dir.join("trips.txt");
    if !path.exists() {
        return Err(StageError::MissingInput(path).into());
    }

    let rows: Vec<TripRow> = read_rows(&path)?;
    let trips: HashMap<_, _> = rows
        .into_iter()
        .map(|r| {
            (
                r.trip_id,
                TripInfo {
                    route_id: r.route_id,
                    direction_id: r.direction_id,
                    shape_id: r.shape_id.filter(|s| !s.is_empty()),
                },
            )
        })
        .collect();
    info!(trips = trips.len(), "Loaded trips.txt");
    Ok(trips)
}

/// Parses a GTFS time of day (`H:MM:SS`, hours may exceed 23) into seconds
/// after the service day's reference midnight.
pub fn parse_gtfs_time(s: &str) -> Option<u32> {
    let mut parts = s.trim().split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let sec: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || m >= 60 || sec >= 60 {
        return None;
    }
    Some(h * 3600 + m * 60 + sec)
}

/// `stop_times.txt`: trip_id → seconds of the last scheduled arrival or departure.
///
/// A missing file yields an empty map (no trip can then be judged vanished).
pub fn load_trip_ends(static_dir: &Path) -> Result<HashMap<String, u32>> {
    let path = static_dir.join("stop_times.txt");
    if !path.exists() {
        warn!(path = %path.display(), "stop_times.txt missing; scheduled trip ends unknown");
        return Ok(HashMap::new());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("Failed to open '{}'", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);

    let mut ends: HashMap<String, u32> = HashMap::new();
    for result in rdr.deserialize() {
        let row: StopTimeRow = result?;
        let latest = [row.arrival_time.as_deref(), row.departure_time.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(parse_gtfs_time)
            .max();
        if let Some(secs) = latest {
            let entry = ends.entry(row.trip_id).or_insert(secs);
            *entry = (*entry).max(secs);
        }
    }
    info!(trips = ends.len(), "Loaded trip ends from stop_times.txt");
    Ok(ends)
}

/// `routes.txt`: route_id → display name.
///
/// The short name is used unless another route shares it, in which case the
/// long name is appended in parentheses.
pub fn load_route_names(static_dir: &Path) -> Result<HashMap<String, String>> {
    let path = static_dir.join("routes.txt");
    if !path.exists() {
        warn!(path = %path.display(), "routes.txt missing; reports use route ids");
        return Ok(HashMap::new());
    }

    let rows: Vec<RouteRow> = read_rows(&path)?;
    Ok(route_display_names(rows))
}

fn route_display_names(rows: Vec<RouteRow>) -> HashMap<String, String> {
    let mut short_counts: HashMap<String, usize> = HashMap::new();
    for r in &rows {
        if let Some(short) = r.route_short_name.as_deref().filter(|s| !s.is_empty()) {
            *short_counts.entry(short.to_string()).or_default() += 1;
        }
    }

    rows.into_iter()
        .map(|r| {
            let short = r.route_short_name.filter(|s| !s.is_empty());
            let long = r.route_long_name.filter(|s| !s.is_empty());
            let name = match (short, long) {
                (Some(s), Some(l)) if short_counts.get(&s).copied().unwrap_or(0) > 1 => {
                    format!("{s} ({l})")
                }
                (Some(s), _) => s,
                (None, Some(l)) => l,
                (None, None) => r.route_id.clone(),
            };
            (r.route_id, name)
        })
        .collect()
}

/// `shapes.txt`: shape_id → points ordered by sequence, as `(lat, lon)`.
///
/// A missing file yields no shapes (corridor ranking is then skipped).
pub fn load_shapes(static_dir: &Path) -> Result<BTreeMap<String, Vec<(f64, f64)>>> {
    let path = static_dir.join("shapes.txt");
    if !path.exists() {
        warn!(path = %path.display(), "shapes.txt missing; corridor ranking disabled");
        return Ok(BTreeMap::new());
    }

    let rows: Vec<ShapeRow> = read_rows(&path)?;
    let mut grouped: BTreeMap<String, Vec<(u32, f64, f64)>> = BTreeMap::new();
    for r in rows {
        grouped
            .entry(r.shape_id)
            .or_default()
            .push((r.shape_pt_sequence, r.shape_pt_lat, r.shape_pt_lon));
    }

    Ok(grouped
        .into_iter()
        .map(|(id, mut pts)| {
            pts.sort_by_key(|p| p.0);
            (id, pts.into_iter().map(|(_, lat, lon)| (lat, lon)).collect())
        })
        .collect())
}

/// Parses a GTFS service date (`YYYYMMDD`).
pub fn parse_service_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

/// Absolute instant of a GTFS time offset on a service date.
///
/// GTFS measures stop times from "noon minus 12h" local time, which is
/// midnight except on DST change days.
pub fn scheduled_instant(service_date: NaiveDate, offset_secs: u32, tz: Tz) -> Option<DateTime<Utc>> {
    let noon = service_date.and_hms_opt(12, 0, 0)?;
    let noon = tz.from_local_datetime(&noon).single()?;
    let reference = noon - Duration::hours(12);
    Some((reference + Duration::seconds(i64::from(offset_secs))).with_timezone(&Utc))
}
