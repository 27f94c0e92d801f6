//! Vanished, stuck and severely delayed vehicle flags.

use anyhow::Result;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::{VEH_MINUTE_FLAGS_CSV, VEH_MINUTE_W_CSV, guard_output, require_input};
use crate::config::{StressConfig, Thresholds};
use crate::geo::haversine_m;
use crate::output::{read_rows, write_rows};
use crate::records::VehicleMinute;
use crate::schedule::{load_trip_ends, parse_service_date, scheduled_instant};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub rows: usize,
    pub vanished_trips: usize,
    pub vanished_rows: usize,
    pub stuck_rows: usize,
    pub stuck_vehicles: usize,
    pub severe_delay_rows: usize,
}

/// Row indices of each `(vehicle_id, trip_id)` pair, in time order.
fn group_by_trip(rows: &[VehicleMinute]) -> BTreeMap<(String, String), Vec<usize>> {
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        if let Some((vehicle, trip)) = row.trip_key() {
            groups
                .entry((vehicle.to_string(), trip.to_string()))
                .or_default()
                .push(i);
        }
    }
    for idxs in groups.values_mut() {
        idxs.sort_by_key(|&i| rows[i].timestamp);
    }
    groups
}

/// Sorted fix timestamps of every vehicle, across all its trips.
fn vehicle_timelines(rows: &[VehicleMinute]) -> HashMap<&str, Vec<i64>> {
    let mut timelines: HashMap<&str, Vec<i64>> = HashMap::new();
    for row in rows {
        timelines.entry(row.vehicle_id.as_str()).or_default().push(row.timestamp);
    }
    for ts in timelines.values_mut() {
        ts.sort_unstable();
    }
    timelines
}

fn service_date(first: &VehicleMinute, tz: Tz) -> Option<NaiveDate> {
    first
        .start_date
        .as_deref()
        .and_then(parse_service_date)
        .or_else(|| DateTime::from_timestamp(first.timestamp, 0).map(|t| t.with_timezone(&tz).date_naive()))
}

/// Marks `stuck` on every maximal run of fixes that stay within the radius
/// of the run's first fix for at least the minimum duration.
fn mark_stuck(rows: &mut [VehicleMinute], idxs: &[usize], radius_m: f64, min_secs: i64) {
    let mut start = 0;
    while start < idxs.len() {
        let anchor = &rows[idxs[start]];
        let (lat0, lon0) = (anchor.lat, anchor.lon);

        let mut end = start;
        while end + 1 < idxs.len() {
            let next = &rows[idxs[end + 1]];
            if haversine_m(lat0, lon0, next.lat, next.lon) > radius_m {
                break;
            }
            end += 1;
        }

        let span = rows[idxs[end]].timestamp - rows[idxs[start]].timestamp;
        if end > start && span >= min_secs {
            for &i in &idxs[start..=end] {
                rows[i].stuck = true;
            }
            start = end + 1;
        } else {
            // A stop can begin at any fix, not only where the last try began.
            start += 1;
        }
    }
}

/// Sets the anomaly flags on `rows` in place.
///
/// `trip_ends` maps trip_id to the offset (seconds from the service day's
/// reference midnight) of its last scheduled stop. Pairs whose trip is not
/// in it are never judged vanished.
pub fn flag_anomalies(
    rows: &mut [VehicleMinute],
    trip_ends: &HashMap<String, u32>,
    thresholds: &Thresholds,
    tz: Tz,
) -> AnomalySummary {
    let gap = thresholds.vanish_gap_minutes * 60;
    let min_stuck = thresholds.stuck_min_minutes * 60;

    for row in rows.iter_mut() {
        row.vanished = false;
        row.vanish_anchor = false;
        row.stuck = false;
        row.severe_delay = row
            .delay_sec
            .is_some_and(|d| d >= thresholds.severe_delay_sec);
    }

    let feed_last = rows.iter().map(|r| r.timestamp).max().unwrap_or(i64::MIN);
    let groups = group_by_trip(rows);

    let mut vanished_pairs: Vec<&Vec<usize>> = Vec::new();
    {
        let timelines = vehicle_timelines(rows);
        for ((vehicle, trip), idxs) in &groups {
            let (Some(&first), Some(&last)) = (idxs.first(), idxs.last()) else {
                continue;
            };
            let Some(&end_offset) = trip_ends.get(trip) else {
                continue;
            };
            let Some(end) = service_date(&rows[first], tz)
                .and_then(|date| scheduled_instant(date, end_offset, tz))
            else {
                continue;
            };

            let last_seen = rows[last].timestamp;
            if end.timestamp() - last_seen < gap || feed_last < last_seen + gap {
                continue;
            }

            // The vehicle must have gone quiet, not just moved to another trip.
            let heard_again = timelines.get(vehicle.as_str()).is_some_and(|ts| {
                let after = ts.partition_point(|&t| t <= last_seen);
                ts.get(after).is_some_and(|&t| t <= last_seen + gap)
            });
            if !heard_again {
                vanished_pairs.push(idxs);
            }
        }
    }

    let mut summary = AnomalySummary {
        rows: rows.len(),
        vanished_trips: vanished_pairs.len(),
        ..Default::default()
    };

    for idxs in vanished_pairs {
        for &i in idxs {
            rows[i].vanished = true;
        }
        if let Some(&last) = idxs.last() {
            rows[last].vanish_anchor = true;
        }
        summary.vanished_rows += idxs.len();
    }

    for idxs in groups.values() {
        mark_stuck(rows, idxs, thresholds.stuck_radius_m, min_stuck);
    }

    let mut stuck_vehicles: Vec<&str> = rows
        .iter()
        .filter(|r| r.stuck)
        .map(|r| r.vehicle_id.as_str())
        .collect();
    stuck_vehicles.sort_unstable();
    stuck_vehicles.dedup();

    summary.stuck_rows = rows.iter().filter(|r| r.stuck).count();
    summary.stuck_vehicles = stuck_vehicles.len();
    summary.severe_delay_rows = rows.iter().filter(|r| r.severe_delay).count();
    summary
}

/// `veh_minute_w.csv` + `stop_times.txt` → `veh_minute_flags.csv`.
#[tracing::instrument(skip(config), fields(date = %date))]
pub fn detect_day(config: &StressConfig, date: NaiveDate, overwrite: bool) -> Result<AnomalySummary> {
    let tz = config.tz()?;
    let day = config.hist_day_dir(date);
    let out = day.join(VEH_MINUTE_FLAGS_CSV);
    guard_output(&out, overwrite)?;

    let input = day.join(VEH_MINUTE_W_CSV);
    require_input(&input)?;
    let mut rows: Vec<VehicleMinute> = read_rows(&input)?;

    let trip_ends = load_trip_ends(&config.static_dir)?;
    let summary = flag_anomalies(&mut rows, &trip_ends, &config.thresholds, tz);
    write_rows(&out, &rows)?;

    info!(
        vanished_trips = summary.vanished_trips,
        stuck_rows = summary.stuck_rows,
        severe_delay_rows = summary.severe_delay_rows,
        "Wrote {}",
        out.display()
    );
    Ok(summary)
}
