use crate::analyzers::grade::{LEVELS, level};
use crate::analyzers::types::{
    AnomalyCounts, CorridorStress, Leaderboards, RouteStress, RouteVanish, StressStats,
    TimeToVanish, VanishKpis,
};
use crate::analyzers::utility::{mean, quantile, share, stddev};
use crate::geo::SegmentIndex;
use crate::records::VehicleMinute;
use chrono::Timelike;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Thresholds reported in the share-above grid: 0.10, 0.20, … 0.90.
pub fn threshold_grid() -> Vec<f64> {
    (1..=9).map(|i| i as f64 / 10.0).collect()
}

/// Time-to-vanish values at or beyond this many minutes are dropped as outliers.
const TTV_MAX_MIN: f64 = 360.0;

/// Summarises the day's `row_stress` distribution.
pub fn stress_stats(stress: &[f64], threshold: f64) -> StressStats {
    let avg = mean(stress);

    let share_above = threshold_grid()
        .into_iter()
        .map(|t| (format!("{t:.2}"), share(stress, |s| s > t)))
        .collect();

    let mut levels: BTreeMap<String, usize> =
        LEVELS.iter().map(|l| (l.to_string(), 0)).collect();
    for &s in stress {
        *levels.entry(level(s).to_string()).or_default() += 1;
    }

    StressStats {
        mean: avg,
        stddev: stddev(stress, avg),
        p50: quantile(stress, 0.5).unwrap_or(0.0),
        p95: quantile(stress, 0.95).unwrap_or(0.0),
        threshold,
        share_above_threshold: share(stress, |s| s > threshold),
        share_above,
        levels,
    }
}

fn anchor_pairs(rows: &[VehicleMinute]) -> BTreeSet<(&str, &str)> {
    rows.iter()
        .filter(|r| r.vanish_anchor)
        .filter_map(|r| r.trip_key())
        .collect()
}

/// Anchor counts, rate per 1 000 vehicle-minutes and the worst local hour.
pub fn vanish_kpis(rows: &[VehicleMinute]) -> VanishKpis {
    let anchors = anchor_pairs(rows).len();
    let vehicle_minutes = rows.len();
    let rate = if vehicle_minutes == 0 {
        0.0
    } else {
        anchors as f64 / vehicle_minutes as f64 * 1000.0
    };

    let mut anchors_by_hour = vec![0usize; 24];
    for row in rows.iter().filter(|r| r.vanish_anchor) {
        if let Some(t) = row.local_time {
            anchors_by_hour[t.hour() as usize] += 1;
        }
    }

    // Earliest hour wins a tie.
    let worst_hour = anchors_by_hour
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0)
        .max_by(|(ha, ca), (hb, cb)| ca.cmp(cb).then(hb.cmp(ha)))
        .map(|(h, _)| h as u32);

    VanishKpis {
        anchors,
        vehicle_minutes,
        rate,
        worst_hour,
        anchors_by_hour,
    }
}

/// Minutes between each vanished pair's first row and its anchor.
pub fn time_to_vanish_minutes(rows: &[VehicleMinute]) -> Vec<f64> {
    let mut first: HashMap<(&str, &str), i64> = HashMap::new();
    let mut anchor: HashMap<(&str, &str), i64> = HashMap::new();

    for row in rows {
        let Some(key) = row.trip_key() else {
            continue;
        };
        first
            .entry(key)
            .and_modify(|t| *t = (*t).min(row.timestamp))
            .or_insert(row.timestamp);
        if row.vanish_anchor {
            anchor
                .entry(key)
                .and_modify(|t| *t = (*t).max(row.timestamp))
                .or_insert(row.timestamp);
        }
    }

    let mut mins: Vec<f64> = anchor
        .iter()
        .filter_map(|(key, &end)| first.get(key).map(|&start| (end - start) as f64 / 60.0))
        .filter(|m| (0.0..TTV_MAX_MIN).contains(m))
        .collect();
    mins.sort_by(f64::total_cmp);
    mins
}

pub fn time_to_vanish(rows: &[VehicleMinute]) -> TimeToVanish {
    let mins = time_to_vanish_minutes(rows);
    TimeToVanish {
        count: mins.len(),
        median_min: quantile(&mins, 0.5),
        p25_min: quantile(&mins, 0.25),
        p75_min: quantile(&mins, 0.75),
        pct_within_2_min: share(&mins, |m| m <= 2.0) * 100.0,
        pct_over_30_min: share(&mins, |m| m > 30.0) * 100.0,
    }
}

pub fn anomaly_counts(rows: &[VehicleMinute]) -> AnomalyCounts {
    let stuck_vehicles: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.stuck)
        .map(|r| r.vehicle_id.as_str())
        .collect();

    AnomalyCounts {
        vanished_trips: anchor_pairs(rows).len(),
        stuck_rows: rows.iter().filter(|r| r.stuck).count(),
        stuck_vehicles: stuck_vehicles.len(),
        severe_delay_rows: rows.iter().filter(|r| r.severe_delay).count(),
    }
}

fn display_name(names: &HashMap<String, String>, route_id: &str) -> String {
    names
        .get(route_id)
        .cloned()
        .unwrap_or_else(|| route_id.to_string())
}

/// Worst routes by average and by maximum stress, and by vanished trips.
pub fn leaderboards(rows: &[VehicleMinute], names: &HashMap<String, String>, n: usize) -> Leaderboards {
    let mut by_route: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let (Some(route), Some(s)) = (row.route_id.as_deref(), row.row_stress) {
            by_route.entry(route).or_default().push(s);
        }
    }

    let routes: Vec<RouteStress> = by_route
        .into_iter()
        .map(|(route_id, stress)| RouteStress {
            route_id: route_id.to_string(),
            route: display_name(names, route_id),
            rows: stress.len(),
            avg_stress: mean(&stress),
            max_stress: stress.iter().copied().fold(0.0, f64::max),
        })
        .collect();

    let mut worst_avg_stress = routes.clone();
    worst_avg_stress.sort_by(|a, b| b.avg_stress.total_cmp(&a.avg_stress).then(a.route_id.cmp(&b.route_id)));
    worst_avg_stress.truncate(n);

    let mut worst_max_stress = routes;
    worst_max_stress.sort_by(|a, b| b.max_stress.total_cmp(&a.max_stress).then(a.route_id.cmp(&b.route_id)));
    worst_max_stress.truncate(n);

    let mut vanished: BTreeMap<&str, BTreeSet<(&str, &str)>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.vanish_anchor) {
        if let (Some(route), Some(key)) = (row.route_id.as_deref(), row.trip_key()) {
            vanished.entry(route).or_default().insert(key);
        }
    }
    let mut most_vanished: Vec<RouteVanish> = vanished
        .into_iter()
        .map(|(route_id, pairs)| RouteVanish {
            route_id: route_id.to_string(),
            route: display_name(names, route_id),
            vanished_trips: pairs.len(),
        })
        .collect();
    most_vanished.sort_by(|a, b| b.vanished_trips.cmp(&a.vanished_trips).then(a.route_id.cmp(&b.route_id)));
    most_vanished.truncate(n);

    Leaderboards {
        worst_avg_stress,
        worst_max_stress,
        most_vanished,
    }
}

/// Snaps each scored row to its nearest shape segment (within `snap_m`) and
/// ranks segments by average stress.
pub fn corridor_ranking(
    rows: &[VehicleMinute],
    index: &SegmentIndex,
    snap_m: f64,
    threshold: f64,
    n: usize,
) -> Vec<CorridorStress> {
    if index.is_empty() {
        return Vec::new();
    }

    let mut by_segment: BTreeMap<String, (CorridorStress, Vec<f64>)> = BTreeMap::new();
    for row in rows {
        let Some(s) = row.row_stress else {
            continue;
        };
        let Some((seg, _)) = index.snap(row.lat, row.lon, snap_m) else {
            continue;
        };
        by_segment
            .entry(seg.segment_id.clone())
            .or_insert_with(|| {
                (
                    CorridorStress {
                        segment_id: seg.segment_id.clone(),
                        shape_id: seg.shape_id.clone(),
                        start: seg.start,
                        end: seg.end,
                        rows: 0,
                        avg_stress: 0.0,
                        pct_above_threshold: 0.0,
                    },
                    Vec::new(),
                )
            })
            .1
            .push(s);
    }

    let mut ranked: Vec<CorridorStress> = by_segment
        .into_values()
        .map(|(mut c, stress)| {
            c.rows = stress.len();
            c.avg_stress = mean(&stress);
            c.pct_above_threshold = share(&stress, |s| s > threshold);
            c
        })
        .collect();
    ranked.sort_by(|a, b| b.avg_stress.total_cmp(&a.avg_stress).then(a.segment_id.cmp(&b.segment_id)));
    ranked.truncate(n);
    ranked
}
