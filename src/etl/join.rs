//! Enriches vehicle fixes with static route data and trip delays.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{DELAY_CSV, VEH_MINUTE_CSV, VEHICLES_CSV, guard_output, require_input};
use crate::config::StressConfig;
use crate::output::{read_rows, write_rows};
use crate::records::{DelayRecord, VehicleMinute, VehicleObservation, minute_floor};
use crate::schedule::{TripInfo, load_trips};

#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinSummary {
    pub rows: usize,
    pub with_delay: usize,
    pub with_static_route: usize,
}

/// `(trip_id, minute)` → delay seconds. A later row for the same key wins.
pub fn delay_lookup(delays: &[DelayRecord]) -> HashMap<(String, i64), i32> {
    let mut latest: HashMap<(String, i64), (i64, i32)> = HashMap::new();
    for d in delays {
        let key = (d.trip_id.clone(), minute_floor(d.timestamp));
        match latest.get(&key) {
            Some(&(ts, _)) if ts > d.timestamp => {}
            _ => {
                latest.insert(key, (d.timestamp, d.delay_sec));
            }
        }
    }
    latest.into_iter().map(|(k, (_, delay))| (k, delay)).collect()
}

/// Builds vehicle-minute rows from rolled-up fixes.
///
/// Route and direction come from the schedule when the trip is known there,
/// otherwise from what the vehicle feed reported.
pub fn join_rows(
    observations: Vec<VehicleObservation>,
    delays: &[DelayRecord],
    trips: &HashMap<String, TripInfo>,
) -> (Vec<VehicleMinute>, JoinSummary) {
    let lookup = delay_lookup(delays);
    let mut summary = JoinSummary::default();

    let rows: Vec<VehicleMinute> = observations
        .into_iter()
        .map(|obs| {
            let mut row = VehicleMinute::from_observation(obs);
            if let Some(trip_id) = row.trip_id.clone() {
                if let Some(info) = trips.get(&trip_id) {
                    row.route_id = Some(info.route_id.clone());
                    row.direction_id = info.direction_id.or(row.direction_id);
                    summary.with_static_route += 1;
                }
                row.delay_sec = lookup.get(&(trip_id, minute_floor(row.timestamp))).copied();
                if row.delay_sec.is_some() {
                    summary.with_delay += 1;
                }
            }
            row
        })
        .collect();

    summary.rows = rows.len();
    (rows, summary)
}

/// `vehicles.csv` + `delay.csv` + `trips.txt` → `veh_minute.csv`.
///
/// A missing `delay.csv` is tolerated; every row then has no delay.
#[tracing::instrument(skip(config), fields(date = %date))]
pub fn join_day(config: &StressConfig, date: NaiveDate, overwrite: bool) -> Result<JoinSummary> {
    let day = config.hist_day_dir(date);
    let out = day.join(VEH_MINUTE_CSV);
    guard_output(&out, overwrite)?;

    let vehicles_path = day.join(VEHICLES_CSV);
    require_input(&vehicles_path)?;
    let observations: Vec<VehicleObservation> = read_rows(&vehicles_path)?;

    let delay_path = day.join(DELAY_CSV);
    let delays: Vec<DelayRecord> = if delay_path.exists() {
        read_rows(&delay_path)?
    } else {
        warn!(path = %delay_path.display(), "No delay table; delays left empty");
        Vec::new()
    };

    let trips = load_trips(&config.static_dir)?;
    let (rows, summary) = join_rows(observations, &delays, &trips);
    write_rows(&out, &rows)?;

    info!(
        rows = summary.rows,
        with_delay = summary.with_delay,
        with_static_route = summary.with_static_route,
        "Wrote {}",
        out.display()
    );
    Ok(summary)
}
