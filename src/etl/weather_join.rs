//! Attaches zone weather and local time to each vehicle-minute.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{VEH_MINUTE_CSV, VEH_MINUTE_W_CSV, WEATHER_CSV, guard_output, require_input};
use crate::config::{StressConfig, Zone};
use crate::geo::nearest_zone;
use crate::output::{read_rows, write_rows};
use crate::records::{VehicleMinute, WeatherRecord, minute_floor};

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeatherJoinSummary {
    pub rows: usize,
    pub with_weather: usize,
}

/// Per-zone weather observations sorted by minute, for nearest-minute lookups.
pub struct WeatherIndex {
    by_zone: HashMap<String, Vec<(i64, WeatherRecord)>>,
    tolerance_secs: i64,
}

impl WeatherIndex {
    pub fn new(records: Vec<WeatherRecord>, tolerance_secs: i64) -> Self {
        let mut by_zone: HashMap<String, Vec<(i64, WeatherRecord)>> = HashMap::new();
        for rec in records {
            by_zone
                .entry(rec.zone.clone())
                .or_default()
                .push((minute_floor(rec.timestamp), rec));
        }
        for obs in by_zone.values_mut() {
            obs.sort_by_key(|(minute, _)| *minute);
        }
        Self {
            by_zone,
            tolerance_secs,
        }
    }

    /// Observation in `zone` whose minute is nearest to `ts`'s minute, within
    /// the tolerance. The earlier observation wins a tie.
    pub fn nearest(&self, zone: &str, ts: i64) -> Option<&WeatherRecord> {
        let obs = self.by_zone.get(zone)?;
        let minute = minute_floor(ts);
        let idx = obs.partition_point(|(m, _)| *m < minute);

        let before = idx.checked_sub(1).and_then(|i| obs.get(i));
        let after = obs.get(idx);

        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if minute - b.0 <= a.0 - minute {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        ((best.0 - minute).abs() <= self.tolerance_secs).then_some(&best.1)
    }
}

/// The naive wall-clock time of `ts` in `tz`.
pub fn local_time(ts: i64, tz: Tz) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(ts, 0).map(|utc| utc.with_timezone(&tz).naive_local())
}

/// Sets zone, weather columns and local time on every row.
pub fn attach_weather(rows: &mut [VehicleMinute], zones: &[Zone], index: &WeatherIndex, tz: Tz) -> usize {
    let mut matched = 0;
    for row in rows.iter_mut() {
        row.local_time = local_time(row.timestamp, tz);

        let Some(zone) = nearest_zone(row.lat, row.lon, zones) else {
            continue;
        };
        row.zone = Some(zone.name.clone());

        if let Some(w) = index.nearest(&zone.name, row.timestamp) {
            row.temp_c = Some(w.temp_c);
            row.rain_mm = Some(w.rain_mm);
            row.wind_kph = Some(w.wind_kph);
            matched += 1;
        }
    }
    matched
}

/// `veh_minute.csv` + `weather.csv` → `veh_minute_w.csv`.
#[tracing::instrument(skip(config), fields(date = %date))]
pub fn weather_day(config: &StressConfig, date: NaiveDate, overwrite: bool) -> Result<WeatherJoinSummary> {
    let tz = config.tz()?;
    let day = config.hist_day_dir(date);
    let out = day.join(VEH_MINUTE_W_CSV);
    guard_output(&out, overwrite)?;

    let input = day.join(VEH_MINUTE_CSV);
    require_input(&input)?;
    let mut rows: Vec<VehicleMinute> = read_rows(&input)?;

    let weather_path = day.join(WEATHER_CSV);
    let weather: Vec<WeatherRecord> = if weather_path.exists() {
        read_rows(&weather_path)?
    } else {
        warn!(path = %weather_path.display(), "No weather table; weather left empty");
        Vec::new()
    };

    let index = WeatherIndex::new(weather, config.thresholds.weather_tolerance_secs);
    let with_weather = attach_weather(&mut rows, &config.zones, &index, tz);
    write_rows(&out, &rows)?;

    let summary = WeatherJoinSummary {
        rows: rows.len(),
        with_weather,
    };
    info!(rows = summary.rows, with_weather, "Wrote {}", out.display());
    Ok(summary)
}
