//! Free-flow speed table: a high quantile of moving speeds per route direction.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::analyzers::utility::quantile;
use crate::config::StressConfig;
use crate::etl::VEH_MINUTE_FLAGS_CSV;
use crate::output::{read_rows, write_rows};
use crate::records::{FreeFlow, VehicleMinute};

pub type FreeFlowKey = (String, Option<u32>);

/// Free-flow speeds from `rows`: per (route_id, direction_id), the `q`
/// quantile of speeds at or above `min_kph`. Rows without a route are ignored.
pub fn compute_freeflow(rows: &[VehicleMinute], min_kph: f64, q: f64) -> Vec<FreeFlow> {
    let mut speeds: BTreeMap<FreeFlowKey, Vec<f64>> = BTreeMap::new();
    for row in rows {
        let (Some(route), Some(speed)) = (&row.route_id, row.speed_kph) else {
            continue;
        };
        if speed >= min_kph {
            speeds
                .entry((route.clone(), row.direction_id))
                .or_default()
                .push(speed);
        }
    }

    speeds
        .into_iter()
        .filter_map(|((route_id, direction_id), v)| {
            quantile(&v, q).map(|free_kph| FreeFlow {
                route_id,
                direction_id,
                free_kph,
            })
        })
        .collect()
}

/// Rebuilds the free-flow table from every flagged day in `from..=to`.
///
/// Days without a flags table are skipped.
#[tracing::instrument(skip(config), fields(from = %from, to = %to))]
pub fn build_freeflow(config: &StressConfig, from: NaiveDate, to: NaiveDate) -> Result<Vec<FreeFlow>> {
    if from > to {
        bail!("Invalid range: {from} is after {to}");
    }

    let mut rows: Vec<VehicleMinute> = Vec::new();
    let mut days = 0usize;
    for date in from.iter_days().take_while(|d| *d <= to) {
        let path = config.hist_day_dir(date).join(VEH_MINUTE_FLAGS_CSV);
        if !path.exists() {
            debug!(date = %date, "No flags table, skipped");
            continue;
        }
        rows.extend(read_rows::<VehicleMinute>(&path)?);
        days += 1;
    }

    if days == 0 {
        warn!("No flagged days in range; free-flow table will be empty");
    }

    let table = compute_freeflow(
        &rows,
        config.thresholds.freeflow_min_kph,
        config.thresholds.freeflow_quantile,
    );
    write_rows(&config.freeflow_path, &table)?;
    info!(
        days,
        routes = table.len(),
        "Wrote {}",
        config.freeflow_path.display()
    );
    Ok(table)
}

/// Loads the free-flow table keyed by (route_id, direction_id).
///
/// A missing table is not an error: scoring then treats speed stress as 0.
pub fn load_freeflow(path: &Path) -> Result<HashMap<FreeFlowKey, f64>> {
    if !path.exists() {
        warn!(path = %path.display(), "No free-flow table; speed stress disabled (run `freeflow` first)");
        return Ok(HashMap::new());
    }
    let rows: Vec<FreeFlow> = read_rows(path)?;
    Ok(rows
        .into_iter()
        .map(|f| ((f.route_id, f.direction_id), f.free_kph))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(route: Option<&str>, direction: Option<u32>, speed: Option<f64>) -> VehicleMinute {
        VehicleMinute {
            vehicle_id: "v".to_string(),
            route_id: route.map(str::to_string),
            direction_id: direction,
            speed_kph: speed,
            ..Default::default()
        }
    }

    #[test]
    fn test_compute_freeflow_per_direction() {
        let mut rows: Vec<VehicleMinute> = (1..=5)
            .map(|i| row(Some("R1"), Some(0), Some(10.0 * i as f64)))
            .collect();
        rows.push(row(Some("R1"), Some(0), Some(4.0)));
        rows.push(row(Some("R1"), Some(1), Some(25.0)));
        rows.push(row(None, Some(0), Some(80.0)));
        rows.push(row(Some("R2"), None, None));

        let table = compute_freeflow(&rows, 10.0, 0.95);
        assert_eq!(table.len(), 2);

        // 10..50, pos = 0.95 * 4 = 3.8 → 40 + 0.8 * 10
        assert_eq!(table[0].route_id, "R1");
        assert_eq!(table[0].direction_id, Some(0));
        assert!((table[0].free_kph - 48.0).abs() < 1e-9);
        assert_eq!(table[1].direction_id, Some(1));
        assert_eq!(table[1].free_kph, 25.0);
    }

    #[test]
    fn test_build_and_load_freeflow() {
        let dir = tempfile::tempdir().unwrap();
        let config = StressConfig {
            hist_root: dir.path().join("hist"),
            freeflow_path: dir.path().join("hist/freeflow_95pct.csv"),
            ..StressConfig::default()
        };
        let d1 = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2025, 7, 16).unwrap();

        write_rows(
            &config.hist_day_dir(d1).join(VEH_MINUTE_FLAGS_CSV),
            &[row(Some("R1"), Some(0), Some(30.0))],
        )
        .unwrap();
        write_rows(
            &config.hist_day_dir(d3).join(VEH_MINUTE_FLAGS_CSV),
            &[row(Some("R1"), Some(0), Some(30.0))],
        )
        .unwrap();

        let table = build_freeflow(&config, d1, d3).unwrap();
        assert_eq!(table.len(), 1);

        let loaded = load_freeflow(&config.freeflow_path).unwrap();
        assert_eq!(loaded.get(&("R1".to_string(), Some(0))), Some(&30.0));
    }

    #[test]
    fn test_build_rejects_reversed_range() {
        let config = StressConfig::default();
        let d1 = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let d0 = NaiveDate::from_ymd_opt(2025, 7, 13).unwrap();
        assert!(build_freeflow(&config, d1, d0).is_err());
    }

    #[test]
    fn test_load_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_freeflow(&dir.path().join("none.csv")).unwrap().is_empty());
    }
}
