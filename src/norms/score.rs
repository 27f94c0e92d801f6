//! Scores every flagged vehicle-minute.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use super::{Components, cold_norm, delay_norm, heat_norm, rain_norm, speed_norm};
use crate::analyzers::utility::mean;
use crate::config::{StressConfig, Thresholds, Weights};
use crate::etl::{SCORED_CSV, VEH_MINUTE_FLAGS_CSV, guard_output, require_input};
use crate::norms::freeflow::{FreeFlowKey, load_freeflow};
use crate::output::{read_rows, write_rows};
use crate::records::VehicleMinute;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreSummary {
    pub rows: usize,
    pub with_freeflow: usize,
    pub mean_stress: f64,
}

fn free_kph(freeflow: &HashMap<FreeFlowKey, f64>, row: &VehicleMinute) -> Option<f64> {
    let route = row.route_id.clone()?;
    freeflow.get(&(route, row.direction_id)).copied()
}

/// Fills the norm columns and `row_stress` of every row.
pub fn score_rows(
    rows: &mut [VehicleMinute],
    freeflow: &HashMap<FreeFlowKey, f64>,
    thresholds: &Thresholds,
    weights: &Weights,
) -> ScoreSummary {
    let mut with_freeflow = 0;
    for row in rows.iter_mut() {
        let free = free_kph(freeflow, row);
        if free.is_some() {
            with_freeflow += 1;
        }

        let c = Components {
            delay: delay_norm(row.delay_sec),
            speed: speed_norm(row.speed_kph, free, thresholds.moving_min_kph),
            rain: rain_norm(row.rain_mm),
            heat: heat_norm(row.temp_c),
            cold: cold_norm(row.temp_c),
            vanish: row.vanish_anchor,
        };

        row.delay_norm = Some(c.delay);
        row.speed_norm = Some(c.speed);
        row.rain_norm = Some(c.rain);
        row.heat_norm = Some(c.heat);
        row.cold_norm = Some(c.cold);
        row.row_stress = Some(c.stress(weights));
    }

    let stress: Vec<f64> = rows.iter().filter_map(|r| r.row_stress).collect();
    ScoreSummary {
        rows: rows.len(),
        with_freeflow,
        mean_stress: mean(&stress),
    }
}

/// `veh_minute_flags.csv` + free-flow table → `norms/veh_minute_scored.csv`.
#[tracing::instrument(skip(config), fields(date = %date))]
pub fn score_day(config: &StressConfig, date: NaiveDate, overwrite: bool) -> Result<ScoreSummary> {
    let out = config.norms_dir(date).join(SCORED_CSV);
    guard_output(&out, overwrite)?;

    let input = config.hist_day_dir(date).join(VEH_MINUTE_FLAGS_CSV);
    require_input(&input)?;
    let mut rows: Vec<VehicleMinute> = read_rows(&input)?;

    let freeflow = load_freeflow(&config.freeflow_path)?;
    let summary = score_rows(&mut rows, &freeflow, &config.thresholds, &config.weights);
    write_rows(&out, &rows)?;

    info!(
        rows = summary.rows,
        with_freeflow = summary.with_freeflow,
        mean_stress = summary.mean_stress,
        "Wrote {}",
        out.display()
    );
    Ok(summary)
}
