//! The nightly chain: rollup → join → weather → anomalies → score → report.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::analyzers::analyzer::report_day;
use crate::config::StressConfig;
use crate::error::StageError;
use crate::etl::anomalies::{AnomalySummary, detect_day};
use crate::etl::join::{JoinSummary, join_day};
use crate::etl::rollup::{RollupOptions, RollupSummary, rollup_day};
use crate::etl::weather_join::{WeatherJoinSummary, weather_day};
use crate::norms::score::{ScoreSummary, score_day};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub overwrite: bool,
    pub allow_partial: bool,
}

/// What each stage did; `None` where the stage found its output already there.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub rollup: Option<RollupSummary>,
    pub join: Option<JoinSummary>,
    pub weather: Option<WeatherJoinSummary>,
    pub anomalies: Option<AnomalySummary>,
    pub score: Option<ScoreSummary>,
    pub report_written: bool,
}

/// Turns "already exists" into `None` so the chain continues on the existing output.
fn skip_existing<T>(stage: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if StageError::is_already_exists(&e) => {
            info!(stage, "Already processed, continuing with existing output");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[tracing::instrument(skip(config, opts), fields(date = %date, overwrite = opts.overwrite))]
pub fn run_day(config: &StressConfig, date: NaiveDate, opts: RunOptions) -> Result<RunSummary> {
    let overwrite = opts.overwrite;
    let rollup_opts = RollupOptions {
        overwrite,
        allow_partial: opts.allow_partial,
    };

    let summary = RunSummary {
        rollup: skip_existing("rollup", rollup_day(config, date, rollup_opts))?,
        join: skip_existing("join", join_day(config, date, overwrite))?,
        weather: skip_existing("weather", weather_day(config, date, overwrite))?,
        anomalies: skip_existing("anomalies", detect_day(config, date, overwrite))?,
        score: skip_existing("score", score_day(config, date, overwrite))?,
        report_written: skip_existing("report", report_day(config, date, overwrite))?.is_some(),
    };

    info!("Day processed");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::path::PathBuf;

    #[test]
    fn test_skip_existing() {
        assert_eq!(skip_existing("x", Ok(1)).unwrap(), Some(1));

        let exists: Result<i32> = Err(StageError::AlreadyExists(PathBuf::from("out.csv")).into());
        assert_eq!(skip_existing("x", exists).unwrap(), None);

        let other: Result<i32> = Err(anyhow!("disk full"));
        assert!(skip_existing("x", other).is_err());
    }

    #[test]
    fn test_run_day_without_live_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = StressConfig {
            live_root: dir.path().join("live"),
            hist_root: dir.path().join("hist"),
            ..StressConfig::default()
        };
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let err = run_day(&config, date, RunOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::MissingInput(_))
        ));
    }
}
