//! Nightly stages that turn a day of live dumps into the vehicle-minute table.
//!
//! Each stage reads the previous stage's table from `<hist_root>/<date>/`,
//! refuses to clobber its own output unless asked to, and writes one CSV.

pub mod anomalies;
pub mod join;
pub mod rollup;
pub mod weather_join;

use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::error::StageError;

pub const VEHICLES_CSV: &str = "vehicles.csv";
pub const DELAY_CSV: &str = "delay.csv";
pub const WEATHER_CSV: &str = "weather.csv";
pub const ROLLUP_JSON: &str = "rollup.json";
pub const VEH_MINUTE_CSV: &str = "veh_minute.csv";
pub const VEH_MINUTE_W_CSV: &str = "veh_minute_w.csv";
pub const VEH_MINUTE_FLAGS_CSV: &str = "veh_minute_flags.csv";
pub const SCORED_CSV: &str = "veh_minute_scored.csv";

/// Fails with [`StageError::AlreadyExists`] if `out` exists and `overwrite` is off.
pub(crate) fn guard_output(out: &Path, overwrite: bool) -> Result<()> {
    if out.exists() && !overwrite {
        info!(path = %out.display(), "Output exists, skipping (use --overwrite to rebuild)");
        return Err(StageError::AlreadyExists(out.to_path_buf()).into());
    }
    Ok(())
}

/// Fails with [`StageError::MissingInput`] if `input` does not exist.
pub(crate) fn require_input(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(StageError::MissingInput(input.to_path_buf()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join(VEH_MINUTE_CSV);

        assert!(guard_output(&out, false).is_ok());
        std::fs::write(&out, "").unwrap();
        let err = guard_output(&out, false).unwrap_err();
        assert!(StageError::is_already_exists(&err));
        assert!(guard_output(&out, true).is_ok());
    }

    #[test]
    fn test_require_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join(VEHICLES_CSV);
        assert!(require_input(&input).is_err());
        std::fs::write(&input, "").unwrap();
        assert!(require_input(&input).is_ok());
    }
}
