//! Pipeline configuration.
//!
//! Loaded from a JSON file; every field has a default so the pipeline runs
//! against the Dublin setup without any file at all:
//!
//! ```json
//! {
//!   "hist_root": "data_hist",
//!   "timezone": "Europe/Dublin",
//!   "thresholds": { "vanish_gap_minutes": 30 },
//!   "weights": { "delay": 0.3, "speed": 0.3, "heat": 0.15, "vanish": 0.25 }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StageError;

/// File looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "transit_stress.json";

/// Describes how a source requires authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    /// No authentication required.
    None,
    /// API key must be appended as a URL query parameter with the given name.
    UrlParam { param_name: String },
    /// API key must be sent as an HTTP header with the given name.
    Header { header_name: String },
}

impl FeedAuth {
    /// Returns `true` if any authentication credentials are needed.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, FeedAuth::None)
    }
}

/// One polled upstream: a GTFS-RT feed or the weather API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub auth: FeedAuth,
    /// Key store reference (an environment variable name) for the API key.
    #[serde(default)]
    pub key_env: Option<String>,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sources {
    pub vehicles: SourceConfig,
    pub trip_updates: SourceConfig,
    pub weather: SourceConfig,
}

impl Default for Sources {
    fn default() -> Self {
        let nta = |path: &str| SourceConfig {
            url: format!("https://api.nationaltransport.ie/gtfsr/v2/{path}"),
            auth: FeedAuth::Header {
                header_name: "x-api-key".to_string(),
            },
            key_env: Some("NTA_API_KEY".to_string()),
            interval_secs: 60,
        };

        Self {
            vehicles: nta("Vehicles"),
            trip_updates: nta("TripUpdates"),
            weather: SourceConfig {
                url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
                auth: FeedAuth::UrlParam {
                    param_name: "appid".to_string(),
                },
                key_env: Some("OWM_API_KEY".to_string()),
                interval_secs: 15 * 60,
            },
        }
    }
}

/// A weather zone: vehicles take the weather of the nearest zone centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl Zone {
    pub fn new(name: &str, lat: f64, lon: f64) -> Self {
        Self {
            name: name.to_string(),
            lat,
            lon,
        }
    }
}

fn default_zones() -> Vec<Zone> {
    vec![
        Zone::new("north", 53.38, -6.26),
        Zone::new("centre", 53.34, -6.26),
        Zone::new("south", 53.29, -6.26),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum silence before the scheduled trip end to call a vehicle vanished.
    pub vanish_gap_minutes: i64,
    pub stuck_radius_m: f64,
    pub stuck_min_minutes: i64,
    pub severe_delay_sec: i32,
    /// Maximum distance between a vehicle minute and the weather sample it takes.
    pub weather_tolerance_secs: i64,
    pub corridor_snap_m: f64,
    pub freeflow_min_kph: f64,
    pub freeflow_quantile: f64,
    /// Rows slower than this are dwelling and carry no speed penalty.
    pub moving_min_kph: f64,
    pub stress_threshold: f64,
    pub leaderboard_size: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            vanish_gap_minutes: 30,
            stuck_radius_m: 50.0,
            stuck_min_minutes: 10,
            severe_delay_sec: 15 * 60,
            weather_tolerance_secs: 7 * 60 + 30,
            corridor_snap_m: 50.0,
            freeflow_min_kph: 10.0,
            freeflow_quantile: 0.95,
            moving_min_kph: 5.0,
            stress_threshold: 0.5,
            leaderboard_size: 10,
        }
    }
}

/// Weights of each normalised signal in `row_stress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub delay: f64,
    pub speed: f64,
    pub rain: f64,
    pub heat: f64,
    pub cold: f64,
    pub vanish: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            delay: 0.30,
            speed: 0.30,
            rain: 0.00,
            heat: 0.15,
            cold: 0.00,
            vanish: 0.25,
        }
    }
}

impl Weights {
    pub fn sum(&self) -> f64 {
        self.delay + self.speed + self.rain + self.heat + self.cold + self.vanish
    }

    /// Logs a warning when the weights do not add up to 1.
    ///
    /// Scores are clipped to 0..1 regardless, so this is not fatal.
    pub fn validate(&self) -> bool {
        let sum = self.sum();
        let ok = (sum - 1.0).abs() <= 1e-6;
        if !ok {
            warn!(sum, "Stress weights do not sum to 1.0; scores will be clipped");
        }
        ok
    }
}

/// Number of dumps a complete day has per live label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Expected {
    pub vehicles: usize,
    pub delay: usize,
    pub weather: usize,
}

impl Default for Expected {
    fn default() -> Self {
        Self {
            vehicles: 24 * 60,
            delay: 24 * 60,
            weather: 24 * 60 / 15,
        }
    }
}

impl Expected {
    pub fn labels(&self) -> [(&'static str, usize); 3] {
        [
            ("vehicles", self.vehicles),
            ("weather", self.weather),
            ("delay", self.delay),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub live_root: PathBuf,
    pub hist_root: PathBuf,
    pub static_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub freeflow_path: PathBuf,
    pub timezone: String,
    pub sources: Sources,
    pub zones: Vec<Zone>,
    pub thresholds: Thresholds,
    pub weights: Weights,
    pub expected: Expected,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            live_root: PathBuf::from("data_live"),
            hist_root: PathBuf::from("data_hist"),
            static_dir: PathBuf::from("gtfs_static"),
            reports_dir: PathBuf::from("reports"),
            freeflow_path: PathBuf::from("data_hist/freeflow_95pct.csv"),
            timezone: "Europe/Dublin".to_string(),
            sources: Sources::default(),
            zones: default_zones(),
            thresholds: Thresholds::default(),
            weights: Weights::default(),
            expected: Expected::default(),
        }
    }
}

impl StressConfig {
    /// Loads the config from `path`, or from [`DEFAULT_CONFIG_FILE`] when it
    /// exists, or falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit `path` is missing, or if the file is
    /// not valid JSON for this shape.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: StressConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.weights.validate();
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Parses the configured IANA timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| StageError::UnknownTimezone(self.timezone.clone()).into())
    }

    /// The service-local calendar date of `ts`.
    pub fn local_date(&self, ts: DateTime<Utc>) -> Result<NaiveDate> {
        Ok(ts.with_timezone(&self.tz()?).date_naive())
    }

    /// Yesterday in the configured timezone; the default `--date`.
    pub fn yesterday(&self) -> Result<NaiveDate> {
        Ok(self.local_date(Utc::now())? - Duration::days(1))
    }

    pub fn live_day_dir(&self, date: NaiveDate) -> PathBuf {
        self.live_root.join(date.format("%Y-%m-%d").to_string())
    }

    pub fn hist_day_dir(&self, date: NaiveDate) -> PathBuf {
        self.hist_root.join(date.format("%Y-%m-%d").to_string())
    }

    pub fn norms_dir(&self, date: NaiveDate) -> PathBuf {
        self.hist_day_dir(date).join("norms")
    }

    pub fn daily_report_path(&self, date: NaiveDate) -> PathBuf {
        self.reports_dir
            .join("daily")
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn summary_report_path(&self) -> PathBuf {
        self.reports_dir.join("summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = Weights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
        assert!(weights.validate());
    }

    #[test]
    fn test_unbalanced_weights_fail_validation() {
        let weights = Weights {
            delay: 0.9,
            ..Weights::default()
        };
        assert!(!weights.validate());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "hist_root": "/tmp/hist",
            "thresholds": { "vanish_gap_minutes": 15 },
            "sources": {
                "vehicles": {
                    "url": "http://localhost/vp",
                    "auth": { "type": "none" },
                    "interval_secs": 30
                }
            }
        }"#;
        let config: StressConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.hist_root, PathBuf::from("/tmp/hist"));
        assert_eq!(config.thresholds.vanish_gap_minutes, 15);
        assert_eq!(config.thresholds.stuck_min_minutes, 10);
        assert_eq!(config.sources.vehicles.auth, FeedAuth::None);
        assert_eq!(config.sources.vehicles.key_env, None);
        assert!(config.sources.weather.auth.requires_auth());
        assert_eq!(config.zones.len(), 3);
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let result = StressConfig::load(Some(Path::new("/nonexistent/transit_stress.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "timezone": "America/New_York" }}"#).unwrap();

        let config = StressConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tz().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_unknown_timezone_is_an_error() {
        let config = StressConfig {
            timezone: "Mars/Olympus".to_string(),
            ..StressConfig::default()
        };
        let err = config.tz().unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }

    #[test]
    fn test_local_date_uses_timezone() {
        let config = StressConfig::default();
        // 23:30 UTC on 14 July is 00:30 on 15 July in Dublin (IST, UTC+1).
        let ts = DateTime::from_timestamp(1_752_535_800, 0).unwrap();
        assert_eq!(
            config.local_date(ts).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()
        );
    }

    #[test]
    fn test_day_paths() {
        let config = StressConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        assert_eq!(config.hist_day_dir(date), PathBuf::from("data_hist/2025-07-14"));
        assert_eq!(
            config.norms_dir(date),
            PathBuf::from("data_hist/2025-07-14/norms")
        );
        assert_eq!(
            config.daily_report_path(date),
            PathBuf::from("reports/daily/2025-07-14.json")
        );
    }
}
