//! Live collectors.
//!
//! Each source (vehicle positions, trip updates, weather) is polled on its
//! own interval by its own task. Every poll writes one minute dump,
//! `<live_root>/<local date>/<label>/<HHMM>.csv`, and appends a
//! [`FeedHealth`] row to the day's `health.csv`. A failed poll is logged
//! and recorded but never stops the loop.

pub mod delays;
pub mod vehicles;
pub mod weather;

pub use delays::delay_records;
pub use vehicles::vehicle_records;
pub use weather::{weather_record, weather_url};

use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use chrono_tz::Tz;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::{SourceConfig, StressConfig};
use crate::fetch::{HttpClient, client_for, fetch_bytes};
use crate::infra::keys::{KeyStore, resolve_key};
use crate::output::{append_record, write_rows};
use crate::parser::{feed_timestamp, parse_feed};
use crate::pipeline::{RunOptions, run_day};
use crate::records::WeatherRecord;
use crate::stats::FeedHealth;

pub const HEALTH_FILE: &str = "health.csv";

/// All sources append to the same `health.csv`; one writer at a time keeps
/// the header from being written twice when the file is first created.
static HEALTH_LOCK: Mutex<()> = Mutex::new(());

/// Polls slower than this are logged as warnings.
const SLOW_FETCH: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Rounds per source; 0 polls forever.
    pub num_samples: usize,
    /// Concurrent weather requests across zones.
    pub concurrency: usize,
    /// Run the nightly pipeline for the previous day when the local date changes.
    pub process_on_rollover: bool,
}

/// One polled upstream with its authenticated client.
pub struct FeedSource {
    pub label: &'static str,
    pub url: String,
    client: Box<dyn HttpClient>,
}

impl FeedSource {
    pub async fn build<K: KeyStore + ?Sized>(
        label: &'static str,
        source: &SourceConfig,
        keys: &K,
    ) -> Result<Self> {
        let key = resolve_key(keys, source).await?;
        Ok(Self {
            label,
            url: source.url.clone(),
            client: client_for(&source.auth, key)?,
        })
    }

    /// One authenticated GET of the source URL.
    pub async fn fetch(&self) -> Result<Bytes> {
        fetch_bytes(&self.client, &self.url).await
    }
}

#[derive(Debug, Clone, Copy)]
enum GtfsKind {
    Vehicles,
    Delays,
}

/// Runs all collectors until `num_samples` rounds are done (or forever).
#[tracing::instrument(skip_all, fields(num_samples = opts.num_samples))]
pub async fn collect<K: KeyStore + ?Sized>(
    config: Arc<StressConfig>,
    keys: &K,
    opts: CollectOptions,
) -> Result<()> {
    let tz = config.tz()?;

    let vehicles = Arc::new(FeedSource::build("vehicles", &config.sources.vehicles, keys).await?);
    let delays = Arc::new(FeedSource::build("delay", &config.sources.trip_updates, keys).await?);
    let weather = Arc::new(FeedSource::build("weather", &config.sources.weather, keys).await?);
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));

    if opts.num_samples == 0 {
        info!("Sampling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(num_samples = opts.num_samples, "Starting sample collection");
    }

    let mut tasks = Vec::new();

    for (source, kind, interval) in [
        (vehicles, GtfsKind::Vehicles, config.sources.vehicles.interval_secs),
        (delays, GtfsKind::Delays, config.sources.trip_updates.interval_secs),
    ] {
        let config = config.clone();
        let label = source.label;
        tasks.push(tokio::spawn(sample_loop(label, interval, opts.num_samples, move || {
            let source = source.clone();
            let config = config.clone();
            async move { poll_gtfs(&source, &config, tz, kind).await }
        })));
    }

    {
        let config = config.clone();
        let interval = config.sources.weather.interval_secs;
        tasks.push(tokio::spawn(sample_loop("weather", interval, opts.num_samples, move || {
            let source = weather.clone();
            let config = config.clone();
            let semaphore = semaphore.clone();
            async move { poll_weather(&source, &config, tz, semaphore).await }
        })));
    }

    let watcher = opts
        .process_on_rollover
        .then(|| tokio::spawn(watch_rollover(config.clone(), tz)));

    for task in tasks {
        task.await?;
    }
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    info!(live_root = %config.live_root.display(), "Finished collecting");
    Ok(())
}

async fn sample_loop<F, Fut>(label: &'static str, interval_secs: u64, num_samples: usize, mut poll: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sample_count = 0;
    loop {
        // 0 = infinite
        if num_samples > 0 && sample_count >= num_samples {
            break;
        }
        ticker.tick().await;
        sample_count += 1;

        let span = tracing::info_span!("poll", source = label, sample = sample_count);
        poll().instrument(span).await;
    }
    debug!(source = label, sample_count, "Sample loop done");
}

async fn poll_gtfs(source: &FeedSource, config: &StressConfig, tz: Tz, kind: GtfsKind) {
    let now = Utc::now();
    let local = now.with_timezone(&tz);
    let day_dir = config.live_day_dir(local.date_naive());
    let minute_file = day_dir
        .join(source.label)
        .join(format!("{}.csv", local.format("%H%M")));

    let fetch_start = Instant::now();
    let health = match source.fetch().await {
        Ok(bytes) => {
            let elapsed = fetch_start.elapsed();
            if elapsed > SLOW_FETCH {
                warn!(elapsed_secs = elapsed.as_secs(), "Feed fetch was slow");
            }
            debug!(bytes = bytes.len(), "Feed bytes received, parsing");
            match parse_feed(&bytes) {
                Ok(feed) => {
                    let fallback = feed_timestamp(&feed, now);
                    let written = match kind {
                        GtfsKind::Vehicles => {
                            let rows = vehicle_records(&feed, fallback);
                            write_rows(&minute_file, &rows).map(|_| rows.len())
                        }
                        GtfsKind::Delays => {
                            let rows = delay_records(&feed, fallback);
                            write_rows(&minute_file, &rows).map(|_| rows.len())
                        }
                    };
                    match written {
                        Ok(rows) => info!(rows, file = %minute_file.display(), "Dump written"),
                        Err(e) => error!(error = %e, "Failed to write dump"),
                    }
                    FeedHealth::from_feed(&feed)
                }
                Err(e) => {
                    error!(error = %e, "Feed parse failed");
                    FeedHealth::from_error("parse_error", &e.to_string())
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Feed HTTP fetch failed");
            FeedHealth::from_error("fetch_error", &e.to_string())
        }
    }
    .with_source(source.label);

    record_health(&day_dir, &health);
}

async fn poll_weather(
    source: &Arc<FeedSource>,
    config: &StressConfig,
    tz: Tz,
    semaphore: Arc<Semaphore>,
) {
    let now = Utc::now();
    let local = now.with_timezone(&tz);
    let day_dir = config.live_day_dir(local.date_naive());
    let minute_file = day_dir
        .join(source.label)
        .join(format!("{}.csv", local.format("%H%M")));

    let mut tasks = Vec::new();
    for zone in config.zones.clone() {
        let sem = semaphore.clone();
        let source = source.clone();
        let span = tracing::info_span!("weather_zone", zone = %zone.name);
        tasks.push(tokio::spawn(
            async move {
                let Ok(_permit) = sem.acquire().await else {
                    return None;
                };
                let url = weather_url(&source.url, &zone);
                let result = match fetch_bytes(&source.client, &url).await {
                    Ok(body) => weather_record(&zone, &body, now.timestamp()),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(rec) => Some(rec),
                    Err(e) => {
                        error!(error = %e, "Weather fetch failed");
                        None
                    }
                }
            }
            .instrument(span),
        ));
    }

    let mut records: Vec<WeatherRecord> = Vec::new();
    let mut failures = 0usize;
    for task in tasks {
        match task.await {
            Ok(Some(rec)) => records.push(rec),
            _ => failures += 1,
        }
    }

    let mut health = FeedHealth {
        timestamp: now,
        total_entities: records.len(),
        ..Default::default()
    };
    if failures > 0 {
        health = FeedHealth {
            total_entities: records.len(),
            ..FeedHealth::from_error("fetch_error", &format!("{failures} zone(s) failed"))
        };
    }

    if !records.is_empty() {
        match write_rows(&minute_file, &records) {
            Ok(()) => info!(zones = records.len(), file = %minute_file.display(), "Weather written"),
            Err(e) => error!(error = %e, "Failed to write weather dump"),
        }
    }

    record_health(&day_dir, &health.with_source(source.label));
}

fn record_health(day_dir: &Path, health: &FeedHealth) {
    let _guard = HEALTH_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = append_record(&day_dir.join(HEALTH_FILE), health) {
        error!(error = %e, "Failed to write feed health");
    }
}

/// Spawns the nightly pipeline for the previous day whenever the local date changes.
async fn watch_rollover(config: Arc<StressConfig>, tz: Tz) {
    let mut current = Utc::now().with_timezone(&tz).date_naive();
    let mut ticker = tokio::time::interval(Duration::from_secs(60));

    loop {
        ticker.tick().await;
        let today = Utc::now().with_timezone(&tz).date_naive();
        if today <= current {
            continue;
        }

        let day = current;
        current = today;
        let config = config.clone();
        info!(date = %day, "Local date rolled over; processing previous day");
        tokio::task::spawn_blocking(move || {
            let opts = RunOptions {
                overwrite: false,
                allow_partial: true,
            };
            match run_day(&config, day, opts) {
                Ok(_) => info!(date = %day, "Previous day processed"),
                Err(e) => error!(date = %day, error = %e, "Failed to process previous day"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedAuth;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, Position, VehicleDescriptor, VehiclePosition};
    use crate::infra::keys::EnvKeyStore;
    use crate::output::read_rows;
    use crate::publish::files_under;
    use crate::records::VehicleRecord;
    use chrono::NaiveDate;
    use prost::Message;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const WEATHER_JSON: &str =
        r#"{"dt":1752480000,"main":{"temp":14.5,"humidity":80},"weather":[{"main":"Clouds"}]}"#;

    /// Answers `connections` requests with the same response, concurrently.
    async fn serve(status: &'static str, body: Vec<u8>, connections: usize) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut conns = Vec::new();
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                let body = body.clone();
                conns.push(tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = socket.read(&mut chunk).await.unwrap();
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    let head = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    socket.write_all(head.as_bytes()).await.unwrap();
                    socket.write_all(&body).await.unwrap();
                }));
            }
            for conn in conns {
                conn.await.unwrap();
            }
        });
        (format!("http://{addr}/feed"), handle)
    }

    fn open_source(url: &str) -> SourceConfig {
        SourceConfig {
            url: url.to_string(),
            auth: FeedAuth::None,
            key_env: None,
            interval_secs: 1,
        }
    }

    fn config_in(root: &Path) -> StressConfig {
        StressConfig {
            live_root: root.join("data_live"),
            ..StressConfig::default()
        }
    }

    fn vehicles_feed() -> Vec<u8> {
        let entity = |id: &str, lat: f32| FeedEntity {
            id: id.to_string(),
            vehicle: Some(VehiclePosition {
                vehicle: Some(VehicleDescriptor {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: lat,
                    longitude: -6.26,
                    ..Default::default()
                }),
                timestamp: Some(1_752_480_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1_752_480_000),
                ..Default::default()
            },
            entity: vec![entity("bus-1", 53.34), entity("bus-2", 53.35)],
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn today(config: &StressConfig) -> NaiveDate {
        config.local_date(Utc::now()).unwrap()
    }

    /// Minute dumps under the live root, as paths relative to it.
    fn dumps(config: &StressConfig) -> Vec<PathBuf> {
        if !config.live_root.exists() {
            return Vec::new();
        }
        files_under(&config.live_root)
            .unwrap()
            .into_iter()
            .filter(|p| !p.ends_with(HEALTH_FILE))
            .map(|p| p.strip_prefix(&config.live_root).unwrap().to_path_buf())
            .collect()
    }

    /// Checks the `<local date>/<label>/<HHMM>.csv` layout.
    fn assert_dump_path(rel: &Path, label: &str, dates: &[NaiveDate]) {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(parts.len(), 3, "{}", rel.display());
        assert!(dates.iter().any(|d| d.format("%Y-%m-%d").to_string() == parts[0]));
        assert_eq!(parts[1], label);
        let stem = parts[2].strip_suffix(".csv").unwrap();
        assert_eq!(stem.len(), 4);
        assert!(stem.chars().all(|c| c.is_ascii_digit()));
    }

    fn health_rows(config: &StressConfig) -> Vec<FeedHealth> {
        let mut rows = Vec::new();
        for path in files_under(&config.live_root).unwrap() {
            if path.ends_with(HEALTH_FILE) {
                rows.extend(read_rows::<FeedHealth>(&path).unwrap());
            }
        }
        rows
    }

    #[tokio::test]
    async fn test_poll_gtfs_writes_minute_dump() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let tz = config.tz().unwrap();
        let (url, server) = serve("200 OK", vehicles_feed(), 1).await;
        let source = FeedSource::build("vehicles", &open_source(&url), &EnvKeyStore).await.unwrap();

        let before = today(&config);
        poll_gtfs(&source, &config, tz, GtfsKind::Vehicles).await;
        server.await.unwrap();

        let files = dumps(&config);
        assert_eq!(files.len(), 1);
        assert_dump_path(&files[0], "vehicles", &[before, today(&config)]);

        let rows: Vec<VehicleRecord> = read_rows(&config.live_root.join(&files[0])).unwrap();
        assert_eq!(rows.len(), 2);

        let health = health_rows(&config);
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].source.as_deref(), Some("vehicles"));
        assert_eq!(health[0].vehicles, 2);
        assert!(!health[0].is_error());
    }

    #[tokio::test]
    async fn test_failed_polls_are_recorded_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(config_in(dir.path()));
        let tz = config.tz().unwrap();
        let (url, server) = serve("503 Service Unavailable", b"down".to_vec(), 2).await;
        let source = Arc::new(FeedSource::build("delay", &open_source(&url), &EnvKeyStore).await.unwrap());

        sample_loop("delay", 1, 2, || {
            let source = source.clone();
            let config = config.clone();
            async move { poll_gtfs(&source, &config, tz, GtfsKind::Delays).await }
        })
        .await;
        server.await.unwrap();

        assert!(dumps(&config).is_empty());
        let health = health_rows(&config);
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| h.error_type.as_deref() == Some("fetch_error")));
        assert!(health.iter().all(|h| h.source.as_deref() == Some("delay")));
    }

    #[tokio::test]
    async fn test_poll_weather_covers_every_zone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let tz = config.tz().unwrap();
        let zones = config.zones.len();
        let (url, server) = serve("200 OK", WEATHER_JSON.as_bytes().to_vec(), zones).await;
        let source = Arc::new(FeedSource::build("weather", &open_source(&url), &EnvKeyStore).await.unwrap());

        let before = today(&config);
        poll_weather(&source, &config, tz, Arc::new(Semaphore::new(2))).await;
        server.await.unwrap();

        let files = dumps(&config);
        assert_eq!(files.len(), 1);
        assert_dump_path(&files[0], "weather", &[before, today(&config)]);

        let rows: Vec<WeatherRecord> = read_rows(&config.live_root.join(&files[0])).unwrap();
        let names: BTreeSet<&str> = rows.iter().map(|r| r.zone.as_str()).collect();
        let expected: BTreeSet<&str> = config.zones.iter().map(|z| z.name.as_str()).collect();
        assert_eq!(names, expected);

        let health = health_rows(&config);
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].total_entities, zones);
        assert!(!health[0].is_error());
    }

    #[tokio::test]
    async fn test_collect_one_round_per_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        let zones = config.zones.len();
        let (vehicles_url, vehicles) = serve("200 OK", vehicles_feed(), 1).await;
        let (delay_url, delay) = serve("503 Service Unavailable", Vec::new(), 1).await;
        let (weather_url, weather) = serve("200 OK", WEATHER_JSON.as_bytes().to_vec(), zones).await;
        config.sources.vehicles = open_source(&vehicles_url);
        config.sources.trip_updates = open_source(&delay_url);
        config.sources.weather = open_source(&weather_url);
        let config = Arc::new(config);

        let opts = CollectOptions {
            num_samples: 1,
            concurrency: 3,
            process_on_rollover: false,
        };
        collect(config.clone(), &EnvKeyStore, opts).await.unwrap();
        vehicles.await.unwrap();
        delay.await.unwrap();
        weather.await.unwrap();

        let labels: BTreeSet<String> = dumps(&config)
            .iter()
            .filter_map(|p| p.iter().nth(1).map(|l| l.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(labels, BTreeSet::from(["vehicles".to_string(), "weather".to_string()]));

        let health = health_rows(&config);
        assert_eq!(health.len(), 3);
        let failed: Vec<_> = health.iter().filter(|h| h.is_error()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source.as_deref(), Some("delay"));
    }

    #[test]
    fn test_concurrent_health_appends_share_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let day = day.clone();
                std::thread::spawn(move || {
                    let health = FeedHealth {
                        total_entities: i,
                        ..Default::default()
                    };
                    record_health(&day, &health.with_source("vehicles"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let rows: Vec<FeedHealth> = read_rows(&day.join(HEALTH_FILE)).unwrap();
        assert_eq!(rows.len(), 8);
    }
}
