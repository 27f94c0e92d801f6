//! CLI entry point for the transit stress pipeline.
//!
//! Provides subcommands for collecting live feeds, running each nightly
//! stage on its own or chained, building the free-flow table, and
//! publishing processed days to S3.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_stress::analyzers::analyzer::report_day;
use transit_stress::collect::{CollectOptions, FeedSource, collect};
use transit_stress::config::StressConfig;
use transit_stress::error::StageError;
use transit_stress::etl::anomalies::detect_day;
use transit_stress::etl::join::join_day;
use transit_stress::etl::rollup::{RollupOptions, rollup_day};
use transit_stress::etl::weather_join::weather_day;
use transit_stress::fetch::{BasicClient, fetch_bytes};
use transit_stress::infra::keys::EnvKeyStore;
use transit_stress::norms::freeflow::build_freeflow;
use transit_stress::norms::score::score_day;
use transit_stress::output::{append_record, print_json};
use transit_stress::parser::parse_feed;
use transit_stress::pipeline::{RunOptions, run_day};
use transit_stress::publish::publish_day;
use transit_stress::stats::FeedHealth;

/// Days of history the free-flow table is built from by default.
const FREEFLOW_DEFAULT_DAYS: i64 = 28;

#[derive(Parser)]
#[command(name = "transit_stress")]
#[command(about = "Collects bus feeds and scores transit stress per vehicle-minute", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, env = "TRANSIT_STRESS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct DayArgs {
    /// Service date (YYYY-MM-DD); defaults to yesterday in the configured timezone
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Rebuild outputs that already exist
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Feed {
    Vehicles,
    TripUpdates,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll vehicle positions, trip updates and weather into minute dumps
    Collect {
        /// Number of rounds per source (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        num_samples: usize,

        /// Maximum number of concurrent weather requests
        #[arg(short, long, default_value_t = 3)]
        concurrency: usize,

        /// Run the nightly pipeline for the previous day when the date changes
        #[arg(long, default_value_t = false)]
        process_on_rollover: bool,
    },
    /// Decode one GTFS-RT feed and report its completeness
    Snapshot {
        /// Path to file or URL to fetch; defaults to the configured feed
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,

        /// Configured feed to fetch (with its auth) when no source is given
        #[arg(long, value_enum, default_value = "vehicles")]
        feed: Feed,

        /// CSV file to append results to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Roll a day of minute dumps into the historical day bundle
    Rollup {
        #[command(flatten)]
        day: DayArgs,

        /// Process labels with fewer dumps than a full day
        #[arg(long, default_value_t = false)]
        allow_partial: bool,
    },
    /// Join vehicles with delays and static route data
    Join {
        #[command(flatten)]
        day: DayArgs,
    },
    /// Attach zone weather and local time
    Weather {
        #[command(flatten)]
        day: DayArgs,
    },
    /// Flag vanished, stuck and severely delayed vehicles
    Anomalies {
        #[command(flatten)]
        day: DayArgs,
    },
    /// Rebuild the free-flow speed table from a range of flagged days
    Freeflow {
        /// First day (YYYY-MM-DD); defaults to four weeks before --to
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD); defaults to yesterday
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Compute norms and row stress
    Score {
        #[command(flatten)]
        day: DayArgs,
    },
    /// Write the daily report and refresh the summary
    Report {
        #[command(flatten)]
        day: DayArgs,
    },
    /// Run rollup, join, weather, anomalies, score and report for one day
    RunDay {
        #[command(flatten)]
        day: DayArgs,

        /// Process labels with fewer dumps than a full day
        #[arg(long, default_value_t = false)]
        allow_partial: bool,
    },
    /// Upload a processed day and the reports to S3
    Publish {
        /// Service date (YYYY-MM-DD); defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,

        /// S3 bucket name to upload to (e.g., "my-bucket")
        #[arg(long, env = "S3_BUCKET")]
        s3_bucket: String,

        /// Gzip compress files before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_stress.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_stress.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = StressConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            num_samples,
            concurrency,
            process_on_rollover,
        } => {
            let opts = CollectOptions {
                num_samples,
                concurrency,
                process_on_rollover,
            };
            collect(Arc::new(config), &EnvKeyStore, opts).await?;
        }
        Commands::Snapshot {
            source,
            feed,
            output,
        } => {
            let bytes = match source {
                Some(source) => fetcher(&source).await?,
                None => {
                    let (label, source) = match feed {
                        Feed::Vehicles => ("vehicles", &config.sources.vehicles),
                        Feed::TripUpdates => ("delay", &config.sources.trip_updates),
                    };
                    let feed = FeedSource::build(label, source, &EnvKeyStore).await?;
                    feed.fetch().await?.to_vec()
                }
            };
            let health = FeedHealth::from_feed(&parse_feed(&bytes)?);
            info!(
                entities = health.total_entities,
                vehicles = health.vehicles,
                position_pct = health.position_pct(),
                trip_updates = health.trip_updates,
                delay_pct = health.delay_pct(),
                canceled = health.canceled_trips,
                alerts = health.alerts,
                "Feed snapshot"
            );
            print_json(&health)?;

            if let Some(output) = output {
                append_record(&output, &health)?;
            }
        }
        Commands::Rollup { day, allow_partial } => {
            let date = resolve_date(&config, day.date)?;
            let opts = RollupOptions {
                overwrite: day.overwrite,
                allow_partial,
            };
            finish_stage(rollup_day(&config, date, opts))?;
        }
        Commands::Join { day } => {
            let date = resolve_date(&config, day.date)?;
            finish_stage(join_day(&config, date, day.overwrite))?;
        }
        Commands::Weather { day } => {
            let date = resolve_date(&config, day.date)?;
            finish_stage(weather_day(&config, date, day.overwrite))?;
        }
        Commands::Anomalies { day } => {
            let date = resolve_date(&config, day.date)?;
            finish_stage(detect_day(&config, date, day.overwrite))?;
        }
        Commands::Freeflow { from, to } => {
            let to = resolve_date(&config, to)?;
            let from = from.unwrap_or(to - Duration::days(FREEFLOW_DEFAULT_DAYS - 1));
            build_freeflow(&config, from, to)?;
        }
        Commands::Score { day } => {
            let date = resolve_date(&config, day.date)?;
            finish_stage(score_day(&config, date, day.overwrite))?;
        }
        Commands::Report { day } => {
            let date = resolve_date(&config, day.date)?;
            finish_stage(report_day(&config, date, day.overwrite))?;
        }
        Commands::RunDay { day, allow_partial } => {
            let date = resolve_date(&config, day.date)?;
            let opts = RunOptions {
                overwrite: day.overwrite,
                allow_partial,
            };
            let summary = tokio::task::spawn_blocking(move || run_day(&config, date, opts)).await??;
            print_json(&summary)?;
        }
        Commands::Publish {
            date,
            s3_bucket,
            gzip,
        } => {
            if s3_bucket.is_empty() {
                warn!("S3 bucket not specified, skipping upload");
                return Ok(());
            }
            let date = resolve_date(&config, date)?;
            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            publish_day(&s3, &config, &s3_bucket, date, gzip).await?;
        }
    }

    Ok(())
}

fn resolve_date(config: &StressConfig, date: Option<NaiveDate>) -> Result<NaiveDate> {
    match date {
        Some(d) => Ok(d),
        None => config.yesterday(),
    }
}

/// A stage whose output already exists is not a failure on the command line.
fn finish_stage<T: serde::Serialize>(result: Result<T>) -> Result<()> {
    match result {
        Ok(summary) => print_json(&summary),
        Err(e) if StageError::is_already_exists(&e) => {
            info!("{e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new();
        fetch_bytes(&client, url).await?.to_vec()
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}
