//! CLI entry point for the forecast merge tool.
//!
//! Provides subcommands for running a live session against the point API,
//! replaying a session from saved payload files, and printing the current
//! run boundary.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use forecast_merge::{
    climatology::ClimatologyTable,
    config::SessionConfig,
    fetch::{BasicClient, FileFetcher, Fetcher, HttpFetcher, UrlParam},
    model::{Level, SeriesKey},
    output::{append_series, print_json},
    persist::{FileSnapshotStore, S3SnapshotStore, SnapshotStore},
    session::{Session, SessionOutcome},
    store::query::identity,
    time::current_run,
};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "forecast_merge")]
#[command(about = "Merges point forecasts from successive model runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SessionArgs {
    /// JSON session config; defaults to the GFS profile
    #[arg(short, long)]
    config: Option<String>,

    /// Latitude, overrides the config
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude, overrides the config
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Only print this variable (all series when omitted)
    #[arg(long)]
    variable: Option<String>,

    /// Level of --variable in Pa; 0 for surface
    #[arg(long, default_value_t = 0)]
    level: u32,

    /// CSV file to append series rows to
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all payloads from the configured upstream and merge them
    Run {
        #[command(flatten)]
        session: SessionArgs,

        /// Optional: S3 bucket for session snapshots (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Optional: local directory for session snapshots
        #[arg(long)]
        cache_dir: Option<String>,
    },
    /// Merge payloads saved in a directory, one file per request id
    Merge {
        /// Directory holding the payload files
        #[arg(short, long)]
        dir: String,

        #[command(flatten)]
        session: SessionArgs,
    },
    /// Print the newest run boundary for the current time
    LastRun {
        /// Hours between runs
        #[arg(short, long, default_value_t = 6)]
        interval_hours: i64,

        /// Hours a run takes to be published
        #[arg(short, long, default_value_t = 0)]
        delay_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/forecast_merge.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("forecast_merge.log"));

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

    match cli.command {
        Commands::Run {
            session: args,
            s3_bucket,
            cache_dir,
        } => {
            let config = load_config(&args)?;
            let (lat, lon) = config.grid_location();

            let client = BasicClient::new()?;
            let fetcher: Arc<dyn Fetcher> = match (&config.api_key_param, std::env::var("FORECAST_API_KEY")) {
                (Some(param_name), Ok(key)) => Arc::new(HttpFetcher::new(
                    UrlParam {
                        inner: client,
                        param_name: param_name.clone(),
                        key,
                    },
                    lat,
                    lon,
                )),
                (Some(_), Err(_)) => {
                    warn!("FORECAST_API_KEY not set, requesting without a key");
                    Arc::new(HttpFetcher::new(client, lat, lon))
                }
                (None, _) => Arc::new(HttpFetcher::new(client, lat, lon)),
            };

            let snapshots: Option<Arc<dyn SnapshotStore>> = match (s3_bucket, cache_dir) {
                (Some(bucket), _) => {
                    info!(bucket = %bucket, "S3 snapshots enabled");
                    Some(Arc::new(S3SnapshotStore::from_env(&bucket, "snapshots").await))
                }
                (None, Some(dir)) => Some(Arc::new(FileSnapshotStore::new(dir))),
                (None, None) => None,
            };

            let mut session = build_session(config, fetcher)?;
            if let Some(snapshots) = snapshots {
                session = session.with_snapshots(snapshots);
            }
            report(&session.run(Utc::now()).await, &args)?;
        }
        Commands::Merge { dir, session: args } => {
            let config = load_config(&args)?;
            let session = build_session(config, Arc::new(FileFetcher::new(dir)))?;
            report(&session.run(Utc::now()).await, &args)?;
        }
        Commands::LastRun {
            interval_hours,
            delay_hours,
        } => {
            let run = current_run(
                Utc::now(),
                Duration::hours(interval_hours),
                Duration::hours(delay_hours),
            );
            println!("{}", run.to_rfc3339());
        }
    }

    Ok(())
}

fn load_config(args: &SessionArgs) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        config = config.with_location(lat, lon);
    }
    Ok(config)
}

fn build_session(config: SessionConfig, fetcher: Arc<dyn Fetcher>) -> Result<Session> {
    let climatology = match &config.climatology_path {
        Some(path) => Some(
            ClimatologyTable::load(path).with_context(|| format!("loading climatology {path}"))?,
        ),
        None => None,
    };

    let mut session = Session::new(config, fetcher).with_local_clock();
    if let Some(table) = climatology {
        session = session.with_climatology(Arc::new(table));
    }
    Ok(session)
}

/// Prints the requested series, or every series in the store, as JSON.
fn report(outcome: &SessionOutcome, args: &SessionArgs) -> Result<()> {
    let keys: BTreeSet<SeriesKey> = match &args.variable {
        Some(variable) => BTreeSet::from([SeriesKey::new(variable.clone(), Level(args.level))]),
        None => outcome.store.records().map(|r| r.key()).collect(),
    };

    info!(
        series = keys.len(),
        last_run = %outcome.last_run,
        single_run = outcome.is_single_run(),
        from_snapshot = outcome.from_snapshot,
        "Session finished"
    );

    for key in &keys {
        let series = outcome.series(&key.variable, key.level, identity);
        info!(variable = %key.variable, level = %key.level, points = series.values.len(), "Series");
        print_json(&series)?;
        if let Some(path) = &args.output {
            append_series(path, &key.variable, key.level, &series)?;
        }
    }

    if args.variable.is_none() {
        print_json(&outcome.wind_series(outcome.wind_level))?;
    }
    Ok(())
}
