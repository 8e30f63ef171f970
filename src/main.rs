//! CLI entry point for the GTFS-realtime validator.
//!
//! Validates a single snapshot, replays a directory of archived snapshots, or
//! monitors live feeds until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gtfs_rt_validator::{
    batch::{BatchOptions, SortOrder, run_batch},
    config::MonitorConfig,
    fetch::read_source,
    gtfs::{StaticDataset, StaticScheduleMetadata},
    monitor,
    output::{OccurrenceTotals, results_to_json},
    parser::parse_feed,
    storage::JsonDirStore,
    summary::is_combined_feed,
    validation::{RuleEngine, StopLocationTypeValidator, ValidationContext},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_validator")]
#[command(about = "Validates GTFS-realtime feeds against their static GTFS schedule", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one GTFS-realtime snapshot from a file or URL
    Validate {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Static GTFS zip file or directory
        #[arg(long)]
        gtfs: PathBuf,

        /// Write the results JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip shapes.txt, disabling the trip shape check
        #[arg(long, default_value_t = false)]
        ignore_shapes: bool,
    },
    /// Replay a directory of archived GTFS-realtime files
    Batch {
        /// Static GTFS zip file or directory
        #[arg(long)]
        gtfs: PathBuf,

        /// Directory of archived GTFS-realtime files
        #[arg(long = "gtfs-realtime-path")]
        realtime_dir: PathBuf,

        /// Replay order
        #[arg(long, value_enum, default_value_t = SortOrder::Date)]
        sort: SortOrder,

        /// Also write a readable dump of each file with this extension
        #[arg(long)]
        plain_text_extension: Option<String>,

        /// Skip shapes.txt, disabling the trip shape check
        #[arg(long, default_value_t = false)]
        ignore_shapes: bool,

        /// Print per-file timings as JSON when done
        #[arg(long, default_value_t = false)]
        statistics: bool,
    },
    /// Poll the feeds in a config file until Ctrl+C
    Monitor {
        /// JSON monitor configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_validator.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_validator.log"));

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
        Commands::Validate {
            source,
            gtfs,
            output,
            ignore_shapes,
        } => validate(&source, &gtfs, output.as_deref(), ignore_shapes).await?,
        Commands::Batch {
            gtfs,
            realtime_dir,
            sort,
            plain_text_extension,
            ignore_shapes,
            statistics,
        } => {
            let options = BatchOptions {
                gtfs_path: gtfs,
                realtime_dir,
                sort,
                plain_text_extension,
                ignore_shapes,
                return_statistics: statistics,
            };
            let summary = tokio::task::spawn_blocking(move || run_batch(&options)).await??;
            if let Some(stats) = &summary.statistics {
                println!("{}", serde_json::to_string_pretty(stats)?);
            }
        }
        Commands::Monitor { config } => {
            let config = MonitorConfig::load(&config)?;
            let store = Arc::new(JsonDirStore::new(&config.output_dir)?);
            monitor::run(config, store).await?;
        }
    }

    Ok(())
}

/// Validates one snapshot with no previous message.
#[tracing::instrument(skip(output), fields(gtfs = %gtfs.display()))]
async fn validate(source: &str, gtfs: &Path, output: Option<&Path>, ignore_shapes: bool) -> Result<()> {
    let dataset = StaticDataset::load(gtfs)
        .with_context(|| format!("failed to load static GTFS {}", gtfs.display()))?;
    let metadata = StaticScheduleMetadata::build(&dataset, ignore_shapes);
    drop(dataset);

    let raw = read_source(source).await?;
    let feed = parse_feed(&raw).with_context(|| format!("{} is not a GTFS-realtime feed", source))?;

    let ctx = ValidationContext {
        now_millis: chrono::Utc::now().timestamp_millis(),
        metadata: &metadata,
        current: &feed,
        previous: None,
        combined: is_combined_feed(&feed).then_some(&feed),
    };
    let mut results = StopLocationTypeValidator.validate(&metadata);
    results.extend(RuleEngine::new().run_all(&ctx)?);

    let totals = OccurrenceTotals::from_results(&results);
    info!(
        rules = results.len(),
        errors = totals.errors,
        warnings = totals.warnings,
        "Validation finished"
    );

    let json = results_to_json(&results)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
