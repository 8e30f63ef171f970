//! Offline replay of a directory of archived realtime files.
//!
//! Files are processed in order as if each were one poll of a single feed:
//! an unchanged file is skipped, the rest are decoded and validated against
//! the previous unique file, and `<file>.results.json` is written next to
//! each validated input.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::Serialize;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, error, info, instrument, warn};

use crate::gtfs::{StaticDataset, StaticScheduleMetadata};
use crate::gtfs_rt::FeedMessage;
use crate::output::{OccurrenceTotals, write_plain_text, write_results_json};
use crate::parser::{FeedDigest, feed_digest, parse_feed};
use crate::summary::is_combined_feed;
use crate::util::time::timestamp_from_file_name;
use crate::validation::{RuleEngine, RuleResult, StopLocationTypeValidator, ValidationContext};

pub const RESULTS_SUFFIX: &str = ".results.json";

/// Order in which archived files are replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SortOrder {
    /// Last-modified time, oldest first. The modified time is also "now".
    #[default]
    Date,
    /// File name, ascending. "Now" is the timestamp at the end of the name.
    Name,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub gtfs_path: PathBuf,
    pub realtime_dir: PathBuf,
    pub sort: SortOrder,
    /// Also write `<file>.<ext>` with a readable dump of each message.
    pub plain_text_extension: Option<String>,
    pub ignore_shapes: bool,
    /// Keep per-file timings in the summary.
    pub return_statistics: bool,
}

impl BatchOptions {
    pub fn new(gtfs_path: impl Into<PathBuf>, realtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            gtfs_path: gtfs_path.into(),
            realtime_dir: realtime_dir.into(),
            sort: SortOrder::default(),
            plain_text_extension: None,
            ignore_shapes: false,
            return_statistics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleStatistics {
    pub validator: &'static str,
    pub execution_secs: f64,
}

/// Timings for one validated file, in seconds.
#[derive(Debug, Clone, Serialize)]
pub struct IterationStatistics {
    pub file: PathBuf,
    pub gtfs_read_secs: f64,
    pub read_secs: f64,
    pub decode_secs: f64,
    pub rules: Vec<RuleStatistics>,
    pub total_secs: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    /// Files in replay order.
    pub files: Vec<PathBuf>,
    pub validated: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub totals: OccurrenceTotals,
    /// Location-type results for the static schedule, computed once.
    pub static_results: Vec<RuleResult>,
    pub statistics: Option<Vec<IterationStatistics>>,
}

/// Loads the static schedule and replays every realtime file under
/// `options.realtime_dir`.
///
/// Unreadable or undecodable files are logged and skipped.
#[instrument(skip_all, fields(gtfs = %options.gtfs_path.display(), dir = %options.realtime_dir.display(), sort = ?options.sort))]
pub fn run_batch(options: &BatchOptions) -> Result<BatchSummary> {
    let started = Instant::now();
    let dataset = StaticDataset::load(&options.gtfs_path)
        .with_context(|| format!("failed to load static GTFS {}", options.gtfs_path.display()))?;
    let metadata = StaticScheduleMetadata::build(&dataset, options.ignore_shapes);
    drop(dataset);
    let gtfs_read_secs = started.elapsed().as_secs_f64();
    info!(gtfs_read_secs, trips = metadata.trip_ids.len(), "Read static GTFS");

    replay(options, &metadata, gtfs_read_secs)
}

/// Replays the realtime files against already-built metadata.
pub fn replay(
    options: &BatchOptions,
    metadata: &StaticScheduleMetadata,
    gtfs_read_secs: f64,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        static_results: static_rules(metadata),
        statistics: options.return_statistics.then(Vec::new),
        ..Default::default()
    };

    summary.files = sorted_files(options)?;
    info!(files = summary.files.len(), "Replaying realtime files");

    let engine = RuleEngine::new();
    let mut previous: Option<(FeedDigest, FeedMessage)> = None;

    for path in &summary.files {
        let file_started = Instant::now();
        let raw = match read_file(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(file = %path.display(), error = %e, "Could not read file, skipping");
                summary.failed += 1;
                continue;
            }
        };
        let read_secs = file_started.elapsed().as_secs_f64();

        let digest = feed_digest(&raw);
        if previous.as_ref().is_some_and(|(d, _)| *d == digest) {
            debug!(file = %path.display(), "Duplicate of previous file, skipping");
            summary.duplicates += 1;
            continue;
        }

        let now_millis = match file_time_millis(path, options.sort) {
            Ok(t) => t,
            Err(e) => {
                error!(file = %path.display(), error = %e, "Could not read file time, skipping");
                summary.failed += 1;
                continue;
            }
        };

        let decode_started = Instant::now();
        let message = match parse_feed(&raw) {
            Ok(m) => m,
            Err(e) => {
                error!(file = %path.display(), error = %e, "Could not decode file, skipping");
                summary.failed += 1;
                continue;
            }
        };
        let decode_secs = decode_started.elapsed().as_secs_f64();

        let ctx = ValidationContext {
            now_millis,
            metadata,
            current: &message,
            previous: previous.as_ref().map(|(_, m)| m),
            combined: is_combined_feed(&message).then_some(&message),
        };
        let (results, timings) = engine.run_all_timed(&ctx)?;

        write_results_json(&with_suffix(path, RESULTS_SUFFIX), &results)?;
        if let Some(ext) = &options.plain_text_extension {
            write_plain_text(&with_suffix(path, &format!(".{}", ext)), &message)?;
        }

        let totals = OccurrenceTotals::from_results(&results);
        summary.totals.errors += totals.errors;
        summary.totals.warnings += totals.warnings;
        summary.validated += 1;

        let total_secs = file_started.elapsed().as_secs_f64();
        info!(
            file = %path.display(),
            errors = totals.errors,
            warnings = totals.warnings,
            total_secs,
            "Validated file"
        );

        if let Some(stats) = summary.statistics.as_mut() {
            stats.push(IterationStatistics {
                file: path.clone(),
                gtfs_read_secs,
                read_secs,
                decode_secs,
                rules: timings
                    .iter()
                    .map(|t| RuleStatistics {
                        validator: t.name,
                        execution_secs: t.elapsed.as_secs_f64(),
                    })
                    .collect(),
                total_secs,
            });
        }

        previous = Some((digest, message));
    }

    info!(
        validated = summary.validated,
        duplicates = summary.duplicates,
        failed = summary.failed,
        errors = summary.totals.errors,
        warnings = summary.totals.warnings,
        "Batch finished"
    );
    Ok(summary)
}

fn static_rules(metadata: &StaticScheduleMetadata) -> Vec<RuleResult> {
    let results = StopLocationTypeValidator.validate(metadata);
    for r in &results {
        warn!(
            rule = r.rule.id,
            occurrences = r.occurrences.len(),
            "{}",
            r.rule.title
        );
    }
    results
}

/// Realtime inputs under `options.realtime_dir` in replay order. Files this
/// module writes are left out.
fn sorted_files(options: &BatchOptions) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(&options.realtime_dir, &mut files)
        .with_context(|| format!("failed to list {}", options.realtime_dir.display()))?;

    let plain_suffix = options.plain_text_extension.as_ref().map(|e| format!(".{}", e));
    files.retain(|p| {
        let name = p.file_name().and_then(OsStr::to_str).unwrap_or_default();
        !name.ends_with(RESULTS_SUFFIX)
            && !plain_suffix.as_ref().is_some_and(|s| name.ends_with(s.as_str()))
    });

    match options.sort {
        SortOrder::Date => {
            let mut keyed = Vec::with_capacity(files.len());
            for path in files {
                let modified = modified_millis(&path).unwrap_or_else(|e| {
                    warn!(file = %path.display(), error = %e, "Could not read modified time");
                    0
                });
                keyed.push((modified, path));
            }
            keyed.sort();
            Ok(keyed.into_iter().map(|(_, p)| p).collect())
        }
        SortOrder::Name => {
            files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
            Ok(files)
        }
    }
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let raw = std::fs::read(path)?;
    if !is_gzip(path) {
        return Ok(raw);
    }
    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn modified_millis(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?;
    Ok(since_epoch.as_millis() as i64)
}

/// "Now" for validating `path`.
fn file_time_millis(path: &Path, sort: SortOrder) -> std::io::Result<i64> {
    if sort == SortOrder::Name {
        let logical = if is_gzip(path) {
            path.with_extension("")
        } else {
            path.to_path_buf()
        };
        match timestamp_from_file_name(&logical) {
            Some(t) => return Ok(t.timestamp_millis()),
            None => warn!(file = %path.display(), "No timestamp in file name, using modified time"),
        }
    }
    modified_millis(path)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
