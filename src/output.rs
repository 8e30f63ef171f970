//! Output formatting and persistence for validation results.
//!
//! Supports JSON result files, plain-text feed mirrors, and CSV append.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::gtfs_rt::FeedMessage;
use crate::validation::RuleResult;

/// Total occurrences per severity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccurrenceTotals {
    pub errors: usize,
    pub warnings: usize,
}

impl OccurrenceTotals {
    pub fn from_results(results: &[RuleResult]) -> Self {
        results.iter().fold(Self::default(), |mut t, r| {
            if r.rule.is_error() {
                t.errors += r.occurrences.len();
            } else {
                t.warnings += r.occurrences.len();
            }
            t
        })
    }
}

/// Renders results as the pretty-printed JSON array written to result files.
pub fn results_to_json(results: &[RuleResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

/// Writes results as a JSON array. Rules without occurrences never reach this
/// point, so the file only lists rules that fired.
pub fn write_results_json(path: &Path, results: &[RuleResult]) -> Result<()> {
    debug!(path = %path.display(), rules = results.len(), "Writing results file");
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.flush()?;
    Ok(())
}

/// Writes a human-readable dump of a decoded message.
pub fn write_plain_text(path: &Path, message: &FeedMessage) -> Result<()> {
    debug!(path = %path.display(), "Writing plain-text mirror");
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{:#?}", message)?;
    writer.flush()?;
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
