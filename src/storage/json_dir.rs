use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{FeedIteration, FeedIterationRecord, IterationId, IterationStore};
use crate::error::{Result, ValidatorError};
use crate::output::{OccurrenceTotals, append_record, write_results_json};
use crate::parser::feed_digest;
use crate::validation::RuleResult;

/// One row of `iterations.csv`.
#[derive(Debug, Serialize)]
struct IterationLogRow<'a> {
    iteration_id: IterationId,
    feed_url: &'a str,
    fetched_at: String,
    header_timestamp: Option<u64>,
    digest: String,
    unique: bool,
    total_entities: usize,
    trip_updates: usize,
    vehicles: usize,
    alerts: usize,
    errors: usize,
    warnings: usize,
}

impl<'a> IterationLogRow<'a> {
    fn new(record: &'a FeedIterationRecord, totals: OccurrenceTotals) -> Self {
        let it = &record.iteration;
        Self {
            iteration_id: record.iteration_id,
            feed_url: &it.feed_url,
            fetched_at: it.fetched_at.to_rfc3339(),
            header_timestamp: it.header_timestamp,
            digest: it.digest.to_string(),
            unique: it.unique,
            total_entities: it.summary.total_entities,
            trip_updates: it.summary.trip_updates,
            vehicles: it.summary.vehicles,
            alerts: it.summary.alerts,
            errors: totals.errors,
            warnings: totals.warnings,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: IterationId,
    latest: HashMap<String, FeedIterationRecord>,
    /// Unique iterations waiting for their results.
    pending: HashMap<IterationId, FeedIterationRecord>,
}

/// Writes results under `<root>/<feed-slug>/`:
/// `<iteration-id>.results.json` per unique iteration and an `iterations.csv`
/// log. Only the latest iteration per URL is kept in memory.
#[derive(Debug)]
pub struct JsonDirStore {
    root: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "Writing validation results");
        Ok(Self {
            root,
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Default::default()
            }),
        })
    }

    /// Directory holding the files for `feed_url`.
    pub fn feed_dir(&self, feed_url: &str) -> PathBuf {
        self.root.join(slug(feed_url))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_iteration(&self, record: &FeedIterationRecord, totals: OccurrenceTotals) -> Result<()> {
        let dir = self.feed_dir(&record.iteration.feed_url);
        std::fs::create_dir_all(&dir)?;
        append_record(
            &dir.join("iterations.csv"),
            &IterationLogRow::new(record, totals),
        )
    }
}

/// File-system safe name for a feed URL. The suffix is the first eight hex
/// digits of the URL's MD5.
fn slug(feed_url: &str) -> String {
    let readable: String = feed_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let digest = feed_digest(feed_url.as_bytes()).to_string();
    format!("{}-{}", readable.trim_matches('_'), &digest[..8])
}

#[async_trait]
impl IterationStore for JsonDirStore {
    async fn append_iteration(&self, iteration: FeedIteration) -> Result<IterationId> {
        let record = {
            let mut inner = self.lock();
            let iteration_id = inner.next_id;
            inner.next_id += 1;
            let record = FeedIterationRecord {
                iteration_id,
                iteration,
            };
            inner
                .latest
                .insert(record.iteration.feed_url.clone(), record.clone());
            if record.iteration.unique {
                inner.pending.insert(iteration_id, record.clone());
            }
            record
        };

        // duplicates never get results, so their row is final now
        if !record.iteration.unique {
            self.log_iteration(&record, OccurrenceTotals::default())?;
        }
        Ok(record.iteration_id)
    }

    async fn latest_iteration(&self, feed_url: &str) -> Result<Option<FeedIterationRecord>> {
        Ok(self.lock().latest.get(feed_url).cloned())
    }

    async fn save_rule_results(&self, iteration_id: IterationId, results: &[RuleResult]) -> Result<()> {
        let record = self
            .lock()
            .pending
            .remove(&iteration_id)
            .ok_or_else(|| ValidatorError::Storage(format!("unknown iteration {}", iteration_id)))?;

        let dir = self.feed_dir(&record.iteration.feed_url);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.results.json", iteration_id));
        write_results_json(&path, results)?;
        self.log_iteration(&record, OccurrenceTotals::from_results(results))?;

        debug!(iteration_id, path = %path.display(), "Saved rule results");
        Ok(())
    }
}
