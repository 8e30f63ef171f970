//! Per-URL duplicate detection and the fetch → digest → validate → persist
//! cycle shared by the poller and one-shot runs.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::FeedMessage;
use crate::parser::{FeedDigest, feed_digest, parse_feed};
use crate::output::OccurrenceTotals;
use crate::storage::{FeedIteration, IterationId, IterationStore};
use crate::summary::{FeedSummary, is_combined_feed};
use crate::validation::{RuleEngine, RuleResult, ValidationContext};

/// What the tracker remembers about one feed URL between cycles.
#[derive(Debug, Clone, Default)]
struct TrackedFeed {
    digest: Option<FeedDigest>,
    header_timestamp: Option<u64>,
    /// Last unique message, used as `previous` for the next unique one.
    message: Option<Arc<FeedMessage>>,
}

/// A recorded iteration whose bytes differ from the previous fetch.
#[derive(Debug, Clone)]
pub struct UniqueIteration {
    pub iteration_id: IterationId,
    pub feed_url: String,
    pub current: Arc<FeedMessage>,
    pub previous: Option<Arc<FeedMessage>>,
}

#[derive(Debug, Clone)]
pub enum Recorded {
    /// Same bytes as last time. Nothing else runs for this cycle.
    Duplicate { iteration_id: IterationId },
    Unique(UniqueIteration),
}

/// Result of one full cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Duplicate {
        iteration_id: IterationId,
    },
    Validated {
        iteration_id: IterationId,
        totals: OccurrenceTotals,
    },
}

/// Decides uniqueness of each fetch and runs the rule engine on unique ones.
pub struct FeedIterationTracker {
    store: Arc<dyn IterationStore>,
    engine: RuleEngine,
    feeds: Mutex<HashMap<String, TrackedFeed>>,
}

impl FeedIterationTracker {
    pub fn new(store: Arc<dyn IterationStore>) -> Self {
        Self {
            store,
            engine: RuleEngine::new(),
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn IterationStore> {
        &self.store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedFeed>> {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// State for `feed_url`, falling back to the store's latest iteration the
    /// first time the URL is seen by this process.
    async fn tracked(&self, feed_url: &str) -> Result<TrackedFeed> {
        let known = self.lock().get(feed_url).cloned();
        if let Some(t) = known {
            return Ok(t);
        }

        let mut tracked = TrackedFeed::default();
        if let Some(latest) = self.store.latest_iteration(feed_url).await? {
            tracked.digest = Some(latest.iteration.digest);
            tracked.header_timestamp = latest.iteration.header_timestamp;
            if let Some(raw) = &latest.iteration.raw {
                match parse_feed(raw) {
                    Ok(message) => tracked.message = Some(Arc::new(message)),
                    Err(e) => warn!(feed_url, error = %e, "Stored previous iteration does not decode"),
                }
            }
            debug!(feed_url, iteration_id = latest.iteration_id, "Resumed from stored iteration");
        }

        Ok(self
            .lock()
            .entry(feed_url.to_string())
            .or_insert(tracked)
            .clone())
    }

    /// Digests the fetched bytes and appends an iteration record.
    ///
    /// A duplicate is recorded without its payload and never decoded. Bytes
    /// that do not decode are not recorded and leave the tracked state alone.
    #[instrument(skip(self, raw), fields(bytes = raw.len()))]
    pub async fn record(&self, feed_url: &str, raw: Bytes, fetched_at: DateTime<Utc>) -> Result<Recorded> {
        let digest = feed_digest(&raw);
        let tracked = self.tracked(feed_url).await?;

        if tracked.digest == Some(digest) {
            let iteration_id = self
                .store
                .append_iteration(FeedIteration {
                    feed_url: feed_url.to_string(),
                    fetched_at,
                    header_timestamp: tracked.header_timestamp,
                    digest,
                    unique: false,
                    raw: None,
                    summary: FeedSummary::default(),
                })
                .await?;
            info!(feed_url, iteration_id, %digest, "Feed unchanged, skipping validation");
            return Ok(Recorded::Duplicate { iteration_id });
        }

        let current = Arc::new(parse_feed(&raw)?);
        let summary = FeedSummary::from_feed(&current);
        let iteration_id = self
            .store
            .append_iteration(FeedIteration {
                feed_url: feed_url.to_string(),
                fetched_at,
                header_timestamp: current.header.timestamp,
                digest,
                unique: true,
                raw: Some(raw),
                summary,
            })
            .await?;

        self.lock().insert(
            feed_url.to_string(),
            TrackedFeed {
                digest: Some(digest),
                header_timestamp: current.header.timestamp,
                message: Some(current.clone()),
            },
        );

        Ok(Recorded::Unique(UniqueIteration {
            iteration_id,
            feed_url: feed_url.to_string(),
            current,
            previous: tracked.message,
        }))
    }

    /// Runs every validator over a unique iteration and saves the results.
    pub async fn validate(
        &self,
        iteration: &UniqueIteration,
        metadata: &StaticScheduleMetadata,
        combined: Option<&FeedMessage>,
        now_millis: i64,
    ) -> Result<Vec<RuleResult>> {
        let ctx = ValidationContext {
            now_millis,
            metadata,
            current: &iteration.current,
            previous: iteration.previous.as_deref(),
            combined,
        };
        let results = self.engine.run_all(&ctx)?;
        self.store
            .save_rule_results(iteration.iteration_id, &results)
            .await?;

        let totals = OccurrenceTotals::from_results(&results);
        info!(
            feed_url = %iteration.feed_url,
            iteration_id = iteration.iteration_id,
            rules = results.len(),
            errors = totals.errors,
            warnings = totals.warnings,
            "Validated iteration"
        );
        Ok(results)
    }

    /// One cycle for a feed with no siblings. A message carrying more than one
    /// entity kind is its own combined view.
    pub async fn process(
        &self,
        feed_url: &str,
        raw: Bytes,
        metadata: &StaticScheduleMetadata,
        fetched_at: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        match self.record(feed_url, raw, fetched_at).await? {
            Recorded::Duplicate { iteration_id } => Ok(CycleOutcome::Duplicate { iteration_id }),
            Recorded::Unique(iteration) => {
                let combined = is_combined_feed(&iteration.current).then(|| iteration.current.as_ref());
                let results = self
                    .validate(&iteration, metadata, combined, fetched_at.timestamp_millis())
                    .await?;
                Ok(CycleOutcome::Validated {
                    iteration_id: iteration.iteration_id,
                    totals: OccurrenceTotals::from_results(&results),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{E012, E018};
    use crate::storage::MemoryStore;
    use crate::validation::test_support::*;
    use prost::Message;

    #[tokio::test]
    async fn test_duplicate_skips_validation() {
        let store = Arc::new(MemoryStore::new());
        let tracker = FeedIterationTracker::new(store.clone());
        let m = metadata();
        let raw = encode(&feed(Some(NOW_SECS), vec![]));

        let first = tracker.process(URL, raw.clone(), &m, now()).await.unwrap();
        let second = tracker.process(URL, raw, &m, now()).await.unwrap();

        assert!(matches!(first, CycleOutcome::Validated { .. }));
        assert!(matches!(second, CycleOutcome::Duplicate { iteration_id: 2 }));
        assert_eq!(store.save_count(), 1);

        let iterations = store.iterations(URL);
        assert!(iterations[0].iteration.unique);
        assert!(iterations[0].iteration.raw.is_some());
        assert!(!iterations[1].iteration.unique);
        assert!(iterations[1].iteration.raw.is_none());
        assert_eq!(iterations[1].iteration.header_timestamp, Some(NOW_SECS));
    }

    #[tokio::test]
    async fn test_previous_message_is_last_unique() {
        let store = Arc::new(MemoryStore::new());
        let tracker = FeedIterationTracker::new(store.clone());

        tracker
            .record(URL, encode(&feed(Some(NOW_SECS), vec![])), now())
            .await
            .unwrap();
        let Recorded::Unique(second) = tracker
            .record(URL, encode(&feed(Some(NOW_SECS - 10), vec![])), now())
            .await
            .unwrap()
        else {
            panic!("expected a unique iteration");
        };

        let previous = second.previous.as_ref().unwrap();
        assert_eq!(previous.header.timestamp, Some(NOW_SECS));

        // header went backwards
        let results = tracker.validate(&second, &metadata(), None, NOW_MILLIS).await.unwrap();
        assert_eq!(count(&results, &E018), 1);
        assert_eq!(store.results(second.iteration_id), Some(results));
    }

    #[tokio::test]
    async fn test_resumes_from_store() {
        let store = Arc::new(MemoryStore::new());
        let raw = encode(&feed(Some(NOW_SECS), vec![]));
        FeedIterationTracker::new(store.clone())
            .record(URL, raw.clone(), now())
            .await
            .unwrap();

        // a new tracker over the same store still sees the last digest
        let tracker = FeedIterationTracker::new(store.clone());
        let outcome = tracker.record(URL, raw, now()).await.unwrap();
        assert!(matches!(outcome, Recorded::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_are_not_recorded() {
        let store = Arc::new(MemoryStore::new());
        let tracker = FeedIterationTracker::new(store.clone());

        let outcome = tracker
            .record(URL, Bytes::from_static(&[0xFF, 0xFE, 0x00, 0x01]), now())
            .await;

        assert!(outcome.is_err());
        assert!(store.iterations(URL).is_empty());
    }

    #[tokio::test]
    async fn test_combined_feed_is_own_combined_view() {
        let store = Arc::new(MemoryStore::new());
        let tracker = FeedIterationTracker::new(store.clone());
        let mut vehicle = vehicle_entity("2", Some("veh-1"), None);
        if let Some(vp) = vehicle.vehicle.as_mut() {
            vp.timestamp = Some(NOW_SECS + 30);
            vp.trip = Some(trip("t1"));
        }
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity("1", trip("t1"), vec![stu(Some(1), Some("A"))]), vehicle],
        );

        let outcome = tracker
            .process(URL, encode(&current), &metadata(), now())
            .await
            .unwrap();

        let CycleOutcome::Validated { iteration_id, .. } = outcome else {
            panic!("expected validation");
        };
        let results = store.results(iteration_id).unwrap();
        assert_eq!(count(&results, &E012), 1);
        assert!(results.iter().all(|r| r.rule.id != "W003"));
    }

    const URL: &str = "http://example.com/gtfs-rt";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW_SECS as i64, 0).unwrap()
    }

    fn encode(message: &FeedMessage) -> Bytes {
        Bytes::from(message.encode_to_vec())
    }
}
