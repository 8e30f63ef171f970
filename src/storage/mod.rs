//! Iteration history and rule-result persistence.
//!
//! The tracker only needs three operations from storage, so any backend that
//! can append an iteration, return the latest one for a URL and attach results
//! to an iteration is enough.

mod json_dir;
mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::parser::FeedDigest;
use crate::summary::FeedSummary;
use crate::validation::RuleResult;

pub type IterationId = u64;

/// One fetch of one feed URL, as produced by the tracker.
#[derive(Debug, Clone, Serialize)]
pub struct FeedIteration {
    pub feed_url: String,
    pub fetched_at: DateTime<Utc>,
    pub header_timestamp: Option<u64>,
    pub digest: FeedDigest,
    /// False when the bytes matched the previous iteration of the same URL.
    pub unique: bool,
    /// Kept only for unique iterations.
    #[serde(skip)]
    pub raw: Option<Bytes>,
    pub summary: FeedSummary,
}

/// A stored [`FeedIteration`] with the id assigned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct FeedIterationRecord {
    pub iteration_id: IterationId,
    #[serde(flatten)]
    pub iteration: FeedIteration,
}

#[async_trait]
pub trait IterationStore: Send + Sync {
    /// Stores the iteration and returns its id. Ids increase per store.
    async fn append_iteration(&self, iteration: FeedIteration) -> Result<IterationId>;

    /// Most recent iteration for `feed_url` by iteration id.
    async fn latest_iteration(&self, feed_url: &str) -> Result<Option<FeedIterationRecord>>;

    async fn save_rule_results(&self, iteration_id: IterationId, results: &[RuleResult]) -> Result<()>;
}
