use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{FeedIteration, FeedIterationRecord, IterationId, IterationStore};
use crate::error::{Result, ValidatorError};
use crate::validation::RuleResult;

#[derive(Debug, Default)]
struct Inner {
    iterations: Vec<FeedIterationRecord>,
    results: HashMap<IterationId, Vec<RuleResult>>,
    save_calls: usize,
}

/// Keeps every iteration and result in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_rule_results` calls so far.
    pub fn save_count(&self) -> usize {
        self.lock().save_calls
    }

    pub fn iterations(&self, feed_url: &str) -> Vec<FeedIterationRecord> {
        self.lock()
            .iterations
            .iter()
            .filter(|r| r.iteration.feed_url == feed_url)
            .cloned()
            .collect()
    }

    pub fn results(&self, iteration_id: IterationId) -> Option<Vec<RuleResult>> {
        self.lock().results.get(&iteration_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IterationStore for MemoryStore {
    async fn append_iteration(&self, iteration: FeedIteration) -> Result<IterationId> {
        let mut inner = self.lock();
        let iteration_id = inner.iterations.len() as IterationId + 1;
        inner.iterations.push(FeedIterationRecord {
            iteration_id,
            iteration,
        });
        Ok(iteration_id)
    }

    async fn latest_iteration(&self, feed_url: &str) -> Result<Option<FeedIterationRecord>> {
        Ok(self
            .lock()
            .iterations
            .iter()
            .filter(|r| r.iteration.feed_url == feed_url)
            .max_by_key(|r| r.iteration_id)
            .cloned())
    }

    async fn save_rule_results(&self, iteration_id: IterationId, results: &[RuleResult]) -> Result<()> {
        let mut inner = self.lock();
        if !inner.iterations.iter().any(|r| r.iteration_id == iteration_id) {
            return Err(ValidatorError::Storage(format!(
                "unknown iteration {}",
                iteration_id
            )));
        }
        inner.save_calls += 1;
        inner.results.insert(iteration_id, results.to_vec());
        Ok(())
    }
}
