//! Combined views of several realtime feeds that share one static schedule.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::gtfs_rt::FeedMessage;
use crate::summary::is_combined_feed;

/// Concatenates the entities of every message. The header comes from the
/// message with the largest header timestamp; the first one wins a tie.
pub fn merge_feeds<'a, I>(feeds: I) -> Option<FeedMessage>
where
    I: IntoIterator<Item = &'a FeedMessage>,
{
    let mut merged: Option<FeedMessage> = None;
    for feed in feeds {
        match merged.as_mut() {
            None => merged = Some(feed.clone()),
            Some(m) => {
                if feed.header.timestamp.unwrap_or(0) > m.header.timestamp.unwrap_or(0) {
                    m.header = feed.header.clone();
                }
                m.entity.extend(feed.entity.iter().cloned());
            }
        }
    }
    merged
}

/// Latest message of each realtime URL configured against the same static
/// schedule. Pollers publish into the group and wait, up to a deadline, for
/// every sibling before building the combined view.
#[derive(Debug)]
pub struct SiblingGroup {
    urls: BTreeSet<String>,
    latest: Mutex<HashMap<String, Arc<FeedMessage>>>,
    published: Notify,
    wait: Duration,
}

impl SiblingGroup {
    pub fn new<I, S>(urls: I, wait: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            latest: Mutex::new(HashMap::new()),
            published: Notify::new(),
            wait,
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<FeedMessage>>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the latest message for `url` and wakes waiting siblings.
    pub fn publish(&self, url: &str, message: Arc<FeedMessage>) {
        self.lock().insert(url.to_string(), message);
        self.published.notify_waiters();
    }

    /// Merged message once every sibling has published, in URL order.
    fn try_merge(&self) -> Option<FeedMessage> {
        let latest = self.lock();
        let all: Option<Vec<&FeedMessage>> = self
            .urls
            .iter()
            .map(|u| latest.get(u).map(Arc::as_ref))
            .collect();
        merge_feeds(all?)
    }

    /// Combined view for a cycle of `url` that produced `current`.
    ///
    /// With a single URL the message is its own combined view when it carries
    /// more than one entity kind. With siblings, waits until each has
    /// published at least once. Past the deadline the cycle falls back to the
    /// single-feed view.
    pub async fn combined_for(&self, url: &str, current: &Arc<FeedMessage>) -> Option<Arc<FeedMessage>> {
        self.publish(url, current.clone());
        let single = || is_combined_feed(current).then(|| current.clone());

        if self.urls.len() <= 1 {
            return single();
        }

        let deadline = Instant::now() + self.wait;
        loop {
            // register before checking so a publish in between is not missed
            let notified = self.published.notified();
            if let Some(merged) = self.try_merge() {
                debug!(url, entities = merged.entity.len(), "Merged sibling feeds");
                return Some(Arc::new(merged));
            }
            if timeout_at(deadline, notified).await.is_err() {
                let missing: Vec<_> = {
                    let latest = self.lock();
                    self.urls.iter().filter(|u| !latest.contains_key(*u)).cloned().collect()
                };
                warn!(url, ?missing, "Sibling feeds missing at deadline, validating without them");
                return single();
            }
        }
    }
}
