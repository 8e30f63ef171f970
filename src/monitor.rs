//! Live validation of the feeds in a [`MonitorConfig`].

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::combined::SiblingGroup;
use crate::config::MonitorConfig;
use crate::fetch::{HttpClient, auth::client_for, fetch_bytes};
use crate::gtfs::{MetadataCache, StaticDataset, StaticScheduleMetadata};
use crate::poller::{CycleRunner, Poller};
use crate::storage::IterationStore;
use crate::tracker::{FeedIterationTracker, Recorded};

/// The static schedule in use, swapped when the dataset on disk changes.
struct StaticSchedule {
    path: PathBuf,
    ignore_shapes: bool,
    cache: MetadataCache,
    current: RwLock<Arc<StaticScheduleMetadata>>,
}

impl StaticSchedule {
    fn load(path: &Path, ignore_shapes: bool) -> Result<Self> {
        let dataset = StaticDataset::load(path)
            .with_context(|| format!("failed to load static GTFS {}", path.display()))?;
        let cache = MetadataCache::new();
        let metadata = cache.get_or_build(&dataset, ignore_shapes);
        Ok(Self {
            path: path.to_path_buf(),
            ignore_shapes,
            cache,
            current: RwLock::new(metadata),
        })
    }

    fn current(&self) -> Arc<StaticScheduleMetadata> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn refresh(&self) -> Result<bool> {
        let digest = StaticDataset::digest_of(&self.path)
            .with_context(|| format!("failed to digest static GTFS {}", self.path.display()))?;
        let old = self.current().digest;
        if digest == old {
            debug!(%digest, "Static GTFS unchanged");
            return Ok(false);
        }

        let dataset = StaticDataset::load(&self.path)
            .with_context(|| format!("failed to load static GTFS {}", self.path.display()))?;
        let metadata = self.cache.get_or_build(&dataset, self.ignore_shapes);
        self.cache.retain_only(&dataset.digest);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = metadata;
        info!(%old, new = %dataset.digest, "Static GTFS changed, metadata rebuilt");
        Ok(true)
    }
}

/// Fetch, digest, merge and validate for every feed of one static schedule.
pub struct FeedCycle {
    clients: HashMap<String, Box<dyn HttpClient>>,
    tracker: FeedIterationTracker,
    schedule: StaticSchedule,
    siblings: SiblingGroup,
}

impl FeedCycle {
    /// Loads the static schedule and builds each feed's client from its auth.
    pub fn new(config: &MonitorConfig, store: Arc<dyn IterationStore>) -> Result<Self> {
        let clients = config
            .feeds
            .iter()
            .map(|f| Ok((f.url.clone(), client_for(&f.auth)?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Self::with_clients(config, store, clients)
    }

    pub fn with_clients(
        config: &MonitorConfig,
        store: Arc<dyn IterationStore>,
        clients: HashMap<String, Box<dyn HttpClient>>,
    ) -> Result<Self> {
        Ok(Self {
            clients,
            tracker: FeedIterationTracker::new(store),
            schedule: StaticSchedule::load(&config.gtfs_path, config.ignore_shapes)?,
            siblings: SiblingGroup::new(
                config.feeds.iter().map(|f| f.url.clone()),
                config.sibling_wait(),
            ),
        })
    }

    pub fn metadata(&self) -> Arc<StaticScheduleMetadata> {
        self.schedule.current()
    }

    /// Re-digests the static dataset and rebuilds metadata if it changed.
    /// Returns whether it changed. Blocks on file I/O.
    pub fn refresh_static(&self) -> Result<bool> {
        self.schedule.refresh()
    }

    /// Fetches every feed once and fails on the first one that does not answer
    /// with a success status.
    pub async fn check_feeds(&self) -> Result<()> {
        let mut urls: Vec<_> = self.clients.keys().collect();
        urls.sort();
        for url in urls {
            let raw = fetch_bytes(&self.clients[url], url)
                .await
                .with_context(|| format!("feed {} is unreachable", url))?;
            debug!(feed_url = %url, bytes = raw.len(), "Feed reachable");
        }
        Ok(())
    }
}

#[async_trait]
impl CycleRunner for FeedCycle {
    #[instrument(skip(self))]
    async fn run_cycle(&self, feed_url: &str) -> Result<()> {
        let client = self
            .clients
            .get(feed_url)
            .ok_or_else(|| anyhow!("no client configured for {}", feed_url))?;

        let raw = fetch_bytes(client, feed_url)
            .await
            .with_context(|| format!("failed to fetch {}", feed_url))?;
        let fetched_at = Utc::now();

        let Recorded::Unique(iteration) = self.tracker.record(feed_url, raw, fetched_at).await? else {
            return Ok(());
        };

        let combined = self
            .siblings
            .combined_for(feed_url, &iteration.current)
            .await;
        self.tracker
            .validate(
                &iteration,
                &self.metadata(),
                combined.as_deref(),
                Utc::now().timestamp_millis(),
            )
            .await?;
        Ok(())
    }
}

/// Loads the static schedule, checks every feed answers, then polls them
/// until Ctrl+C.
#[instrument(skip_all, fields(gtfs = %config.gtfs_path.display(), feeds = config.feeds.len()))]
pub async fn run(config: MonitorConfig, store: Arc<dyn IterationStore>) -> Result<()> {
    let cycle = Arc::new(FeedCycle::new(&config, store)?);
    cycle.check_feeds().await?;

    let refresher = tokio::spawn(watch_static(cycle.clone(), config.static_check()));
    let poller = Poller::new(cycle);
    for feed in &config.feeds {
        poller.start_monitoring(&feed.url, feed.interval()).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down monitors");
    refresher.abort();
    poller.shutdown().await;
    Ok(())
}

async fn watch_static(cycle: Arc<FeedCycle>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // first tick is immediate and the schedule was just loaded
    interval.tick().await;
    loop {
        interval.tick().await;
        let cycle = cycle.clone();
        match tokio::task::spawn_blocking(move || cycle.refresh_static()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Static GTFS check failed, keeping current metadata"),
            Err(e) => error!(error = %e, "Static GTFS check task failed"),
        }
    }
}
