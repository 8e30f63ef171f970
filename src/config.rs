//! Monitor configuration file.
//!
//! ```json
//! {
//!   "gtfs_path": "gtfs/hart.zip",
//!   "output_dir": "results",
//!   "sibling_wait_secs": 10,
//!   "static_check_secs": 600,
//!   "feeds": [
//!     { "url": "https://example.com/tripupdates", "interval_secs": 30 },
//!     { "url": "https://example.com/vehicles", "interval_secs": 15,
//!       "auth": { "type": "header", "name": "x-api-key", "value": "..." } }
//!   ]
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_SIBLING_WAIT_SECS: u64 = 15;
const DEFAULT_STATIC_CHECK_SECS: u64 = 300;

/// Credentials for one realtime feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    #[default]
    None,
    /// Appended to the URL as `?name=value`.
    UrlParam { name: String, value: String },
    /// Sent as an HTTP header.
    Header { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub auth: FeedAuth,
}

impl FeedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Every feed in one file is validated against the same static schedule, so
/// they form one sibling group for cross-feed rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    pub gtfs_path: PathBuf,
    pub feeds: Vec<FeedConfig>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_sibling_wait_secs")]
    pub sibling_wait_secs: u64,
    #[serde(default)]
    pub ignore_shapes: bool,
    /// How often the static dataset is re-digested for changes.
    #[serde(default = "default_static_check_secs")]
    pub static_check_secs: u64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_sibling_wait_secs() -> u64 {
    DEFAULT_SIBLING_WAIT_SECS
}

fn default_static_check_secs() -> u64 {
    DEFAULT_STATIC_CHECK_SECS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    pub fn sibling_wait(&self) -> Duration {
        Duration::from_secs(self.sibling_wait_secs)
    }

    pub fn static_check(&self) -> Duration {
        Duration::from_secs(self.static_check_secs.max(1))
    }

    fn check(&self) -> Result<()> {
        if self.feeds.is_empty() {
            bail!("config lists no realtime feeds");
        }
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.url.as_str()) {
                bail!("feed {} is listed more than once", feed.url);
            }
        }
        Ok(())
    }
}
