use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::dataset::StaticDataset;
use super::metadata::StaticScheduleMetadata;
use crate::parser::FeedDigest;

/// Metadata per static dataset version, keyed by the dataset digest.
///
/// Builds run outside the lock so concurrent first-touch callers may build the
/// same entry; the last insert wins and every build from the same bytes is
/// equivalent.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: Mutex<HashMap<(FeedDigest, bool), Arc<StaticScheduleMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, digest: &FeedDigest, ignore_shapes: bool) -> Option<Arc<StaticScheduleMetadata>> {
        self.lock().get(&(*digest, ignore_shapes)).cloned()
    }

    pub fn get_or_build(
        &self,
        dataset: &StaticDataset,
        ignore_shapes: bool,
    ) -> Arc<StaticScheduleMetadata> {
        if let Some(hit) = self.get(&dataset.digest, ignore_shapes) {
            debug!(digest = %dataset.digest, "Static metadata cache hit");
            return hit;
        }

        let built = Arc::new(StaticScheduleMetadata::build(dataset, ignore_shapes));
        self.lock()
            .insert((dataset.digest, ignore_shapes), built.clone());
        built
    }

    /// Drops every entry for datasets other than `keep`.
    pub fn retain_only(&self, keep: &FeedDigest) {
        self.lock().retain(|(digest, _), _| digest == keep);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(FeedDigest, bool), Arc<StaticScheduleMetadata>>> {
        // a poisoned map still holds complete entries
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::model::Route;

    #[test]
    fn test_get_or_build_reuses_entry() {
        let cache = MetadataCache::new();
        let dataset = create_dataset(1);

        let a = cache.get_or_build(&dataset, false);
        let b = cache.get_or_build(&dataset, false);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_new_digest_builds_new_entry() {
        let cache = MetadataCache::new();
        let old = cache.get_or_build(&create_dataset(1), false);
        let new = cache.get_or_build(&create_dataset(2), false);

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(cache.len(), 2);

        cache.retain_only(&create_dataset(2).digest);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&create_dataset(1).digest, false).is_none());
    }

    #[test]
    fn test_concurrent_builds_are_equivalent() {
        let cache = Arc::new(MetadataCache::new());
        let dataset = Arc::new(create_dataset(7));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let dataset = dataset.clone();
                std::thread::spawn(move || cache.get_or_build(&dataset, false).route_ids.len())
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 1);
        }
        assert_eq!(cache.len(), 1);
    }

    fn create_dataset(version: u8) -> StaticDataset {
        StaticDataset {
            routes: vec![Route {
                route_id: format!("r{}", version),
                agency_id: None,
            }],
            digest: crate::parser::feed_digest(&[version]),
            ..Default::default()
        }
    }
}
