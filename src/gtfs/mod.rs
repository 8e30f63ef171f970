//! Static GTFS schedule: table reader, derived lookup metadata and the
//! per-dataset metadata cache.

mod cache;
mod dataset;
mod metadata;
pub mod model;

pub use cache::MetadataCache;
pub use dataset::StaticDataset;
pub use metadata::StaticScheduleMetadata;
