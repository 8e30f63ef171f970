use super::{RuleCollector, RuleResult};
use crate::gtfs::StaticScheduleMetadata;
use crate::rules::E010;

/// E010. Works on the static schedule alone, so it runs once per dataset
/// rather than once per realtime message.
pub struct StopLocationTypeValidator;

impl StopLocationTypeValidator {
    pub fn name(&self) -> &'static str {
        "StopLocationTypeValidator"
    }

    pub fn validate(&self, metadata: &StaticScheduleMetadata) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E010]);

        // referenced_stop_ids is already deduplicated and ordered
        for stop_id in &metadata.referenced_stop_ids {
            if metadata
                .stop_location_types
                .get(stop_id)
                .is_some_and(|&lt| lt != 0)
            {
                out.add(&E010, format!("stop_id {}", stop_id));
            }
        }

        out.finish()
    }
}
