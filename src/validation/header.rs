use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs_rt::feed_header::Incrementality;
use crate::rules::{E038, E039, E049};
use crate::util::feed::{is_v2_or_higher, is_valid_version};

/// E038, E039, E049
pub struct HeaderValidator;

impl FeedValidator for HeaderValidator {
    fn name(&self) -> &'static str {
        "HeaderValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E038, &E039, &E049]);
        let header = &ctx.current.header;

        if !is_valid_version(header) {
            out.add(
                &E038,
                format!(
                    "header.gtfs_realtime_version of {}",
                    header.gtfs_realtime_version
                ),
            );
        }

        if is_v2_or_higher(header) && header.incrementality.is_none() {
            out.add(&E049, "");
        }

        // an unset incrementality reads as FULL_DATASET
        if header.incrementality() == Incrementality::FullDataset {
            for entity in &ctx.current.entity {
                if let Some(deleted) = entity.is_deleted {
                    out.add(
                        &E039,
                        format!("entity ID {} has is_deleted={}", entity.id, deleted),
                    );
                }
            }
        }

        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::test_support::*;

    #[test]
    fn test_valid_header() {
        let m = metadata();
        let current = feed(Some(NOW_SECS), vec![]);

        assert!(run(&HeaderValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_invalid_version() {
        let m = metadata();
        let mut current = feed(Some(NOW_SECS), vec![]);
        current.header.gtfs_realtime_version = "3.0".to_string();

        let results = run(&HeaderValidator, &m, &current);
        assert_eq!(
            prefixes(&results, &E038),
            vec!["header.gtfs_realtime_version of 3.0"]
        );
    }

    #[test]
    fn test_missing_incrementality_depends_on_version() {
        let m = metadata();
        let mut current = feed(Some(NOW_SECS), vec![]);
        current.header.incrementality = None;
        assert_eq!(count(&run(&HeaderValidator, &m, &current), &E049), 1);

        current.header.gtfs_realtime_version = "1.0".to_string();
        assert!(run(&HeaderValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_is_deleted_in_full_dataset() {
        let m = metadata();
        let mut entity = vehicle_entity("7", Some("v1"), None);
        entity.is_deleted = Some(false);
        let mut current = feed(Some(NOW_SECS), vec![entity]);

        let results = run(&HeaderValidator, &m, &current);
        assert_eq!(prefixes(&results, &E039), vec!["entity ID 7 has is_deleted=false"]);

        current.header.incrementality = Some(Incrementality::Differential as i32);
        assert_eq!(count(&run(&HeaderValidator, &m, &current), &E039), 0);
    }
}
