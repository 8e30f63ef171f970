use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::VehiclePosition;
use crate::rules::{E011, E015};

/// E011, E015
pub struct StopValidator;

impl FeedValidator for StopValidator {
    fn name(&self) -> &'static str {
        "StopValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E011, &E015]);
        let m = ctx.metadata;

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                for stop_id in tu.stop_time_update.iter().filter_map(|s| s.stop_id.as_deref()) {
                    let prefix = format!("trip_id {} stop_id {}", tu.trip.trip_id(), stop_id);
                    check_stop(&mut out, m, stop_id, &prefix);
                }
            }
            if let Some(vp) = &entity.vehicle {
                if let Some(stop_id) = vp.stop_id.as_deref() {
                    check_stop(&mut out, m, stop_id, &vehicle_stop_prefix(vp, stop_id));
                }
            }
            if let Some(alert) = &entity.alert {
                // alerts may name stations, so only existence is checked
                for stop_id in alert.informed_entity.iter().filter_map(|s| s.stop_id.as_deref()) {
                    if !m.stop_ids.contains(stop_id) {
                        out.add(
                            &E011,
                            format!("alert entity ID {} stop_id {}", entity.id, stop_id),
                        );
                    }
                }
            }
        }

        out.finish()
    }
}

fn check_stop(out: &mut RuleCollector, m: &StaticScheduleMetadata, stop_id: &str, prefix: &str) {
    if !m.stop_ids.contains(stop_id) {
        out.add(&E011, prefix);
    }
    if m.stop_location_types.get(stop_id).is_some_and(|&lt| lt != 0) {
        out.add(&E015, prefix);
    }
}

fn vehicle_stop_prefix(vp: &VehiclePosition, stop_id: &str) -> String {
    match vp.vehicle.as_ref().and_then(|v| v.id.as_deref()) {
        Some(id) => format!("vehicle_id {} stop_id {}", id, stop_id),
        None => format!("stop_id {}", stop_id),
    }
}
