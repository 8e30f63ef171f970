use geo::Point;
use std::collections::HashSet;

use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::{FeedEntity, Position, VehiclePosition, alert::Effect};
use crate::rules::{E026, E027, E028, E029, E052, W002, W004};
use crate::util::feed::{
    MPS_TO_MPH, is_bearing_valid, is_position_valid, trip_locator, vehicle_id, vehicle_locator,
};
use crate::util::geo::{REGION_BUFFER_METRES, TRIP_BUFFER_METRES, distance_to_line, within};

/// Approximately 60 miles per hour.
pub const MAX_REALISTIC_SPEED_MPS: f32 = 26.0;

const METRES_PER_MILE: f64 = 1609.344;

/// E026, E027, E028, E029, E052, W002, W004
pub struct VehicleValidator;

impl FeedValidator for VehicleValidator {
    fn name(&self) -> &'static str {
        "VehicleValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E026, &E027, &E028, &E029, &W002, &W004, &E052]);
        let mut seen_vehicle_ids = HashSet::new();

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                if tu.vehicle.as_ref().is_none_or(|v| v.id().is_empty()) {
                    out.add(&W002, trip_locator(entity, &tu.trip));
                }
            }

            let Some(vp) = &entity.vehicle else {
                continue;
            };
            let id = vehicle_id(vp);
            if id.is_empty() {
                out.add(&W002, format!("entity ID {}", entity.id));
            } else if !seen_vehicle_ids.insert(id) {
                out.add(
                    &E052,
                    format!("entity ID {} has vehicle.id {}", entity.id, id),
                );
            }

            if let Some(position) = &vp.position {
                check_position(ctx, &mut out, entity, vp, position);
            }
        }

        out.finish()
    }
}

fn check_position(
    ctx: &ValidationContext<'_>,
    out: &mut RuleCollector,
    entity: &FeedEntity,
    vp: &VehiclePosition,
    position: &Position,
) {
    let id = vehicle_locator(entity, vp.vehicle.as_ref());

    if let Some(speed) = position
        .speed
        .filter(|&s| !(0.0..=MAX_REALISTIC_SPEED_MPS).contains(&s))
    {
        out.add_with_value(
            &W004,
            format!(
                "{} speed of {} m/s ({:.2} mph)",
                id,
                speed,
                speed * MPS_TO_MPH
            ),
            speed,
        );
    }

    if !is_position_valid(position) {
        out.add(
            &E026,
            format!(
                "{} has latitude/longitude of ({},{})",
                id, position.latitude, position.longitude
            ),
        );
    } else if check_coverage(out, ctx.metadata, &id, position) {
        check_trip_shape(ctx, out, &id, vp, position);
    }

    if !is_bearing_valid(position) {
        out.add(
            &E027,
            format!("{} has bearing of {}", id, position.bearing.unwrap_or_default()),
        );
    }
}

fn point(position: &Position) -> Point {
    Point::new(position.longitude as f64, position.latitude as f64)
}

/// E028. Returns whether the position lies inside the coverage area.
fn check_coverage(
    out: &mut RuleCollector,
    m: &StaticScheduleMetadata,
    id: &str,
    position: &Position,
) -> bool {
    let Some(area) = m.coverage_area() else {
        return true;
    };
    if within(area, &point(position)) {
        return true;
    }
    let source = if m.shape_bounding_box.is_some() {
        "shapes.txt"
    } else {
        "stops.txt"
    };
    out.add(
        &E028,
        format!(
            "{} at ({},{}) is more than {} meters ({:.2} mile(s)) outside entire GTFS {} coverage area",
            id,
            position.latitude,
            position.longitude,
            REGION_BUFFER_METRES,
            REGION_BUFFER_METRES / METRES_PER_MILE,
            source
        ),
    );
    false
}

/// E029, unless a DETOUR alert in the same feed covers the trip or its route.
fn check_trip_shape(
    ctx: &ValidationContext<'_>,
    out: &mut RuleCollector,
    id: &str,
    vp: &VehiclePosition,
    position: &Position,
) {
    let Some(trip) = vp.trip.as_ref().filter(|t| t.trip_id.is_some()) else {
        return;
    };
    let Some(shape) = ctx.metadata.trip_shapes.get(trip.trip_id()) else {
        return;
    };
    let off_shape = distance_to_line(shape, &point(position)).is_some_and(|d| d > TRIP_BUFFER_METRES);
    if !off_shape || has_detour_alert(ctx, trip.trip_id(), trip.route_id.as_deref()) {
        return;
    }
    out.add(
        &E029,
        format!(
            "{} trip_id {} at ({},{}) is more than {} meters ({:.2} mile(s)) from the GTFS trip shape",
            id,
            trip.trip_id(),
            position.latitude,
            position.longitude,
            TRIP_BUFFER_METRES,
            TRIP_BUFFER_METRES / METRES_PER_MILE
        ),
    );
}

fn has_detour_alert(ctx: &ValidationContext<'_>, trip_id: &str, route_id: Option<&str>) -> bool {
    ctx.current
        .entity
        .iter()
        .filter_map(|e| e.alert.as_ref())
        .filter(|a| a.effect.is_some() && a.effect() == Effect::Detour)
        .flat_map(|a| a.informed_entity.iter())
        .filter_map(|s| s.trip.as_ref())
        .any(|t| {
            t.trip_id.as_deref() == Some(trip_id)
                || route_id.is_some_and(|r| t.route_id.as_deref() == Some(r))
        })
}
