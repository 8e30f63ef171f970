use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::{EntitySelector, FeedEntity, TripDescriptor, TripUpdate, VehiclePosition};
use crate::rules::{
    E003, E004, E016, E020, E021, E023, E024, E030, E031, E032, E033, E034, E035, W006, W009,
};
use crate::util::feed::{is_added_trip, stop_time_update_locator, trip_locator, vehicle_id};
use crate::util::time::{is_valid_date_format, is_valid_time_format, seconds_to_clock};

/// E003, E004, E016, E020, E021, E023, E024, E030, E031, E032, E033, E034,
/// E035, W006, W009
pub struct TripDescriptorValidator;

/// The element a trip descriptor was found in, used to name it in occurrences.
#[derive(Clone, Copy)]
enum Carrier<'a> {
    TripUpdate,
    Vehicle(&'a VehiclePosition),
}

impl Carrier<'_> {
    fn trip_text(&self, trip: &TripDescriptor) -> String {
        match self {
            Carrier::TripUpdate => format!("trip_id {}", trip.trip_id()),
            Carrier::Vehicle(vp) => {
                format!("vehicle_id {} trip_id {}", vehicle_id(vp), trip.trip_id())
            }
        }
    }

    fn route_text(&self, trip: &TripDescriptor) -> String {
        match self {
            Carrier::TripUpdate => format!("route_id {}", trip.route_id()),
            Carrier::Vehicle(vp) => {
                format!("vehicle_id {} route_id {}", vehicle_id(vp), trip.route_id())
            }
        }
    }
}

impl FeedValidator for TripDescriptorValidator {
    fn name(&self) -> &'static str {
        "TripDescriptorValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[
            &E003, &E004, &E016, &E020, &E021, &E023, &E024, &E030, &E031, &E032, &E033, &E034,
            &E035, &W006, &W009,
        ]);
        let m = ctx.metadata;

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                check_trip(&mut out, m, entity, &tu.trip, Carrier::TripUpdate);
                check_stop_time_relationships(&mut out, entity, tu);
                check_relationship(&mut out, entity, &tu.trip);
            }
            if let Some(vp) = &entity.vehicle {
                if let Some(trip) = &vp.trip {
                    check_trip(&mut out, m, entity, trip, Carrier::Vehicle(vp));
                    check_relationship(&mut out, entity, trip);
                }
            }
            if let Some(alert) = &entity.alert {
                if alert.informed_entity.is_empty() {
                    out.add(
                        &E032,
                        format!("alert ID {} does not have an informed_entity", entity.id),
                    );
                }
                for selector in &alert.informed_entity {
                    check_selector(&mut out, m, entity, selector);
                }
            }
        }

        out.finish()
    }
}

fn check_trip(
    out: &mut RuleCollector,
    m: &StaticScheduleMetadata,
    entity: &FeedEntity,
    trip: &TripDescriptor,
    carrier: Carrier<'_>,
) {
    match trip.trip_id.as_deref() {
        None => out.add(&W006, format!("entity ID {}", entity.id)),
        Some("") => {}
        Some(trip_id) => {
            let located = carrier.trip_text(trip);
            match m.trips.get(trip_id) {
                None if !is_added_trip(trip) => out.add(&E003, located),
                None => {}
                Some(_) => {
                    if is_added_trip(trip) {
                        out.add(&E016, located);
                    }
                    if let Some(start_time) = trip.start_time.as_deref() {
                        check_start_time_matches_schedule(out, m, trip_id, start_time, carrier, trip);
                    }
                }
            }
        }
    }

    if let Some(start_time) = trip.start_time.as_deref() {
        if !is_valid_time_format(start_time) {
            out.add(
                &E020,
                format!("{} start_time is {}", carrier.trip_text(trip), start_time),
            );
        }
    }
    if let Some(start_date) = trip.start_date.as_deref() {
        if !is_valid_date_format(start_date) {
            out.add(
                &E021,
                format!("{} start_date is {}", carrier.trip_text(trip), start_date),
            );
        }
    }

    if trip
        .route_id
        .as_deref()
        .is_some_and(|r| !r.is_empty() && !m.route_ids.contains(r))
    {
        out.add(&E004, carrier.route_text(trip));
    }

    if let Some(direction_id) = trip.direction_id {
        if let Some(gtfs_trip) = m.trips.get(trip.trip_id()) {
            if gtfs_trip.direction_id != Some(direction_id) {
                out.add(
                    &E024,
                    format!(
                        "GTFS-rt {} trip.direction_id is {} but GTFS trip.direction_id is {}",
                        carrier.trip_text(trip),
                        direction_id,
                        gtfs_trip
                            .direction_id
                            .map_or_else(|| "missing".to_string(), |d| d.to_string())
                    ),
                );
            }
        }
    }

    check_trip_route(out, m, entity, trip);
}

/// E023: frequency-based trips have no fixed first departure to compare to.
fn check_start_time_matches_schedule(
    out: &mut RuleCollector,
    m: &StaticScheduleMetadata,
    trip_id: &str,
    start_time: &str,
    carrier: Carrier<'_>,
    trip: &TripDescriptor,
) {
    if m.is_frequency_trip(trip_id) {
        return;
    }
    let Some(first_arrival) = m
        .trip_stop_times
        .get(trip_id)
        .and_then(|st| st.first())
        .and_then(|st| st.arrival_time)
    else {
        return;
    };
    let scheduled = seconds_to_clock(first_arrival);
    if start_time != scheduled {
        out.add(
            &E023,
            format!(
                "GTFS-rt {} start_time is {} and GTFS initial arrival_time is {}",
                carrier.trip_text(trip),
                start_time,
                scheduled
            ),
        );
    }
}

/// E035. Unknown routes and trips are left to E004 and E003.
fn check_trip_route(
    out: &mut RuleCollector,
    m: &StaticScheduleMetadata,
    entity: &FeedEntity,
    trip: &TripDescriptor,
) {
    let (Some(trip_id), Some(route_id)) = (trip.trip_id.as_deref(), trip.route_id.as_deref())
    else {
        return;
    };
    if !m.route_ids.contains(route_id) {
        return;
    }
    if let Some(gtfs_trip) = m.trips.get(trip_id).filter(|t| t.route_id != route_id) {
        out.add(
            &E035,
            format!(
                "GTFS-rt entity ID {} trip_id {} has route_id {} but belongs to GTFS route_id {}",
                entity.id, trip_id, route_id, gtfs_trip.route_id
            ),
        );
    }
}

fn check_relationship(out: &mut RuleCollector, entity: &FeedEntity, trip: &TripDescriptor) {
    if trip.schedule_relationship.is_none() {
        out.add(&W009, trip_locator(entity, trip));
    }
}

/// W009 at most once per trip for its stop time updates.
fn check_stop_time_relationships(out: &mut RuleCollector, entity: &FeedEntity, tu: &TripUpdate) {
    if let Some(stu) = tu
        .stop_time_update
        .iter()
        .find(|s| s.schedule_relationship.is_none())
    {
        out.add(
            &W009,
            format!(
                "{} {} (and potentially more for this trip)",
                trip_locator(entity, &tu.trip),
                stop_time_update_locator(stu)
            ),
        );
    }
}

fn check_selector(
    out: &mut RuleCollector,
    m: &StaticScheduleMetadata,
    entity: &FeedEntity,
    selector: &EntitySelector,
) {
    let trip = selector.trip.as_ref();

    let selects_nothing = selector.agency_id.is_none()
        && selector.route_id.is_none()
        && selector.route_type.is_none()
        && selector.stop_id.is_none()
        && trip.is_none_or(|t| t.trip_id.is_none() && t.route_id.is_none());
    if selects_nothing {
        out.add(
            &E033,
            format!(
                "alert ID {} informed_entity and informed_entity.trip do not not reference any agency, route, trip, or stop",
                entity.id
            ),
        );
    }

    if let Some(agency_id) = selector
        .agency_id
        .as_deref()
        .filter(|a| !m.agency_ids.contains(*a))
    {
        out.add(&E034, format!("alert ID {} agency_id {}", entity.id, agency_id));
    }

    let Some(trip) = trip else {
        return;
    };
    check_trip_route(out, m, entity, trip);

    if let Some(route_id) = selector.route_id.as_deref() {
        if let Some(gtfs_trip) = trip
            .trip_id
            .as_deref()
            .and_then(|t| m.trips.get(t))
            .filter(|t| t.route_id != route_id)
        {
            out.add(
                &E030,
                format!(
                    "alert ID {} informed_entity.trip.trip_id {} does not belong to informed_entity.route_id {} (GTFS says it belongs to route_id {})",
                    entity.id,
                    trip.trip_id(),
                    route_id,
                    gtfs_trip.route_id
                ),
            );
        }
        if let Some(trip_route) = trip.route_id.as_deref().filter(|r| *r != route_id) {
            out.add(
                &E031,
                format!(
                    "alert ID {} informed_entity.route_id {} does not equal informed_entity.trip.route_id {}",
                    entity.id, route_id, trip_route
                ),
            );
        }
    }

    if trip.trip_id.is_none() {
        out.add(&W006, format!("entity ID {}", entity.id));
    }
    check_relationship(out, entity, trip);
}
