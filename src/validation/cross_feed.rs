use std::collections::{BTreeMap, BTreeSet};

use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::FeedMessage;
use crate::rules::{E047, W003};

/// W003, E047. Runs only when a combined view of TripUpdates and
/// VehiclePositions is available.
pub struct CrossFeedDescriptorValidator;

/// Trip and vehicle pairings seen on one side of the comparison. Ordered maps
/// keep occurrence order stable between runs.
#[derive(Default)]
struct Pairings<'a> {
    by_trip: BTreeMap<&'a str, &'a str>,
    by_vehicle: BTreeMap<&'a str, &'a str>,
    /// Trip ids without a vehicle id, or vehicle ids without a trip id.
    unpaired: BTreeSet<&'a str>,
    count: usize,
}

impl<'a> Pairings<'a> {
    fn insert(&mut self, key: &'a str, partner: &'a str, key_is_trip: bool) {
        self.count += 1;
        if partner.is_empty() {
            self.unpaired.insert(key);
            return;
        }
        let (trip, vehicle) = if key_is_trip { (key, partner) } else { (partner, key) };
        self.by_trip.insert(trip, vehicle);
        self.by_vehicle.insert(vehicle, trip);
    }
}

fn collect(combined: &FeedMessage) -> (Pairings<'_>, Pairings<'_>) {
    let mut trip_updates = Pairings::default();
    let mut vehicles = Pairings::default();

    for entity in &combined.entity {
        if let Some(tu) = &entity.trip_update {
            if let Some(trip_id) = tu.trip.trip_id.as_deref() {
                let vehicle_id = tu.vehicle.as_ref().map(|v| v.id()).unwrap_or_default();
                trip_updates.insert(trip_id, vehicle_id, true);
            }
        }
        if let Some(vp) = &entity.vehicle {
            if let Some(vehicle_id) = vp.vehicle.as_ref().and_then(|v| v.id.as_deref()) {
                let trip_id = vp.trip.as_ref().map(|t| t.trip_id()).unwrap_or_default();
                vehicles.insert(vehicle_id, trip_id, false);
            }
        }
    }

    (trip_updates, vehicles)
}

impl FeedValidator for CrossFeedDescriptorValidator {
    fn name(&self) -> &'static str {
        "CrossFeedDescriptorValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let Some(combined) = ctx.combined else {
            return Vec::new();
        };
        let mut out = RuleCollector::new(&[&W003, &E047]);
        let (tu, vp) = collect(combined);
        if tu.count == 0 || vp.count == 0 {
            return out.finish();
        }

        for (&trip_id, &vehicle_id) in &tu.by_trip {
            if !vp.by_trip.contains_key(trip_id) {
                out.add(&W003, in_trip_updates_only("trip_id", trip_id));
            }
            if !vp.by_vehicle.contains_key(vehicle_id) && !vp.unpaired.contains(vehicle_id) {
                out.add(&W003, in_trip_updates_only("vehicle_id", vehicle_id));
            }
            if let Some(&other) = vp.by_trip.get(trip_id).filter(|&&v| v != vehicle_id) {
                out.add(
                    &E047,
                    format!(
                        "vehicle_id {} and trip_id {} pairing in TripUpdates does not match vehicle_id {} and trip_id {} pairing in VehiclePositions feed",
                        vehicle_id, trip_id, other, trip_id
                    ),
                );
            }
        }

        for (&vehicle_id, &trip_id) in &vp.by_vehicle {
            if !tu.by_vehicle.contains_key(vehicle_id) {
                out.add(&W003, in_vehicle_positions_only("vehicle_id", vehicle_id));
            }
            if !tu.by_trip.contains_key(trip_id) && !tu.unpaired.contains(trip_id) {
                out.add(&W003, in_vehicle_positions_only("trip_id", trip_id));
            }
            if let Some(&other) = tu.by_vehicle.get(vehicle_id).filter(|&&t| t != trip_id) {
                if !same_block(ctx.metadata, trip_id, other) {
                    out.add(
                        &E047,
                        format!(
                            "trip_id {} and vehicle_id {} pairing in VehiclePositions does not match trip_id {} and vehicle_id {} pairing in TripUpdates feed and trip block_ids aren't the same",
                            trip_id, vehicle_id, other, vehicle_id
                        ),
                    );
                }
            }
        }

        for &trip_id in &tu.unpaired {
            if !vp.by_trip.contains_key(trip_id) {
                out.add(&W003, in_trip_updates_only("trip_id", trip_id));
            }
        }
        for &vehicle_id in &vp.unpaired {
            if !tu.by_vehicle.contains_key(vehicle_id) {
                out.add(&W003, in_vehicle_positions_only("vehicle_id", vehicle_id));
            }
        }

        out.finish()
    }
}

fn in_trip_updates_only(field: &str, id: &str) -> String {
    format!("{} {} is in TripUpdates but not in VehiclePositions feed", field, id)
}

fn in_vehicle_positions_only(field: &str, id: &str) -> String {
    format!("{} {} is in VehiclePositions but not in TripUpdates feed", field, id)
}

/// A vehicle may report the next trip of its block while predictions still
/// cover the current one.
fn same_block(m: &StaticScheduleMetadata, a: &str, b: &str) -> bool {
    let block = |trip_id: &str| {
        m.trips
            .get(trip_id)
            .and_then(|t| t.block_id.as_deref())
            .filter(|b| !b.is_empty())
    };
    matches!((block(a), block(b)), (Some(x), Some(y)) if x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::model::Trip;
    use crate::gtfs_rt::FeedEntity;
    use crate::validation::test_support::*;

    #[test]
    fn test_skipped_without_combined_feed() {
        let m = metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)])],
        );

        assert!(run(&CrossFeedDescriptorValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_matching_pairs() {
        let m = metadata();
        // trip_update_entity pairs t1 with vehicle veh-1
        let combined = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)]),
                vehicle_entity("2", Some("veh-1"), None),
            ],
        );

        assert!(run_combined(&m, &combined).is_empty());
    }

    #[test]
    fn test_ids_missing_from_other_feed() {
        let m = metadata();
        let combined = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)]),
                vehicle_on_trip("2", "v9", "t2"),
            ],
        );
        let results = run_combined(&m, &combined);

        assert_eq!(
            prefixes(&results, &W003),
            vec![
                "trip_id t1 is in TripUpdates but not in VehiclePositions feed",
                "vehicle_id veh-1 is in TripUpdates but not in VehiclePositions feed",
                "vehicle_id v9 is in VehiclePositions but not in TripUpdates feed",
                "trip_id t2 is in VehiclePositions but not in TripUpdates feed",
            ]
        );
        assert_eq!(count(&results, &E047), 0);
    }

    #[test]
    fn test_pairing_mismatch() {
        let m = block_metadata();
        let combined = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)]),
                vehicle_on_trip("2", "veh-1", "t3"),
            ],
        );
        let results = run_combined(&m, &combined);

        assert_eq!(count(&results, &E047), 1);
        assert!(prefixes(&results, &E047)[0].starts_with("trip_id t3 and vehicle_id veh-1"));
    }

    #[test]
    fn test_same_block_is_tolerated() {
        let m = block_metadata();
        let combined = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)]),
                vehicle_on_trip("2", "veh-1", "t2"),
            ],
        );

        assert_eq!(count(&run_combined(&m, &combined), &E047), 0);
    }

    fn run_combined(m: &StaticScheduleMetadata, combined: &FeedMessage) -> Vec<RuleResult> {
        CrossFeedDescriptorValidator.validate(&ValidationContext {
            now_millis: NOW_MILLIS,
            metadata: m,
            current: combined,
            previous: None,
            combined: Some(combined),
        })
    }

    fn vehicle_on_trip(id: &str, vehicle_id: &str, trip_id: &str) -> FeedEntity {
        let mut e = vehicle_entity(id, Some(vehicle_id), None);
        if let Some(vp) = e.vehicle.as_mut() {
            vp.trip = Some(trip(trip_id));
        }
        e
    }

    /// t2 shares block b1 with t1; t3 has no block.
    fn block_metadata() -> StaticScheduleMetadata {
        let mut dataset = dataset();
        for (trip_id, block_id) in [("t2", Some("b1")), ("t3", None)] {
            dataset.trips.push(Trip {
                route_id: "r1".to_string(),
                trip_id: trip_id.to_string(),
                block_id: block_id.map(str::to_string),
                ..Default::default()
            });
        }
        StaticScheduleMetadata::build(&dataset, false)
    }
}
