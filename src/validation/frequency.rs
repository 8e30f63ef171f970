use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::model::Frequency;
use crate::gtfs_rt::{TripDescriptor, trip_descriptor::ScheduleRelationship};
use crate::rules::{E006, E013, E019, W005};
use crate::util::feed::vehicle_and_trip_ids;
use crate::util::time::seconds_to_clock;

/// Rules for `exact_times = 0` trips: E006, E013, W005
pub struct FrequencyTypeZeroValidator;

/// Rules for `exact_times = 1` trips: E019
pub struct FrequencyTypeOneValidator;

impl FeedValidator for FrequencyTypeZeroValidator {
    fn name(&self) -> &'static str {
        "FrequencyTypeZeroValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E006, &E013, &W005]);
        let frequency_trips = &ctx.metadata.exact_times_zero_trip_ids;

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                if frequency_trips.contains(tu.trip.trip_id()) {
                    let located = format!("trip_id {}", tu.trip.trip_id());
                    check_unscheduled_trip(&mut out, &located, &tu.trip);
                    if tu.vehicle.as_ref().is_none_or(|v| v.id.is_none()) {
                        out.add(&W005, located);
                    }
                }
            }
            if let Some(vp) = &entity.vehicle {
                let Some(trip) = vp.trip.as_ref().filter(|t| frequency_trips.contains(t.trip_id()))
                else {
                    continue;
                };
                let located = vehicle_and_trip_ids(vp);
                check_unscheduled_trip(&mut out, &located, trip);
                if vp.vehicle.as_ref().is_none_or(|v| v.id.is_none()) {
                    out.add(
                        &W005,
                        format!("entity ID {} with trip_id {}", entity.id, trip.trip_id()),
                    );
                }
            }
        }

        out.finish()
    }
}

/// E006 and E013: a trip without fixed departures must say when it started and
/// must not claim a schedule.
fn check_unscheduled_trip(out: &mut RuleCollector, located: &str, trip: &TripDescriptor) {
    if trip.start_date.is_none() {
        out.add(&E006, format!("{} is missing start_date", located));
    }
    if trip.start_time.is_none() {
        out.add(&E006, format!("{} is missing start_time", located));
    }
    if trip.schedule_relationship.is_some()
        && trip.schedule_relationship() != ScheduleRelationship::Unscheduled
    {
        out.add(
            &E013,
            format!(
                "{} schedule_relationship {}",
                located,
                trip.schedule_relationship().as_str_name()
            ),
        );
    }
}

impl FeedValidator for FrequencyTypeOneValidator {
    fn name(&self) -> &'static str {
        "FrequencyTypeOneValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[&E019]);
        let windows_by_trip = &ctx.metadata.exact_times_one_trips;

        let trips = ctx.current.entity.iter().flat_map(|e| {
            e.trip_update
                .as_ref()
                .map(|tu| &tu.trip)
                .into_iter()
                .chain(e.vehicle.as_ref().and_then(|vp| vp.trip.as_ref()))
        });
        for trip in trips {
            let Some(windows) = windows_by_trip.get(trip.trip_id()) else {
                continue;
            };
            if matches_headway(windows, trip.start_time()) {
                continue;
            }
            if let Some(first) = windows.first() {
                out.add(
                    &E019,
                    format!(
                        "GTFS-rt trip_id {} has start_time of {} and GTFS frequencies.txt start_time is {} with a headway of {} seconds",
                        trip.trip_id(),
                        trip.start_time(),
                        seconds_to_clock(first.start_time),
                        first.headway_secs
                    ),
                );
            }
        }

        out.finish()
    }
}

/// True when `start_time` is a whole number of headways after the start of
/// one of the windows, and before that window ends.
fn matches_headway(windows: &[Frequency], start_time: &str) -> bool {
    windows.iter().any(|f| {
        let step = f.headway_secs.max(1) as usize;
        (f.start_time..f.end_time)
            .step_by(step)
            .any(|t| seconds_to_clock(t) == start_time)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::StaticScheduleMetadata;
    use crate::validation::test_support::*;

    #[test]
    fn test_exact_times_zero_trip() {
        let m = frequency_metadata();
        let mut t = trip("f0");
        t.start_date = Some("20170714".to_string());
        let mut tu = trip_update_entity("1", t, vec![stu(Some(1), None)]);
        if let Some(tu) = tu.trip_update.as_mut() {
            tu.vehicle = None;
        }
        let current = feed(Some(NOW_SECS), vec![tu]);
        let results = run(&FrequencyTypeZeroValidator, &m, &current);

        assert_eq!(prefixes(&results, &E006), vec!["trip_id f0 is missing start_time"]);
        assert_eq!(prefixes(&results, &E013), vec!["trip_id f0 schedule_relationship SCHEDULED"]);
        assert_eq!(prefixes(&results, &W005), vec!["trip_id f0"]);
    }

    #[test]
    fn test_unscheduled_frequency_trip() {
        let m = frequency_metadata();
        let mut t = trip("f0");
        t.start_date = Some("20170714".to_string());
        t.start_time = Some("06:10:00".to_string());
        t.schedule_relationship = Some(ScheduleRelationship::Unscheduled as i32);
        let mut vehicle = vehicle_entity("1", Some("v1"), None);
        if let Some(vp) = vehicle.vehicle.as_mut() {
            vp.trip = Some(t.clone());
        }
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity("2", t, vec![stu(Some(1), None)]), vehicle],
        );

        assert!(run(&FrequencyTypeZeroValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_scheduled_trips_are_ignored() {
        let m = frequency_metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)])],
        );

        assert!(run(&FrequencyTypeZeroValidator, &m, &current).is_empty());
        assert!(run(&FrequencyTypeOneValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_exact_times_one_start_time() {
        let m = frequency_metadata();
        let check = |start_time: &str| {
            let mut t = trip("f1");
            t.start_time = Some(start_time.to_string());
            let current = feed(
                Some(NOW_SECS),
                vec![trip_update_entity("1", t, vec![stu(Some(1), None)])],
            );
            run(&FrequencyTypeOneValidator, &m, &current)
        };

        assert!(check("06:00:00").is_empty());
        assert!(check("06:20:00").is_empty());
        // second window
        assert!(check("17:15:00").is_empty());
        // window end is exclusive
        assert_eq!(count(&check("07:00:00"), &E019), 1);
        assert_eq!(
            prefixes(&check("06:05:00"), &E019),
            vec!["GTFS-rt trip_id f1 has start_time of 06:05:00 and GTFS frequencies.txt start_time is 06:00:00 with a headway of 600 seconds"]
        );
    }

    #[test]
    fn test_exact_times_one_vehicle() {
        let m = frequency_metadata();
        let mut vehicle = vehicle_entity("1", Some("v1"), None);
        if let Some(vp) = vehicle.vehicle.as_mut() {
            let mut t = trip("f1");
            t.start_time = Some("06:33:00".to_string());
            vp.trip = Some(t);
        }
        let current = feed(Some(NOW_SECS), vec![vehicle]);

        assert_eq!(count(&run(&FrequencyTypeOneValidator, &m, &current), &E019), 1);
    }

    /// f0 runs every 10 minutes without fixed departures; f1 every 10 minutes
    /// from 06:00 and every 15 minutes from 17:00.
    fn frequency_metadata() -> StaticScheduleMetadata {
        let mut dataset = dataset();
        for id in ["f0", "f1"] {
            dataset.trips.push(crate::gtfs::model::Trip {
                route_id: "r1".to_string(),
                trip_id: id.to_string(),
                ..Default::default()
            });
        }
        dataset.frequencies = vec![
            window("f0", 6 * 3600, 7 * 3600, 600, None),
            window("f1", 17 * 3600, 18 * 3600, 900, Some(1)),
            window("f1", 6 * 3600, 7 * 3600, 600, Some(1)),
        ];
        StaticScheduleMetadata::build(&dataset, false)
    }

    fn window(trip_id: &str, start: u32, end: u32, headway: u32, exact_times: Option<u32>) -> Frequency {
        Frequency {
            trip_id: trip_id.to_string(),
            start_time: start,
            end_time: end,
            headway_secs: headway,
            exact_times,
        }
    }
}
