use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs::model::StopTime;
use crate::gtfs_rt::trip_update::StopTimeUpdate;
use crate::gtfs_rt::trip_update::stop_time_update::ScheduleRelationship;
use crate::gtfs_rt::{FeedEntity, TripUpdate, trip_descriptor};
use crate::rules::{E002, E009, E036, E037, E040, E041, E042, E043, E044, E045, E046, E051};
use crate::util::feed::{stop_time_update_locator, trip_locator};

/// E002, E009, E036, E037, E040, E041, E042, E043, E044, E045, E046, E051
pub struct StopTimeUpdateValidator;

impl FeedValidator for StopTimeUpdateValidator {
    fn name(&self) -> &'static str {
        "StopTimeUpdateValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[
            &E002, &E009, &E036, &E037, &E040, &E041, &E042, &E043, &E044, &E045, &E046, &E051,
        ]);

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                check_trip(ctx, &mut out, entity, tu);
            }
        }

        out.finish()
    }
}

fn check_trip(ctx: &ValidationContext<'_>, out: &mut RuleCollector, entity: &FeedEntity, tu: &TripUpdate) {
    let id = trip_locator(entity, &tu.trip);

    if tu.stop_time_update.is_empty() {
        let canceled = tu.trip.schedule_relationship.is_some()
            && tu.trip.schedule_relationship() == trip_descriptor::ScheduleRelationship::Canceled;
        if !canceled {
            out.add(&E041, id.as_str());
        }
        return;
    }

    let trip_id = tu.trip.trip_id.as_deref();
    let gtfs_stop_times: Option<&[StopTime]> = trip_id
        .and_then(|t| ctx.metadata.trip_stop_times.get(t))
        .map(Vec::as_slice);
    let repeated_stops = trip_id.and_then(|t| ctx.metadata.trips_with_repeated_stops.get(t));

    let mut gtfs_index = 0;
    let mut sequences: Vec<u32> = Vec::new();
    let mut stop_ids: Vec<&str> = Vec::new();
    let mut previous_sequence: Option<u32> = None;
    let mut previous_stop_id: Option<&str> = None;
    let mut reported_e009 = false;
    let mut sequence_from_stop_id = false;

    for stu in &tu.stop_time_update {
        if let Some(stops) = repeated_stops.filter(|_| !reported_e009 && stu.stop_sequence.is_none()) {
            out.add(
                &E009,
                format!(
                    "trip_id {} visits stop_id [{}]",
                    trip_id.unwrap_or_default(),
                    stops.join(", ")
                ),
            );
            reported_e009 = true;
        }

        if let (Some(prev), Some(seq)) = (previous_sequence, stu.stop_sequence) {
            if prev == seq {
                out.add(&E036, format!("{} has repeating stop_sequence {}", id, prev));
            }
        }
        if let (Some(prev), Some(stop_id)) = (previous_stop_id, stu.stop_id.as_deref()) {
            if prev == stop_id {
                let mut prefix = format!("{} has repeating stop_id {}", id, prev);
                if let Some(seq) = stu.stop_sequence {
                    prefix.push_str(&format!(" at stop_sequence {}", seq));
                }
                out.add(&E037, prefix);
            }
        }
        previous_sequence = stu.stop_sequence;
        previous_stop_id = stu.stop_id.as_deref().filter(|s| !s.is_empty());

        if let Some(seq) = stu.stop_sequence {
            sequences.push(seq);
        }
        if let Some(stop_id) = stu.stop_id.as_deref() {
            stop_ids.push(stop_id);
        }

        let mut unknown_sequence = false;
        if let Some(gtfs) = gtfs_stop_times {
            // Resumes where the previous update matched so the walk stays linear
            while gtfs_index < gtfs.len() {
                let st = &gtfs[gtfs_index];
                gtfs_index += 1;

                if stu.stop_sequence == Some(st.stop_sequence) {
                    if let Some(stop_id) = stu.stop_id.as_deref().filter(|&s| s != st.stop_id) {
                        out.add(
                            &E045,
                            format!(
                                "GTFS-rt {} stop_sequence {} has stop_id {} but GTFS stop_sequence {} has stop_id {}",
                                id, st.stop_sequence, stop_id, st.stop_sequence, st.stop_id
                            ),
                        );
                    }
                    check_missing_times(out, &id, stu, st);
                    break;
                }

                if stu.stop_sequence.is_some() && gtfs_index == gtfs.len() {
                    unknown_sequence = true;
                }
                if stu.stop_sequence.is_none() && stu.stop_id.as_deref() == Some(st.stop_id.as_str()) {
                    // a looping trip may match too early here
                    sequences.push(st.stop_sequence);
                    sequence_from_stop_id = true;
                    check_missing_times(out, &id, stu, st);
                    break;
                }
            }
        }

        check_stop_time_update(out, &id, stu);

        if unknown_sequence {
            out.add(
                &E051,
                format!(
                    "GTFS-rt {} contains stop_sequence {}",
                    id,
                    stu.stop_sequence.unwrap_or_default()
                ),
            );
            // the rest of the trip cannot be aligned with stop_times.txt
            break;
        }
    }

    if !sequences.is_sorted() {
        out.add(&E002, format!("{} stop_sequence {:?}", id, sequences));
    } else if sequence_from_stop_id && sequences.len() < tu.stop_time_update.len() {
        out.add(
            &E002,
            format!("{} stop_sequence for stop_ids [{}]", id, stop_ids.join(", ")),
        );
    }
}

/// E046: an update without an absolute time needs a scheduled time to apply
/// its delay to.
fn check_missing_times(out: &mut RuleCollector, id: &str, stu: &StopTimeUpdate, st: &StopTime) {
    let stop = stop_time_update_locator(stu);
    if stu.arrival.as_ref().is_some_and(|e| e.time.is_none()) && st.arrival_time.is_none() {
        out.add(&E046, format!("GTFS-rt {} {} arrival.time", id, stop));
    }
    if stu.departure.as_ref().is_some_and(|e| e.time.is_none()) && st.departure_time.is_none() {
        out.add(&E046, format!("GTFS-rt {} {} departure.time", id, stop));
    }
}

/// E040, E042, E043, E044 for a single stop time update.
fn check_stop_time_update(out: &mut RuleCollector, id: &str, stu: &StopTimeUpdate) {
    if stu.stop_sequence.is_none() && stu.stop_id.is_none() {
        out.add(&E040, id);
    }

    let relationship = stu
        .schedule_relationship
        .is_some()
        .then(|| stu.schedule_relationship());
    let stop = format!("{} {}", id, stop_time_update_locator(stu));

    if relationship == Some(ScheduleRelationship::NoData) {
        if stu.arrival.is_some() {
            out.add(&E042, format!("{} has arrival", stop));
        }
        if stu.departure.is_some() {
            out.add(&E042, format!("{} has departure", stop));
        }
    }

    if stu.arrival.is_none()
        && stu.departure.is_none()
        && !matches!(
            relationship,
            Some(ScheduleRelationship::Skipped | ScheduleRelationship::NoData)
        )
    {
        out.add(&E043, stop.as_str());
    }

    if relationship != Some(ScheduleRelationship::Skipped) {
        for (kind, event) in [("arrival", &stu.arrival), ("departure", &stu.departure)] {
            if event
                .as_ref()
                .is_some_and(|e| e.delay.is_none() && e.time.is_none())
            {
                out.add(&E044, format!("{} {}", stop, kind));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::StaticScheduleMetadata;
    use crate::gtfs_rt::trip_update::StopTimeEvent;
    use crate::validation::test_support::*;

    #[test]
    fn test_unsorted_sequence_reported_once() {
        let m = metadata();
        assert_eq!(count(&run(&StopTimeUpdateValidator, &m, &sequence_feed(&[1, 5])), &E002), 0);

        let results = run(&StopTimeUpdateValidator, &m, &sequence_feed(&[1, 5, 3]));
        assert_eq!(prefixes(&results, &E002), vec!["trip_id t9 stop_sequence [1, 5, 3]"]);
    }

    #[test]
    fn test_repeating_sequence_is_not_unsorted() {
        let m = metadata();
        let results = run(&StopTimeUpdateValidator, &m, &sequence_feed(&[2, 2, 5]));

        assert_eq!(count(&results, &E002), 0);
        assert_eq!(prefixes(&results, &E036), vec!["trip_id t9 has repeating stop_sequence 2"]);
    }

    #[test]
    fn test_repeating_stop_id() {
        let m = metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity(
                "1",
                trip("t1"),
                vec![stu(None, Some("A")), stu(None, Some("A"))],
            )],
        );
        let results = run(&StopTimeUpdateValidator, &m, &current);

        assert_eq!(prefixes(&results, &E037), vec!["trip_id t1 has repeating stop_id A"]);
    }

    #[test]
    fn test_trip_without_updates() {
        let m = metadata();
        let mut canceled = trip("t1");
        canceled.schedule_relationship = Some(trip_descriptor::ScheduleRelationship::Canceled as i32);
        let current = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![]),
                trip_update_entity("2", canceled, vec![]),
            ],
        );

        assert_eq!(
            prefixes(&run(&StopTimeUpdateValidator, &m, &current), &E041),
            vec!["trip_id t1"]
        );
    }

    #[test]
    fn test_stop_sequence_against_schedule() {
        let m = metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity(
                "1",
                trip("t1"),
                vec![stu(Some(2), Some("C")), stu(Some(7), Some("C"))],
            )],
        );
        let results = run(&StopTimeUpdateValidator, &m, &current);

        assert_eq!(
            prefixes(&results, &E045),
            vec!["GTFS-rt trip_id t1 stop_sequence 2 has stop_id C but GTFS stop_sequence 2 has stop_id B"]
        );
        assert_eq!(
            prefixes(&results, &E051),
            vec!["GTFS-rt trip_id t1 contains stop_sequence 7"]
        );
    }

    #[test]
    fn test_stop_id_fallback_sequence() {
        let m = metadata();
        // C is matched to sequence 3, after which B cannot be found
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity(
                "1",
                trip("t1"),
                vec![stu(None, Some("C")), stu(None, Some("B"))],
            )],
        );
        let results = run(&StopTimeUpdateValidator, &m, &current);

        assert_eq!(
            prefixes(&results, &E002),
            vec!["trip_id t1 stop_sequence for stop_ids [C, B]"]
        );
    }

    #[test]
    fn test_update_contents() {
        let m = metadata();
        let mut no_data = stu(Some(1), Some("A"));
        no_data.schedule_relationship = Some(ScheduleRelationship::NoData as i32);
        let mut empty = stu(Some(2), Some("B"));
        empty.arrival = None;
        let mut no_delay = stu(Some(3), Some("C"));
        no_delay.departure = Some(StopTimeEvent::default());

        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity(
                "1",
                trip("t1"),
                vec![no_data, empty, no_delay, stu(None, None)],
            )],
        );
        let results = run(&StopTimeUpdateValidator, &m, &current);

        assert_eq!(prefixes(&results, &E042), vec!["trip_id t1 stop_sequence 1 has arrival"]);
        assert_eq!(prefixes(&results, &E043), vec!["trip_id t1 stop_sequence 2"]);
        assert_eq!(prefixes(&results, &E044), vec!["trip_id t1 stop_sequence 3 departure"]);
        assert_eq!(prefixes(&results, &E040), vec!["trip_id t1"]);
    }

    #[test]
    fn test_missing_sequence_for_looping_trip() {
        let mut dataset = dataset();
        dataset.stop_times.push(stop_time("t1", "A", 4, 8 * 3600 + 900));
        let m = StaticScheduleMetadata::build(&dataset, false);
        let current = feed(
            Some(NOW_SECS),
            vec![trip_update_entity(
                "1",
                trip("t1"),
                vec![stu(None, Some("A")), stu(None, Some("B"))],
            )],
        );
        let results = run(&StopTimeUpdateValidator, &m, &current);

        assert_eq!(
            prefixes(&results, &E009),
            vec!["trip_id t1 visits stop_id [A]"]
        );
    }

    /// Trip t9 has no stop times, so only the realtime order is checked.
    fn sequence_feed(seqs: &[u32]) -> crate::gtfs_rt::FeedMessage {
        let stus = seqs.iter().map(|&s| stu(Some(s), None)).collect();
        feed(Some(NOW_SECS), vec![trip_update_entity("1", trip("t9"), stus)])
    }
}
