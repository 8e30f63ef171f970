use chrono_tz::Tz;

use super::{FeedValidator, RuleCollector, RuleResult, ValidationContext};
use crate::gtfs_rt::{FeedEntity, TripUpdate, VehiclePosition};
use crate::rules::{E001, E012, E017, E018, E022, E025, E048, E050, W001, W007, W008};
use crate::util::feed::{is_v2_or_higher, stop_time_update_locator, trip_locator};
use crate::util::time::{age_millis, is_in_future, is_posix, minutes_seconds, posix_to_clock};

/// Maximum header age before the feed is considered stale.
pub const MAX_AGE_SECS: i64 = 65;
/// Clock skew allowed before a timestamp counts as being in the future.
pub const IN_FUTURE_TOLERANCE_SECS: u64 = 60;
/// Longest acceptable gap between consecutive header timestamps.
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 35;

/// W001, W007, W008, E001, E012, E017, E018, E022, E025, E048, E050
pub struct TimestampValidator;

impl FeedValidator for TimestampValidator {
    fn name(&self) -> &'static str {
        "TimestampValidator"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult> {
        let mut out = RuleCollector::new(&[
            &W001, &W007, &W008, &E001, &E012, &E017, &E018, &E022, &E025, &E048, &E050,
        ]);
        let tz = ctx.metadata.timezone;
        let now_text = posix_to_clock(ctx.now_millis / 1000, tz);
        let header = &ctx.current.header;
        let header_ts = header.timestamp.unwrap_or(0);

        if header_ts == 0 {
            out.add(&W001, "header");
            if is_v2_or_higher(header) {
                out.add(&E048, "");
            }
        } else {
            if !is_posix(header_ts) {
                out.add(&E001, "header.timestamp");
            } else {
                let age = age_millis(ctx.now_millis, header_ts);
                let (min, sec) = minutes_seconds(age);
                if age > MAX_AGE_SECS * 1000 {
                    out.add(&W008, format!("header.timestamp is {} min {} sec", min, sec));
                }
                if is_in_future(ctx.now_millis, header_ts, IN_FUTURE_TOLERANCE_SECS) {
                    out.add(
                        &E050,
                        format!(
                            "header.timestamp {} ({}) is {} min {} sec greater than {} ({})",
                            posix_to_clock(header_ts as i64, tz),
                            header_ts,
                            min,
                            sec,
                            now_text,
                            ctx.now_millis
                        ),
                    );
                }
            }

            if let Some(previous_ts) = ctx
                .previous
                .and_then(|p| p.header.timestamp)
                .filter(|&t| t != 0)
            {
                if header_ts == previous_ts {
                    out.add(&E017, format!("header.timestamp of {}", header_ts));
                } else if header_ts < previous_ts {
                    out.add(
                        &E018,
                        format!(
                            "header.timestamp of {} is less than the header.timestamp of {}",
                            header_ts, previous_ts
                        ),
                    );
                } else if header_ts - previous_ts > MIN_REFRESH_INTERVAL_SECS {
                    out.add(
                        &W007,
                        format!(
                            "{} second interval between consecutive header.timestamps",
                            header_ts - previous_ts
                        ),
                    );
                }
            }
        }

        for entity in &ctx.current.entity {
            if let Some(tu) = &entity.trip_update {
                let id = trip_locator(entity, &tu.trip);
                check_entity_timestamp(ctx, &mut out, &id, tu.timestamp, header_ts, &now_text);
                check_stop_times(&mut out, &id, tu, tz);
            }
            if let Some(vp) = &entity.vehicle {
                check_vehicle(ctx, &mut out, vp, header_ts, &now_text);
            }
            if entity.alert.is_some() {
                check_alert(&mut out, entity);
            }
        }

        out.finish()
    }
}

/// W001, E012, E001 and E050 for a trip update or vehicle timestamp.
fn check_entity_timestamp(
    ctx: &ValidationContext<'_>,
    out: &mut RuleCollector,
    id: &str,
    timestamp: Option<u64>,
    header_ts: u64,
    now_text: &str,
) {
    let ts = timestamp.unwrap_or(0);
    if ts == 0 {
        out.add(&W001, id);
        return;
    }
    let prefix = format!("{} timestamp {}", id, ts);
    if header_ts != 0 && ts > header_ts {
        out.add(&E012, prefix.clone());
    }
    if !is_posix(ts) {
        out.add(&E001, prefix);
    } else if is_in_future(ctx.now_millis, ts, IN_FUTURE_TOLERANCE_SECS) {
        let (min, sec) = minutes_seconds(age_millis(ctx.now_millis, ts));
        out.add(
            &E050,
            format!(
                "{} timestamp {} ({}) is {} min {} sec greater than {} ({})",
                id,
                posix_to_clock(ts as i64, ctx.metadata.timezone),
                ts,
                min,
                sec,
                now_text,
                ctx.now_millis
            ),
        );
    }
}

fn check_vehicle(
    ctx: &ValidationContext<'_>,
    out: &mut RuleCollector,
    vp: &VehiclePosition,
    header_ts: u64,
    now_text: &str,
) {
    let id = format!(
        "vehicle_id {}",
        vp.vehicle.as_ref().map(|v| v.id()).unwrap_or_default()
    );
    check_entity_timestamp(ctx, out, &id, vp.timestamp, header_ts, now_text);
}

/// E001, E022 and E025 over the stop time updates of one trip.
fn check_stop_times(out: &mut RuleCollector, id: &str, tu: &TripUpdate, tz: Tz) {
    let clock = |t: i64| posix_to_clock(t, tz);
    let mut previous_arrival: Option<i64> = None;
    let mut previous_departure: Option<i64> = None;

    for stu in &tu.stop_time_update {
        let stop = stop_time_update_locator(stu);
        let arrival = stu.arrival.as_ref().and_then(|e| e.time);
        let departure = stu.departure.as_ref().and_then(|e| e.time);

        if let Some(arr) = arrival {
            if arr < 0 || !is_posix(arr as u64) {
                out.add(&E001, format!("{} {} arrival_time {}", id, stop, arr));
            }
            for (kind, prev) in [("arrival_time", previous_arrival), ("departure_time", previous_departure)] {
                if let Some(prev) = prev.filter(|&p| arr <= p) {
                    let relation = if arr < prev { "less than" } else { "equal to" };
                    out.add(
                        &E022,
                        format!(
                            "{} {} arrival_time {} ({}) is {} previous stop {} {} ({})",
                            id,
                            stop,
                            clock(arr),
                            arr,
                            relation,
                            kind,
                            clock(prev),
                            prev
                        ),
                    );
                }
            }
        }

        if let Some(dep) = departure {
            if dep < 0 || !is_posix(dep as u64) {
                out.add(&E001, format!("{} {} departure_time {}", id, stop, dep));
            }
            for (kind, prev) in [("departure_time", previous_departure), ("arrival_time", previous_arrival)] {
                if let Some(prev) = prev.filter(|&p| dep <= p) {
                    let relation = if dep < prev { "less than" } else { "equal to" };
                    out.add(
                        &E022,
                        format!(
                            "{} {} departure_time {} ({}) is {} previous stop {} {} ({})",
                            id,
                            stop,
                            clock(dep),
                            dep,
                            relation,
                            kind,
                            clock(prev),
                            prev
                        ),
                    );
                }
            }
            if let Some(arr) = arrival.filter(|&a| dep < a) {
                out.add(
                    &E025,
                    format!(
                        "{} {} departure_time {} ({}) is less than the same stop arrival_time {} ({})",
                        id,
                        stop,
                        clock(dep),
                        dep,
                        clock(arr),
                        arr
                    ),
                );
            }
        }

        if arrival.is_some() {
            previous_arrival = arrival;
        }
        if departure.is_some() {
            previous_departure = departure;
        }
    }
}

fn check_alert(out: &mut RuleCollector, entity: &FeedEntity) {
    let Some(alert) = &entity.alert else {
        return;
    };
    for range in &alert.active_period {
        if let Some(start) = range.start.filter(|&s| !is_posix(s)) {
            out.add(
                &E001,
                format!("alert in entity {} active_period.start {}", entity.id, start),
            );
        }
        if let Some(end) = range.end.filter(|&e| !is_posix(e)) {
            out.add(
                &E001,
                format!("alert in entity {} active_period.end {}", entity.id, end),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::StopTimeEvent;
    use crate::gtfs_rt::{Alert, TimeRange};
    use crate::validation::test_support::*;

    #[test]
    fn test_fresh_feed_has_no_occurrences() {
        let m = metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![
                trip_update_entity("1", trip("t1"), vec![stu(Some(1), Some("A"))]),
                vehicle_entity("2", Some("v1"), None),
            ],
        );

        assert!(run(&TimestampValidator, &m, &current).is_empty());
    }

    #[test]
    fn test_missing_header_timestamp() {
        let m = metadata();
        let mut current = feed(None, vec![]);
        let results = run(&TimestampValidator, &m, &current);
        assert_eq!(prefixes(&results, &W001), vec!["header"]);
        assert_eq!(count(&results, &E048), 1);

        current.header.gtfs_realtime_version = "1.0".to_string();
        let results = run(&TimestampValidator, &m, &current);
        assert_eq!(count(&results, &W001), 1);
        assert_eq!(count(&results, &E048), 0);
    }

    #[test]
    fn test_header_not_posix() {
        let m = metadata();
        // milliseconds instead of seconds
        let current = feed(Some(NOW_SECS * 1000), vec![]);
        let results = run(&TimestampValidator, &m, &current);

        assert_eq!(prefixes(&results, &E001), vec!["header.timestamp"]);
        assert_eq!(count(&results, &W008), 0);
    }

    #[test]
    fn test_stale_and_future_header() {
        let m = metadata();

        let stale = feed(Some(NOW_SECS - 125), vec![]);
        let results = run(&TimestampValidator, &m, &stale);
        assert_eq!(
            prefixes(&results, &W008),
            vec!["header.timestamp is 2 min 5 sec"]
        );

        let at_tolerance = feed(Some(NOW_SECS + 60), vec![]);
        assert!(run(&TimestampValidator, &m, &at_tolerance).is_empty());

        let future = feed(Some(NOW_SECS + 61), vec![]);
        let results = run(&TimestampValidator, &m, &future);
        assert_eq!(count(&results, &E050), 1);
        assert!(prefixes(&results, &E050)[0].contains("is 1 min 1 sec greater than"));
    }

    #[test]
    fn test_previous_header_comparison() {
        let m = metadata();
        let check = |current_ts: u64, previous_ts: u64| {
            let current = feed(Some(current_ts), vec![]);
            let previous = feed(Some(previous_ts), vec![]);
            TimestampValidator.validate(&ValidationContext {
                now_millis: NOW_MILLIS,
                metadata: &m,
                current: &current,
                previous: Some(&previous),
                combined: None,
            })
        };

        assert_eq!(count(&check(NOW_SECS, NOW_SECS), &E017), 1);
        assert_eq!(count(&check(NOW_SECS - 10, NOW_SECS), &E018), 1);
        assert_eq!(
            prefixes(&check(NOW_SECS, NOW_SECS - 40), &W007),
            vec!["40 second interval between consecutive header.timestamps"]
        );
        assert!(check(NOW_SECS, NOW_SECS - 30).is_empty());
    }

    #[test]
    fn test_entity_newer_than_header() {
        let m = metadata();
        let mut entity = vehicle_entity("1", Some("v1"), None);
        if let Some(vp) = entity.vehicle.as_mut() {
            vp.timestamp = Some(NOW_SECS + 5);
        }
        let current = feed(Some(NOW_SECS), vec![entity]);
        let results = run(&TimestampValidator, &m, &current);

        assert_eq!(
            prefixes(&results, &E012),
            vec![format!("vehicle_id v1 timestamp {}", NOW_SECS + 5)]
        );
    }

    #[test]
    fn test_missing_entity_timestamp() {
        let m = metadata();
        let mut entity = trip_update_entity("1", trip("t1"), vec![stu(Some(1), None)]);
        if let Some(tu) = entity.trip_update.as_mut() {
            tu.timestamp = None;
        }
        let current = feed(Some(NOW_SECS), vec![entity]);

        assert_eq!(
            prefixes(&run(&TimestampValidator, &m, &current), &W001),
            vec!["trip_id t1"]
        );
    }

    #[test]
    fn test_stop_times_must_increase() {
        let m = metadata();
        let t = NOW_SECS as i64;
        let stus = vec![
            timed_stu(1, Some(t + 60), Some(t + 90)),
            // equal to previous departure and less than previous arrival for departure
            timed_stu(2, Some(t + 90), Some(t + 50)),
        ];
        let current = feed(Some(NOW_SECS), vec![trip_update_entity("1", trip("t1"), stus)]);
        let results = run(&TimestampValidator, &m, &current);

        // arrival == previous departure; departure < previous departure; departure < previous arrival
        assert_eq!(count(&results, &E022), 3);
        assert_eq!(count(&results, &E025), 1);
    }

    #[test]
    fn test_alert_active_period_not_posix() {
        let m = metadata();
        let current = feed(
            Some(NOW_SECS),
            vec![crate::gtfs_rt::FeedEntity {
                id: "a1".to_string(),
                alert: Some(Alert {
                    active_period: vec![TimeRange {
                        start: Some(5),
                        end: Some(NOW_SECS),
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            }],
        );

        assert_eq!(
            prefixes(&run(&TimestampValidator, &m, &current), &E001),
            vec!["alert in entity a1 active_period.start 5"]
        );
    }

    fn timed_stu(
        seq: u32,
        arrival: Option<i64>,
        departure: Option<i64>,
    ) -> crate::gtfs_rt::trip_update::StopTimeUpdate {
        let event = |time: Option<i64>| {
            time.map(|t| StopTimeEvent {
                time: Some(t),
                ..Default::default()
            })
        };
        crate::gtfs_rt::trip_update::StopTimeUpdate {
            stop_sequence: Some(seq),
            arrival: event(arrival),
            departure: event(departure),
            ..Default::default()
        }
    }
}
