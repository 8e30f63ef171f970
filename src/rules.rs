//! Catalog of every GTFS-realtime validation rule.
//!
//! Rules are static and shared by every validator. Each carries the suffix
//! appended to an occurrence locator when the rule fires, e.g.
//! `"trip_id 42"` + `" does not exist in the GTFS data..."`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ValidationRule {
    pub id: &'static str,
    pub severity: Severity,
    pub title: &'static str,
    pub description: &'static str,
    pub occurrence_suffix: &'static str,
}

impl ValidationRule {
    const fn new(
        id: &'static str,
        severity: Severity,
        title: &'static str,
        description: &'static str,
        occurrence_suffix: &'static str,
    ) -> Self {
        Self {
            id,
            severity,
            title,
            description,
            occurrence_suffix,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

use Severity::{Error, Warning};

// Warnings

pub static W001: ValidationRule = ValidationRule::new(
    "W001",
    Warning,
    "timestamp not populated",
    "Timestamps should be populated for all elements",
    "does not have a timestamp",
);
pub static W002: ValidationRule = ValidationRule::new(
    "W002",
    Warning,
    "vehicle_id not populated",
    "vehicle_id should be populated for TripUpdates and VehiclePositions",
    "does not have a vehicle_id",
);
pub static W003: ValidationRule = ValidationRule::new(
    "W003",
    Warning,
    "ID in one feed missing from the other",
    "a trip_id that is provided in the VehiclePositions feed should be provided in the TripUpdates feed, and a vehicle_id that is provided in the TripUpdates feed should be provided in the VehiclePositions feed",
    "",
);
pub static W004: ValidationRule = ValidationRule::new(
    "W004",
    Warning,
    "vehicle speed is unrealistic",
    "vehicle.position.speed has an unrealistic speed that may be incorrect",
    "is unrealistic",
);
pub static W005: ValidationRule = ValidationRule::new(
    "W005",
    Warning,
    "Missing vehicle_id for frequency-based exact_times = 0",
    "Frequency-based exact_times = 0 trip_updates and vehicle positions should contain vehicle_id",
    "is missing vehicle_id, which is suggested for frequency-based exact_times=0 trips",
);
pub static W006: ValidationRule = ValidationRule::new(
    "W006",
    Warning,
    "trip missing trip_id",
    "trip should include a trip_id",
    "does not contain a trip_id",
);
pub static W007: ValidationRule = ValidationRule::new(
    "W007",
    Warning,
    "Refresh interval is more than 35 seconds",
    "GTFS-realtime feeds should be refreshed at least every 30 seconds",
    "which is less than the recommended interval of 35 seconds",
);
pub static W008: ValidationRule = ValidationRule::new(
    "W008",
    Warning,
    "Header timestamp is older than 65 seconds",
    "The data in a GTFS-realtime feed should always be less than one minute old",
    "old which is greater than the recommended age of 65 seconds",
);
pub static W009: ValidationRule = ValidationRule::new(
    "W009",
    Warning,
    "schedule_relationship not populated",
    "trip.schedule_relationship and stop_time_update.schedule_relationship should be populated",
    "does not have a schedule_relationship",
);

// Errors

pub static E001: ValidationRule = ValidationRule::new(
    "E001",
    Error,
    "Not in POSIX time",
    "All timestamps must be in POSIX time (i.e., number of seconds since January 1st 1970 00:00:00 UTC)",
    "is not POSIX time",
);
pub static E002: ValidationRule = ValidationRule::new(
    "E002",
    Error,
    "stop_times_updates not strictly sorted",
    "stop_time_updates for a given trip_id must be strictly sorted by increasing stop_sequence",
    "is not strictly sorted by increasing stop_sequence",
);
pub static E003: ValidationRule = ValidationRule::new(
    "E003",
    Error,
    "GTFS-rt trip_id does not exist in GTFS data and does not have schedule_relationship of ADDED",
    "All trip_ids provided in the GTFS-rt feed must exist in the GTFS data, unless the schedule_relationship is ADDED",
    "does not exist in the GTFS data and does not have schedule_relationship of ADDED",
);
pub static E004: ValidationRule = ValidationRule::new(
    "E004",
    Error,
    "GTFS-rt route_id does not exist in GTFS data",
    "All route_ids provided in the GTFS-rt feed must exist in the GTFS data",
    "does not exist in the GTFS data routes.txt",
);
pub static E005: ValidationRule = ValidationRule::new(
    "E005",
    Error,
    "stop_time_update contains only delay (no times) and GTFS stop_times.txt does not contain corresponding arrival and/or departure_time for that stop",
    "If only delay is provided in a stop_time_update arrival or departure (and not a time), then the GTFS stop_times.txt must contain arrival_times and/or departure_times for these corresponding stops",
    "has only delay but no stops_times.txt arrival and/or departure time",
);
pub static E006: ValidationRule = ValidationRule::new(
    "E006",
    Error,
    "Missing required trip field for frequency-based exact_times = 0",
    "Frequency-based exact_times=0 trip_updates must contain trip_id, start_time, and start_date",
    "which is required for frequency-based exact_times = 0 trips",
);
pub static E007: ValidationRule = ValidationRule::new(
    "E007",
    Error,
    "Trips with same vehicle_id are not in the same block",
    "If more than one trip_update has the same vehicle_id, then these trips must belong to the same GTFS trips.txt block_id",
    "do not belong to the same block but have the same vehicle_id",
);
pub static E008: ValidationRule = ValidationRule::new(
    "E008",
    Error,
    "trip_id not provided for blocks with reoccurring stop_ids",
    "If a GTFS block contains multiple references to the same stopId (i.e., the bus visits the same stopId more than once in the same block), but in different trips, then in the GTFS-rt data the tripId for each TripUpdate.TripDescriptor must be provided. In this case, the bus wouldn't visit the same stopId more than once in the same trip.",
    "does not have a trip_id but visits the same stop_id more than once in the block",
);
pub static E009: ValidationRule = ValidationRule::new(
    "E009",
    Error,
    "GTFS-rt stop_sequence isn't provided for trip that visits same stop_id more than once",
    "If a GTFS trip contains multiple references to the same stop_id (i.e., the vehicle visits the same stop_id more than once in the same trip), then GTFS-rt stop_time_updates for this trip must include stop_sequence",
    "more than once and GTFS-rt stop_time_update is missing stop_sequence field - stop_sequence must be provided",
);
pub static E010: ValidationRule = ValidationRule::new(
    "E010",
    Error,
    "location_type not 0 in stops.txt",
    "If location_type is used in stops.txt, all stops referenced in stop_times.txt must have location_type of 0",
    "is not location_type 0",
);
pub static E011: ValidationRule = ValidationRule::new(
    "E011",
    Error,
    "GTFS-rt stop_id does not exist in GTFS data",
    "All stop_ids referenced in GTFS-rt feeds must exist in GTFS stops.txt",
    "does not exist in GTFS data stops.txt",
);
pub static E012: ValidationRule = ValidationRule::new(
    "E012",
    Error,
    "Header timestamp should be greater than or equal to all other timestamps",
    "No timestamps for individual entities (TripUpdate, VehiclePosition) in the feeds should be greater than the header timestamp",
    "is greater than the header",
);
pub static E013: ValidationRule = ValidationRule::new(
    "E013",
    Error,
    "Frequency type 0 trip schedule_relationship should be UNSCHEDULED or empty",
    "For frequency-based exact_times=0 trips, schedule_relationship should be UNSCHEDULED or empty.",
    "schedule_relationship is not UNSCHEDULED or empty",
);
pub static E014: ValidationRule = ValidationRule::new(
    "E014",
    Error,
    "Predictions for trips are out-of-order in the block",
    "trip_updates for each trip in the feed must match the sequential order for the trips in the block. For example, if we have trip_ids 1, 2, and 3 that all belong to the same block, and the vehicle travels trip 1, then trip 2, and then trip 3, the trip_updates should occur in the GTFS-rt feed in the order trips 1, 2, and 3. For example, trip 3 predictions shouldn't occur in the feed prior to trip 2 predictions.",
    "predictions are not ordered by appearance in block",
);
pub static E015: ValidationRule = ValidationRule::new(
    "E015",
    Error,
    "All stop_ids referenced in GTFS-rt TripUpdates and VehiclePositions feeds must have the location_type = 0",
    "All stop_ids referenced in GTFS-rt TripUpdates and VehiclePositions feeds must have the location_type = 0 in GTFS stops.txt",
    "does not have location_type=0 in GTFS stops.txt",
);
pub static E016: ValidationRule = ValidationRule::new(
    "E016",
    Error,
    "trip_ids with schedule_relationship ADDED must not be in GTFS data",
    "Trips that have a schedule_relationship of ADDED must not be included in the GTFS data",
    "has a schedule_relationship of ADDED but exists in the GTFS data",
);
pub static E017: ValidationRule = ValidationRule::new(
    "E017",
    Error,
    "GTFS-rt content changed but has the same header timestamp",
    "The GTFS-rt header timestamp value should always change if the feed contents change - the feed contents must not change without updating the header timestamp",
    "was the same for this and the previous feed iteration but the feed content was not the same",
);
pub static E018: ValidationRule = ValidationRule::new(
    "E018",
    Error,
    "GTFS-rt header timestamp decreased between two sequential iterations",
    "The GTFS-rt header timestamp should be monotonically increasing -  it should always be the same value or greater than previous feed iterations if the feed contents are different",
    "from the previous feed iteration",
);
pub static E019: ValidationRule = ValidationRule::new(
    "E019",
    Error,
    "GTFS-rt frequency type 1 trip start_time must be a multiple of GTFS headway_secs later than GTFS start_time",
    "For frequency-based trips defined in frequencies.txt with exact_times = 1, the GTFS-rt trip start_time must be some multiple (including zero) of headway_secs later than the start_time in file frequencies.txt for the corresponding time period.  Note that this doesn't not apply to frequency-based trips defined in frequencies.txt with exact_times = 0.",
    "- the GTFS-rt start_time is not a multiple of headway_secs later than GTFS start_time",
);
pub static E020: ValidationRule = ValidationRule::new(
    "E020",
    Error,
    "Invalid start_time format",
    "start_time must be in the format HH:MM:SS or H:MM:SS",
    "which is not the valid format of HH:MM:SS or H:MM:SS",
);
pub static E021: ValidationRule = ValidationRule::new(
    "E021",
    Error,
    "Invalid start_date format",
    "start_date must be in the YYYYMMDD format",
    "which is not the valid format of YYYYMMDD",
);
pub static E022: ValidationRule = ValidationRule::new(
    "E022",
    Error,
    "Sequential stop_time_update times are not increasing",
    "stop_time_update arrival/departure times between sequential stops should always increase - they should never be the same or decrease.",
    "- times must increase between two sequential stops",
);
pub static E023: ValidationRule = ValidationRule::new(
    "E023",
    Error,
    "trip start_time does not match first GTFS arrival_time",
    "For normal scheduled trips (i.e., not defined in frequencies.txt), the GTFS-realtime trip start_time must match the first GTFS arrival_time in stop_times.txt for this trip",
    "- times do not match",
);
pub static E024: ValidationRule = ValidationRule::new(
    "E024",
    Error,
    "trip direction_id does not match GTFS data",
    "GTFS-rt trip direction_id must match the direction_id in GTFS trips.txt",
    "- direction_id does not match",
);
pub static E025: ValidationRule = ValidationRule::new(
    "E025",
    Error,
    "stop_time_update departure time is before arrival time",
    "Within the same stop_time_update, arrival and departures times can be the same, or the departure time can be later than the arrival time - the departure time should never come before the arrival time.",
    "- departure time must be equal to or greater than arrival time",
);
pub static E026: ValidationRule = ValidationRule::new(
    "E026",
    Error,
    "Invalid vehicle position",
    "Vehicle position latitude must be between -90 and 90 (inclusive), and vehicle longitude must be between -180  and 180 (inclusive)",
    "- these are invalid WGS84 coordinates",
);
pub static E027: ValidationRule = ValidationRule::new(
    "E027",
    Error,
    "Invalid vehicle bearing",
    "Vehicle bearing must be between 0 and 360 degrees (inclusive)",
    "- bearing must be between 0 and 360 degrees (inclusive)",
);
pub static E028: ValidationRule = ValidationRule::new(
    "E028",
    Error,
    "Vehicle position outside agency coverage area",
    "The vehicle position should be inside the agency coverage area.  This is defined as within roughly 1/8 of a mile (200 meters) of the GTFS shapes.txt data, or stops.txt locations if the GTFS feed doesn't include shapes.txt.",
    "- vehicle should be within area",
);
pub static E029: ValidationRule = ValidationRule::new(
    "E029",
    Error,
    "Vehicle position far from trip shape",
    "The vehicle position should be within a certain distance of the GTFS shapes.txt data for the current trip unless there is a Service Alert with the Effect of DETOUR for this trip_id.",
    "- vehicle should be near trip shape or on DETOUR",
);
pub static E030: ValidationRule = ValidationRule::new(
    "E030",
    Error,
    "GTFS-rt alert trip_id does not belong to GTFS-rt alert route_id in GTFS trips.txt",
    "The alert.informed_entity.trip.trip_id should belong to the specified alert.informed_entity.route_id in GTFS trips.txt",
    "- informed_entity.route_id must match GTFS data",
);
pub static E031: ValidationRule = ValidationRule::new(
    "E031",
    Error,
    "Alert informed_entity.route_id does not match informed_entity.trip.route_id",
    "The alert.informed_entity.trip.route_id should be the same as the specified alert-informed_entity.route_id.",
    "- routes_ids must be the same",
);
pub static E032: ValidationRule = ValidationRule::new(
    "E032",
    Error,
    "Alert does not have an informed_entity",
    "All alerts must have at least one informed_entity.",
    "- alerts must have at least one informed_entity",
);
pub static E033: ValidationRule = ValidationRule::new(
    "E033",
    Error,
    "Alert informed_entity does not have any specifiers",
    "Alert informed_entity should have at least one specified value (route_id, trip_id, stop_id, etc) to which the alert applies.",
    "- alert informed_entity should have at least one specified value",
);
pub static E034: ValidationRule = ValidationRule::new(
    "E034",
    Error,
    "GTFS-rt agency_id does not exist in GTFS data",
    "All agency_ids provided in the GTFS-rt alert.informed_entity.agency_id should also exist in GTFS agency.txt",
    "does not exist in the GTFS data agency.txt",
);
pub static E035: ValidationRule = ValidationRule::new(
    "E035",
    Error,
    "GTFS-rt trip.trip_id does not belong to GTFS-rt trip.route_id in GTFS trips.txt",
    "The GTFS-rt trip.trip_id should belong to the specified trip.route_id in GTFS trips.txt",
    "in GTFS trips.txt",
);
pub static E036: ValidationRule = ValidationRule::new(
    "E036",
    Error,
    "Sequential stop_time_updates have the same stop_sequence",
    "Sequential GTFS-rt trip stop_time_updates should never have the same stop_sequence",
    "- stop_sequence must increase for each stop_time_update",
);
pub static E037: ValidationRule = ValidationRule::new(
    "E037",
    Error,
    "Sequential stop_time_updates have the same stop_id",
    "Sequential GTFS-rt trip stop_time_updates shouldn't have the same stop_id",
    "- sequential stop_ids should be different",
);
pub static E038: ValidationRule = ValidationRule::new(
    "E038",
    Error,
    "Invalid header.gtfs_realtime_version",
    "header.gtfs_realtime_version should be a valid value",
    "is invalid",
);
pub static E039: ValidationRule = ValidationRule::new(
    "E039",
    Error,
    "FULL_DATASET feeds should not include entity.is_deleted",
    "The entity.is_deleted field should only be included in GTFS-rt feeds with header.incrementality of DIFFERENTIAL",
    "- FULL_DATASET feeds should not include is_deleted field",
);
pub static E040: ValidationRule = ValidationRule::new(
    "E040",
    Error,
    "stop_time_update doesn't contain stop_id or stop_sequence",
    "All stop_time_updates must contain stop_id or stop_sequence - both fields cannot be left blank",
    "doesn't contain stop_id or stop_sequence",
);
pub static E041: ValidationRule = ValidationRule::new(
    "E041",
    Error,
    "trip doesn't have any stop_time_updates",
    "Unless a trip's schedule_relationship is CANCELED, a trip must have at least one stop_time_update",
    "doesn't have any stop_time_updates and isn't CANCELED",
);
pub static E042: ValidationRule = ValidationRule::new(
    "E042",
    Error,
    "arrival or departure provided for NO_DATA stop_time_update",
    "If a stop_time_update has a schedule_relationship of NO_DATA, then neither arrival nor departure should be provided",
    "and schedule_relationship of NO_DATA",
);
pub static E043: ValidationRule = ValidationRule::new(
    "E043",
    Error,
    "stop_time_update doesn't have arrival or departure",
    "If a stop_time_update doesn't have a schedule_relationship of SKIPPED or NO_DATA, then either arrival or departure must be provided",
    "doesn't have arrival or departure",
);
pub static E044: ValidationRule = ValidationRule::new(
    "E044",
    Error,
    "stop_time_update arrival/departure doesn't have delay or time",
    "stop_time_update.arrival and stop_time_update.departure must have either delay or time - both fields cannot be missing",
    "doesn't have delay or time",
);
pub static E045: ValidationRule = ValidationRule::new(
    "E045",
    Error,
    "GTFS-rt stop_time_update stop_sequence and stop_id do not match GTFS",
    "If GTFS-rt stop_time_update contains both stop_sequence and stop_id, the values must match the GTFS data in stop_times.txt",
    "- stop_ids should be the same",
);
pub static E046: ValidationRule = ValidationRule::new(
    "E046",
    Error,
    "GTFS-rt stop_time_update without time doesn't have arrival/departure_time in GTFS",
    "If only delay is provided in a stop_time_update arrival or departure (and not a time), then the GTFS stop_times.txt must contain arrival_times and/or departure_times for these corresponding stops.",
    "isn't set and GTFS doesn't have arrival/departure_time in stop_times.txt",
);
pub static E047: ValidationRule = ValidationRule::new(
    "E047",
    Error,
    "VehiclePosition and TripUpdate ID pairing mismatch",
    "If separate `VehiclePositions` and `TripUpdates` feeds are provided, `VehicleDescriptor` or `TripDescriptor` ID value pairing should match between the two feeds.",
    "- ID pairing between feeds should match",
);
pub static E048: ValidationRule = ValidationRule::new(
    "E048",
    Error,
    "header timestamp not populated",
    "Header timestamp must be populated for gtfs_realtime_version v2.0 and higher",
    "Header does not have a timestamp and gtfs_realtime_version is v2.0 or higher",
);
pub static E049: ValidationRule = ValidationRule::new(
    "E049",
    Error,
    "header incrementality not populated",
    "Header incrementality must be populated for gtfs_realtime_version v2.0 and higher",
    "Header does not have incrementality and gtfs_realtime_version is v2.0 or higher",
);
pub static E050: ValidationRule = ValidationRule::new(
    "E050",
    Error,
    "timestamp is in the future",
    "All timestamps must be less than the current time",
    "- the current time in milliseconds",
);
pub static E051: ValidationRule = ValidationRule::new(
    "E051",
    Error,
    "GTFS-rt stop_sequence not found in GTFS data",
    "All stop_time_update stop_sequences in GTFS-realtime data must appear in GTFS stop_times.txt for that trip",
    "that does not exist in GTFS stop_times.txt for this trip",
);
pub static E052: ValidationRule = ValidationRule::new(
    "E052",
    Error,
    "vehicle.id is not unique",
    "Each vehicle should have a unique ID",
    "which is used by more than one vehicle in the feed",
);

/// Every rule in catalog order, warnings first.
pub static ALL_RULES: [&ValidationRule; 61] = [
    &W001, &W002, &W003, &W004, &W005, &W006, &W007, &W008, &W009, &E001, &E002, &E003, &E004,
    &E005, &E006, &E007, &E008, &E009, &E010, &E011, &E012, &E013, &E014, &E015, &E016, &E017,
    &E018, &E019, &E020, &E021, &E022, &E023, &E024, &E025, &E026, &E027, &E028, &E029, &E030,
    &E031, &E032, &E033, &E034, &E035, &E036, &E037, &E038, &E039, &E040, &E041, &E042, &E043,
    &E044, &E045, &E046, &E047, &E048, &E049, &E050, &E051, &E052,
];

/// Looks up a rule by its identifier, e.g. `"E002"`.
pub fn find(id: &str) -> Option<&'static ValidationRule> {
    ALL_RULES.iter().copied().find(|r| r.id == id)
}
