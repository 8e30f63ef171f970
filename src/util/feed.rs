//! Helpers for naming feed elements in occurrence locators and for reading
//! header fields.

use crate::gtfs_rt::{
    FeedEntity, FeedHeader, Position, TripDescriptor, VehicleDescriptor, VehiclePosition,
    trip_descriptor, trip_update::StopTimeUpdate,
};

pub const GTFS_RT_V1: &str = "1.0";
pub const GTFS_RT_V2: &str = "2.0";

/// metres per second to miles per hour
pub const MPS_TO_MPH: f32 = 2.236_94;

pub fn is_valid_version(header: &FeedHeader) -> bool {
    let v = header.gtfs_realtime_version.as_str();
    v == GTFS_RT_V1 || v == GTFS_RT_V2
}

/// Numeric comparison of the header version; an unparseable version is treated
/// as v2.0 or higher so the stricter header rules apply.
pub fn is_v2_or_higher(header: &FeedHeader) -> bool {
    header
        .gtfs_realtime_version
        .trim()
        .parse::<f32>()
        .map(|v| v >= 2.0)
        .unwrap_or(true)
}

pub fn is_added_trip(trip: &TripDescriptor) -> bool {
    trip.schedule_relationship.is_some()
        && trip.schedule_relationship() == trip_descriptor::ScheduleRelationship::Added
}

/// `"trip_id X"`, or `"entity ID Y"` when the descriptor has no trip_id.
pub fn trip_locator(entity: &FeedEntity, trip: &TripDescriptor) -> String {
    match &trip.trip_id {
        Some(id) => format!("trip_id {}", id),
        None => format!("entity ID {}", entity.id),
    }
}

/// `"vehicle.id X"`, or `"entity ID Y"` when no vehicle id is present.
pub fn vehicle_locator(entity: &FeedEntity, vehicle: Option<&VehicleDescriptor>) -> String {
    match vehicle.and_then(|v| v.id.as_ref()) {
        Some(id) => format!("vehicle.id {}", id),
        None => format!("entity ID {}", entity.id),
    }
}

/// `"stop_sequence N"`, falling back to `"stop_id X"`.
pub fn stop_time_update_locator(stu: &StopTimeUpdate) -> String {
    match stu.stop_sequence {
        Some(seq) => format!("stop_sequence {}", seq),
        None => format!("stop_id {}", stu.stop_id()),
    }
}

/// `"vehicle_id X trip_id Y"` for a vehicle position.
pub fn vehicle_and_trip_ids(vp: &VehiclePosition) -> String {
    format!(
        "vehicle_id {} trip_id {}",
        vp.vehicle.as_ref().map(|v| v.id()).unwrap_or_default(),
        vp.trip.as_ref().map(|t| t.trip_id()).unwrap_or_default()
    )
}

pub fn vehicle_id(vp: &VehiclePosition) -> &str {
    vp.vehicle.as_ref().map(|v| v.id()).unwrap_or_default()
}

pub fn is_position_valid(position: &Position) -> bool {
    (-90.0..=90.0).contains(&position.latitude) && (-180.0..=180.0).contains(&position.longitude)
}

pub fn is_bearing_valid(position: &Position) -> bool {
    position.bearing.is_none_or(|b| (0.0..=360.0).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions() {
        assert!(is_valid_version(&header("1.0")));
        assert!(is_valid_version(&header("2.0")));
        assert!(!is_valid_version(&header("2")));
        assert!(!is_valid_version(&header("")));

        assert!(!is_v2_or_higher(&header("1.0")));
        assert!(is_v2_or_higher(&header("2.0")));
        assert!(is_v2_or_higher(&header("2.1")));
        assert!(is_v2_or_higher(&header("abc")));
    }

    #[test]
    fn test_locators() {
        let entity = FeedEntity {
            id: "e1".to_string(),
            ..Default::default()
        };
        let with_id = TripDescriptor {
            trip_id: Some("42".to_string()),
            ..Default::default()
        };
        assert_eq!(trip_locator(&entity, &with_id), "trip_id 42");
        assert_eq!(
            trip_locator(&entity, &TripDescriptor::default()),
            "entity ID e1"
        );
        assert_eq!(vehicle_locator(&entity, None), "entity ID e1");

        let stu = StopTimeUpdate {
            stop_id: Some("A".to_string()),
            ..Default::default()
        };
        assert_eq!(stop_time_update_locator(&stu), "stop_id A");
    }

    #[test]
    fn test_position_and_bearing() {
        let mut p = Position {
            latitude: 28.0,
            longitude: -82.0,
            ..Default::default()
        };
        assert!(is_position_valid(&p));
        assert!(is_bearing_valid(&p));

        p.bearing = Some(361.0);
        assert!(!is_bearing_valid(&p));

        p.latitude = 91.0;
        assert!(!is_position_valid(&p));
    }

    fn header(version: &str) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: version.to_string(),
            ..Default::default()
        }
    }
}
