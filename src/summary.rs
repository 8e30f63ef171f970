use serde::Serialize;

use crate::gtfs_rt::FeedMessage;

/// Entity counts for one decoded feed message.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub header_timestamp: Option<u64>,
    pub total_entities: usize,

    // entity types
    pub trip_updates: usize,
    pub vehicles: usize,
    pub alerts: usize,

    // vehicle fields
    pub with_position: usize,
    pub with_speed: usize,
    pub with_vehicle_id: usize,
    pub with_timestamp: usize,
}

impl FeedSummary {
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedSummary {
            header_timestamp: feed.header.timestamp,
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if e.trip_update.is_some() {
                s.trip_updates += 1;
            }

            if e.alert.is_some() {
                s.alerts += 1;
            }

            if let Some(v) = &e.vehicle {
                s.vehicles += 1;

                if let Some(pos) = &v.position {
                    s.with_position += 1;

                    if pos.speed.is_some() {
                        s.with_speed += 1;
                    }
                }

                if v.vehicle.as_ref().is_some_and(|d| d.id.is_some()) {
                    s.with_vehicle_id += 1;
                }

                if v.timestamp.is_some() {
                    s.with_timestamp += 1;
                }
            }
        }

        s
    }

    /// Number of distinct entity kinds present.
    pub fn entity_kinds(&self) -> usize {
        [self.trip_updates, self.vehicles, self.alerts]
            .iter()
            .filter(|&&n| n > 0)
            .count()
    }

    /// A combined feed carries more than one kind of entity.
    pub fn is_combined(&self) -> bool {
        self.entity_kinds() > 1
    }
}

/// Returns true when `feed` contains more than one of trip updates, vehicle
/// positions and alerts.
pub fn is_combined_feed(feed: &FeedMessage) -> bool {
    let mut tu = false;
    let mut vp = false;
    let mut sa = false;
    for e in &feed.entity {
        tu |= e.trip_update.is_some();
        vp |= e.vehicle.is_some();
        sa |= e.alert.is_some();
        if (tu as u8 + vp as u8 + sa as u8) > 1 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::{
        Alert, FeedEntity, FeedHeader, Position, TripDescriptor, TripUpdate, VehicleDescriptor,
        VehiclePosition,
    };

    #[test]
    fn test_from_feed_empty() {
        let summary = FeedSummary::from_feed(&create_feed(vec![]));

        assert_eq!(summary.total_entities, 0);
        assert_eq!(summary.entity_kinds(), 0);
        assert!(!summary.is_combined());
    }

    #[test]
    fn test_from_feed_with_vehicle() {
        let feed = create_feed(vec![FeedEntity {
            id: "v1".to_string(),
            vehicle: Some(VehiclePosition {
                vehicle: Some(VehicleDescriptor {
                    id: Some("bus-1".to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: 42.0,
                    longitude: -71.0,
                    bearing: Some(180.0),
                    speed: Some(10.5),
                    odometer: None,
                }),
                timestamp: Some(1234567890),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let summary = FeedSummary::from_feed(&feed);

        assert_eq!(summary.total_entities, 1);
        assert_eq!(summary.vehicles, 1);
        assert_eq!(summary.with_position, 1);
        assert_eq!(summary.with_speed, 1);
        assert_eq!(summary.with_vehicle_id, 1);
        assert_eq!(summary.with_timestamp, 1);
        assert_eq!(summary.header_timestamp, Some(1234567890));
    }

    #[test]
    fn test_combined_detection() {
        let single = create_feed(vec![trip_update_entity("1"), trip_update_entity("2")]);
        assert!(!is_combined_feed(&single));
        assert!(!FeedSummary::from_feed(&single).is_combined());

        let combined = create_feed(vec![trip_update_entity("1"), alert_entity("2")]);
        assert!(is_combined_feed(&combined));
        assert!(FeedSummary::from_feed(&combined).is_combined());
    }

    // Helper functions for tests
    fn create_feed(entity: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1234567890),
                incrementality: None,
                feed_version: None,
            },
            entity,
        }
    }

    fn trip_update_entity(id: &str) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            trip_update: Some(TripUpdate {
                trip: TripDescriptor::default(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn alert_entity(id: &str) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            alert: Some(Alert::default()),
            ..Default::default()
        }
    }
}
