use chrono_tz::Tz;
use geo::{LineString, Point, Rect};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;
use tracing::{info, warn};

use super::dataset::StaticDataset;
use super::model::{Frequency, StopTime, Trip};
use crate::parser::FeedDigest;
use crate::util::geo::{REGION_BUFFER_METRES, bounding_box, buffered};

/// Lookup indices derived once from a [`StaticDataset`] and shared read-only by
/// every validator and every iteration of feeds that reference the dataset.
#[derive(Debug)]
pub struct StaticScheduleMetadata {
    pub digest: FeedDigest,
    pub timezone: Tz,

    pub agency_ids: HashSet<String>,
    pub route_ids: HashSet<String>,
    pub trip_ids: HashSet<String>,
    pub stop_ids: HashSet<String>,
    /// Only stops with an explicit location_type appear here.
    pub stop_location_types: HashMap<String, u32>,
    /// Stops referenced by stop_times.txt, ordered.
    pub referenced_stop_ids: BTreeSet<String>,

    pub trips: HashMap<String, Trip>,
    /// Stop times per trip, sorted by stop_sequence.
    pub trip_stop_times: HashMap<String, Vec<StopTime>>,
    /// Trips that visit at least one stop_id more than once, with the repeated stops.
    pub trips_with_repeated_stops: HashMap<String, Vec<String>>,

    pub exact_times_zero_trip_ids: HashSet<String>,
    /// exact_times = 1 frequency windows per trip, sorted by start_time.
    pub exact_times_one_trips: HashMap<String, Vec<Frequency>>,

    pub stop_bounding_box: Option<Rect>,
    pub shape_bounding_box: Option<Rect>,
    pub trip_shapes: HashMap<String, LineString>,
}

impl StaticScheduleMetadata {
    /// Builds all indices in a single pass over each table.
    ///
    /// Shapes are skipped when `ignore_shapes` is set or when shapes.txt has
    /// too few points to describe a route.
    pub fn build(dataset: &StaticDataset, ignore_shapes: bool) -> Self {
        let started = Instant::now();

        let agency_ids = dataset
            .agencies
            .iter()
            .filter_map(|a| a.agency_id.clone())
            .collect();
        let route_ids = dataset.routes.iter().map(|r| r.route_id.clone()).collect();

        // shapes.txt
        let mut shape_points: HashMap<&str, Vec<(u32, Point)>> = HashMap::new();
        let mut shape_bounding_box = None;
        if !ignore_shapes && dataset.shapes.len() > 3 {
            for p in &dataset.shapes {
                shape_points
                    .entry(p.shape_id.as_str())
                    .or_default()
                    .push((p.shape_pt_sequence, Point::new(p.shape_pt_lon, p.shape_pt_lat)));
            }
            for points in shape_points.values_mut() {
                points.sort_by_key(|(seq, _)| *seq);
            }
            let all = dataset
                .shapes
                .iter()
                .map(|p| Point::new(p.shape_pt_lon, p.shape_pt_lat))
                .collect();
            shape_bounding_box = bounding_box(all).map(|r| buffered(r, REGION_BUFFER_METRES));
        }

        // stop_times.txt
        let mut referenced_stop_ids = BTreeSet::new();
        let mut trip_stop_times: HashMap<String, Vec<StopTime>> = HashMap::new();
        for st in &dataset.stop_times {
            referenced_stop_ids.insert(st.stop_id.clone());
            trip_stop_times
                .entry(st.trip_id.clone())
                .or_default()
                .push(st.clone());
        }
        let mut trips_with_repeated_stops = HashMap::new();
        for (trip_id, stop_times) in trip_stop_times.iter_mut() {
            stop_times.sort_by_key(|st| st.stop_sequence);

            let mut seen = HashSet::new();
            let repeated: Vec<String> = stop_times
                .iter()
                .filter(|st| !seen.insert(st.stop_id.as_str()))
                .map(|st| st.stop_id.clone())
                .collect();
            if !repeated.is_empty() {
                trips_with_repeated_stops.insert(trip_id.clone(), repeated);
            }
        }

        // trips.txt
        let mut trip_ids = HashSet::new();
        let mut trips = HashMap::new();
        let mut trip_shapes = HashMap::new();
        for trip in &dataset.trips {
            trip_ids.insert(trip.trip_id.clone());
            if let Some(points) = trip
                .shape_id
                .as_deref()
                .filter(|s| !s.is_empty())
                .and_then(|s| shape_points.get(s))
            {
                let line: LineString = points.iter().map(|(_, p)| p.0).collect();
                trip_shapes.insert(trip.trip_id.clone(), line);
            }
            trips.insert(trip.trip_id.clone(), trip.clone());
        }

        // stops.txt
        let mut stop_ids = HashSet::new();
        let mut stop_location_types = HashMap::new();
        let mut stop_points = Vec::new();
        for stop in &dataset.stops {
            stop_ids.insert(stop.stop_id.clone());
            if let Some(location_type) = stop.location_type {
                stop_location_types.insert(stop.stop_id.clone(), location_type);
            }
            if let (Some(lat), Some(lon)) = (stop.stop_lat, stop.stop_lon) {
                stop_points.push(Point::new(lon, lat));
            }
        }
        let stop_bounding_box =
            bounding_box(stop_points).map(|r| buffered(r, REGION_BUFFER_METRES));

        // frequencies.txt
        let mut exact_times_zero_trip_ids = HashSet::new();
        let mut exact_times_one_trips: HashMap<String, Vec<Frequency>> = HashMap::new();
        for f in &dataset.frequencies {
            match f.exact_times.unwrap_or(0) {
                0 => {
                    exact_times_zero_trip_ids.insert(f.trip_id.clone());
                }
                1 => exact_times_one_trips
                    .entry(f.trip_id.clone())
                    .or_default()
                    .push(f.clone()),
                other => warn!(trip_id = %f.trip_id, exact_times = other, "Unknown exact_times value"),
            }
        }
        for windows in exact_times_one_trips.values_mut() {
            windows.sort_by_key(|f| f.start_time);
        }

        let m = StaticScheduleMetadata {
            digest: dataset.digest,
            timezone: agency_timezone(dataset),
            agency_ids,
            route_ids,
            trip_ids,
            stop_ids,
            stop_location_types,
            referenced_stop_ids,
            trips,
            trip_stop_times,
            trips_with_repeated_stops,
            exact_times_zero_trip_ids,
            exact_times_one_trips,
            stop_bounding_box,
            shape_bounding_box,
            trip_shapes,
        };

        info!(
            digest = %m.digest,
            trips = m.trip_ids.len(),
            trip_shapes = m.trip_shapes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built static schedule metadata"
        );
        m
    }

    pub fn is_frequency_trip(&self, trip_id: &str) -> bool {
        self.exact_times_zero_trip_ids.contains(trip_id)
            || self.exact_times_one_trips.contains_key(trip_id)
    }

    /// The area a vehicle is expected to stay within: the shape extent when
    /// shapes are loaded, otherwise the stop extent.
    pub fn coverage_area(&self) -> Option<&Rect> {
        self.shape_bounding_box
            .as_ref()
            .or(self.stop_bounding_box.as_ref())
    }
}

fn agency_timezone(dataset: &StaticDataset) -> Tz {
    dataset
        .agencies
        .first()
        .and_then(|a| match a.agency_timezone.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!(timezone = %a.agency_timezone, "Unknown agency timezone, using UTC");
                None
            }
        })
        .unwrap_or(chrono_tz::UTC)
}
