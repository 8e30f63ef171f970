use geo::{
    BoundingRect, Closest, ClosestPoint, HaversineDestination, HaversineDistance, Intersects,
    LineString, MultiPoint, Point, Rect,
};

/// Buffer around the stop or shape extent that still counts as agency coverage.
pub const REGION_BUFFER_METRES: f64 = 1609.0;
/// Maximum distance a vehicle may stray from its trip shape.
pub const TRIP_BUFFER_METRES: f64 = 200.0;

/// Smallest rectangle enclosing `points`, or `None` for an empty set.
pub fn bounding_box(points: Vec<Point>) -> Option<Rect> {
    MultiPoint::from(points).bounding_rect()
}

/// Grows `rect` by at least `buffer_metres` in every direction.
pub fn buffered(rect: Rect, buffer_metres: f64) -> Rect {
    // pythagoras, so the corner offset covers the buffer on both axes
    let corner_distance = (buffer_metres.powi(2) * 2.0).sqrt();

    Rect::new(
        Point::from(rect.min()).haversine_destination(225., corner_distance),
        Point::from(rect.max()).haversine_destination(45., corner_distance),
    )
}

/// True when `point` lies inside or on the edge of `rect`.
pub fn within(rect: &Rect, point: &Point) -> bool {
    rect.intersects(point)
}

/// Great-circle distance in metres from `point` to the nearest point on `line`.
pub fn distance_to_line(line: &LineString, point: &Point) -> Option<f64> {
    match line.closest_point(point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Some(p.haversine_distance(point)),
        Closest::Indeterminate => None,
    }
}
