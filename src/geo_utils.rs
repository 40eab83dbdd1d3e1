//! Geographic utilities shared by the oracle implementations.

use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, Line, Point};

use crate::GpsPoint;

/// Approximate meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance between two GPS points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Convert a distance in meters to degrees at the given latitude.
///
/// Uses the longitude scale (the larger of the two degree spans) so a search
/// box built from it never undershoots.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let cos_lat = latitude.to_radians().cos().abs().max(0.01);
    meters / (METERS_PER_DEGREE * cos_lat)
}

/// Closest point to `p` on the segment `a`-`b`.
///
/// Projection happens in lon/lat space, which is accurate enough at road edge
/// scale. Degenerate (zero-length) segments return `a`.
pub fn closest_point_on_segment(p: &GpsPoint, a: &GpsPoint, b: &GpsPoint) -> GpsPoint {
    let line = Line::new(
        Coord {
            x: a.longitude,
            y: a.latitude,
        },
        Coord {
            x: b.longitude,
            y: b.latitude,
        },
    );
    match line.closest_point(&Point::new(p.longitude, p.latitude)) {
        Closest::Intersection(c) | Closest::SinglePoint(c) => GpsPoint::new(c.y(), c.x()),
        Closest::Indeterminate => *a,
    }
}
