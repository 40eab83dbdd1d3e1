//! Interfaces to the external collaborators: the distance oracle and the map
//! matcher.
//!
//! Both are consumed, not implemented, by the timing algorithms.
//! [`RoadNetwork`](crate::RoadNetwork) is the production distance oracle;
//! [`HaversineOracle`] is a straight-line stand-in for network-free use.

use crate::error::Result;
use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, MatchedPath, Trajectory};

/// Shortest road-network distance between two points.
///
/// Implementations must be read-only so a single oracle can serve concurrent
/// queries from the batch driver.
pub trait DistanceOracle {
    /// Path length in meters from `from` to `to`, or
    /// [`TimingError::NoPath`](crate::TimingError::NoPath).
    fn distance(&self, from: &GpsPoint, to: &GpsPoint) -> Result<f64>;
}

impl<T: DistanceOracle + ?Sized> DistanceOracle for &T {
    fn distance(&self, from: &GpsPoint, to: &GpsPoint) -> Result<f64> {
        (**self).distance(from, to)
    }
}

/// Great-circle distance, ignoring the road network. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineOracle;

impl DistanceOracle for HaversineOracle {
    fn distance(&self, from: &GpsPoint, to: &GpsPoint) -> Result<f64> {
        Ok(haversine_distance(from, to))
    }
}

/// Aligns a raw trajectory onto the road network.
///
/// Failures are reported as [`TimingError::NoMatch`](crate::TimingError::NoMatch);
/// the batch driver skips the trajectory and continues.
pub trait MapMatcher {
    fn match_trajectory(&self, trajectory: &Trajectory) -> Result<MatchedPath>;
}

impl<T: MapMatcher + ?Sized> MapMatcher for &T {
    fn match_trajectory(&self, trajectory: &Trajectory) -> Result<MatchedPath> {
        (**self).match_trajectory(trajectory)
    }
}
