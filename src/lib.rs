//! # Path Timing
//!
//! Dense timestamp and speed estimates for map-matched GPS trajectories.
//!
//! Raw GPS probes arrive sparsely (taxi fleets often report once every few
//! minutes). After map matching, a trajectory is an ordered list of road edges,
//! some of which carry matched observations and many of which carry none. This
//! library reconstructs when the vehicle passed each intermediate node and what
//! speed it held on each edge.
//!
//! This library provides:
//! - An anchor walker over matched paths (first/last observation per edge)
//! - Node timestamp interpolation between anchors
//! - Per-edge speed/timestamp segmentation with proportional distribution
//!   over unobserved edges
//! - A batch driver that isolates per-trajectory failures
//! - A road network distance oracle (snapping + bounded Dijkstra)
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel batch processing with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use path_timing::{
//!     interpolate_node_timestamps, EdgeMatch, GpsPoint, HaversineOracle, MatchedPath,
//!     NetworkNode, Observation, RawPoint, TimingConfig,
//! };
//!
//! let n1 = NetworkNode::new(1, GpsPoint::new(0.0, 0.000));
//! let n2 = NetworkNode::new(2, GpsPoint::new(0.0, 0.001));
//! let n3 = NetworkNode::new(3, GpsPoint::new(0.0, 0.002));
//!
//! let obs = |edge_id, lng, t| {
//!     let p = GpsPoint::new(0.0, lng);
//!     Observation::new(RawPoint::new(p, t), p, edge_id)
//! };
//!
//! let path = MatchedPath::new(
//!     7,
//!     vec![
//!         EdgeMatch::new(10, n1, n2).with_observations(vec![obs(10, 0.0002, 0)]),
//!         EdgeMatch::new(11, n2, n3).with_observations(vec![obs(11, 0.0018, 20_000)]),
//!     ],
//! );
//!
//! let result = interpolate_node_timestamps(&path, &HaversineOracle, &TimingConfig::default())
//!     .unwrap();
//! // Node 2 (between the anchors) and node 3 (trailing boundary)
//! assert_eq!(result.records.len(), 2);
//! assert!(result.records[0].timestamp > 0 && result.records[0].timestamp < 20_000);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TimingError};

// Geographic utilities (distance, projection)
pub mod geo_utils;

// Distance oracle and map matcher interfaces
pub mod oracle;
pub use oracle::{DistanceOracle, HaversineOracle, MapMatcher};

// Road network distance oracle
pub mod network;
pub use network::{EdgeSnap, NetworkConfig, RoadEdge, RoadNetwork};

// Anchor walker over matched paths
pub mod anchors;
pub use anchors::{collect_anchors, Anchor, AnchorWalker};

// Node timestamp interpolation
pub mod interpolate;
pub use interpolate::{interpolate_node_timestamps, NodeInterpolation, SkippedNode};

// Edge speed/timestamp segmentation
pub mod segments;
pub use segments::{
    distribute_span, segment_edges, EdgeSegmentation, SkippedSegment, SpanDistribution,
    SpanPiece,
};

// Batch driver over many trajectories
pub mod batch;
pub use batch::{
    process_matched_paths, process_path, process_trajectories, BatchResult, BatchStats,
    CancelToken, TrajectoryFailure, TrajectoryTiming,
};
#[cfg(feature = "parallel")]
pub use batch::{process_matched_paths_parallel, process_trajectories_parallel};

// Flat-file readers and writers
pub mod io;

#[cfg(test)]
pub(crate) mod fixtures;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a trajectory (one trip of one vehicle).
pub type TrajectoryId = u64;
/// Identifier of the entity (vehicle, taxi) that owns a trajectory.
pub type EntityId = u64;
/// Identifier of a road network node.
pub type NodeId = u64;
/// Identifier of a directed road network edge.
pub type EdgeId = u64;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use path_timing::GpsPoint;
/// let point = GpsPoint::new(-3.7319, -38.5267); // Fortaleza
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A raw GPS fix: position plus timestamp in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub position: GpsPoint,
    pub timestamp: i64,
}

impl RawPoint {
    pub fn new(position: GpsPoint, timestamp: i64) -> Self {
        Self {
            position,
            timestamp,
        }
    }
}

/// A raw trajectory as read from the input file, before map matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: TrajectoryId,
    /// Owning vehicle/taxi
    pub entity_id: EntityId,
    /// Time-ordered raw fixes
    pub points: Vec<RawPoint>,
}

impl Trajectory {
    pub fn new(id: TrajectoryId, entity_id: EntityId) -> Self {
        Self {
            id,
            entity_id,
            points: Vec::new(),
        }
    }

    pub fn add_point(&mut self, latitude: f64, longitude: f64, timestamp: i64) {
        self.points
            .push(RawPoint::new(GpsPoint::new(latitude, longitude), timestamp));
    }
}

/// A road network node with a fixed position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: NodeId,
    pub position: GpsPoint,
}

impl NetworkNode {
    pub fn new(id: NodeId, position: GpsPoint) -> Self {
        Self { id, position }
    }
}

/// A raw GPS fix snapped onto a road edge by the map matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The original fix, including its timestamp
    pub raw: RawPoint,
    /// Position on the road network
    pub snapped: GpsPoint,
    /// Edge the fix was snapped to
    pub edge_id: EdgeId,
}

impl Observation {
    pub fn new(raw: RawPoint, snapped: GpsPoint, edge_id: EdgeId) -> Self {
        Self {
            raw,
            snapped,
            edge_id,
        }
    }

    /// Timestamp of the original fix (milliseconds).
    pub fn timestamp(&self) -> i64 {
        self.raw.timestamp
    }
}

/// One directed road edge traversed by a matched trajectory.
///
/// Observations are time-ordered. An edge with no observations is "empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMatch {
    pub edge_id: EdgeId,
    /// OpenStreetMap way id, when the network was imported from OSM
    pub osm_id: Option<i64>,
    pub base: NetworkNode,
    pub end: NetworkNode,
    pub observations: Vec<Observation>,
}

impl EdgeMatch {
    /// Create an empty edge match.
    pub fn new(edge_id: EdgeId, base: NetworkNode, end: NetworkNode) -> Self {
        Self {
            edge_id,
            osm_id: None,
            base,
            end,
            observations: Vec::new(),
        }
    }

    pub fn with_osm_id(mut self, osm_id: i64) -> Self {
        self.osm_id = Some(osm_id);
        self
    }

    pub fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = observations;
        self
    }

    /// True when no observation was snapped to this edge.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// The ordered edge sequence produced by map matching one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPath {
    pub trajectory_id: TrajectoryId,
    /// Edges in traversal order
    pub edges: Vec<EdgeMatch>,
}

impl MatchedPath {
    pub fn new(trajectory_id: TrajectoryId, edges: Vec<EdgeMatch>) -> Self {
        Self {
            trajectory_id,
            edges,
        }
    }

    /// Total number of observations across all edges.
    pub fn observation_count(&self) -> usize {
        self.edges.iter().map(|e| e.observations.len()).sum()
    }
}

// ============================================================================
// Output Records
// ============================================================================

/// Estimated passage time of a trajectory over a road network node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeTimestampRecord {
    pub trajectory_id: TrajectoryId,
    pub node_id: NodeId,
    pub position: GpsPoint,
    /// Estimated timestamp in milliseconds
    pub timestamp: i64,
}

/// How an edge segment record was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Two observations on the same edge
    Direct,
    /// Share of a span between observations on different edges
    Distributed,
}

/// Speed and timing estimate for (a piece of) one edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeSegmentRecord {
    pub trajectory_id: TrajectoryId,
    pub edge_id: EdgeId,
    pub osm_id: Option<i64>,
    /// Where the segment starts (observation or node position)
    pub position: GpsPoint,
    pub kind: SegmentKind,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    /// Speed in m/s
    pub speed: f64,
}

impl EdgeSegmentRecord {
    /// Representative timestamp of the segment (its start).
    pub fn timestamp(&self) -> i64 {
        self.start_timestamp
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Which outputs the batch driver computes per trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Products {
    /// Node timestamps only
    #[default]
    Nodes,
    /// Edge segments only
    Segments,
    /// Both node timestamps and edge segments
    Both,
}

impl Products {
    pub fn nodes(&self) -> bool {
        matches!(self, Products::Nodes | Products::Both)
    }

    pub fn segments(&self) -> bool {
        matches!(self, Products::Segments | Products::Both)
    }
}

/// Configuration for timestamp interpolation and segmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Outputs computed by the batch driver.
    /// Default: Nodes
    pub products: Products,

    /// Extrapolate nodes after the last anchor using the last bracket speed.
    /// Default: true
    pub extrapolate_trailing: bool,

    /// Distances at or below this are reported as coincident with the anchor
    /// (debug log only, never an error). Default: 0.01 meters
    pub coincident_distance: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            products: Products::Nodes,
            extrapolate_trailing: true,
            coincident_distance: 0.01,
        }
    }
}

/// Speed in m/s from a distance in meters and an elapsed time in milliseconds.
///
/// Elapsed times at or below zero have no defined speed.
pub fn speed_between(distance: f64, from_timestamp: i64, to_timestamp: i64) -> Result<f64> {
    let elapsed = to_timestamp - from_timestamp;
    if elapsed <= 0 {
        return Err(TimingError::DegenerateInterval {
            from_timestamp,
            to_timestamp,
        });
    }
    Ok(distance / (elapsed as f64 / 1000.0))
}

/// Travel time in milliseconds to cover `distance` meters at `speed` m/s.
pub(crate) fn travel_millis(distance: f64, speed: f64) -> f64 {
    if distance == 0.0 {
        0.0
    } else {
        distance / speed * 1000.0
    }
}

// ============================================================================
// Tests
// ============================================================================
