//! # Road Network
//!
//! An explicitly constructed, immutable road graph that answers distance
//! queries between arbitrary GPS points. It replaces a process-wide routing
//! singleton: build one per network, share it by reference, query it from as
//! many threads as needed.
//!
//! A query snaps both points onto their nearest directed edge (R-tree lookup)
//! and runs a bounded Dijkstra between the snapped positions.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use log::debug;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result, TimingError};
use crate::geo_utils::{closest_point_on_segment, haversine_distance, meters_to_degrees};
use crate::oracle::DistanceOracle;
use crate::{EdgeId, EdgeMatch, GpsPoint, NetworkNode, NodeId};

/// Offsets this close to an edge end are treated as sitting on the node.
const NODE_TOLERANCE: f64 = 0.5;

/// Configuration for network distance queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Maximum distance between a query point and the edge it snaps to.
    /// Default: 50.0 meters
    pub snap_radius: f64,

    /// Search expansion bound; routes longer than this are reported as no path.
    /// Default: 20000.0 meters
    pub max_search_distance: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            snap_radius: 50.0,
            max_search_distance: 20_000.0,
        }
    }
}

/// A directed road edge. Two-way roads are two edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    pub id: EdgeId,
    pub osm_id: Option<i64>,
    pub base: NodeId,
    pub end: NodeId,
    /// Length in meters; computed from node positions when `None`
    pub length: Option<f64>,
}

impl RoadEdge {
    pub fn new(id: EdgeId, base: NodeId, end: NodeId) -> Self {
        Self {
            id,
            osm_id: None,
            base,
            end,
            length: None,
        }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_osm_id(mut self, osm_id: i64) -> Self {
        self.osm_id = Some(osm_id);
        self
    }
}

/// A point projected onto a network edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSnap {
    /// Internal edge index
    pub edge: usize,
    /// Id of the snapped edge
    pub edge_id: EdgeId,
    /// Projected position on the edge
    pub position: GpsPoint,
    /// Distance from the edge's base node along the edge, in meters
    pub offset: f64,
    /// Distance from the query point to the projected position, in meters
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct EdgeEntry {
    edge: RoadEdge,
    base: usize,
    end: usize,
    length: f64,
}

/// Edge bounds wrapper for R-tree spatial indexing
#[derive(Debug, Clone)]
struct EdgeBounds {
    edge: usize,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl RTreeObject for EdgeBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Min-heap entry for Dijkstra.
#[derive(Debug, Clone, Copy, PartialEq)]
struct State {
    cost: f64,
    node: usize,
}

impl Eq for State {}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Immutable road network implementing [`DistanceOracle`].
#[derive(Debug, Clone)]
pub struct RoadNetwork {
    nodes: Vec<NetworkNode>,
    node_index: HashMap<NodeId, usize>,
    edges: Vec<EdgeEntry>,
    edge_index: HashMap<EdgeId, usize>,
    /// Outgoing edge indices per node index
    outgoing: Vec<Vec<usize>>,
    spatial_index: RTree<EdgeBounds>,
    config: NetworkConfig,
}

impl RoadNetwork {
    /// Build a network from nodes and directed edges.
    ///
    /// Fails if an edge references an unknown node, if ids are duplicated,
    /// or if a length is negative.
    pub fn new(
        nodes: Vec<NetworkNode>,
        edges: Vec<RoadEdge>,
        config: NetworkConfig,
    ) -> Result<Self> {
        let mut node_index = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if !node.position.is_valid() {
                let message = format!("node {} has invalid coordinates", node.id);
                return Err(invalid_network(message));
            }
            if node_index.insert(node.id, idx).is_some() {
                return Err(invalid_network(format!("duplicate node id {}", node.id)));
            }
        }

        let mut entries = Vec::with_capacity(edges.len());
        let mut edge_index = HashMap::with_capacity(edges.len());
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut bounds = Vec::with_capacity(edges.len());

        for edge in edges {
            let base = *node_index.get(&edge.base).ok_or_else(|| {
                invalid_network(format!("edge {} has unknown base node {}", edge.id, edge.base))
            })?;
            let end = *node_index.get(&edge.end).ok_or_else(|| {
                invalid_network(format!("edge {} has unknown end node {}", edge.id, edge.end))
            })?;

            let a = nodes[base].position;
            let b = nodes[end].position;
            let length = edge.length.unwrap_or_else(|| haversine_distance(&a, &b));
            if !length.is_finite() || length < 0.0 {
                let message = format!("edge {} has invalid length {}", edge.id, length);
                return Err(invalid_network(message));
            }

            let idx = entries.len();
            if edge_index.insert(edge.id, idx).is_some() {
                return Err(invalid_network(format!("duplicate edge id {}", edge.id)));
            }
            outgoing[base].push(idx);
            bounds.push(EdgeBounds {
                edge: idx,
                min_lat: a.latitude.min(b.latitude),
                max_lat: a.latitude.max(b.latitude),
                min_lng: a.longitude.min(b.longitude),
                max_lng: a.longitude.max(b.longitude),
            });
            entries.push(EdgeEntry {
                edge,
                base,
                end,
                length,
            });
        }

        debug!(
            "[RoadNetwork] Built network with {} nodes and {} edges",
            nodes.len(),
            entries.len()
        );

        Ok(Self {
            nodes,
            node_index,
            edges: entries,
            edge_index,
            outgoing,
            spatial_index: RTree::bulk_load(bounds),
            config,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&NetworkNode> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// Look up an edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&RoadEdge> {
        self.edge_index.get(&id).map(|&idx| &self.edges[idx].edge)
    }

    /// Length of an edge in meters.
    pub fn edge_length(&self, id: EdgeId) -> Option<f64> {
        self.edge_index.get(&id).map(|&idx| self.edges[idx].length)
    }

    /// An observation-free [`EdgeMatch`] for a network edge, for map matchers
    /// assembling a [`MatchedPath`](crate::MatchedPath).
    pub fn edge_match(&self, id: EdgeId) -> Option<EdgeMatch> {
        let entry = &self.edges[*self.edge_index.get(&id)?];
        let mut edge_match = EdgeMatch::new(id, self.nodes[entry.base], self.nodes[entry.end]);
        edge_match.osm_id = entry.edge.osm_id;
        Some(edge_match)
    }

    /// Snap a point to the nearest edge within the snap radius.
    pub fn snap(&self, point: &GpsPoint) -> Option<EdgeSnap> {
        self.snap_candidates(point).into_iter().next()
    }

    /// All edges tied (within half a meter) for nearest to `point`, closest
    /// first.
    ///
    /// Two-way roads and nodes shared by several edges produce ties; queries
    /// consider every tied edge so the answer does not depend on which one
    /// the R-tree returns first.
    pub fn snap_candidates(&self, point: &GpsPoint) -> Vec<EdgeSnap> {
        let radius = meters_to_degrees(self.config.snap_radius, point.latitude);
        let search = AABB::from_corners(
            [point.longitude - radius, point.latitude - radius],
            [point.longitude + radius, point.latitude + radius],
        );

        let mut snaps: Vec<EdgeSnap> = self
            .spatial_index
            .locate_in_envelope_intersecting(&search)
            .filter_map(|bounds| {
                let entry = &self.edges[bounds.edge];
                let a = self.nodes[entry.base].position;
                let b = self.nodes[entry.end].position;
                let position = closest_point_on_segment(point, &a, &b);
                let distance = haversine_distance(point, &position);
                if distance > self.config.snap_radius {
                    return None;
                }
                // Scale the geometric offset onto the edge's nominal length
                let geometric = haversine_distance(&a, &b);
                let offset = if geometric > 0.0 {
                    (haversine_distance(&a, &position) / geometric * entry.length)
                        .clamp(0.0, entry.length)
                } else {
                    0.0
                };
                Some(EdgeSnap {
                    edge: bounds.edge,
                    edge_id: entry.edge.id,
                    position,
                    offset,
                    distance,
                })
            })
            .collect();

        snaps.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.edge.cmp(&b.edge)));
        if let Some(nearest) = snaps.first().map(|s| s.distance) {
            snaps.retain(|s| s.distance <= nearest + NODE_TOLERANCE);
        }
        snaps
    }

    /// Shortest path length between two nodes, bounded by
    /// `max_search_distance`.
    pub fn node_distance(&self, from: NodeId, to: NodeId) -> Option<f64> {
        let from = *self.node_index.get(&from)?;
        let to = *self.node_index.get(&to)?;
        self.bounded_dijkstra(&[(from, 0.0)], &[(to, 0.0)])
    }

    /// Multi-source, multi-target Dijkstra.
    ///
    /// Sources are (node, initial cost); targets are (node, cost to add on
    /// arrival). Returns the cheapest total within the search bound.
    fn bounded_dijkstra(&self, sources: &[(usize, f64)], targets: &[(usize, f64)]) -> Option<f64> {
        let bound = self.config.max_search_distance;
        let mut dist = vec![f64::INFINITY; self.nodes.len()];
        let mut heap = BinaryHeap::new();

        for &(node, cost) in sources {
            if cost <= bound && cost < dist[node] {
                dist[node] = cost;
                heap.push(State { cost, node });
            }
        }

        let mut best = f64::INFINITY;
        while let Some(State { cost, node }) = heap.pop() {
            if cost > dist[node] {
                continue;
            }
            if cost >= best {
                break;
            }
            for &(target, extra) in targets {
                if target == node && cost + extra < best {
                    best = cost + extra;
                }
            }
            for &edge in &self.outgoing[node] {
                let entry = &self.edges[edge];
                let next = cost + entry.length;
                if next <= bound && next < dist[entry.end] {
                    dist[entry.end] = next;
                    heap.push(State {
                        cost: next,
                        node: entry.end,
                    });
                }
            }
        }

        (best.is_finite() && best <= bound).then_some(best)
    }

    fn snapped_distance(&self, from: &[EdgeSnap], to: &[EdgeSnap]) -> Option<f64> {
        // Forward along a single edge needs no search
        let direct = from
            .iter()
            .flat_map(|f| to.iter().map(move |t| (f, t)))
            .filter(|(f, t)| f.edge == t.edge && t.offset >= f.offset)
            .map(|(f, t)| t.offset - f.offset)
            .min_by(|a, b| a.total_cmp(b));

        let mut sources = Vec::with_capacity(from.len() * 2);
        for snap in from {
            let entry = &self.edges[snap.edge];
            sources.push((entry.end, entry.length - snap.offset));
            if snap.offset <= NODE_TOLERANCE {
                sources.push((entry.base, 0.0));
            }
        }
        let mut targets = Vec::with_capacity(to.len() * 2);
        for snap in to {
            let entry = &self.edges[snap.edge];
            targets.push((entry.base, snap.offset));
            if entry.length - snap.offset <= NODE_TOLERANCE {
                targets.push((entry.end, 0.0));
            }
        }

        let routed = self.bounded_dijkstra(&sources, &targets);
        match (direct, routed) {
            (Some(d), Some(r)) => Some(d.min(r)),
            (d, r) => d.or(r),
        }
    }
}

impl DistanceOracle for RoadNetwork {
    fn distance(&self, from: &GpsPoint, to: &GpsPoint) -> Result<f64> {
        let from_snaps = self.snap_candidates(from);
        if from_snaps.is_empty() {
            return Err(TimingError::no_path(from, to, "origin is not near any road"));
        }
        let to_snaps = self.snap_candidates(to);
        if to_snaps.is_empty() {
            return Err(TimingError::no_path(from, to, "destination is not near any road"));
        }
        self.snapped_distance(&from_snaps, &to_snaps)
            .ok_or_no_path(from, to, "no route within search bound")
    }
}

fn invalid_network(message: String) -> TimingError {
    TimingError::InvalidNetwork { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::line_network;

    #[test]
    fn test_build_rejects_unknown_node() {
        let nodes = vec![NetworkNode::new(1, GpsPoint::new(0.0, 0.0))];
        let edges = vec![RoadEdge::new(10, 1, 2)];
        let result = RoadNetwork::new(nodes, edges, NetworkConfig::default());
        assert!(matches!(result, Err(TimingError::InvalidNetwork { .. })));
    }

    #[test]
    fn test_build_rejects_duplicate_edge() {
        let nodes = vec![
            NetworkNode::new(1, GpsPoint::new(0.0, 0.0)),
            NetworkNode::new(2, GpsPoint::new(0.0, 0.001)),
        ];
        let edges = vec![RoadEdge::new(10, 1, 2), RoadEdge::new(10, 2, 1)];
        match RoadNetwork::new(nodes, edges, NetworkConfig::default()) {
            Err(TimingError::InvalidNetwork { message }) => {
                assert!(message.contains("duplicate edge id 10"))
            }
            other => panic!("expected InvalidNetwork, got {:?}", other),
        }
    }

    #[test]
    fn test_node_distance_follows_direction() {
        let network = line_network(4, false);
        let one_hop = network.edge_length(1).unwrap();
        let d = network.node_distance(1, 4).unwrap();
        assert!((d - 3.0 * one_hop).abs() < 1e-6);
        // One-way network has no route back
        assert!(network.node_distance(4, 1).is_none());
    }

    #[test]
    fn test_snap_projects_onto_edge() {
        let network = line_network(3, false);
        // Slightly north of the midpoint of the first edge
        let snap = network.snap(&GpsPoint::new(0.0001, 0.0005)).unwrap();
        assert_eq!(snap.edge_id, 1);
        assert_eq!(network.edges[snap.edge].edge.id, 1);
        let half = network.edge_length(1).unwrap() / 2.0;
        assert!((snap.offset - half).abs() < 0.5);
        assert!(snap.distance > 10.0 && snap.distance < 12.0);

        // Far from every road
        assert!(network.snap(&GpsPoint::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn test_point_distance_along_line() {
        let network = line_network(4, false);
        let hop = network.edge_length(1).unwrap();

        let a = GpsPoint::new(0.0, 0.0005); // middle of edge 1
        let b = GpsPoint::new(0.0, 0.0025); // middle of edge 3
        let d = network.distance(&a, &b).unwrap();
        assert!((d - 2.0 * hop).abs() < 1.0, "got {}", d);

        // Same edge, forward
        let c = GpsPoint::new(0.0, 0.0008);
        let d = network.distance(&a, &c).unwrap();
        assert!((d - 0.3 * hop).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_point_distance_from_shared_node() {
        let network = line_network(4, true);
        let hop = network.edge_length(1).unwrap();
        // Node 2 sits on four edges; any of them must give the same answer
        let node2 = network.node(2).unwrap().position;
        let target = GpsPoint::new(0.0, 0.0025);
        let d = network.distance(&node2, &target).unwrap();
        assert!((d - 1.5 * hop).abs() < 1.0, "got {}", d);
        assert_eq!(network.distance(&node2, &node2).unwrap(), 0.0);
    }

    #[test]
    fn test_no_path_against_direction() {
        let network = line_network(4, false);
        let a = GpsPoint::new(0.0, 0.0025);
        let b = GpsPoint::new(0.0, 0.0005);
        assert!(matches!(
            network.distance(&a, &b),
            Err(TimingError::NoPath { .. })
        ));
    }

    #[test]
    fn test_search_bound() {
        let nodes = vec![
            NetworkNode::new(1, GpsPoint::new(0.0, 0.0)),
            NetworkNode::new(2, GpsPoint::new(0.0, 0.001)),
            NetworkNode::new(3, GpsPoint::new(0.0, 0.002)),
        ];
        let edges = vec![RoadEdge::new(1, 1, 2), RoadEdge::new(2, 2, 3)];
        let config = NetworkConfig {
            snap_radius: 50.0,
            max_search_distance: 150.0,
        };
        let network = RoadNetwork::new(nodes, edges, config).unwrap();
        assert!(network.node_distance(1, 2).is_some());
        assert!(network.node_distance(1, 3).is_none());
    }

    #[test]
    fn test_explicit_length_overrides_geometry() {
        let nodes = vec![
            NetworkNode::new(1, GpsPoint::new(0.0, 0.0)),
            NetworkNode::new(2, GpsPoint::new(0.0, 0.001)),
        ];
        let edges = vec![RoadEdge::new(1, 1, 2).with_length(250.0)];
        let network = RoadNetwork::new(nodes, edges, NetworkConfig::default()).unwrap();
        assert_eq!(network.node_distance(1, 2), Some(250.0));

        // Offsets along the edge scale onto the nominal length
        let snap = network.snap(&GpsPoint::new(0.0, 0.0005)).unwrap();
        assert!((snap.offset - 125.0).abs() < 0.5);

        let bad = vec![RoadEdge::new(1, 1, 2).with_length(-1.0)];
        let nodes = vec![
            NetworkNode::new(1, GpsPoint::new(0.0, 0.0)),
            NetworkNode::new(2, GpsPoint::new(0.0, 0.001)),
        ];
        assert!(matches!(
            RoadNetwork::new(nodes, bad, NetworkConfig::default()),
            Err(TimingError::InvalidNetwork { .. })
        ));
    }

    #[test]
    fn test_edge_match_carries_nodes() {
        let network = line_network(3, false);
        let em = network.edge_match(2).unwrap();
        assert_eq!(em.base.id, 2);
        assert_eq!(em.end.id, 3);
        assert_eq!(em.osm_id, Some(1002));
        assert!(em.is_empty());
        assert!(network.edge_match(99).is_none());
    }
}
