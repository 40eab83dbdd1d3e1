//! Shared test fixtures: a table-driven oracle and small networks/paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, TimingError};
use crate::network::{NetworkConfig, RoadEdge, RoadNetwork};
use crate::oracle::DistanceOracle;
use crate::{EdgeMatch, GpsPoint, MatchedPath, NetworkNode, Observation, RawPoint};

type Key = ([u64; 2], [u64; 2]);

fn key(from: &GpsPoint, to: &GpsPoint) -> Key {
    (
        [from.latitude.to_bits(), from.longitude.to_bits()],
        [to.latitude.to_bits(), to.longitude.to_bits()],
    )
}

/// Oracle answering from a fixed table. Identical points are 0 apart;
/// unknown pairs and explicitly failing pairs are no path.
#[derive(Debug, Default)]
pub struct TableOracle {
    distances: HashMap<Key, f64>,
    failing: HashSet<Key>,
    queries: AtomicUsize,
}

impl TableOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, from: GpsPoint, to: GpsPoint, distance: f64) -> Self {
        self.distances.insert(key(&from, &to), distance);
        self
    }

    pub fn failing(mut self, from: GpsPoint, to: GpsPoint) -> Self {
        self.failing.insert(key(&from, &to));
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl DistanceOracle for TableOracle {
    fn distance(&self, from: &GpsPoint, to: &GpsPoint) -> Result<f64> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let k = key(from, to);
        if self.failing.contains(&k) {
            return Err(TimingError::no_path(from, to, "injected failure"));
        }
        if from == to {
            return Ok(0.0);
        }
        self.distances
            .get(&k)
            .copied()
            .ok_or_else(|| TimingError::no_path(from, to, "not in table"))
    }
}

pub fn node(id: u64, lng: f64) -> NetworkNode {
    NetworkNode::new(id, GpsPoint::new(0.0, lng))
}

pub fn observation(edge_id: u64, snapped: GpsPoint, timestamp: i64) -> Observation {
    Observation::new(RawPoint::new(snapped, timestamp), snapped, edge_id)
}

/// The three-edge boundary scenario:
///
/// ```text
/// A: 1 -> 2 (O1 at node 1, t=1000)
/// B: 2 -> 3 (empty)
/// C: 3 -> 4 (O2 at node 3, t=5000)
/// ```
///
/// O1 -> node 2 is 50m, B is 100m, O1 -> O2 is 150m, O2 -> node 4 is 30m.
pub struct Scenario {
    pub path: MatchedPath,
    pub nodes: [NetworkNode; 4],
    pub o1: GpsPoint,
    pub o2: GpsPoint,
}

pub fn boundary_scenario() -> Scenario {
    let nodes = [node(1, 0.0), node(2, 0.001), node(3, 0.002), node(4, 0.003)];
    let o1 = nodes[0].position;
    let o2 = nodes[2].position;
    let path = MatchedPath::new(
        1,
        vec![
            EdgeMatch::new(100, nodes[0], nodes[1])
                .with_osm_id(9100)
                .with_observations(vec![observation(100, o1, 1000)]),
            EdgeMatch::new(101, nodes[1], nodes[2]).with_osm_id(9101),
            EdgeMatch::new(102, nodes[2], nodes[3])
                .with_osm_id(9102)
                .with_observations(vec![observation(102, o2, 5000)]),
        ],
    );
    Scenario {
        path,
        nodes,
        o1,
        o2,
    }
}

pub fn scenario_oracle(s: &Scenario) -> TableOracle {
    let [_, n2, n3, n4] = s.nodes;
    TableOracle::new()
        .with(s.o1, s.o2, 150.0)
        .with(n2.position, s.o2, 100.0)
        .with(s.o1, n2.position, 50.0)
        .with(n2.position, n3.position, 100.0)
        .with(s.o2, n4.position, 30.0)
}

/// Straight east-west line of `count` nodes 0.001 degrees apart on the
/// equator. Edge `i` runs from node `i` to node `i + 1` (OSM id `1000 + i`);
/// with `two_way`, edge `100 + i` runs back.
pub fn line_network(count: u64, two_way: bool) -> RoadNetwork {
    let nodes: Vec<NetworkNode> = (1..=count)
        .map(|i| node(i, (i - 1) as f64 * 0.001))
        .collect();
    let mut edges: Vec<RoadEdge> = (1..count)
        .map(|i| RoadEdge::new(i, i, i + 1).with_osm_id(1000 + i as i64))
        .collect();
    if two_way {
        edges.extend((1..count).map(|i| RoadEdge::new(100 + i, i + 1, i)));
    }
    RoadNetwork::new(nodes, edges, NetworkConfig::default()).expect("valid line network")
}
