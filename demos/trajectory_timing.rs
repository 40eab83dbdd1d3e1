//! Read trajectories, match them onto a road, time them and write the results.
//!
//! Run with:
//!   `cargo run --example trajectory_timing -- [trajectories.csv] [output_dir]`
//!
//! Without arguments a small sample input is generated in the temp directory.
//! The road is a synthetic one-way street along the equator; fixes are
//! matched by snapping each one to its nearest edge.

use std::path::PathBuf;
use std::time::Instant;

use path_timing::io::{
    read_trajectories_file, write_edge_segment_details_file, write_edge_segments_file,
    write_node_timestamps_file, write_path_nodes_file,
};
use path_timing::{
    process_trajectories, EdgeMatch, GpsPoint, MapMatcher, MatchedPath, NetworkConfig,
    NetworkNode, Observation, Products, RoadEdge, RoadNetwork, TimingConfig, TimingError,
    Trajectory,
};

const NODES: u64 = 50;
const SPACING: f64 = 0.001;

const SAMPLE: &str = "\
entityId;trajectoryId;latitude;longitude;timestampMillis
7;1;0.00001;0.0004;0
7;1;0.00002;0.0061;60000
7;1;-0.00001;0.0187;180000
7;2;0.00001;0.0102;500000
7;2;0.00000;0.0108;505000
7;2;0.00002;0.0233;620000
9;3;0.5;0.5;0
";

fn build_road() -> path_timing::Result<RoadNetwork> {
    let nodes = (1..=NODES)
        .map(|i| NetworkNode::new(i, GpsPoint::new(0.0, (i - 1) as f64 * SPACING)))
        .collect();
    let edges = (1..NODES)
        .map(|i| RoadEdge::new(i, i, i + 1).with_osm_id(40_000 + i as i64))
        .collect();
    RoadNetwork::new(nodes, edges, NetworkConfig::default())
}

/// Snaps every fix to its nearest edge and fills the edges in between by id,
/// which is only valid on a single straight road.
struct NearestEdgeMatcher<'a> {
    network: &'a RoadNetwork,
}

impl MapMatcher for NearestEdgeMatcher<'_> {
    fn match_trajectory(&self, trajectory: &Trajectory) -> path_timing::Result<MatchedPath> {
        let no_match = |message: String| TimingError::NoMatch {
            trajectory_id: trajectory.id,
            message,
        };

        let mut observations = Vec::with_capacity(trajectory.points.len());
        for point in &trajectory.points {
            let snap = self.network.snap(&point.position).ok_or_else(|| {
                no_match(format!("no road near fix at {}ms", point.timestamp))
            })?;
            observations.push(Observation::new(*point, snap.position, snap.edge_id));
        }

        let (first, last) = match (observations.first(), observations.last()) {
            (Some(f), Some(l)) if f.edge_id <= l.edge_id => (f.edge_id, l.edge_id),
            (Some(_), Some(_)) => return Err(no_match("fixes run against the road".into())),
            _ => return Err(no_match("trajectory has no fixes".into())),
        };

        let edges = (first..=last)
            .map(|id| {
                let on_edge = observations
                    .iter()
                    .filter(|o| o.edge_id == id)
                    .copied()
                    .collect();
                self.network
                    .edge_match(id)
                    .map(|e| e.with_observations(on_edge))
                    .ok_or_else(|| no_match(format!("edge {} missing", id)))
            })
            .collect::<path_timing::Result<Vec<EdgeMatch>>>()?;
        Ok(MatchedPath::new(trajectory.id, edges))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input = match args.next() {
        Some(path) => PathBuf::from(path),
        None => {
            let path = std::env::temp_dir().join("path_timing_sample.csv");
            std::fs::write(&path, SAMPLE)?;
            path
        }
    };
    let output_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    let network = build_road()?;
    let matcher = NearestEdgeMatcher { network: &network };
    let config = TimingConfig {
        products: Products::Both,
        ..Default::default()
    };

    let trajectories = read_trajectories_file(&input)?;
    println!("Read {} trajectories from {}", trajectories.len(), input.display());

    let start = Instant::now();
    let result = process_trajectories(&trajectories, &matcher, &network, &config, None);
    println!(
        "Processed in {:?}: {} ok, {} failed",
        start.elapsed(),
        result.stats.succeeded,
        result.stats.failed
    );
    for failure in &result.failures {
        println!("  trajectory {}: {}", failure.trajectory_id, failure.error);
    }

    let nodes = result.node_records();
    let segments = result.segment_records();
    write_node_timestamps_file(output_dir.join("node_timestamps.csv"), &nodes)?;
    write_edge_segments_file(output_dir.join("edge_segments.csv"), &segments)?;
    write_edge_segment_details_file(output_dir.join("edge_segment_details.csv"), &segments)?;

    // Matched path of the first trajectory, for plotting
    if let Some(trajectory) = trajectories.first() {
        if let Ok(path) = matcher.match_trajectory(trajectory) {
            write_path_nodes_file(output_dir.join("path_nodes.csv"), &path)?;
        }
    }

    println!(
        "Wrote {} node timestamps and {} edge segments to {}",
        nodes.len(),
        segments.len(),
        output_dir.display()
    );
    Ok(())
}
