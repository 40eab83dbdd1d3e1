//! Node timestamp interpolation.
//!
//! Every node strictly between two consecutive anchors gets a timestamp from
//! the speed implied by those anchors:
//!
//! ```text
//! speed     = distance(last, current) / (current.t - last.t)
//! node.t    = current.t - distance(node, current) / speed
//! ```
//!
//! Intermediate nodes are passed *before* the anchor that closes their
//! bracket, hence the subtraction. The node just past the final anchor is
//! passed after it and is extrapolated forward with the last bracket speed.
//!
//! A failed oracle query skips only the affected node. The bracket's opening
//! anchor is held until a bracket completes cleanly, so the next speed is
//! measured across the whole span from the held anchor.

use log::{debug, warn};

use crate::anchors::{Anchor, AnchorWalker};
use crate::error::{OptionExt, Result, TimingError};
use crate::oracle::DistanceOracle;
use crate::{
    speed_between, travel_millis, MatchedPath, NetworkNode, NodeTimestampRecord, TimingConfig,
    TrajectoryId,
};

/// A node that could not be timestamped, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedNode {
    pub node: NetworkNode,
    /// Index of the edge whose base (or, for the final node, end) this is
    pub edge_index: usize,
    pub reason: TimingError,
}

/// Node timestamps for one trajectory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeInterpolation {
    pub trajectory_id: TrajectoryId,
    /// Records in path order
    pub records: Vec<NodeTimestampRecord>,
    pub skipped: Vec<SkippedNode>,
}

impl NodeInterpolation {
    fn new(trajectory_id: TrajectoryId) -> Self {
        Self {
            trajectory_id,
            ..Default::default()
        }
    }

    fn emit(&mut self, node: &NetworkNode, timestamp: f64) {
        self.records.push(NodeTimestampRecord {
            trajectory_id: self.trajectory_id,
            node_id: node.id,
            position: node.position,
            timestamp: timestamp.round() as i64,
        });
    }

    fn skip(&mut self, node: &NetworkNode, edge_index: usize, reason: TimingError) {
        warn!(
            "[NodeTimestamps] Trajectory {}: skipping node {} at ({:.6}, {:.6}): {}",
            self.trajectory_id, node.id, node.position.latitude, node.position.longitude, reason
        );
        self.skipped.push(SkippedNode {
            node: *node,
            edge_index,
            reason,
        });
    }
}

/// Estimate when a matched trajectory passed each node between its anchors.
///
/// Emits one record per base node of every edge after the first anchor's
/// edge, up to and including the final anchor's edge, then (when
/// `config.extrapolate_trailing` is set) the end node of the final anchor's
/// edge. Nodes before the first anchor and beyond that end node are not
/// emitted.
///
/// Fails only if the path yields no anchors; per-node failures are collected
/// in [`NodeInterpolation::skipped`].
pub fn interpolate_node_timestamps<O: DistanceOracle + ?Sized>(
    path: &MatchedPath,
    oracle: &O,
    config: &TimingConfig,
) -> Result<NodeInterpolation> {
    let mut walker = AnchorWalker::new(path)?;
    let first = walker
        .next()
        .ok_or_invalid_input(path.trajectory_id, "matched path has no observations")?;

    let mut result = NodeInterpolation::new(path.trajectory_id);
    let mut last_anchor = first;
    let mut final_anchor = first;
    // Base nodes of edges up to and including `cursor` are done
    let mut cursor = first.edge_index;
    let mut last_speed: Option<f64> = None;

    for current in walker {
        final_anchor = current;

        let speed = bracket_speed(oracle, &last_anchor, &current);
        if let Ok(s) = &speed {
            last_speed = Some(*s);
        }
        let mut failed = speed.is_err();

        while cursor < current.edge_index {
            cursor += 1;
            let node = &path.edges[cursor].base;
            let estimate = speed
                .clone()
                .and_then(|s| estimate_before(oracle, node, &current, s, config));
            match estimate {
                Ok(timestamp) => result.emit(node, timestamp),
                Err(reason) => {
                    result.skip(node, cursor, reason);
                    failed = true;
                }
            }
        }

        if failed {
            debug!(
                "[NodeTimestamps] Trajectory {}: holding anchor at {}ms",
                path.trajectory_id,
                last_anchor.timestamp()
            );
        } else {
            last_anchor = current;
        }
    }

    if config.extrapolate_trailing {
        // Only the node closing the final anchor's edge; later edges are
        // unobserved and left alone
        let edge_index = final_anchor.edge_index;
        let node = &path.edges[edge_index].end;
        let estimate = last_speed
            .ok_or(TimingError::DegenerateInterval {
                from_timestamp: final_anchor.timestamp(),
                to_timestamp: final_anchor.timestamp(),
            })
            .and_then(|s| estimate_after(oracle, node, &final_anchor, s, config));
        match estimate {
            Ok(timestamp) => result.emit(node, timestamp),
            Err(reason) => result.skip(node, edge_index, reason),
        }
    }

    debug!(
        "[NodeTimestamps] Trajectory {}: {} nodes timestamped, {} skipped",
        path.trajectory_id,
        result.records.len(),
        result.skipped.len()
    );

    Ok(result)
}

/// Speed in m/s between two anchors along the network.
fn bracket_speed<O: DistanceOracle + ?Sized>(
    oracle: &O,
    from: &Anchor<'_>,
    to: &Anchor<'_>,
) -> Result<f64> {
    if to.timestamp() <= from.timestamp() {
        return Err(TimingError::DegenerateInterval {
            from_timestamp: from.timestamp(),
            to_timestamp: to.timestamp(),
        });
    }
    let distance = oracle.distance(&from.observation.snapped, &to.observation.snapped)?;
    speed_between(distance, from.timestamp(), to.timestamp())
}

/// Timestamp of a node passed before reaching `anchor`.
fn estimate_before<O: DistanceOracle + ?Sized>(
    oracle: &O,
    node: &NetworkNode,
    anchor: &Anchor<'_>,
    speed: f64,
    config: &TimingConfig,
) -> Result<f64> {
    let distance = oracle.distance(&node.position, &anchor.observation.snapped)?;
    let travel = travel_for(node, anchor, distance, speed, config)?;
    Ok(anchor.timestamp() as f64 - travel)
}

/// Timestamp of a node passed after leaving `anchor`.
fn estimate_after<O: DistanceOracle + ?Sized>(
    oracle: &O,
    node: &NetworkNode,
    anchor: &Anchor<'_>,
    speed: f64,
    config: &TimingConfig,
) -> Result<f64> {
    let distance = oracle.distance(&anchor.observation.snapped, &node.position)?;
    let travel = travel_for(node, anchor, distance, speed, config)?;
    Ok(anchor.timestamp() as f64 + travel)
}

fn travel_for(
    node: &NetworkNode,
    anchor: &Anchor<'_>,
    distance: f64,
    speed: f64,
    config: &TimingConfig,
) -> Result<f64> {
    if distance <= config.coincident_distance {
        debug!(
            "[NodeTimestamps] Node {} coincides with anchor at {}ms ({:.3}m)",
            node.id,
            anchor.timestamp(),
            distance
        );
    }
    // A stationary bracket cannot place a node that is some distance away
    if speed <= 0.0 && distance > 0.0 {
        return Err(TimingError::DegenerateInterval {
            from_timestamp: anchor.timestamp(),
            to_timestamp: anchor.timestamp(),
        });
    }
    Ok(travel_millis(distance, speed))
}
