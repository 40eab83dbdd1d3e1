//! Edge speed/timestamp segmentation.
//!
//! Where the node interpolator assigns times to nodes, the segmenter assigns
//! a speed and a time window to edges. Each pair of temporally adjacent
//! observations produces records:
//!
//! - both on the same edge: one `Direct` record with the measured speed;
//! - on different edges: the span between them (rest of the previous edge,
//!   every empty edge in between, start of the new edge) is covered at a
//!   uniform speed, and time is distributed over the pieces in proportion to
//!   their length.
//!
//! Edges before the first or after the last observation are not covered.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::anchors::AnchorWalker;
use crate::error::{Result, TimingError};
use crate::oracle::DistanceOracle;
use crate::{
    speed_between, EdgeMatch, EdgeSegmentRecord, GpsPoint, MatchedPath, Observation, SegmentKind,
    TimingConfig, TrajectoryId,
};

/// One piece of a distributed span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpanPiece {
    /// Cumulative distance from the span start to the piece start, in meters
    pub offset: f64,
    /// Piece length in meters
    pub length: f64,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

/// A span between two observations on different edges, split into pieces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanDistribution {
    /// Uniform speed over the span in m/s
    pub speed: f64,
    pub total_distance: f64,
    /// Head piece, one piece per empty edge, tail piece
    pub pieces: Vec<SpanPiece>,
}

/// Distribute `elapsed` milliseconds over a span at uniform speed.
///
/// The span is `head` meters (previous observation to the end of its edge),
/// then each of `empty_lengths`, then `tail` meters (start of the new edge to
/// the new observation). Piece boundaries are placed at
/// `start_timestamp + cumulative_distance / speed`.
///
/// A span of zero length keeps every boundary at `start_timestamp`.
///
/// # Example
/// ```
/// use path_timing::distribute_span;
///
/// let span = distribute_span(50.0, &[100.0], 0.0, 1000, 4000).unwrap();
/// assert_eq!(span.speed, 37.5);
/// let starts: Vec<i64> = span.pieces.iter().map(|p| p.start_timestamp).collect();
/// assert_eq!(starts, vec![1000, 2333, 5000]);
/// ```
pub fn distribute_span(
    head: f64,
    empty_lengths: &[f64],
    tail: f64,
    start_timestamp: i64,
    elapsed: i64,
) -> Result<SpanDistribution> {
    let speed = speed_between(
        head + empty_lengths.iter().sum::<f64>() + tail,
        start_timestamp,
        start_timestamp + elapsed,
    )?;

    let lengths: Vec<f64> = std::iter::once(head)
        .chain(empty_lengths.iter().copied())
        .chain(std::iter::once(tail))
        .collect();
    let total_distance: f64 = lengths.iter().sum();

    let time_at = |distance: f64| -> i64 {
        if total_distance > 0.0 {
            start_timestamp + (distance / total_distance * elapsed as f64).round() as i64
        } else {
            start_timestamp
        }
    };

    let mut offset = 0.0;
    let pieces = lengths
        .into_iter()
        .map(|length| {
            let piece = SpanPiece {
                offset,
                length,
                start_timestamp: time_at(offset),
                end_timestamp: time_at(offset + length),
            };
            offset += length;
            piece
        })
        .collect();

    Ok(SpanDistribution {
        speed,
        total_distance,
        pieces,
    })
}

/// An observation pair whose span could not be segmented.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSegment {
    pub from_edge_index: usize,
    pub to_edge_index: usize,
    pub from_timestamp: i64,
    pub to_timestamp: i64,
    pub reason: TimingError,
}

/// Edge segment records for one trajectory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeSegmentation {
    pub trajectory_id: TrajectoryId,
    /// Records in path order
    pub records: Vec<EdgeSegmentRecord>,
    pub skipped: Vec<SkippedSegment>,
}

/// Produce speed/timestamp records for every edge between two observations.
///
/// Fails only if the path has no observations; per-pair failures (no path,
/// zero elapsed time) skip that pair and are collected in
/// [`EdgeSegmentation::skipped`]. The walk always continues from the newer
/// observation.
pub fn segment_edges<O: DistanceOracle + ?Sized>(
    path: &MatchedPath,
    oracle: &O,
    config: &TimingConfig,
) -> Result<EdgeSegmentation> {
    // Same validation as the node interpolator
    AnchorWalker::new(path)?;

    let mut result = EdgeSegmentation {
        trajectory_id: path.trajectory_id,
        ..Default::default()
    };
    let mut previous: Option<(&Observation, usize)> = None;

    for (edge_index, edge) in path.edges.iter().enumerate() {
        for observation in &edge.observations {
            if let Some((prev, prev_index)) = previous {
                let outcome = if prev_index == edge_index {
                    direct_segment(path.trajectory_id, edge, prev, observation, oracle, config)
                        .map(|record| vec![record])
                } else {
                    distributed_segments(path, prev_index, prev, edge_index, observation, oracle)
                };
                match outcome {
                    Ok(records) => result.records.extend(records),
                    Err(reason) => {
                        warn!(
                            "[EdgeSegments] Trajectory {}: skipping span {}ms -> {}ms \
                             (edges {}..={}): {}",
                            path.trajectory_id,
                            prev.timestamp(),
                            observation.timestamp(),
                            prev_index,
                            edge_index,
                            reason
                        );
                        result.skipped.push(SkippedSegment {
                            from_edge_index: prev_index,
                            to_edge_index: edge_index,
                            from_timestamp: prev.timestamp(),
                            to_timestamp: observation.timestamp(),
                            reason,
                        });
                    }
                }
            }
            previous = Some((observation, edge_index));
        }
    }

    debug!(
        "[EdgeSegments] Trajectory {}: {} segments, {} skipped",
        path.trajectory_id,
        result.records.len(),
        result.skipped.len()
    );

    Ok(result)
}

/// Two observations on the same edge: measured speed, no distribution.
fn direct_segment<O: DistanceOracle + ?Sized>(
    trajectory_id: TrajectoryId,
    edge: &EdgeMatch,
    prev: &Observation,
    current: &Observation,
    oracle: &O,
    config: &TimingConfig,
) -> Result<EdgeSegmentRecord> {
    ensure_elapsed(prev, current)?;
    let distance = oracle.distance(&prev.snapped, &current.snapped)?;
    if distance <= config.coincident_distance {
        debug!(
            "[EdgeSegments] Trajectory {}: stationary on edge {} from {}ms to {}ms ({:.3}m)",
            trajectory_id,
            edge.edge_id,
            prev.timestamp(),
            current.timestamp(),
            distance
        );
    }
    let speed = speed_between(distance, prev.timestamp(), current.timestamp())?;
    Ok(EdgeSegmentRecord {
        trajectory_id,
        edge_id: edge.edge_id,
        osm_id: edge.osm_id,
        position: prev.snapped,
        kind: SegmentKind::Direct,
        start_timestamp: prev.timestamp(),
        end_timestamp: current.timestamp(),
        speed,
    })
}

/// Observations on different edges: cover the previous edge's exit, every
/// empty edge, and the new edge's entry at uniform speed.
fn distributed_segments<O: DistanceOracle + ?Sized>(
    path: &MatchedPath,
    prev_index: usize,
    prev: &Observation,
    edge_index: usize,
    current: &Observation,
    oracle: &O,
) -> Result<Vec<EdgeSegmentRecord>> {
    ensure_elapsed(prev, current)?;

    let prev_edge = &path.edges[prev_index];
    let edge = &path.edges[edge_index];
    let empty = &path.edges[prev_index + 1..edge_index];

    let head = oracle.distance(&prev.snapped, &prev_edge.end.position)?;
    let empty_lengths = empty
        .iter()
        .map(|e| oracle.distance(&e.base.position, &e.end.position))
        .collect::<Result<Vec<f64>>>()?;
    let tail = oracle.distance(&edge.base.position, &current.snapped)?;

    let span = distribute_span(
        head,
        &empty_lengths,
        tail,
        prev.timestamp(),
        current.timestamp() - prev.timestamp(),
    )?;

    let covered: Vec<(&EdgeMatch, GpsPoint)> = std::iter::once((prev_edge, prev.snapped))
        .chain(empty.iter().map(|e| (e, e.base.position)))
        .chain(std::iter::once((edge, edge.base.position)))
        .collect();

    Ok(covered
        .into_iter()
        .zip(span.pieces.iter())
        .map(|((e, position), piece)| EdgeSegmentRecord {
            trajectory_id: path.trajectory_id,
            edge_id: e.edge_id,
            osm_id: e.osm_id,
            position,
            kind: SegmentKind::Distributed,
            start_timestamp: piece.start_timestamp,
            end_timestamp: piece.end_timestamp,
            speed: span.speed,
        })
        .collect())
}

fn ensure_elapsed(prev: &Observation, current: &Observation) -> Result<()> {
    if current.timestamp() <= prev.timestamp() {
        return Err(TimingError::DegenerateInterval {
            from_timestamp: prev.timestamp(),
            to_timestamp: current.timestamp(),
        });
    }
    Ok(())
}
