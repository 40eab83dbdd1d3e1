//! Trajectory batch driver.
//!
//! Applies the node interpolator and/or edge segmenter to many independent
//! trajectories. A failing trajectory (no match, no anchors) is logged and
//! left out of the outputs; it never stops the batch.
//!
//! Each trajectory is computed into its own [`TrajectoryTiming`] and merged
//! into the [`BatchResult`] only once complete, so the parallel variants
//! never interleave partial output.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Result, TimingError};
use crate::interpolate::{interpolate_node_timestamps, NodeInterpolation};
use crate::oracle::{DistanceOracle, MapMatcher};
use crate::segments::{segment_edges, EdgeSegmentation};
use crate::{
    EdgeSegmentRecord, MatchedPath, NodeTimestampRecord, TimingConfig, Trajectory, TrajectoryId,
};

/// Outputs computed for one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryTiming {
    pub trajectory_id: TrajectoryId,
    /// Present when node timestamps were requested
    pub nodes: Option<NodeInterpolation>,
    /// Present when edge segments were requested
    pub segments: Option<EdgeSegmentation>,
}

/// A trajectory excluded from the batch outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryFailure {
    pub trajectory_id: TrajectoryId,
    pub error: TimingError,
}

/// Counters summarising a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub trajectories: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Not dispatched because the batch was cancelled
    pub cancelled: usize,
    pub node_records: usize,
    pub nodes_skipped: usize,
    pub segment_records: usize,
    pub segments_skipped: usize,
}

/// Result of a batch run, keyed by trajectory id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub outputs: BTreeMap<TrajectoryId, TrajectoryTiming>,
    pub failures: Vec<TrajectoryFailure>,
    pub stats: BatchStats,
}

impl BatchResult {
    /// All node records, in trajectory id order.
    pub fn node_records(&self) -> Vec<NodeTimestampRecord> {
        self.outputs
            .values()
            .filter_map(|t| t.nodes.as_ref())
            .flat_map(|n| n.records.iter().copied())
            .collect()
    }

    /// All edge segment records, in trajectory id order.
    pub fn segment_records(&self) -> Vec<EdgeSegmentRecord> {
        self.outputs
            .values()
            .filter_map(|t| t.segments.as_ref())
            .flat_map(|s| s.records.iter().copied())
            .collect()
    }

    fn merge(outcomes: Vec<Outcome>) -> Self {
        let mut result = BatchResult::default();
        result.stats.trajectories = outcomes.len();

        for outcome in outcomes {
            match outcome {
                Outcome::Done(timing) => {
                    result.stats.succeeded += 1;
                    if let Some(nodes) = &timing.nodes {
                        result.stats.node_records += nodes.records.len();
                        result.stats.nodes_skipped += nodes.skipped.len();
                    }
                    if let Some(segments) = &timing.segments {
                        result.stats.segment_records += segments.records.len();
                        result.stats.segments_skipped += segments.skipped.len();
                    }
                    if result.outputs.contains_key(&timing.trajectory_id) {
                        warn!(
                            "[PathTiming] Duplicate trajectory id {}, keeping the last one",
                            timing.trajectory_id
                        );
                    }
                    result.outputs.insert(timing.trajectory_id, timing);
                }
                Outcome::Failed(failure) => {
                    warn!(
                        "[PathTiming] Trajectory {} excluded: {}",
                        failure.trajectory_id, failure.error
                    );
                    result.stats.failed += 1;
                    result.failures.push(failure);
                }
                Outcome::Cancelled => result.stats.cancelled += 1,
            }
        }

        let s = &result.stats;
        info!(
            "[PathTiming] Batch complete: {} trajectories, {} ok, {} failed, {} cancelled; \
             {} node records ({} skipped), {} segment records ({} skipped)",
            s.trajectories,
            s.succeeded,
            s.failed,
            s.cancelled,
            s.node_records,
            s.nodes_skipped,
            s.segment_records,
            s.segments_skipped
        );
        result
    }
}

/// Shared flag that stops a batch from dispatching further trajectories.
///
/// Trajectories already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

enum Outcome {
    Done(TrajectoryTiming),
    Failed(TrajectoryFailure),
    Cancelled,
}

impl Outcome {
    fn from_result(trajectory_id: TrajectoryId, result: Result<TrajectoryTiming>) -> Self {
        match result {
            Ok(timing) => Outcome::Done(timing),
            Err(error) => Outcome::Failed(TrajectoryFailure {
                trajectory_id,
                error,
            }),
        }
    }
}

fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(|c| c.is_cancelled())
}

/// Compute the configured products for a single matched path.
pub fn process_path<O: DistanceOracle + ?Sized>(
    path: &MatchedPath,
    oracle: &O,
    config: &TimingConfig,
) -> Result<TrajectoryTiming> {
    let nodes = if config.products.nodes() {
        Some(interpolate_node_timestamps(path, oracle, config)?)
    } else {
        None
    };
    let segments = if config.products.segments() {
        Some(segment_edges(path, oracle, config)?)
    } else {
        None
    };
    Ok(TrajectoryTiming {
        trajectory_id: path.trajectory_id,
        nodes,
        segments,
    })
}

fn path_outcome<O: DistanceOracle + ?Sized>(
    path: &MatchedPath,
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> Outcome {
    if is_cancelled(cancel) {
        return Outcome::Cancelled;
    }
    Outcome::from_result(path.trajectory_id, process_path(path, oracle, config))
}

fn trajectory_outcome<M: MapMatcher + ?Sized, O: DistanceOracle + ?Sized>(
    trajectory: &Trajectory,
    matcher: &M,
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> Outcome {
    if is_cancelled(cancel) {
        return Outcome::Cancelled;
    }
    let result = matcher.match_trajectory(trajectory).and_then(|mut path| {
        if path.trajectory_id != trajectory.id {
            debug!(
                "[PathTiming] Matcher returned id {} for trajectory {}",
                path.trajectory_id, trajectory.id
            );
            path.trajectory_id = trajectory.id;
        }
        process_path(&path, oracle, config)
    });
    Outcome::from_result(trajectory.id, result)
}

/// Process already-matched paths sequentially.
pub fn process_matched_paths<O: DistanceOracle + ?Sized>(
    paths: &[MatchedPath],
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> BatchResult {
    info!("[PathTiming] Processing {} matched paths", paths.len());
    let outcomes = paths
        .iter()
        .map(|p| path_outcome(p, oracle, config, cancel))
        .collect();
    BatchResult::merge(outcomes)
}

/// Map-match and process raw trajectories sequentially.
///
/// Trajectories the matcher rejects (`NoMatch`) are recorded as failures.
pub fn process_trajectories<M: MapMatcher + ?Sized, O: DistanceOracle + ?Sized>(
    trajectories: &[Trajectory],
    matcher: &M,
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> BatchResult {
    info!("[PathTiming] Processing {} trajectories", trajectories.len());
    let outcomes = trajectories
        .iter()
        .map(|t| trajectory_outcome(t, matcher, oracle, config, cancel))
        .collect();
    BatchResult::merge(outcomes)
}

/// Process already-matched paths in parallel, one task per path.
///
/// Same results as [`process_matched_paths`]. The oracle is shared across
/// worker threads, so it must be `Sync`.
#[cfg(feature = "parallel")]
pub fn process_matched_paths_parallel<O: DistanceOracle + Sync + ?Sized>(
    paths: &[MatchedPath],
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> BatchResult {
    use rayon::prelude::*;

    info!(
        "[PathTiming] Processing {} matched paths in parallel",
        paths.len()
    );
    let outcomes = paths
        .par_iter()
        .map(|p| path_outcome(p, oracle, config, cancel))
        .collect();
    BatchResult::merge(outcomes)
}

/// Map-match and process raw trajectories in parallel, one task per
/// trajectory.
#[cfg(feature = "parallel")]
pub fn process_trajectories_parallel<M, O>(
    trajectories: &[Trajectory],
    matcher: &M,
    oracle: &O,
    config: &TimingConfig,
    cancel: Option<&CancelToken>,
) -> BatchResult
where
    M: MapMatcher + Sync + ?Sized,
    O: DistanceOracle + Sync + ?Sized,
{
    use rayon::prelude::*;

    info!(
        "[PathTiming] Processing {} trajectories in parallel",
        trajectories.len()
    );
    let outcomes = trajectories
        .par_iter()
        .map(|t| trajectory_outcome(t, matcher, oracle, config, cancel))
        .collect();
    BatchResult::merge(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{boundary_scenario, scenario_oracle};
    use crate::{Products, RawPoint};

    /// Matcher that looks paths up by trajectory id.
    struct LookupMatcher(BTreeMap<TrajectoryId, MatchedPath>);

    impl MapMatcher for LookupMatcher {
        fn match_trajectory(&self, trajectory: &Trajectory) -> Result<MatchedPath> {
            self.0
                .get(&trajectory.id)
                .cloned()
                .ok_or_else(|| TimingError::NoMatch {
                    trajectory_id: trajectory.id,
                    message: "no candidates".to_string(),
                })
        }
    }

    fn with_id(mut path: MatchedPath, id: TrajectoryId) -> MatchedPath {
        path.trajectory_id = id;
        path
    }

    fn raw(id: TrajectoryId) -> Trajectory {
        let mut t = Trajectory::new(id, 1);
        t.points.push(RawPoint::new(crate::GpsPoint::new(0.0, 0.0), 0));
        t
    }

    #[test]
    fn test_no_match_does_not_stop_batch() {
        let s = boundary_scenario();
        let oracle = scenario_oracle(&s);
        let matcher = LookupMatcher(BTreeMap::from([
            (1, with_id(s.path.clone(), 1)),
            (3, with_id(s.path.clone(), 3)),
        ]));
        let trajectories = vec![raw(1), raw(2), raw(3)];

        let result = process_trajectories(
            &trajectories,
            &matcher,
            &oracle,
            &TimingConfig::default(),
            None,
        );

        assert_eq!(result.outputs.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].trajectory_id, 2);
        assert!(matches!(result.failures[0].error, TimingError::NoMatch { .. }));
        assert_eq!(result.stats.succeeded, 2);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.node_records, 6);
        assert!(result.node_records().iter().any(|r| r.trajectory_id == 3));
    }

    #[test]
    fn test_invalid_path_excluded() {
        let s = boundary_scenario();
        let oracle = scenario_oracle(&s);
        let mut empty = with_id(s.path.clone(), 2);
        for edge in &mut empty.edges {
            edge.observations.clear();
        }
        let paths = vec![s.path.clone(), empty];

        let result = process_matched_paths(&paths, &oracle, &TimingConfig::default(), None);
        assert_eq!(result.outputs.len(), 1);
        assert!(matches!(
            result.failures[0].error,
            TimingError::InvalidInput { trajectory_id: 2, .. }
        ));
    }

    #[test]
    fn test_products_selection() {
        let s = boundary_scenario();
        let oracle = scenario_oracle(&s);

        let config = TimingConfig {
            products: Products::Both,
            ..Default::default()
        };
        let timing = process_path(&s.path, &oracle, &config).unwrap();
        assert_eq!(timing.nodes.unwrap().records.len(), 3);
        assert_eq!(timing.segments.unwrap().records.len(), 3);

        let config = TimingConfig {
            products: Products::Segments,
            ..Default::default()
        };
        let timing = process_path(&s.path, &oracle, &config).unwrap();
        assert!(timing.nodes.is_none());
        assert!(timing.segments.is_some());
    }

    #[test]
    fn test_cancelled_batch_dispatches_nothing() {
        let s = boundary_scenario();
        let oracle = scenario_oracle(&s);
        let cancel = CancelToken::new();
        cancel.cancel();

        let paths = vec![s.path.clone(), with_id(s.path.clone(), 2)];
        let config = TimingConfig::default();
        let result = process_matched_paths(&paths, &oracle, &config, Some(&cancel));
        assert!(result.outputs.is_empty());
        assert_eq!(result.stats.cancelled, 2);
        assert_eq!(oracle.query_count(), 0);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let s = boundary_scenario();
        let oracle = scenario_oracle(&s);
        let paths: Vec<MatchedPath> = (1..=16).map(|id| with_id(s.path.clone(), id)).collect();
        let config = TimingConfig {
            products: Products::Both,
            ..Default::default()
        };

        let sequential = process_matched_paths(&paths, &oracle, &config, None);
        let parallel = process_matched_paths_parallel(&paths, &oracle, &config, None);
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.stats.succeeded, 16);
    }
}
