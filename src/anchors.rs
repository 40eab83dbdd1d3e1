//! Anchor walker: the iteration primitive behind all interpolation.
//!
//! Map matching usually snaps several close-together fixes to the same edge.
//! Only the first and last observation of each non-empty edge materially
//! change position, so those are the anchors; empty edges are skipped.

use crate::error::{OptionExt, Result, TimingError};
use crate::{MatchedPath, Observation};

/// A matched observation used as a timing reference, with the index (within
/// the matched path) of the edge that owns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor<'a> {
    pub observation: &'a Observation,
    pub edge_index: usize,
}

impl Anchor<'_> {
    pub fn timestamp(&self) -> i64 {
        self.observation.timestamp()
    }
}

/// Forward-only, single-pass cursor over the anchors of a matched path.
///
/// The walker keeps one anchor of lookahead: `pending` is what the next call
/// to [`Iterator::next`] returns, found at observation `pending_slot` of edge
/// `pending.edge_index`. Build a fresh walker per path; it cannot be reset.
///
/// # Example
/// ```
/// use path_timing::{
///     AnchorWalker, EdgeMatch, GpsPoint, MatchedPath, NetworkNode, Observation, RawPoint,
/// };
///
/// let n = NetworkNode::new(1, GpsPoint::new(0.0, 0.0));
/// let obs = |t| Observation::new(RawPoint::new(n.position, t), n.position, 1);
/// let path = MatchedPath::new(1, vec![
///     EdgeMatch::new(1, n, n).with_observations(vec![obs(0), obs(10), obs(20)]),
///     EdgeMatch::new(2, n, n),
///     EdgeMatch::new(3, n, n).with_observations(vec![obs(30)]),
/// ]);
///
/// let times: Vec<i64> = AnchorWalker::new(&path).unwrap().map(|a| a.timestamp()).collect();
/// assert_eq!(times, vec![0, 20, 30]);
/// ```
#[derive(Debug, Clone)]
pub struct AnchorWalker<'a> {
    path: &'a MatchedPath,
    pending: Option<Anchor<'a>>,
    pending_slot: usize,
    /// Edge index of the most recently returned anchor
    current_edge: Option<usize>,
}

impl<'a> AnchorWalker<'a> {
    /// Position the walker on the first observation of the first non-empty
    /// edge.
    ///
    /// Fails with `InvalidInput` if the path is empty or carries no
    /// observations at all.
    pub fn new(path: &'a MatchedPath) -> Result<Self> {
        if path.edges.is_empty() {
            return Err(TimingError::InvalidInput {
                trajectory_id: path.trajectory_id,
                message: "matched path has no edges".to_string(),
            });
        }
        let first = first_anchor_from(path, 0)
            .ok_or_invalid_input(path.trajectory_id, "matched path has no observations")?;
        Ok(Self {
            path,
            pending: Some(first),
            pending_slot: 0,
            current_edge: None,
        })
    }

    /// Whether another anchor remains.
    pub fn has_next(&self) -> bool {
        self.pending.is_some()
    }

    /// Edge index of the most recently returned anchor, `None` before the
    /// first call to `next`.
    pub fn edge_position(&self) -> Option<usize> {
        self.current_edge
    }

    /// Compute the anchor following the one at (`edge_index`, `slot`).
    fn lookahead(&self, edge_index: usize, slot: usize) -> (Option<Anchor<'a>>, usize) {
        let observations = &self.path.edges[edge_index].observations;
        let last = observations.len() - 1;
        if slot < last {
            let anchor = Anchor {
                observation: &observations[last],
                edge_index,
            };
            return (Some(anchor), last);
        }
        (first_anchor_from(self.path, edge_index + 1), 0)
    }
}

impl<'a> Iterator for AnchorWalker<'a> {
    type Item = Anchor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.pending.take()?;
        let (pending, slot) = self.lookahead(current.edge_index, self.pending_slot);
        self.pending = pending;
        self.pending_slot = slot;
        self.current_edge = Some(current.edge_index);
        Some(current)
    }
}

/// First observation of the first non-empty edge at or after `start`.
fn first_anchor_from(path: &MatchedPath, start: usize) -> Option<Anchor<'_>> {
    path.edges
        .iter()
        .enumerate()
        .skip(start)
        .find_map(|(edge_index, edge)| {
            edge.observations.first().map(|observation| Anchor {
                observation,
                edge_index,
            })
        })
}

/// Collect every anchor of a matched path.
pub fn collect_anchors(path: &MatchedPath) -> Result<Vec<Anchor<'_>>> {
    Ok(AnchorWalker::new(path)?.collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{node, observation};
    use crate::EdgeMatch;

    fn edge(id: u64, times: &[i64]) -> EdgeMatch {
        let base = node(id, id as f64 * 0.001);
        let end = node(id + 1, (id + 1) as f64 * 0.001);
        let obs = times
            .iter()
            .map(|&t| observation(id, base.position, t))
            .collect();
        EdgeMatch::new(id, base, end).with_observations(obs)
    }

    fn walk(path: &MatchedPath) -> Vec<(i64, usize)> {
        AnchorWalker::new(path)
            .unwrap()
            .map(|a| (a.timestamp(), a.edge_index))
            .collect()
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let path = MatchedPath::new(3, vec![]);
        assert!(matches!(
            AnchorWalker::new(&path),
            Err(TimingError::InvalidInput { trajectory_id: 3, .. })
        ));
    }

    #[test]
    fn test_path_without_observations_is_invalid() {
        let path = MatchedPath::new(4, vec![edge(1, &[]), edge(2, &[])]);
        assert!(matches!(
            collect_anchors(&path),
            Err(TimingError::InvalidInput { trajectory_id: 4, .. })
        ));
    }

    #[test]
    fn test_first_and_last_per_edge() {
        let path = MatchedPath::new(
            1,
            vec![
                edge(1, &[]),
                edge(2, &[100, 110, 120]),
                edge(3, &[]),
                edge(4, &[]),
                edge(5, &[200]),
                edge(6, &[300, 310]),
            ],
        );
        assert_eq!(
            walk(&path),
            vec![(100, 1), (120, 1), (200, 4), (300, 5), (310, 5)]
        );
    }

    #[test]
    fn test_single_observation() {
        let path = MatchedPath::new(1, vec![edge(1, &[]), edge(2, &[50]), edge(3, &[])]);
        assert_eq!(walk(&path), vec![(50, 1)]);
    }

    #[test]
    fn test_pull_interface_and_edge_position() {
        let path = MatchedPath::new(1, vec![edge(1, &[10]), edge(2, &[]), edge(3, &[20, 30])]);
        let mut walker = AnchorWalker::new(&path).unwrap();
        assert!(walker.has_next());
        assert_eq!(walker.edge_position(), None);

        assert_eq!(walker.next().unwrap().timestamp(), 10);
        assert_eq!(walker.edge_position(), Some(0));

        assert_eq!(walker.next().unwrap().timestamp(), 20);
        assert_eq!(walker.edge_position(), Some(2));

        assert_eq!(walker.next().unwrap().timestamp(), 30);
        assert_eq!(walker.edge_position(), Some(2));

        assert!(!walker.has_next());
        assert!(walker.next().is_none());
        // Exhausted walkers stay exhausted
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_anchor_times_increase() {
        let path = MatchedPath::new(
            1,
            vec![
                edge(1, &[0, 5, 9]),
                edge(2, &[]),
                edge(3, &[15]),
                edge(4, &[20, 25]),
                edge(5, &[]),
            ],
        );
        let anchors = walk(&path);
        assert!(anchors.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
