//! Unified error handling for the path-timing library.
//!
//! Per-node, per-segment and per-trajectory failures are recoverable: the
//! caller logs them and carries on. Parse and file failures are fatal for the
//! whole run.

use std::fmt;

use crate::{GpsPoint, TrajectoryId};

/// Unified error type for path-timing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingError {
    /// The matched path cannot produce anchors (empty, or no observations)
    InvalidInput {
        trajectory_id: TrajectoryId,
        message: String,
    },
    /// The map matcher found no viable path for a trajectory
    NoMatch {
        trajectory_id: TrajectoryId,
        message: String,
    },
    /// The distance oracle could not route between two points
    NoPath {
        from: GpsPoint,
        to: GpsPoint,
        message: String,
    },
    /// Zero (or negative) elapsed time between two observations
    DegenerateInterval {
        from_timestamp: i64,
        to_timestamp: i64,
    },
    /// The road network could not be built (bad node, edge or length)
    InvalidNetwork { message: String },
    /// A raw trajectory row failed to parse
    MalformedInput { line: u64, message: String },
    /// File-level read/write failure
    Io { message: String },
}

impl TimingError {
    /// Whether processing can skip the affected item and continue.
    ///
    /// `InvalidNetwork`, `MalformedInput` and `Io` indicate a broken setup,
    /// a corrupted source or a broken output target and must be surfaced to
    /// the operator.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TimingError::InvalidNetwork { .. }
                | TimingError::MalformedInput { .. }
                | TimingError::Io { .. }
        )
    }

    pub(crate) fn no_path(from: &GpsPoint, to: &GpsPoint, message: impl Into<String>) -> Self {
        TimingError::NoPath {
            from: *from,
            to: *to,
            message: message.into(),
        }
    }
}

impl fmt::Display for TimingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimingError::InvalidInput {
                trajectory_id,
                message,
            } => {
                write!(f, "Trajectory {} is not usable: {}", trajectory_id, message)
            }
            TimingError::NoMatch {
                trajectory_id,
                message,
            } => {
                write!(f, "Trajectory {} has no match: {}", trajectory_id, message)
            }
            TimingError::NoPath { from, to, message } => {
                write!(
                    f,
                    "No path from ({:.6}, {:.6}) to ({:.6}, {:.6}): {}",
                    from.latitude, from.longitude, to.latitude, to.longitude, message
                )
            }
            TimingError::DegenerateInterval {
                from_timestamp,
                to_timestamp,
            } => {
                write!(
                    f,
                    "Degenerate interval {}ms -> {}ms, speed is undefined",
                    from_timestamp, to_timestamp
                )
            }
            TimingError::InvalidNetwork { message } => {
                write!(f, "Invalid road network: {}", message)
            }
            TimingError::MalformedInput { line, message } => {
                write!(f, "Malformed input at line {}: {}", line, message)
            }
            TimingError::Io { message } => {
                write!(f, "I/O error: {}", message)
            }
        }
    }
}

impl std::error::Error for TimingError {}

impl From<std::io::Error> for TimingError {
    fn from(err: std::io::Error) -> Self {
        TimingError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type alias for path-timing operations.
pub type Result<T> = std::result::Result<T, TimingError>;

/// Extension trait for converting Option to TimingError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a no-path error between two points.
    fn ok_or_no_path(self, from: &GpsPoint, to: &GpsPoint, message: &str) -> Result<T>;

    /// Convert Option to Result with an invalid input error.
    fn ok_or_invalid_input(self, trajectory_id: TrajectoryId, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_path(self, from: &GpsPoint, to: &GpsPoint, message: &str) -> Result<T> {
        self.ok_or_else(|| TimingError::no_path(from, to, message))
    }

    fn ok_or_invalid_input(self, trajectory_id: TrajectoryId, message: &str) -> Result<T> {
        self.ok_or_else(|| TimingError::InvalidInput {
            trajectory_id,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TimingError::InvalidInput {
            trajectory_id: 42,
            message: "no observations".to_string(),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("no observations"));

        let err = TimingError::DegenerateInterval {
            from_timestamp: 1000,
            to_timestamp: 1000,
        };
        assert!(err.to_string().contains("1000ms"));
    }

    #[test]
    fn test_recoverable() {
        let from = GpsPoint::new(0.0, 0.0);
        assert!(TimingError::no_path(&from, &from, "unreachable").is_recoverable());
        assert!(TimingError::NoMatch {
            trajectory_id: 1,
            message: "no candidates".to_string(),
        }
        .is_recoverable());
        assert!(!TimingError::MalformedInput {
            line: 3,
            message: "bad float".to_string(),
        }
        .is_recoverable());
        assert!(!TimingError::Io {
            message: "disk full".to_string(),
        }
        .is_recoverable());
        assert!(!TimingError::InvalidNetwork {
            message: "duplicate edge id 3".to_string(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<f64> = None;
        let p = GpsPoint::new(1.0, 2.0);
        assert!(matches!(
            none.ok_or_no_path(&p, &p, "unreachable"),
            Err(TimingError::NoPath { .. })
        ));

        let none: Option<usize> = None;
        assert!(matches!(
            none.ok_or_invalid_input(7, "empty path"),
            Err(TimingError::InvalidInput {
                trajectory_id: 7,
                ..
            })
        ));
    }
}
