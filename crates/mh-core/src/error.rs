//! Error taxonomy.
//!
//! Invariant violations are not errors: they are the measured signal and
//! live in [`RunResult`](crate::result::RunResult). Errors here describe a
//! trial that was refused, cut short or broken.

use std::time::Duration;

use thiserror::Error;

/// Result alias for harness operations.
pub type Result<T> = std::result::Result<T, HazardError>;

#[derive(Error, Debug)]
pub enum HazardError {
    /// Configuration rejected before any worker was spawned.
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfiguration {
        field: &'static str,
        reason: String,
    },

    /// The convergence controller ran out of rounds.
    #[error("convergence budget exceeded after {rounds} rounds (last distance {last_distance})")]
    ConvergenceBudgetExceeded { rounds: u64, last_distance: i64 },

    /// The caller-supplied deadline expired; the result is partial.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },

    /// A worker panicked; its trial was stopped.
    #[error("worker {worker} faulted: {message}")]
    WorkerFault { worker: usize, message: String },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

impl HazardError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        HazardError::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = HazardError::invalid("workers", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'workers': must be at least 1"
        );

        let err = HazardError::ConvergenceBudgetExceeded {
            rounds: 10,
            last_distance: -3,
        };
        assert!(err.to_string().contains("10 rounds"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads left");
        let err: HazardError = io.into();
        assert!(matches!(err, HazardError::WorkerSpawn(_)));
    }
}
