//! Run results.
//!
//! A [`RunResult`] is the only artifact handed to callers and reporters. It
//! is produced for every trial, including aborted ones: a deadline or a
//! worker fault yields a partial result with the matching [`RunStatus`],
//! never a discarded one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::Detector;
use crate::error::HazardError;
use crate::observation::Observation;
use crate::pair::PairValue;

/// Hazard class a run measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    /// Torn reads of the invariant pair under concurrent shifts.
    TornPair,
    /// Targeted torn value: racing corrective shifts steered to a distance.
    Convergence,
    /// Flag-guarded publication seen with uninitialized data.
    Publication,
    /// Polling loop that never observes a cleared flag.
    StalePoll,
    /// Increments lost to an unsynchronized read-modify-write.
    LostUpdate,
    /// Two occupants inside a try-enter guard at once.
    Exclusion,
    /// Value written before a thread spawn not visible to the new thread.
    SpawnHandoff,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// All workers finished their rounds.
    Completed,
    /// The convergence controller reached the target distance.
    Converged,
    /// The convergence controller ran out of rounds.
    BudgetExceeded { last_distance: i64 },
    /// The deadline cut the run short.
    DeadlineExceeded,
    /// A worker panicked and the run was stopped.
    WorkerFault { worker: usize, message: String },
}

impl RunStatus {
    /// Whether the run went the whole way.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Converged)
    }
}

/// Aggregated outcome of one trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Hazard class measured
    pub kind: HazardKind,
    /// What was measured (strategy name or primitive variant)
    pub subject: String,
    /// Seed for reproduction
    pub seed: u64,
    /// Total observations, stale ones included
    pub observations: u64,
    /// Observations excluded from counting (stale fenced flag)
    pub stale_observations: u64,
    /// Observations that broke the invariant
    pub violations: u64,
    /// Violations over countable observations
    pub violation_rate: f64,
    /// Largest deviation seen
    pub max_deviation: i64,
    /// Mean deviation across violations
    pub mean_deviation: f64,
    /// Pair value at the end of the run
    pub final_pair: PairValue,
    /// Whether the convergence target was reached
    pub converged: bool,
    /// Rounds executed (worker rounds or controller rounds)
    pub rounds_used: u64,
    /// How the run ended
    pub status: RunStatus,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Earliest violating observation, if any
    pub first_violation: Option<Observation>,
}

impl RunResult {
    /// Build a completed result from a detector's totals.
    #[must_use]
    pub fn from_detector(
        kind: HazardKind,
        subject: impl Into<String>,
        seed: u64,
        detector: &Detector,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            seed,
            observations: detector.observations_count(),
            stale_observations: detector.stale_count(),
            violations: detector.violations_count(),
            violation_rate: detector.violation_rate(),
            max_deviation: detector.max_deviation(),
            mean_deviation: detector.mean_deviation(),
            final_pair: PairValue::default(),
            converged: false,
            rounds_used: 0,
            status: RunStatus::Completed,
            elapsed,
            first_violation: detector.first_violation(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.converged = status == RunStatus::Converged;
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_final_pair(mut self, final_pair: PairValue) -> Self {
        self.final_pair = final_pair;
        self
    }

    #[must_use]
    pub fn with_rounds(mut self, rounds_used: u64) -> Self {
        self.rounds_used = rounds_used;
        self
    }

    /// Whether any invariant violation was observed.
    #[must_use]
    pub fn violated(&self) -> bool {
        self.violations > 0
    }

    /// Convert an aborted run into its error, keeping complete runs.
    ///
    /// Violations are not errors and never cause an `Err` here.
    pub fn into_outcome(self) -> Result<RunResult, HazardError> {
        match &self.status {
            RunStatus::Completed | RunStatus::Converged => Ok(self),
            RunStatus::BudgetExceeded { last_distance } => {
                Err(HazardError::ConvergenceBudgetExceeded {
                    rounds: self.rounds_used,
                    last_distance: *last_distance,
                })
            }
            RunStatus::DeadlineExceeded => Err(HazardError::DeadlineExceeded {
                elapsed: self.elapsed,
            }),
            RunStatus::WorkerFault { worker, message } => Err(HazardError::WorkerFault {
                worker: *worker,
                message: message.clone(),
            }),
        }
    }

    /// Format as a single status line.
    pub fn format(&self) -> String {
        let tag = match (&self.status, self.violated()) {
            (status, _) if !status.is_complete() => "ABORTED",
            (_, true) => "VIOLATED",
            (_, false) => "HELD",
        };

        let mut line = format!(
            "[{}] {:?}/{} seed={} obs={} stale={} violations={} rate={:.4} max_dev={} rounds={} ({:.2}s)",
            tag,
            self.kind,
            self.subject,
            self.seed,
            self.observations,
            self.stale_observations,
            self.violations,
            self.violation_rate,
            self.max_deviation,
            self.rounds_used,
            self.elapsed.as_secs_f64()
        );

        if self.kind == HazardKind::Convergence {
            line.push_str(&format!(
                " converged={} final=({})",
                self.converged, self.final_pair
            ));
        }
        if !self.status.is_complete() {
            line.push_str(&format!(" status={:?}", self.status));
        }
        line
    }
}

/// Roll-up across repeated trials of the same configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialSummary {
    pub trials: u64,
    pub trials_with_violations: u64,
    pub aborted_trials: u64,
    pub total_observations: u64,
    pub total_violations: u64,
    pub worst_deviation: i64,
}

impl TrialSummary {
    /// Fold one trial in.
    pub fn absorb(&mut self, result: &RunResult) {
        self.trials += 1;
        if result.violated() {
            self.trials_with_violations += 1;
        }
        if !result.status.is_complete() {
            self.aborted_trials += 1;
        }
        self.total_observations += result.observations;
        self.total_violations += result.violations;
        self.worst_deviation = self.worst_deviation.max(result.max_deviation);
    }

    /// Fraction of trials that showed at least one violation.
    #[must_use]
    pub fn violating_fraction(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.trials_with_violations as f64 / self.trials as f64
    }
}
