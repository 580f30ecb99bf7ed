//! Violation detector and aggregator.
//!
//! Every observation flows through a [`Detector`]. The reduction is
//! streaming (counts, sum, max and the first violation) so memory use is
//! constant in the number of observations. Each worker owns its detector;
//! detectors are merged at the trial boundary, so there is no shared hot
//! counter to serialize the workers.

use crate::observation::Observation;
use crate::pair::Snapshot;

/// Streaming invariant checker for one reader.
#[derive(Debug, Clone)]
pub struct Detector {
    target_distance: i64,
    next_seq: u64,
    observations_count: u64,
    stale_count: u64,
    violations_count: u64,
    deviation_sum: i128,
    max_deviation: i64,
    first_violation: Option<Observation>,
}

impl Detector {
    #[must_use]
    pub fn new(target_distance: i64) -> Self {
        Self {
            target_distance,
            next_seq: 0,
            observations_count: 0,
            stale_count: 0,
            violations_count: 0,
            deviation_sum: 0,
            max_deviation: 0,
            first_violation: None,
        }
    }

    #[must_use]
    pub fn target_distance(&self) -> i64 {
        self.target_distance
    }

    /// Check a snapshot and fold it into the running totals.
    pub fn observe(&mut self, snapshot: Snapshot) -> Observation {
        self.next_seq += 1;
        let obs = Observation::check(self.next_seq, snapshot, self.target_distance);
        self.record(obs);
        obs
    }

    /// Fold an already-judged observation into the running totals.
    pub fn record(&mut self, obs: Observation) {
        self.observations_count += 1;

        if !obs.is_countable() {
            self.stale_count += 1;
            return;
        }

        if obs.invariant_holds {
            return;
        }

        self.violations_count += 1;
        self.deviation_sum += i128::from(obs.deviation);
        self.max_deviation = self.max_deviation.max(obs.deviation);
        if self.first_violation.is_none() {
            self.first_violation = Some(obs);
        }
    }

    /// Record a violation that is not a pair read, e.g. a lost-update count.
    pub fn record_violation(&mut self, deviation: i64) {
        debug_assert!(deviation >= 0, "Deviation must be non-negative");
        self.observations_count += 1;
        if deviation == 0 {
            return;
        }
        self.violations_count += 1;
        self.deviation_sum += i128::from(deviation);
        self.max_deviation = self.max_deviation.max(deviation);
    }

    /// Record a check that held.
    pub fn record_pass(&mut self) {
        self.observations_count += 1;
    }

    /// Combine another detector's totals into this one.
    ///
    /// Sequence numbers are per detector, so they are not compared: the first
    /// violation kept is `self`'s, or `other`'s when `self` has none. Merging
    /// workers in index order keeps the lowest-indexed worker's first violation.
    pub fn merge(&mut self, other: &Detector) {
        debug_assert_eq!(
            self.target_distance, other.target_distance,
            "Merging detectors with different targets"
        );

        self.observations_count += other.observations_count;
        self.stale_count += other.stale_count;
        self.violations_count += other.violations_count;
        self.deviation_sum += other.deviation_sum;
        self.max_deviation = self.max_deviation.max(other.max_deviation);

        if self.first_violation.is_none() {
            self.first_violation = other.first_violation;
        }
    }

    #[must_use]
    pub fn observations_count(&self) -> u64 {
        self.observations_count
    }

    #[must_use]
    pub fn stale_count(&self) -> u64 {
        self.stale_count
    }

    #[must_use]
    pub fn violations_count(&self) -> u64 {
        self.violations_count
    }

    #[must_use]
    pub fn max_deviation(&self) -> i64 {
        self.max_deviation
    }

    #[must_use]
    pub fn first_violation(&self) -> Option<Observation> {
        self.first_violation
    }

    /// Violations over countable observations; 0 when nothing was counted.
    #[must_use]
    pub fn violation_rate(&self) -> f64 {
        let countable = self.observations_count - self.stale_count;
        if countable == 0 {
            return 0.0;
        }
        self.violations_count as f64 / countable as f64
    }

    /// Mean deviation across violations; 0 without violations.
    #[must_use]
    pub fn mean_deviation(&self) -> f64 {
        if self.violations_count == 0 {
            return 0.0;
        }
        self.deviation_sum as f64 / self.violations_count as f64
    }
}
