//! Reporting collaborator.
//!
//! The harness calls [`Reporter::report`] once per completed or aborted
//! trial and performs no formatting or I/O of its own.

use parking_lot::Mutex;

use crate::result::{RunResult, RunStatus};

/// Receives every trial's result.
pub trait Reporter: Send + Sync {
    fn report(&self, result: &RunResult);
}

/// Reporter that discards results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _result: &RunResult) {}
}

/// Reporter that logs each result as structured `tracing` fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, result: &RunResult) {
        match &result.status {
            RunStatus::Completed | RunStatus::Converged => tracing::info!(
                kind = ?result.kind,
                subject = %result.subject,
                seed = result.seed,
                observations = result.observations,
                violations = result.violations,
                violation_rate = result.violation_rate,
                max_deviation = result.max_deviation,
                converged = result.converged,
                rounds = result.rounds_used,
                "trial finished"
            ),
            status => tracing::warn!(
                kind = ?result.kind,
                subject = %result.subject,
                seed = result.seed,
                observations = result.observations,
                violations = result.violations,
                status = ?status,
                "trial aborted"
            ),
        }
    }
}

/// Reporter that keeps every result, for tests and batch callers.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    results: Mutex<Vec<RunResult>>,
}

impl CollectingReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results reported so far, in report order.
    #[must_use]
    pub fn results(&self) -> Vec<RunResult> {
        self.results.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, result: &RunResult) {
        self.results.lock().push(result.clone());
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, result: &RunResult) {
        (**self).report(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detector;
    use crate::result::HazardKind;
    use std::time::Duration;

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::new();
        for seed in 1..=3 {
            let result = RunResult::from_detector(
                HazardKind::TornPair,
                "mutex",
                seed,
                &Detector::new(0),
                Duration::ZERO,
            );
            reporter.report(&result);
        }

        let seeds: Vec<u64> = reporter.results().iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![1, 2, 3]);
        assert_eq!(reporter.len(), 3);
    }

    #[test]
    fn test_reporter_by_reference() {
        fn report_twice(reporter: impl Reporter, result: &RunResult) {
            reporter.report(result);
            reporter.report(result);
        }

        let reporter = CollectingReporter::new();
        let result = RunResult::from_detector(
            HazardKind::Exclusion,
            "exchange",
            1,
            &Detector::new(0),
            Duration::ZERO,
        );
        report_twice(&reporter, &result);
        assert_eq!(reporter.len(), 2);
    }
}
