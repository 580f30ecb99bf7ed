//! Convergence controller integration tests.
//!
//! A correct shift never changes the distance, so only the unsynchronized
//! pair can be steered to a new distance; every other discipline must run
//! out of budget or time unless it already starts at the target.

use std::sync::Arc;

use mh_core::{
    CollectingReporter, HazardError, HazardKind, NullReporter, PairValue, RunConfig, RunStatus,
    Strategy,
};
use mh_dst::{ConvergenceController, InterleavingTrace, OracleHook};

fn convergence(strategy: Strategy, initial: i64, target: i64, budget: Option<u64>) -> RunConfig {
    let mut config = RunConfig {
        strategy,
        initial_distance: initial,
        target_distance: Some(target),
        seed: Some(31337),
        ..RunConfig::default()
    };
    config.convergence.budget = budget;
    config
}

#[test]
fn test_unsynchronized_converges_or_reports_budget() {
    let mut config = convergence(Strategy::Unsynchronized, 7, 2, Some(100_000));
    config.convergence.target_a = 40;

    let reporter = CollectingReporter::new();
    let result = ConvergenceController::new(config)
        .unwrap()
        .run(&reporter)
        .unwrap();

    println!("{}", result.format());
    assert_eq!(result.kind, HazardKind::Convergence);
    assert_eq!(reporter.len(), 1);

    match result.status {
        RunStatus::Converged => {
            assert!(result.converged);
            assert_eq!(result.final_pair, PairValue::new(40, 42));
            assert!(result.rounds_used <= 100_000);
        }
        RunStatus::BudgetExceeded { .. } => {
            assert!(!result.converged);
            assert_eq!(result.rounds_used, 100_000);
        }
        other => panic!("unexpected status {:?}", other),
    }
}

/// One dispatch thread, so the scripted writer is actor 0.
fn scripted(initial: i64, target: i64, budget: Option<u64>, target_a: i64) -> RunConfig {
    let mut config = convergence(Strategy::Unsynchronized, initial, target, budget);
    config.convergence.dispatchers = 1;
    config.convergence.target_a = target_a;
    config
}

fn oracle_for(initial: i64, target: i64) -> Arc<OracleHook> {
    let trace = if target < initial {
        InterleavingTrace::torn_correction(0)
    } else {
        InterleavingTrace::torn_correction_rising(0)
    };
    Arc::new(OracleHook::new(trace))
}

#[test]
fn test_torn_snapshot_converges_to_target() {
    for (initial, target) in [(7, 2), (5, -3), (5, 12), (5, 0)] {
        let oracle = oracle_for(initial, target);
        let result = ConvergenceController::new(scripted(initial, target, Some(100_000), 40))
            .unwrap()
            .with_hook(oracle.clone())
            .run(&NullReporter)
            .unwrap();

        assert!(
            oracle.is_complete(),
            "{} -> {}: {:?}",
            initial,
            target,
            oracle.stats()
        );
        assert_eq!(result.status, RunStatus::Converged, "{} -> {}", initial, target);
        assert!(result.converged);
        assert_eq!(result.rounds_used, 2);
        assert_eq!(result.final_pair.distance(), target);
        assert_eq!(result.final_pair.a, 40);
        // The converging snapshot was torn relative to the starting distance.
        assert_eq!(result.violations, 1);
    }
}

#[test]
fn test_unbounded_budget_converges_before_deadline() {
    let config = RunConfig {
        deadline_ms: Some(10_000),
        ..scripted(5, 12, None, 0)
    };
    let result = ConvergenceController::new(config)
        .unwrap()
        .with_hook(oracle_for(5, 12))
        .run(&NullReporter)
        .unwrap();

    assert_eq!(result.status, RunStatus::Converged);
    assert_eq!(result.final_pair, PairValue::new(0, 12));
    assert!(result.into_outcome().is_ok());
}

#[test]
fn test_atomic_strategies_keep_their_distance() {
    for strategy in [Strategy::Mutex, Strategy::AtomicCounter] {
        let result = ConvergenceController::new(convergence(strategy, 7, 2, Some(5_000)))
            .unwrap()
            .run(&NullReporter)
            .unwrap();

        assert_eq!(
            result.status,
            RunStatus::BudgetExceeded { last_distance: 7 },
            "strategy {}",
            strategy
        );
        assert_eq!(result.violations, 0, "strategy {}", strategy);
        assert!(matches!(
            result.into_outcome(),
            Err(HazardError::ConvergenceBudgetExceeded {
                rounds: 5_000,
                last_distance: 7
            })
        ));
    }
}

#[test]
fn test_fenced_pair_never_converges_to_new_distance() {
    let result = ConvergenceController::new(convergence(Strategy::FencedFlag, 7, 2, Some(5_000)))
        .unwrap()
        .run(&NullReporter)
        .unwrap();

    assert!(!result.converged);
    assert!(matches!(result.status, RunStatus::BudgetExceeded { .. }));
    assert_eq!(result.violations, 0);
}

#[test]
fn test_unbounded_budget_at_target() {
    let result = ConvergenceController::new(convergence(Strategy::Unsynchronized, 5, 5, None))
        .unwrap()
        .run(&NullReporter)
        .unwrap();

    assert_eq!(result.status, RunStatus::Converged);
    assert_eq!(result.rounds_used, 1);
    assert_eq!(result.final_pair.distance(), 5);
}

#[test]
fn test_unbounded_budget_stops_at_deadline() {
    let config = RunConfig {
        deadline_ms: Some(100),
        ..convergence(Strategy::Mutex, 7, 2, None)
    };
    let result = ConvergenceController::new(config)
        .unwrap()
        .run(&NullReporter)
        .unwrap();

    assert_eq!(result.status, RunStatus::DeadlineExceeded);
    assert!(!result.converged);
    assert!(result.rounds_used > 0);
    assert_eq!(result.final_pair.distance(), 7);
}

#[test]
fn test_zero_budget_rejected() {
    let config = convergence(Strategy::Mutex, 7, 2, Some(0));
    assert!(matches!(
        ConvergenceController::new(config),
        Err(HazardError::InvalidConfiguration {
            field: "convergence.budget",
            ..
        })
    ));
}
