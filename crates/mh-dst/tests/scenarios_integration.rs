//! Scenario integration tests.
//!
//! Each hazard is forced once with a scripted interleaving over a single
//! round, then the corrected variant is run under the same script to show it
//! holds.

use std::sync::Arc;
use std::time::Duration;

use mh_cells::{CounterKind, ExclusionKind, PollMode, PublishOrdering, ReadOrder, WriteOrder};
use mh_core::{HazardKind, NullReporter, RunStatus};
use mh_dst::{InterleavingTrace, OracleHook, ScenarioConfig, ScenarioHarness};

fn single_round(workers: usize) -> ScenarioConfig {
    ScenarioConfig {
        rounds: 1,
        workers,
        operations: 50,
        seed: Some(2024),
        ..ScenarioConfig::default()
    }
}

fn scripted(config: ScenarioConfig, trace: InterleavingTrace) -> (ScenarioHarness, Arc<OracleHook>) {
    let oracle = Arc::new(OracleHook::new(trace).with_patience(Duration::from_millis(200)));
    let harness = ScenarioHarness::new(config)
        .unwrap()
        .with_hook(oracle.clone());
    (harness, oracle)
}

#[test]
fn test_reordered_publication_exposes_uninitialized_payload() {
    let (harness, oracle) = scripted(
        single_round(2),
        InterleavingTrace::reordered_publication(0, 1),
    );

    let result = harness
        .publication(
            PublishOrdering::Relaxed,
            WriteOrder::FlagThenData,
            ReadOrder::FlagThenData,
            &NullReporter,
        )
        .unwrap();

    assert!(oracle.is_complete(), "stats: {:?}", oracle.stats());
    assert_eq!(result.kind, HazardKind::Publication);
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.violations, 1);
}

#[test]
fn test_program_order_publication_survives_script() {
    let (harness, _oracle) = scripted(
        single_round(2),
        InterleavingTrace::reordered_publication(0, 1),
    );

    let result = harness
        .publication(
            PublishOrdering::ReleaseAcquire,
            WriteOrder::DataThenFlag,
            ReadOrder::FlagThenData,
            &NullReporter,
        )
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.violations, 0);
}

#[test]
fn test_hoisted_poll_misses_stop() {
    let config = ScenarioConfig {
        spin_budget: 100_000,
        ..single_round(2)
    };
    let (harness, oracle) = scripted(config, InterleavingTrace::stale_poll(0, 1));

    let result = harness.stale_poll(PollMode::Hoisted, &NullReporter).unwrap();

    assert!(oracle.is_complete());
    assert_eq!(result.kind, HazardKind::StalePoll);
    assert_eq!(result.subject, "hoisted");
    assert_eq!(result.violations, 1);
}

#[test]
fn test_acquire_poll_sees_stop() {
    let (harness, oracle) = scripted(single_round(2), InterleavingTrace::stale_poll(0, 1));

    let result = harness.stale_poll(PollMode::Acquire, &NullReporter).unwrap();

    assert!(oracle.is_complete());
    assert_eq!(result.observations, 1);
    assert_eq!(result.violations, 0);
}

#[test]
fn test_check_then_set_admits_two() {
    let (harness, oracle) = scripted(single_round(2), InterleavingTrace::double_entry(0, 1));

    let result = harness
        .exclusion(ExclusionKind::CheckThenSet, &NullReporter)
        .unwrap();

    assert!(oracle.is_complete(), "stats: {:?}", oracle.stats());
    assert_eq!(result.kind, HazardKind::Exclusion);
    assert!(result.violations >= 1);
    assert!(result.max_deviation >= 1);
}

#[test]
fn test_exchange_admits_one() {
    let (harness, _oracle) = scripted(single_round(2), InterleavingTrace::double_entry(0, 1));

    let result = harness
        .exclusion(ExclusionKind::Exchange, &NullReporter)
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.observations > 0);
    assert_eq!(result.violations, 0);
}

#[test]
fn test_racy_counter_loses_update() {
    let (harness, oracle) = scripted(single_round(2), InterleavingTrace::lost_update(0, 1));

    let result = harness.lost_update(CounterKind::Racy, &NullReporter).unwrap();

    assert!(oracle.is_complete(), "stats: {:?}", oracle.stats());
    assert_eq!(result.kind, HazardKind::LostUpdate);
    assert_eq!(result.violations, 1);
    assert!(result.max_deviation >= 1);
}

#[test]
fn test_interlocked_counter_survives_script() {
    let (harness, _oracle) = scripted(single_round(2), InterleavingTrace::lost_update(0, 1));

    let result = harness
        .lost_update(CounterKind::Interlocked, &NullReporter)
        .unwrap();

    assert_eq!(result.violations, 0);
}

#[test]
fn test_deadline_stops_between_rounds() {
    let config = ScenarioConfig {
        rounds: u64::MAX,
        deadline: Some(Duration::from_millis(50)),
        seed: Some(1),
        ..ScenarioConfig::quick()
    };
    let result = ScenarioHarness::new(config)
        .unwrap()
        .spawn_handoff(&NullReporter)
        .unwrap();

    assert_eq!(result.status, RunStatus::DeadlineExceeded);
    assert!(result.rounds_used > 0);
    assert_eq!(result.violations, 0);
}

#[test]
#[ignore = "heavy: statistical, relies on real contention"]
fn test_stress_racy_counter_loses_updates() {
    let config = ScenarioConfig {
        seed: Some(3),
        ..ScenarioConfig::stress()
    };
    let result = ScenarioHarness::new(config)
        .unwrap()
        .lost_update(CounterKind::Racy, &NullReporter)
        .unwrap();

    println!("{}", result.format());
    assert!(result.violations > 0);
}
