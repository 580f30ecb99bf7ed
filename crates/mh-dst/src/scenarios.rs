//! Scenario drivers for the supplemental hazards.
//!
//! Each scenario repeats a small multi-threaded experiment `rounds` times
//! against a fresh cell and folds every round into a [`Detector`]. The
//! outcome is a [`RunResult`] tagged with the scenario's [`HazardKind`],
//! handed to the reporter exactly like a stress trial.
//!
//! | Scenario | Actors | Violation |
//! |----------|--------|-----------|
//! | `publication` | writer 0, reader 1 | flag seen set, payload uninitialized |
//! | `stale_poll` | poller 0, stopper 1 | poll ceiling reached after the clear |
//! | `lost_update` | `workers` incrementers | final count below the increments made |
//! | `exclusion` | `workers` callers | a caller admitted while another is inside |
//! | `spawn_handoff` | parent, child 0 | child reads anything but the value written before spawn |

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mh_cells::{
    shared_counter, CounterKind, ExclusionGuard, ExclusionKind, PollMode, PollOutcome,
    Publication, PublishOrdering, ReadOrder, ReadOutcome, StopSignal, WriteOrder,
};
use mh_core::{
    Detector, HazardError, HazardKind, HookHandle, HookPoint, InterleavingHook, Reporter, Result,
    RunResult, RunStatus, Slot, WORKERS_MAX,
};
use tracing::{debug, info, warn};

use crate::actor::set_actor;
use crate::driver::panic_message;
use crate::random::DeterministicRng;
use crate::seed::resolve_seed;

/// Configuration shared by the scenario drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    /// Independent repetitions, each against a fresh cell
    pub rounds: u64,
    /// Threads for the counter and exclusion scenarios
    pub workers: usize,
    /// Increments or entry attempts per worker per round
    pub operations: u64,
    /// Ceiling on poll iterations (polling) and flag checks (publication)
    pub spin_budget: u64,
    /// Wall-clock limit, checked between rounds
    pub deadline: Option<Duration>,
    /// Seed for reproduction; `None` reads `HAZARD_SEED` or draws one
    pub seed: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            rounds: 20,
            workers: 4,
            operations: 1_000,
            spin_budget: 5_000_000,
            deadline: None,
            seed: None,
        }
    }
}

impl ScenarioConfig {
    /// Configuration for quick testing.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            rounds: 4,
            workers: 2,
            operations: 200,
            ..Self::default()
        }
    }

    /// Configuration for stress testing.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            rounds: 200,
            workers: 16,
            operations: 10_000,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            return Err(HazardError::invalid("rounds", "must be at least 1"));
        }
        if self.workers == 0 || self.workers > WORKERS_MAX {
            return Err(HazardError::invalid(
                "workers",
                format!("must be within 1..={}, got {}", WORKERS_MAX, self.workers),
            ));
        }
        if self.operations == 0 {
            return Err(HazardError::invalid("operations", "must be at least 1"));
        }
        if self.spin_budget == 0 {
            return Err(HazardError::invalid("spin_budget", "must be at least 1"));
        }
        Ok(())
    }
}

/// Outputs of one round's actors, plus the first fault.
struct ActorOutcome<T> {
    outputs: Vec<T>,
    fault: Option<RunStatus>,
}

/// Runs the supplemental hazard scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioHarness {
    config: ScenarioConfig,
    hook: HookHandle,
}

impl ScenarioHarness {
    /// Validate `config`; nothing is spawned on rejection.
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hook: HookHandle::none(),
        })
    }

    /// Inject an interleaving hook into every cell this harness builds.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn InterleavingHook>) -> Self {
        self.hook = HookHandle::new(hook);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Writer publishes a value behind a flag while a reader polls for it.
    pub fn publication(
        &self,
        ordering: PublishOrdering,
        write_order: WriteOrder,
        read_order: ReadOrder,
        reporter: &dyn Reporter,
    ) -> Result<RunResult> {
        let subject = format!(
            "{}/{}/{}",
            ordering.name(),
            write_order.name(),
            read_order.name()
        );
        let spin_budget = self.config.spin_budget;

        self.repeat(HazardKind::Publication, subject, reporter, |rng, detector| {
            let value = rng.gen_range_inclusive(1, 1_000_000);
            let publication = Publication::with_hook(ordering, self.hook.clone());

            let outcome = run_actors("publication", 2, |actor| {
                if actor == 0 {
                    publication.publish(value, write_order);
                    return ReadOutcome::NotPublished;
                }
                let mut outcome = ReadOutcome::NotPublished;
                for _ in 0..spin_budget {
                    outcome = publication.read(read_order);
                    if outcome != ReadOutcome::NotPublished {
                        break;
                    }
                    std::hint::spin_loop();
                }
                outcome
            })?;

            if let (None, Some(read)) = (&outcome.fault, outcome.outputs.get(1)) {
                let deviation = match read {
                    ReadOutcome::Published(seen) => (value - seen).abs(),
                    ReadOutcome::NotPublished => 0,
                };
                detector.record_violation(deviation);
            }
            Ok(outcome.fault)
        })
    }

    /// Poller spins on a running flag while a stopper clears it.
    pub fn stale_poll(&self, mode: PollMode, reporter: &dyn Reporter) -> Result<RunResult> {
        let spin_budget = self.config.spin_budget;

        self.repeat(HazardKind::StalePoll, mode.name(), reporter, |_rng, detector| {
            let signal = StopSignal::with_hook(self.hook.clone());

            let outcome = run_actors("poll", 2, |actor| {
                if actor == 0 {
                    Some(signal.poll_while_running(mode, spin_budget))
                } else {
                    signal.stop();
                    None
                }
            })?;

            if let (None, Some(Some(poll))) = (&outcome.fault, outcome.outputs.first()) {
                match poll {
                    PollOutcome::Stopped { .. } => detector.record_pass(),
                    PollOutcome::BudgetExhausted { .. } => detector.record_violation(1),
                }
            }
            Ok(outcome.fault)
        })
    }

    /// Workers increment a shared counter; lost increments are the deviation.
    pub fn lost_update(&self, kind: CounterKind, reporter: &dyn Reporter) -> Result<RunResult> {
        let workers = self.config.workers;
        let operations = self.config.operations;

        self.repeat(HazardKind::LostUpdate, kind.name(), reporter, |_rng, detector| {
            let counter = shared_counter(kind, self.hook.clone());

            let outcome = run_actors("counter", workers, |_actor| {
                for _ in 0..operations {
                    counter.increment();
                }
            })?;

            if outcome.fault.is_none() {
                let expected = workers as u64 * operations;
                let lost = expected.saturating_sub(counter.value());
                detector.record_violation(i64::try_from(lost).unwrap_or(i64::MAX));
            }
            Ok(outcome.fault)
        })
    }

    /// Workers try to enter a guard; entries that find company are violations.
    pub fn exclusion(&self, kind: ExclusionKind, reporter: &dyn Reporter) -> Result<RunResult> {
        let workers = self.config.workers;
        let operations = self.config.operations;

        self.repeat(HazardKind::Exclusion, kind.name(), reporter, |_rng, detector| {
            let guard = ExclusionGuard::with_hook(kind, self.hook.clone());

            let outcome = run_actors("exclusion", workers, |_actor| {
                let mut local = Detector::new(0);
                for _ in 0..operations {
                    if let Some(occupancy) = guard.try_enter() {
                        local.record_violation(i64::from(occupancy.occupants_at_entry()) - 1);
                    }
                }
                local
            })?;

            for local in &outcome.outputs {
                detector.merge(local);
            }
            debug!(
                kind = %kind,
                entries = guard.entries_count(),
                denied = guard.denied_count(),
                max_occupants = guard.max_occupants(),
                "Exclusion round finished"
            );
            Ok(outcome.fault)
        })
    }

    /// Parent writes a value, then spawns a child that reads it.
    pub fn spawn_handoff(&self, reporter: &dyn Reporter) -> Result<RunResult> {
        self.repeat(HazardKind::SpawnHandoff, "spawn", reporter, |rng, detector| {
            let value = rng.gen_range_inclusive(1, 1_000_000);
            let shared = AtomicI64::new(0);

            self.hook.at(HookPoint::BeforeWrite(Slot::Data));
            shared.store(value, Ordering::Relaxed);
            self.hook.at(HookPoint::AfterWrite(Slot::Data));

            let outcome = run_actors("handoff", 1, |_actor| {
                self.hook.at(HookPoint::BeforeRead(Slot::Data));
                let seen = shared.load(Ordering::Relaxed);
                self.hook.at(HookPoint::AfterRead(Slot::Data));
                seen
            })?;

            if let (None, Some(seen)) = (&outcome.fault, outcome.outputs.first()) {
                detector.record_violation((value - seen).abs());
            }
            Ok(outcome.fault)
        })
    }

    /// Run `round` up to `rounds` times, stopping early on a fault or the
    /// deadline, then build, log and report the result.
    fn repeat<F>(
        &self,
        kind: HazardKind,
        subject: impl Into<String>,
        reporter: &dyn Reporter,
        mut round: F,
    ) -> Result<RunResult>
    where
        F: FnMut(&mut DeterministicRng, &mut Detector) -> Result<Option<RunStatus>>,
    {
        let subject = subject.into();
        let seed = resolve_seed(self.config.seed);
        let mut rng = DeterministicRng::new(seed);
        let mut detector = Detector::new(0);
        let mut status = RunStatus::Completed;
        let mut rounds = 0u64;

        info!(kind = ?kind, subject = %subject, rounds = self.config.rounds, seed, "Starting scenario");
        let start = Instant::now();

        while rounds < self.config.rounds {
            if self.config.deadline.is_some_and(|d| start.elapsed() >= d) {
                warn!(kind = ?kind, rounds, "Scenario deadline exceeded");
                status = RunStatus::DeadlineExceeded;
                break;
            }

            rounds += 1;
            if let Some(fault) = round(&mut rng, &mut detector)? {
                status = fault;
                break;
            }
        }

        let result = RunResult::from_detector(kind, subject, seed, &detector, start.elapsed())
            .with_rounds(rounds)
            .with_status(status);

        info!(
            kind = ?kind,
            subject = %result.subject,
            observations = result.observations,
            violations = result.violations,
            status = ?result.status,
            "Scenario finished"
        );

        reporter.report(&result);
        Ok(result)
    }
}

/// Run `actors` named threads, actor `i` executing `body(i)`.
///
/// Outputs come back in actor order; a panicking actor contributes no
/// output and is reported as the round's fault.
fn run_actors<T, F>(label: &str, actors: usize, body: F) -> Result<ActorOutcome<T>>
where
    F: Fn(usize) -> T + Sync,
    T: Send,
{
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(actors);
        for actor in 0..actors {
            let body = &body;
            let handle = thread::Builder::new()
                .name(format!("hazard-{}-{}", label, actor))
                .spawn_scoped(scope, move || {
                    set_actor(actor);
                    body(actor)
                })?;
            handles.push(handle);
        }

        let mut outputs = Vec::with_capacity(actors);
        let mut fault = None;
        for (actor, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(output) => outputs.push(output),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(actor, label, message = %message, "Scenario actor fault");
                    if fault.is_none() {
                        fault = Some(RunStatus::WorkerFault {
                            worker: actor,
                            message,
                        });
                    }
                }
            }
        }

        Ok(ActorOutcome { outputs, fault })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_core::{CollectingReporter, NullReporter};

    fn quick() -> ScenarioConfig {
        ScenarioConfig {
            seed: Some(4242),
            ..ScenarioConfig::quick()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ScenarioConfig {
            rounds: 0,
            ..ScenarioConfig::quick()
        };
        assert!(matches!(
            ScenarioHarness::new(config),
            Err(HazardError::InvalidConfiguration { field: "rounds", .. })
        ));
    }

    #[test]
    fn test_exact_counters_lose_nothing() {
        let harness = ScenarioHarness::new(quick()).unwrap();
        for kind in [CounterKind::Locked, CounterKind::Interlocked] {
            let result = harness.lost_update(kind, &NullReporter).unwrap();
            assert_eq!(result.kind, HazardKind::LostUpdate);
            assert_eq!(result.observations, 4);
            assert_eq!(result.violations, 0, "kind {}", kind);
        }
    }

    #[test]
    fn test_spawn_handoff_always_visible() {
        let reporter = CollectingReporter::new();
        let result = ScenarioHarness::new(quick())
            .unwrap()
            .spawn_handoff(&reporter)
            .unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.observations, 4);
        assert_eq!(result.violations, 0);
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn test_release_acquire_publication_holds() {
        let harness = ScenarioHarness::new(quick()).unwrap();
        let result = harness
            .publication(
                PublishOrdering::ReleaseAcquire,
                WriteOrder::DataThenFlag,
                ReadOrder::FlagThenData,
                &NullReporter,
            )
            .unwrap();
        assert_eq!(result.subject, "release_acquire/data_then_flag/flag_then_data");
        assert_eq!(result.violations, 0);
    }

    #[test]
    fn test_actor_fault_becomes_status() {
        let outcome = run_actors("fault", 2, |actor| {
            if actor == 1 {
                panic!("actor one fails");
            }
            actor
        })
        .unwrap();

        assert_eq!(outcome.outputs, vec![0]);
        assert_eq!(
            outcome.fault,
            Some(RunStatus::WorkerFault {
                worker: 1,
                message: "actor one fails".to_string()
            })
        );
    }
}
