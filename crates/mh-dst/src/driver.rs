//! Stress driver.
//!
//! Runs `workers` threads against one shared pair. Each worker performs
//! `iterations` rounds of "shift by a random non-zero delta, then maybe
//! observe", judging its observations with its own [`Detector`]. Detectors
//! are merged when the trial ends.
//!
//! # Trial lifecycle
//!
//! ```text
//! validate ─ build pair ─ spawn workers ─ open gate ─┬─ all done ──────────▶ Completed
//!                                                    ├─ deadline ─ stop ───▶ DeadlineExceeded
//!                                                    └─ worker panics ─ stop ▶ WorkerFault
//!                                     join all ─ merge detectors ─ report ─ RunResult
//! ```
//!
//! Workers are released together through a start gate but are not ordered in
//! any other way. A cut-short trial still merges and reports whatever its
//! workers observed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use mh_cells::shared_pair;
use mh_core::{
    Detector, HazardKind, HookHandle, InterleavingHook, InvariantPair, Reporter, Result,
    RunConfig, RunResult, RunStatus, TrialSummary,
};
use tracing::{debug, info, warn};

use crate::actor::set_actor;
use crate::random::{derive_seed, DeterministicRng};
use crate::seed::resolve_seed;

/// What one worker hands back at the end of a trial, including a trial it
/// cut short by panicking.
#[derive(Debug)]
struct WorkerReport {
    detector: Detector,
    rounds: u64,
    fault: Option<String>,
}

/// Signals completion when a worker exits, and stops the trial if it exits by
/// a panic that escaped the round loop.
struct CompletionGuard<'a> {
    worker: usize,
    stop: &'a AtomicBool,
    done: Sender<usize>,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.stop.store(true, Ordering::Release);
        }
        // The driver may have stopped listening; nothing to do then.
        let _ = self.done.send(self.worker);
    }
}

/// Drives stress trials for one configuration.
#[derive(Debug, Clone)]
pub struct StressDriver {
    config: RunConfig,
    hook: HookHandle,
}

impl StressDriver {
    /// Validate `config`; nothing is spawned on rejection.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hook: HookHandle::none(),
        })
    }

    /// Inject an interleaving hook into every pair this driver builds.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn InterleavingHook>) -> Self {
        self.hook = HookHandle::new(hook);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one trial and hand its result to `reporter`.
    ///
    /// Deadline expiry and worker faults come back as a partial result with
    /// the matching status. `Err` is returned only when a worker thread could
    /// not be started.
    pub fn run(&self, reporter: &dyn Reporter) -> Result<RunResult> {
        let seed = resolve_seed(self.config.seed);
        self.run_seeded(seed, reporter)
    }

    /// Run `trials` independent trials with seeds derived from one base seed.
    pub fn run_trials(&self, trials: u64, reporter: &dyn Reporter) -> Result<TrialSummary> {
        let base = resolve_seed(self.config.seed);
        let mut summary = TrialSummary::default();

        for trial in 0..trials {
            let result = self.run_seeded(derive_seed(base, trial), reporter)?;
            summary.absorb(&result);
        }

        info!(
            strategy = %self.config.strategy,
            trials = summary.trials,
            violating = summary.trials_with_violations,
            aborted = summary.aborted_trials,
            violations = summary.total_violations,
            worst_deviation = summary.worst_deviation,
            "Trials finished"
        );
        Ok(summary)
    }

    fn run_seeded(&self, seed: u64, reporter: &dyn Reporter) -> Result<RunResult> {
        let config = &self.config;
        let target = config.effective_target_distance();
        let pair = shared_pair(config.strategy, config.initial_pair(), self.hook.clone());

        info!(
            strategy = %config.strategy,
            workers = config.workers,
            iterations = config.iterations,
            initial_distance = config.initial_distance,
            target_distance = target,
            seed,
            "Starting trial"
        );

        let start = Instant::now();
        let outcome = self.execute(&pair, seed, target, start)?;
        let elapsed = start.elapsed();

        let result = RunResult::from_detector(
            HazardKind::TornPair,
            config.strategy.name(),
            seed,
            &outcome.detector,
            elapsed,
        )
        .with_final_pair(pair.snapshot().value)
        .with_rounds(outcome.rounds)
        .with_status(outcome.status);

        info!(
            strategy = %config.strategy,
            observations = result.observations,
            violations = result.violations,
            max_deviation = result.max_deviation,
            status = ?result.status,
            "Trial finished"
        );

        reporter.report(&result);
        Ok(result)
    }

    fn execute(
        &self,
        pair: &Arc<dyn InvariantPair>,
        seed: u64,
        target: i64,
        start: Instant,
    ) -> Result<TrialOutcome> {
        let config = &self.config;
        let root_rng = DeterministicRng::new(seed);
        let stop = AtomicBool::new(false);
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<usize>();
        // Never sent on: dropping the sender releases every worker at once.
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(config.workers);

            for worker in 0..config.workers {
                let pair = Arc::clone(pair);
                let stop = &stop;
                let done = done_tx.clone();
                let gate = gate_rx.clone();
                let rng = root_rng.derive(worker as u64);

                let spawned = thread::Builder::new()
                    .name(format!("hazard-worker-{}", worker))
                    .spawn_scoped(scope, move || {
                        let _completion = CompletionGuard { worker, stop, done };
                        run_worker(worker, pair.as_ref(), rng, target, config, stop, &gate)
                    });

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        warn!(worker, error = %e, "Failed to spawn worker");
                        stop.store(true, Ordering::Release);
                        drop(gate_tx);
                        for handle in handles {
                            let _ = handle.join();
                        }
                        return Err(e.into());
                    }
                }
            }

            drop(done_tx);
            drop(gate_tx);

            let deadline_hit = wait_for_workers(&done_rx, config.workers, start, config, &stop);

            let mut detector = Detector::new(target);
            let mut rounds = 0u64;
            let mut fault: Option<(usize, String)> = None;

            for (worker, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(report) => {
                        detector.merge(&report.detector);
                        rounds += report.rounds;
                        if let Some(message) = report.fault {
                            warn!(worker, message = %message, "Worker fault");
                            if fault.is_none() {
                                fault = Some((worker, message));
                            }
                        }
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(worker, message = %message, "Worker fault");
                        if fault.is_none() {
                            fault = Some((worker, message));
                        }
                    }
                }
            }

            let status = match fault {
                Some((worker, message)) => RunStatus::WorkerFault { worker, message },
                None if deadline_hit => RunStatus::DeadlineExceeded,
                None => RunStatus::Completed,
            };

            Ok(TrialOutcome {
                detector,
                rounds,
                status,
            })
        })
    }
}

struct TrialOutcome {
    detector: Detector,
    rounds: u64,
    status: RunStatus,
}

fn run_worker(
    worker: usize,
    pair: &dyn InvariantPair,
    mut rng: DeterministicRng,
    target: i64,
    config: &RunConfig,
    stop: &AtomicBool,
    gate: &Receiver<()>,
) -> WorkerReport {
    set_actor(worker);
    let mut report = WorkerReport {
        detector: Detector::new(target),
        rounds: 0,
        fault: None,
    };

    // Returns once the gate sender is dropped.
    let _ = gate.recv();

    // A panic keeps everything observed up to the faulting round.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        while report.rounds < config.iterations && !stop.load(Ordering::Acquire) {
            pair.shift(rng.delta(config.max_delta));
            if rng.gen_bool(config.observe_probability) {
                report.detector.observe(pair.snapshot());
            }
            report.rounds += 1;
        }
    }));

    if let Err(payload) = outcome {
        stop.store(true, Ordering::Release);
        report.fault = Some(panic_message(payload.as_ref()));
    }

    debug!(
        worker,
        rounds = report.rounds,
        observations = report.detector.observations_count(),
        violations = report.detector.violations_count(),
        faulted = report.fault.is_some(),
        "Worker finished"
    );

    report
}

/// Wait until every worker signalled completion or the deadline passed.
///
/// Returns whether the deadline cut the trial short.
fn wait_for_workers(
    done: &Receiver<usize>,
    workers: usize,
    start: Instant,
    config: &RunConfig,
    stop: &AtomicBool,
) -> bool {
    let deadline = config.deadline().map(|d| start + d);

    for _ in 0..workers {
        let received = match deadline {
            Some(deadline) => match done.recv_deadline(deadline) {
                Ok(worker) => Some(worker),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Deadline exceeded, stopping workers"
                    );
                    stop.store(true, Ordering::Release);
                    return true;
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
            None => done.recv().ok(),
        };

        if received.is_none() {
            break;
        }
    }
    false
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
