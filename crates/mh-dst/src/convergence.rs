//! Convergence controller: the targeted torn value.
//!
//! Steers a pair toward a target distance `D` using nothing but racing
//! shifts. Each round the controller snapshots the pair; if the distance is
//! already `D` it stops, otherwise it dispatches `shift(|D - |a - b||)` to a
//! dispatcher pool without waiting and loops again.
//!
//! A correct shift never changes the distance, so the pair only moves toward
//! `D` when concurrent corrective shifts tear each other. Under `Mutex` and
//! `AtomicCounter` the controller can therefore only converge if the pair
//! starts at `D`; under `Unsynchronized` it converges or not depending on the
//! race. Both outcomes are reportable results.
//!
//! Corrections are paced: the dispatch queue holds at most one pending shift
//! per dispatch thread, and `dispatch` blocks while it is full. Every snapshot
//! therefore races a correction that was computed from a recent distance,
//! instead of a backlog computed from distances long gone.
//!
//! Once the distance matches, the reported final pair is the matching
//! snapshot shifted so that `a == target_a`. It is a local copy: stragglers
//! still in the dispatcher cannot move it, so its distance is always `D`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::Sender;
use mh_cells::shared_pair;
use mh_core::{
    Detector, FlagState, HazardKind, HookHandle, InterleavingHook, InvariantPair, PairValue,
    Reporter, Result, RunConfig, RunResult, RunStatus,
};
use tracing::{debug, info, warn};

use crate::actor::set_actor;
use crate::seed::resolve_seed;

/// Pool applying fire-and-forget shifts to one pair.
///
/// The queue is bounded by the thread count. Dropping the pool halts it:
/// queued shifts are discarded and the threads are joined.
pub struct Dispatcher {
    sender: Option<Sender<i64>>,
    handles: Vec<JoinHandle<()>>,
    halted: Arc<AtomicBool>,
    applied_count: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Start `threads` dispatch threads against `pair`.
    pub fn spawn(pair: Arc<dyn InvariantPair>, threads: usize) -> Result<Self> {
        debug_assert!(threads > 0, "Dispatcher needs at least one thread");

        let (sender, receiver) = crossbeam_channel::bounded::<i64>(threads);
        let halted = Arc::new(AtomicBool::new(false));
        let applied_count = Arc::new(AtomicU64::new(0));
        let mut dispatcher = Self {
            sender: Some(sender),
            handles: Vec::with_capacity(threads),
            halted: Arc::clone(&halted),
            applied_count: Arc::clone(&applied_count),
        };

        for index in 0..threads {
            let pair = Arc::clone(&pair);
            let receiver = receiver.clone();
            let halted = Arc::clone(&halted);
            let applied_count = Arc::clone(&applied_count);

            // On error the partially built pool is dropped, which halts and
            // joins the threads already started.
            let handle = thread::Builder::new()
                .name(format!("hazard-dispatch-{}", index))
                .spawn(move || {
                    set_actor(index);
                    for delta in receiver.iter() {
                        if halted.load(Ordering::Acquire) {
                            break;
                        }
                        pair.shift(delta);
                        applied_count.fetch_add(1, Ordering::Relaxed);
                    }
                })?;
            dispatcher.handles.push(handle);
        }

        Ok(dispatcher)
    }

    /// Queue a shift without waiting for it to be applied.
    ///
    /// Blocks while every queue slot is taken.
    pub fn dispatch(&self, delta: i64) {
        if let Some(sender) = &self.sender {
            // Only fails once every dispatch thread is gone.
            let _ = sender.send(delta);
        }
    }

    /// Shifts queued but not yet picked up by a dispatch thread.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Most shifts the queue holds at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sender
            .as_ref()
            .and_then(Sender::capacity)
            .unwrap_or(0)
    }

    /// Shifts applied so far.
    #[must_use]
    pub fn applied_count(&self) -> u64 {
        self.applied_count.load(Ordering::Relaxed)
    }

    /// Stop applying shifts and wait for the threads to exit.
    pub fn halt(&mut self) {
        self.halted.store(true, Ordering::Release);
        self.sender = None;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Drives the targeted torn-value loop.
#[derive(Debug, Clone)]
pub struct ConvergenceController {
    config: RunConfig,
    hook: HookHandle,
}

impl ConvergenceController {
    /// Validate `config`; nothing is spawned on rejection.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hook: HookHandle::none(),
        })
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn InterleavingHook>) -> Self {
        self.hook = HookHandle::new(hook);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the loop until the target distance, the budget or the deadline.
    ///
    /// Budget and deadline exhaustion come back as result statuses; `Err` is
    /// returned only when a dispatch thread could not be started.
    pub fn run(&self, reporter: &dyn Reporter) -> Result<RunResult> {
        let config = &self.config;
        let seed = resolve_seed(config.seed);
        let target = config.effective_target_distance();
        let target_a = config.convergence.target_a;
        let budget = config.convergence.budget;
        let deadline = config.deadline();

        let pair = shared_pair(config.strategy, config.initial_pair(), self.hook.clone());
        let mut dispatcher = Dispatcher::spawn(Arc::clone(&pair), config.convergence.dispatchers)?;
        // Drift away from the starting distance is what the detector counts.
        let mut detector = Detector::new(config.initial_distance);

        info!(
            strategy = %config.strategy,
            initial_distance = config.initial_distance,
            target_distance = target,
            target_a,
            budget = ?budget,
            dispatchers = config.convergence.dispatchers,
            seed,
            "Starting convergence"
        );

        let start = Instant::now();
        let mut rounds = 0u64;
        let mut last = config.initial_pair();

        let (status, final_pair) = loop {
            if budget.is_some_and(|b| rounds >= b) {
                break (
                    RunStatus::BudgetExceeded {
                        last_distance: last.distance(),
                    },
                    last,
                );
            }
            if deadline.is_some_and(|d| start.elapsed() >= d) {
                warn!(rounds, "Convergence deadline exceeded");
                break (RunStatus::DeadlineExceeded, last);
            }

            rounds += 1;
            let snapshot = pair.snapshot();
            detector.observe(snapshot);
            last = snapshot.value;

            // A fenced read behind a stale flag says nothing about the pair.
            if snapshot.flag != FlagState::NotUpdated && last.distance() == target {
                break (RunStatus::Converged, align(last, target_a));
            }

            dispatcher.dispatch(correction(target, last.distance()));
        };

        dispatcher.halt();
        let elapsed = start.elapsed();

        debug!(
            rounds,
            applied = dispatcher.applied_count(),
            "Dispatcher halted"
        );

        let result = RunResult::from_detector(
            HazardKind::Convergence,
            config.strategy.name(),
            seed,
            &detector,
            elapsed,
        )
        .with_final_pair(final_pair)
        .with_rounds(rounds)
        .with_status(status);

        info!(
            strategy = %config.strategy,
            converged = result.converged,
            rounds,
            final_pair = %result.final_pair,
            status = ?result.status,
            "Convergence finished"
        );

        reporter.report(&result);
        Ok(result)
    }
}

/// `|D - |distance||`, saturating at the extremes.
#[must_use]
pub fn correction(target: i64, distance: i64) -> i64 {
    target.saturating_sub(distance.saturating_abs()).saturating_abs()
}

/// Final pair for a converged run: `snapshot` moved so `a == target_a`.
#[must_use]
pub fn align(snapshot: PairValue, target_a: i64) -> PairValue {
    snapshot.shifted(target_a.wrapping_sub(snapshot.a))
}
