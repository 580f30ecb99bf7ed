//! Oracle-driven interleaving hook.
//!
//! Replays a scripted interleaving against real threads, so a hazard that
//! normally needs timing luck happens on every run.
//!
//! # Protocol
//!
//! ```text
//! hook point reached by actor X
//!         │
//!         ├── not in the remaining script ──────────▶ pass through
//!         │
//!         ├── is the next step ─────────────────────▶ advance, wake waiters
//!         │
//!         └── a later step ── wait for it to be next ─┐
//!                                                     ├── becomes next ─▶ advance
//!                                                     └── patience gone ─▶ derail
//! ```
//!
//! A derailed oracle stops enforcing anything. Scripts that cannot be
//! satisfied, e.g. a torn read against a mutex-guarded pair, end in a
//! logged derailment instead of a deadlock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mh_core::{HookPoint, InterleavingHook, Slot};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::actor::current_actor;

/// Default time a step waits for its turn.
pub const PATIENCE_DEFAULT: Duration = Duration::from_secs(2);

/// A single step in an interleaving trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleStep {
    /// Actor that must reach the point; `None` matches any thread
    pub actor: Option<usize>,
    /// Hook point to reach
    pub point: HookPoint,
}

impl OracleStep {
    fn matches(&self, actor: Option<usize>, point: HookPoint) -> bool {
        self.point == point && (self.actor.is_none() || self.actor == actor)
    }
}

impl fmt::Display for OracleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actor {
            Some(actor) => write!(f, "T{} {}", actor, self.point),
            None => write!(f, "* {}", self.point),
        }
    }
}

/// Interleaving to replay.
#[derive(Debug, Clone)]
pub struct InterleavingTrace {
    /// Name for debugging
    pub name: String,
    /// Steps to replay
    pub steps: Vec<OracleStep>,
    /// Description
    pub description: String,
}

impl InterleavingTrace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            description: String::new(),
        }
    }

    /// Add a step for `actor`.
    #[must_use]
    pub fn step(mut self, actor: usize, point: HookPoint) -> Self {
        self.steps.push(OracleStep {
            actor: Some(actor),
            point,
        });
        self
    }

    /// Add a step any thread may take.
    #[must_use]
    pub fn any(mut self, point: HookPoint) -> Self {
        self.steps.push(OracleStep { actor: None, point });
        self
    }

    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reader snapshots a pair between the writer's two field writes.
    pub fn torn_read(writer: usize, reader: usize) -> Self {
        Self::new("torn_read")
            .with_description("Writer stores a, reader reads a and b, writer stores b")
            .step(writer, HookPoint::AfterWrite(Slot::A))
            .step(reader, HookPoint::BeforeRead(Slot::A))
            .step(reader, HookPoint::AfterRead(Slot::A))
            .step(reader, HookPoint::BeforeRead(Slot::B))
            .step(reader, HookPoint::AfterRead(Slot::B))
            .step(writer, HookPoint::BeforeWrite(Slot::B))
    }

    /// A thread with no actor snapshots the pair once, then snapshots it
    /// again between `writer`'s two field writes.
    ///
    /// Fits the convergence loop: the controller thread reads, one dispatch
    /// thread writes. The first snapshot is let through so the controller can
    /// dispatch the correction the second one races.
    pub fn torn_correction(writer: usize) -> Self {
        Self::new("torn_correction")
            .with_description("Controller reads, writer stores a, controller reads a and b, writer stores b")
            .any(HookPoint::BeforeRead(Slot::A))
            .any(HookPoint::AfterRead(Slot::A))
            .any(HookPoint::BeforeRead(Slot::B))
            .any(HookPoint::AfterRead(Slot::B))
            .step(writer, HookPoint::AfterWrite(Slot::A))
            .any(HookPoint::BeforeRead(Slot::A))
            .any(HookPoint::AfterRead(Slot::A))
            .any(HookPoint::BeforeRead(Slot::B))
            .any(HookPoint::AfterRead(Slot::B))
            .step(writer, HookPoint::BeforeWrite(Slot::B))
    }

    /// Like [`torn_correction`](Self::torn_correction), but the second
    /// snapshot reads `a` before `writer` stores it and `b` after, so the
    /// observed distance grows by the correction instead of shrinking.
    pub fn torn_correction_rising(writer: usize) -> Self {
        Self::new("torn_correction_rising")
            .with_description("Controller reads, controller reads a, writer stores a and b, controller reads b")
            .any(HookPoint::BeforeRead(Slot::A))
            .any(HookPoint::AfterRead(Slot::A))
            .any(HookPoint::BeforeRead(Slot::B))
            .any(HookPoint::AfterRead(Slot::B))
            .any(HookPoint::BeforeRead(Slot::A))
            .any(HookPoint::AfterRead(Slot::A))
            .step(writer, HookPoint::BeforeWrite(Slot::A))
            .step(writer, HookPoint::AfterWrite(Slot::B))
            .any(HookPoint::BeforeRead(Slot::B))
            .any(HookPoint::AfterRead(Slot::B))
    }

    /// Reader checks a flag that was stored ahead of its payload.
    ///
    /// Only a writer that stores the flag first can satisfy the script; a
    /// program-order writer leaves the last step pending, harmlessly.
    pub fn reordered_publication(writer: usize, reader: usize) -> Self {
        Self::new("reordered_publication")
            .with_description("Writer sets the flag, reader reads flag and payload, writer stores payload")
            .step(writer, HookPoint::AfterWrite(Slot::Flag))
            .step(reader, HookPoint::BeforeRead(Slot::Flag))
            .step(reader, HookPoint::AfterRead(Slot::Flag))
            .step(reader, HookPoint::BeforeRead(Slot::Data))
            .step(reader, HookPoint::AfterRead(Slot::Data))
            .step(writer, HookPoint::BeforeWrite(Slot::Data))
    }

    /// Poller reads the flag once before the stopper clears it.
    pub fn stale_poll(poller: usize, stopper: usize) -> Self {
        Self::new("stale_poll")
            .with_description("Poller sees the flag running, then the stopper clears it")
            .step(poller, HookPoint::AfterRead(Slot::Flag))
            .step(stopper, HookPoint::BeforeWrite(Slot::Flag))
            .step(stopper, HookPoint::AfterWrite(Slot::Flag))
    }

    /// Both callers check the busy flag before either sets it.
    pub fn double_entry(first: usize, second: usize) -> Self {
        Self::new("double_entry")
            .with_description("Both callers read the guard clear, then both set it")
            .step(first, HookPoint::AfterRead(Slot::Flag))
            .step(second, HookPoint::AfterRead(Slot::Flag))
            .step(first, HookPoint::BeforeWrite(Slot::Flag))
            .step(second, HookPoint::BeforeWrite(Slot::Flag))
    }

    /// Both incrementers load the counter before either stores.
    pub fn lost_update(first: usize, second: usize) -> Self {
        Self::new("lost_update")
            .with_description("Both incrementers load, then both store")
            .step(first, HookPoint::AfterRead(Slot::Data))
            .step(second, HookPoint::AfterRead(Slot::Data))
            .step(first, HookPoint::BeforeWrite(Slot::Data))
            .step(second, HookPoint::BeforeWrite(Slot::Data))
    }
}

/// Statistics from oracle replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleHookStats {
    /// Script steps taken
    pub steps_executed: u64,
    /// Steps in the script
    pub steps_total: usize,
    /// Hook calls not governed by the script
    pub passthroughs: u64,
    /// Hook calls that had to wait for their turn
    pub waits: u64,
    /// Whether patience ran out
    pub derailed: bool,
}

#[derive(Debug)]
struct OracleState {
    position: usize,
    derailed: bool,
}

/// Hook that replays an [`InterleavingTrace`].
pub struct OracleHook {
    trace: InterleavingTrace,
    patience: Duration,
    state: Mutex<OracleState>,
    advanced: Condvar,
    /// Set once the script is done or derailed; lets hook calls skip the lock.
    finished: AtomicBool,
    passthroughs_count: AtomicU64,
    waits_count: AtomicU64,
}

impl OracleHook {
    pub fn new(trace: InterleavingTrace) -> Self {
        let finished = trace.is_empty();
        Self {
            trace,
            patience: PATIENCE_DEFAULT,
            state: Mutex::new(OracleState {
                position: 0,
                derailed: false,
            }),
            advanced: Condvar::new(),
            finished: AtomicBool::new(finished),
            passthroughs_count: AtomicU64::new(0),
            waits_count: AtomicU64::new(0),
        }
    }

    /// Bound on each wait for a step's turn.
    #[must_use]
    pub fn with_patience(mut self, patience: Duration) -> Self {
        debug_assert!(!patience.is_zero(), "Patience must be positive");
        self.patience = patience;
        self
    }

    #[must_use]
    pub fn trace(&self) -> &InterleavingTrace {
        &self.trace
    }

    /// Steps taken so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.state.lock().position
    }

    /// Every step taken in order.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock();
        !state.derailed && state.position == self.trace.len()
    }

    #[must_use]
    pub fn is_derailed(&self) -> bool {
        self.state.lock().derailed
    }

    #[must_use]
    pub fn stats(&self) -> OracleHookStats {
        let state = self.state.lock();
        OracleHookStats {
            steps_executed: state.position as u64,
            steps_total: self.trace.len(),
            passthroughs: self.passthroughs_count.load(Ordering::Relaxed),
            waits: self.waits_count.load(Ordering::Relaxed),
            derailed: state.derailed,
        }
    }

    fn pass_through(&self) {
        self.passthroughs_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl InterleavingHook for OracleHook {
    fn at(&self, point: HookPoint) {
        if self.finished.load(Ordering::Acquire) {
            self.pass_through();
            return;
        }

        let actor = current_actor();
        let deadline = Instant::now() + self.patience;
        let mut waited = false;
        let mut state = self.state.lock();

        loop {
            if state.derailed || state.position >= self.trace.len() {
                self.pass_through();
                return;
            }

            let remaining = &self.trace.steps[state.position..];
            if !remaining.iter().any(|step| step.matches(actor, point)) {
                self.pass_through();
                return;
            }

            if remaining[0].matches(actor, point) {
                state.position += 1;
                if state.position == self.trace.len() {
                    self.finished.store(true, Ordering::Release);
                    debug!(trace = %self.trace.name, "Oracle trace complete");
                }
                self.advanced.notify_all();
                return;
            }

            if !waited {
                waited = true;
                self.waits_count.fetch_add(1, Ordering::Relaxed);
            }

            if Instant::now() >= deadline {
                state.derailed = true;
                self.finished.store(true, Ordering::Release);
                warn!(
                    trace = %self.trace.name,
                    position = state.position,
                    expected = %remaining[0],
                    point = %point,
                    actor = ?actor,
                    "Oracle derailed: step not reached within patience"
                );
                self.advanced.notify_all();
                return;
            }

            self.advanced.wait_until(&mut state, deadline);
        }
    }
}

impl fmt::Debug for OracleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleHook")
            .field("trace", &self.trace.name)
            .field("patience", &self.patience)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::set_actor;
    use std::sync::Arc;
    use std::thread;

    fn spawn_actor<F>(actor: usize, f: F) -> thread::JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        thread::spawn(move || {
            set_actor(actor);
            f();
        })
    }

    #[test]
    fn test_unscripted_points_pass_through() {
        let hook = OracleHook::new(InterleavingTrace::torn_read(0, 1));
        set_actor(5);
        hook.at(HookPoint::BeforeWrite(Slot::A));
        hook.at(HookPoint::AfterWrite(Slot::A));

        let stats = hook.stats();
        assert_eq!(stats.steps_executed, 0);
        assert_eq!(stats.passthroughs, 2);
        assert!(!stats.derailed);
    }

    #[test]
    fn test_steps_replay_in_script_order() {
        let trace = InterleavingTrace::new("ping_pong")
            .step(0, HookPoint::AfterWrite(Slot::A))
            .step(1, HookPoint::AfterRead(Slot::A))
            .step(0, HookPoint::AfterWrite(Slot::B));
        let hook = Arc::new(OracleHook::new(trace));
        let log = Arc::new(Mutex::new(Vec::new()));

        // Actor 1 starts first but must wait for actor 0's first step.
        let reader = {
            let hook = Arc::clone(&hook);
            let log = Arc::clone(&log);
            spawn_actor(1, move || {
                hook.at(HookPoint::AfterRead(Slot::A));
                log.lock().push("read a");
            })
        };
        let writer = {
            let hook = Arc::clone(&hook);
            let log = Arc::clone(&log);
            spawn_actor(0, move || {
                log.lock().push("write a");
                hook.at(HookPoint::AfterWrite(Slot::A));
                hook.at(HookPoint::AfterWrite(Slot::B));
                log.lock().push("write b");
            })
        };

        reader.join().unwrap();
        writer.join().unwrap();

        assert!(hook.is_complete());
        let log = log.lock().clone();
        assert_eq!(log.first(), Some(&"write a"));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_unsatisfiable_script_derails() {
        let trace = InterleavingTrace::new("never")
            .step(0, HookPoint::AfterWrite(Slot::A))
            .step(0, HookPoint::AfterWrite(Slot::B));
        let hook = OracleHook::new(trace).with_patience(Duration::from_millis(20));

        set_actor(0);
        // Second step requested before the first: waits, then derails.
        hook.at(HookPoint::AfterWrite(Slot::B));

        let stats = hook.stats();
        assert!(stats.derailed);
        assert_eq!(stats.waits, 1);
        assert!(!hook.is_complete());

        // Derailed oracles enforce nothing.
        hook.at(HookPoint::AfterWrite(Slot::A));
        assert_eq!(hook.position(), 0);
    }

    #[test]
    fn test_any_actor_step() {
        let trace = InterleavingTrace::new("any").any(HookPoint::BeforeRead(Slot::Flag));
        let hook = OracleHook::new(trace);
        crate::actor::clear_actor();
        hook.at(HookPoint::BeforeRead(Slot::Flag));
        assert!(hook.is_complete());
    }

    #[test]
    fn test_prebuilt_traces_are_well_formed() {
        for trace in [
            InterleavingTrace::torn_read(0, 1),
            InterleavingTrace::reordered_publication(0, 1),
            InterleavingTrace::stale_poll(0, 1),
            InterleavingTrace::double_entry(0, 1),
            InterleavingTrace::lost_update(0, 1),
        ] {
            assert!(!trace.is_empty(), "{}", trace.name);
            assert!(!trace.description.is_empty());
            assert!(trace.steps.iter().all(|s| s.actor.is_some()));
        }

        let correction = InterleavingTrace::torn_correction(0);
        assert_eq!(correction.len(), 10);
        assert_eq!(
            correction.steps.iter().filter(|s| s.actor == Some(0)).count(),
            2
        );
    }
}
