//! Bounded polling of a stop flag.
//!
//! A worker polls `running` until another thread clears it. If the load is
//! hoisted out of the loop (a register-cached read, which a compiler is free
//! to produce for a non-atomic flag) the worker never sees the clear. That
//! non-termination is a liveness hazard, not an invariant violation, so the
//! loop carries a hard spin ceiling and reports
//! [`PollOutcome::BudgetExhausted`] instead of hanging.

use mh_core::{HookHandle, HookPoint, Slot};

use crate::sync::{spin_wait, AtomicBool, Ordering};

/// How the poll loop reads the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollMode {
    /// Read once before the loop and never again.
    Hoisted,
    /// Re-read every spin with `Relaxed` ordering.
    Relaxed,
    /// Re-read every spin with `Acquire` ordering.
    Acquire,
}

impl PollMode {
    pub const ALL: [PollMode; 3] = [PollMode::Hoisted, PollMode::Relaxed, PollMode::Acquire];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PollMode::Hoisted => "hoisted",
            PollMode::Relaxed => "relaxed",
            PollMode::Acquire => "acquire",
        }
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The clear was observed after `spins` iterations.
    Stopped { spins: u64 },
    /// The ceiling was reached with the flag still seen running.
    BudgetExhausted { spins: u64 },
}

impl PollOutcome {
    #[must_use]
    pub fn spins(&self) -> u64 {
        match self {
            PollOutcome::Stopped { spins } | PollOutcome::BudgetExhausted { spins } => *spins,
        }
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        matches!(self, PollOutcome::Stopped { .. })
    }
}

/// Running flag cleared by one thread and polled by another.
#[derive(Debug)]
pub struct StopSignal {
    running: AtomicBool,
    hook: HookHandle,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::with_hook(HookHandle::none())
    }

    #[must_use]
    pub fn with_hook(hook: HookHandle) -> Self {
        Self {
            running: AtomicBool::new(true),
            hook,
        }
    }

    /// Clear the flag.
    pub fn stop(&self) {
        self.hook.at(HookPoint::BeforeWrite(Slot::Flag));
        self.running.store(false, Ordering::Release);
        self.hook.at(HookPoint::AfterWrite(Slot::Flag));
    }

    /// Poll until the flag is seen cleared or `spin_budget` spins pass.
    pub fn poll_while_running(&self, mode: PollMode, spin_budget: u64) -> PollOutcome {
        match mode {
            PollMode::Hoisted => {
                let running = self.read(Ordering::Relaxed);
                for spins in 0..spin_budget {
                    if !running {
                        return PollOutcome::Stopped { spins };
                    }
                    spin_wait();
                }
                if running {
                    PollOutcome::BudgetExhausted { spins: spin_budget }
                } else {
                    PollOutcome::Stopped { spins: spin_budget }
                }
            }
            PollMode::Relaxed | PollMode::Acquire => {
                let ordering = if mode == PollMode::Acquire {
                    Ordering::Acquire
                } else {
                    Ordering::Relaxed
                };
                for spins in 0..spin_budget {
                    if !self.read(ordering) {
                        return PollOutcome::Stopped { spins };
                    }
                    spin_wait();
                }
                PollOutcome::BudgetExhausted { spins: spin_budget }
            }
        }
    }

    fn read(&self, ordering: Ordering) -> bool {
        self.hook.at(HookPoint::BeforeRead(Slot::Flag));
        let running = self.running.load(ordering);
        self.hook.at(HookPoint::AfterRead(Slot::Flag));
        running
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
