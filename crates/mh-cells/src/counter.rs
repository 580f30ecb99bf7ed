//! Shared counters: the lost-update hazard.
//!
//! `RacyCounter` increments with a separate load and store, so two threads
//! that load the same value both store `value + 1` and one increment is gone.
//! `LockedCounter` and `InterlockedCounter` never lose one.

use std::fmt;
use std::sync::Arc;

use mh_core::{HookHandle, HookPoint, Slot};
use parking_lot::Mutex;

use crate::sync::{AtomicU64, Ordering};

/// Counter discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Load, then store `+ 1`.
    Racy,
    /// Increment under an exclusive lock.
    Locked,
    /// Single atomic `fetch_add`.
    Interlocked,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [
        CounterKind::Racy,
        CounterKind::Locked,
        CounterKind::Interlocked,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            CounterKind::Racy => "racy",
            CounterKind::Locked => "locked",
            CounterKind::Interlocked => "interlocked",
        }
    }

    /// Whether every increment is guaranteed to survive.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        !matches!(self, CounterKind::Racy)
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A counter incremented by many threads.
pub trait SharedCounter: Send + Sync {
    fn kind(&self) -> CounterKind;

    fn increment(&self);

    /// Current value. Exact only once all incrementing threads are joined.
    fn value(&self) -> u64;
}

/// Load-then-store counter.
#[derive(Debug)]
pub struct RacyCounter {
    value: AtomicU64,
    hook: HookHandle,
}

impl RacyCounter {
    #[must_use]
    pub fn with_hook(hook: HookHandle) -> Self {
        Self {
            value: AtomicU64::new(0),
            hook,
        }
    }
}

impl SharedCounter for RacyCounter {
    fn kind(&self) -> CounterKind {
        CounterKind::Racy
    }

    fn increment(&self) {
        self.hook.at(HookPoint::BeforeRead(Slot::Data));
        let value = self.value.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::Data));

        self.hook.at(HookPoint::BeforeWrite(Slot::Data));
        self.value.store(value.wrapping_add(1), Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::Data));
    }

    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Lock-guarded counter.
#[derive(Debug, Default)]
pub struct LockedCounter {
    value: Mutex<u64>,
}

impl SharedCounter for LockedCounter {
    fn kind(&self) -> CounterKind {
        CounterKind::Locked
    }

    fn increment(&self) {
        let mut value = self.value.lock();
        *value = value.wrapping_add(1);
    }

    fn value(&self) -> u64 {
        *self.value.lock()
    }
}

/// `fetch_add` counter.
#[derive(Debug)]
pub struct InterlockedCounter {
    value: AtomicU64,
}

impl Default for InterlockedCounter {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
}

impl SharedCounter for InterlockedCounter {
    fn kind(&self) -> CounterKind {
        CounterKind::Interlocked
    }

    fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Build a counter of the given kind. Only the racy counter consults the hook.
#[must_use]
pub fn shared_counter(kind: CounterKind, hook: HookHandle) -> Arc<dyn SharedCounter> {
    match kind {
        CounterKind::Racy => Arc::new(RacyCounter::with_hook(hook)),
        CounterKind::Locked => Arc::new(LockedCounter::default()),
        CounterKind::Interlocked => Arc::new(InterlockedCounter::default()),
    }
}
