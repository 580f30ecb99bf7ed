//! Atomically swapped pair.
//!
//! The two fields live together in one heap cell behind an epoch-protected
//! atomic pointer. A shift is a compare-and-swap loop that replaces the
//! whole pair at once; a snapshot is one acquire load. No lock is taken, so
//! readers never wait on writers, and a failed CAS only retries the writer
//! that lost.
//!
//! # Memory Safety
//!
//! Replaced cells are retired through crossbeam-epoch, so a reader still
//! holding a pointer to an old pair never sees it freed.

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use std::sync::atomic::Ordering;

use mh_core::{InvariantPair, PairValue, Snapshot, Strategy};

/// Pair replaced as a single unit by compare-and-swap.
#[derive(Debug)]
pub struct AtomicPair {
    cell: Atomic<PairValue>,
}

impl AtomicPair {
    #[must_use]
    pub fn new(initial: PairValue) -> Self {
        Self {
            cell: Atomic::new(initial),
        }
    }

    fn load(&self) -> PairValue {
        let guard = epoch::pin();
        let current = self.cell.load(Ordering::Acquire, &guard);
        // Safety: the cell is never null; it is created non-null and every
        // CAS installs a fresh non-null node. The guard keeps it alive.
        unsafe { *current.deref() }
    }
}

impl InvariantPair for AtomicPair {
    fn strategy(&self) -> Strategy {
        Strategy::AtomicCounter
    }

    fn shift(&self, delta: i64) {
        let guard = epoch::pin();
        let mut current = self.cell.load(Ordering::Acquire, &guard);
        // Safety: see `load`.
        let mut next = Owned::new(unsafe { current.deref() }.shifted(delta));

        loop {
            match self.cell.compare_exchange(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    // Safety: `current` is unlinked and no new reader can
                    // reach it; pinned readers are covered by the epoch.
                    unsafe { guard.defer_destroy(current) };
                    return;
                }
                Err(e) => {
                    current = e.current;
                    next = e.new;
                    // Safety: see `load`.
                    *next = unsafe { current.deref() }.shifted(delta);
                }
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::unguarded(self.load())
    }
}

impl Drop for AtomicPair {
    fn drop(&mut self) {
        // Safety: `&mut self` means no other thread can hold the pointer.
        unsafe {
            let current = self.cell.load(Ordering::Relaxed, epoch::unprotected());
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}
