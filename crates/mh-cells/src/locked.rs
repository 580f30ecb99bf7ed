//! Lock-guarded pair.
//!
//! `shift` and `snapshot` hold the same exclusive lock for their whole body,
//! so every call is totally ordered with respect to every other. The field
//! accesses inside the lock are still separate, and still call the hook: a
//! script that tries to wedge a reader between them simply cannot make
//! progress, which is what the lock promises.

use mh_core::{HookHandle, HookPoint, InvariantPair, PairValue, Slot, Snapshot, Strategy};
use parking_lot::Mutex;

/// Pair behind one exclusive lock.
#[derive(Debug)]
pub struct LockedPair {
    value: Mutex<PairValue>,
    hook: HookHandle,
}

impl LockedPair {
    #[must_use]
    pub fn new(initial: PairValue) -> Self {
        Self::with_hook(initial, HookHandle::none())
    }

    #[must_use]
    pub fn with_hook(initial: PairValue, hook: HookHandle) -> Self {
        Self {
            value: Mutex::new(initial),
            hook,
        }
    }
}

impl InvariantPair for LockedPair {
    fn strategy(&self) -> Strategy {
        Strategy::Mutex
    }

    fn shift(&self, delta: i64) {
        let mut guard = self.value.lock();

        self.hook.at(HookPoint::BeforeWrite(Slot::A));
        guard.a = guard.a.wrapping_add(delta);
        self.hook.at(HookPoint::AfterWrite(Slot::A));

        self.hook.at(HookPoint::BeforeWrite(Slot::B));
        guard.b = guard.b.wrapping_add(delta);
        self.hook.at(HookPoint::AfterWrite(Slot::B));
    }

    fn snapshot(&self) -> Snapshot {
        let guard = self.value.lock();

        self.hook.at(HookPoint::BeforeRead(Slot::A));
        let a = guard.a;
        self.hook.at(HookPoint::AfterRead(Slot::A));

        self.hook.at(HookPoint::BeforeRead(Slot::B));
        let b = guard.b;
        self.hook.at(HookPoint::AfterRead(Slot::B));

        Snapshot::unguarded(PairValue::new(a, b))
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_shifts_never_lose_updates() {
        let pair = Arc::new(LockedPair::new(PairValue::with_distance(4)));
        let mut handles = vec![];

        for _ in 0..8 {
            let pair = Arc::clone(&pair);
            handles.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    pair.shift(1);
                    let snapshot = pair.snapshot();
                    assert_eq!(snapshot.value.distance(), 4);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pair.snapshot().value, PairValue::new(8_000, 8_004));
    }

    #[test]
    fn test_repeated_observations_match() {
        let pair = LockedPair::new(PairValue::new(-3, -3));
        let first = pair.observe(1, 0);
        let second = pair.observe(1, 0);
        assert_eq!(first, second);
        assert!(first.invariant_holds);
    }
}
