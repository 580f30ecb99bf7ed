//! Unsynchronized pair: the control case.
//!
//! `shift` is a read-modify-write of `a` followed by a read-modify-write of
//! `b`; `snapshot` reads `a` then `b`. Nothing orders these against other
//! threads, so a concurrent snapshot may combine an old `a` with a new `b`
//! (a torn read) and two concurrent shifts may lose an update to one field
//! but not the other (a torn write, which moves the distance for good).
//!
//! # Observable side effects
//!
//! Each field is an atomic accessed with `Relaxed` ordering. Relaxed
//! accesses impose no ordering between threads, which keeps the hazard
//! intact, but they are observable side effects: the compiler may neither
//! drop the "dead" intermediate store nor fuse the two loads, and the racy
//! accesses stay free of undefined behavior.

use mh_core::{HookHandle, HookPoint, InvariantPair, PairValue, Slot, Snapshot, Strategy};

use crate::sync::{AtomicI64, Ordering};

/// Pair with no synchronization whatsoever.
#[derive(Debug)]
pub struct RacyPair {
    a: AtomicI64,
    b: AtomicI64,
    hook: HookHandle,
}

impl RacyPair {
    #[must_use]
    pub fn new(initial: PairValue) -> Self {
        Self::with_hook(initial, HookHandle::none())
    }

    #[must_use]
    pub fn with_hook(initial: PairValue, hook: HookHandle) -> Self {
        Self {
            a: AtomicI64::new(initial.a),
            b: AtomicI64::new(initial.b),
            hook,
        }
    }
}

impl InvariantPair for RacyPair {
    fn strategy(&self) -> Strategy {
        Strategy::Unsynchronized
    }

    fn shift(&self, delta: i64) {
        let a = self.a.load(Ordering::Relaxed);
        self.hook.at(HookPoint::BeforeWrite(Slot::A));
        self.a.store(a.wrapping_add(delta), Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::A));

        let b = self.b.load(Ordering::Relaxed);
        self.hook.at(HookPoint::BeforeWrite(Slot::B));
        self.b.store(b.wrapping_add(delta), Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::B));
    }

    fn snapshot(&self) -> Snapshot {
        self.hook.at(HookPoint::BeforeRead(Slot::A));
        let a = self.a.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::A));

        self.hook.at(HookPoint::BeforeRead(Slot::B));
        let b = self.b.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::B));

        Snapshot::unguarded(PairValue::new(a, b))
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use mh_core::{FlagState, InterleavingHook};
    use std::sync::{Arc, Mutex};

    struct Recorder(Mutex<Vec<HookPoint>>);

    impl InterleavingHook for Recorder {
        fn at(&self, point: HookPoint) {
            self.0.lock().unwrap().push(point);
        }
    }

    #[test]
    fn test_single_threaded_shift_keeps_invariant() {
        let pair = RacyPair::new(PairValue::with_distance(3));
        pair.shift(10);
        pair.shift(-4);

        let snapshot = pair.snapshot();
        assert_eq!(snapshot.value, PairValue::new(6, 9));
        assert_eq!(snapshot.flag, FlagState::Unguarded);
    }

    #[test]
    fn test_zero_delta_still_writes_both_fields() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let pair = RacyPair::with_hook(PairValue::default(), HookHandle::new(recorder.clone()));

        pair.shift(0);

        let writes: Vec<HookPoint> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|p| matches!(p, HookPoint::AfterWrite(_)))
            .collect();
        assert_eq!(
            writes,
            vec![HookPoint::AfterWrite(Slot::A), HookPoint::AfterWrite(Slot::B)]
        );
        assert_eq!(pair.snapshot().value, PairValue::default());
    }

    #[test]
    fn test_repeated_snapshots_are_identical() {
        let pair = RacyPair::new(PairValue::new(2, 2));
        assert_eq!(pair.observe(1, 0), pair.observe(1, 0));
    }

    #[test]
    fn test_hook_sees_field_order() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let pair = RacyPair::with_hook(PairValue::default(), HookHandle::new(recorder.clone()));

        pair.snapshot();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                HookPoint::BeforeRead(Slot::A),
                HookPoint::AfterRead(Slot::A),
                HookPoint::BeforeRead(Slot::B),
                HookPoint::AfterRead(Slot::B),
            ]
        );
    }
}
