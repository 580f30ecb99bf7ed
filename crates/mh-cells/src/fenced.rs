//! Flag-fenced pair: acquire/release ordering through a single flag.
//!
//! The flag is a sequence number. A writer claims it (even → odd), writes
//! `a` then `b`, and release-stores the next even value. A reader
//! acquire-loads the flag, reads `a` then `b`, and loads the flag again
//! behind an acquire fence.
//!
//! ```text
//! writer: claim flag (odd) ─ write a ─ write b ─ release-store flag (even)
//! reader: acquire-load flag ─ read a ─ read b ─ acquire fence ─ load flag
//! ```
//!
//! If both flag loads return the same even value the reader saw the flag
//! *updated* and both fields come from one completed shift: the release
//! store keeps the field writes ahead of it, the acquire load keeps the
//! field reads behind it. Any other combination is reported as
//! [`FlagState::NotUpdated`]: the fields carry no guarantee, and the read is
//! legitimate staleness rather than a broken invariant. A reader that
//! insists on an updated read must retry, and with no other signal may poll
//! forever; that liveness hazard is modeled by
//! [`StopSignal`](crate::polling::StopSignal).
//!
//! Writers exclude each other on the odd flag value; without that two
//! writers could interleave their field writes and tear the pair with the
//! flag still reporting a clean update. The exclusion is deliberate: this
//! discipline never tears a write and loses no shift. What it demonstrates
//! is the reader side, where a read behind a stale flag must be discarded.

use mh_core::{FlagState, HookHandle, HookPoint, InvariantPair, PairValue, Slot, Snapshot, Strategy};

use crate::sync::{fence, spin_wait, AtomicI64, AtomicU64, Ordering};

/// Pair guarded by a release/acquire flag.
#[derive(Debug)]
pub struct FencedPair {
    a: AtomicI64,
    b: AtomicI64,
    flag: AtomicU64,
    hook: HookHandle,
}

impl FencedPair {
    #[must_use]
    pub fn new(initial: PairValue) -> Self {
        Self::with_hook(initial, HookHandle::none())
    }

    #[must_use]
    pub fn with_hook(initial: PairValue, hook: HookHandle) -> Self {
        Self {
            a: AtomicI64::new(initial.a),
            b: AtomicI64::new(initial.b),
            flag: AtomicU64::new(0),
            hook,
        }
    }

    /// Number of completed shifts.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.flag.load(Ordering::Acquire) / 2
    }

    /// Claim the flag for writing, returning the even value it held.
    fn claim(&self) -> u64 {
        let mut seq = self.flag.load(Ordering::Relaxed);
        loop {
            if seq & 1 == 1 {
                spin_wait();
                seq = self.flag.load(Ordering::Relaxed);
                continue;
            }
            match self
                .flag
                .compare_exchange_weak(seq, seq + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return seq,
                Err(current) => seq = current,
            }
        }
    }
}

impl InvariantPair for FencedPair {
    fn strategy(&self) -> Strategy {
        Strategy::FencedFlag
    }

    fn shift(&self, delta: i64) {
        let seq = self.claim();
        // Field writes must not become visible ahead of the odd flag.
        fence(Ordering::Release);

        let a = self.a.load(Ordering::Relaxed);
        self.hook.at(HookPoint::BeforeWrite(Slot::A));
        self.a.store(a.wrapping_add(delta), Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::A));

        let b = self.b.load(Ordering::Relaxed);
        self.hook.at(HookPoint::BeforeWrite(Slot::B));
        self.b.store(b.wrapping_add(delta), Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::B));

        self.hook.at(HookPoint::BeforeWrite(Slot::Flag));
        self.flag.store(seq + 2, Ordering::Release);
        self.hook.at(HookPoint::AfterWrite(Slot::Flag));
    }

    fn snapshot(&self) -> Snapshot {
        self.hook.at(HookPoint::BeforeRead(Slot::Flag));
        let before = self.flag.load(Ordering::Acquire);
        self.hook.at(HookPoint::AfterRead(Slot::Flag));

        self.hook.at(HookPoint::BeforeRead(Slot::A));
        let a = self.a.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::A));

        self.hook.at(HookPoint::BeforeRead(Slot::B));
        let b = self.b.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::B));

        fence(Ordering::Acquire);
        let after = self.flag.load(Ordering::Relaxed);

        let flag = if before == after && before & 1 == 0 {
            FlagState::Updated
        } else {
            FlagState::NotUpdated
        };

        Snapshot {
            value: PairValue::new(a, b),
            flag,
        }
    }
}


/// Loom tests - exhaustively check the flag protocol.
#[cfg(loom)]
mod loom_tests {
    use super::*;
    use crate::sync::{thread, Arc};

    #[test]
    fn test_updated_flag_implies_intact_pair() {
        loom::model(|| {
            let pair = Arc::new(FencedPair::new(PairValue::default()));

            let writer = {
                let pair = Arc::clone(&pair);
                thread::spawn(move || pair.shift(1))
            };

            let snapshot = pair.snapshot();
            if snapshot.flag == FlagState::Updated {
                assert_eq!(snapshot.value.distance(), 0);
            }

            writer.join().unwrap();
        });
    }

    #[test]
    fn test_two_writers_never_tear() {
        loom::model(|| {
            let pair = Arc::new(FencedPair::new(PairValue::default()));

            let w1 = {
                let pair = Arc::clone(&pair);
                thread::spawn(move || pair.shift(1))
            };
            let w2 = {
                let pair = Arc::clone(&pair);
                thread::spawn(move || pair.shift(2))
            };

            w1.join().unwrap();
            w2.join().unwrap();

            let snapshot = pair.snapshot();
            assert_eq!(snapshot.flag, FlagState::Updated);
            assert_eq!(snapshot.value, PairValue::new(3, 3));
        });
    }
}
