//! Adversarial scheduling by random yields.
//!
//! At every hook point the calling thread yields with a fixed probability.
//! Yielding between the two halves of a racy operation hands the CPU to a
//! thread that is likely to touch the same pair, which turns a rare torn
//! read into a common one even on a single core.
//!
//! Each thread draws from its own deterministic stream, derived from the hook
//! seed and the thread's actor (or a registration counter), so the hook adds
//! no shared state that would serialize the workers.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use mh_core::{HookPoint, InterleavingHook};

use crate::actor::current_actor;
use crate::random::DeterministicRng;

/// Source of distinct hook identities, so two hooks never share a stream.
static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static STREAM: RefCell<Option<(u64, DeterministicRng)>> = const { RefCell::new(None) };
}

/// Hook that yields the current thread at random.
#[derive(Debug)]
pub struct JitterHook {
    id: u64,
    seed: u64,
    yield_probability: f64,
    anonymous_streams: AtomicU64,
    yields_count: AtomicU64,
}

impl JitterHook {
    pub fn new(seed: u64, yield_probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&yield_probability),
            "Yield probability out of range: {}",
            yield_probability
        );
        Self {
            id: NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed),
            seed,
            yield_probability,
            anonymous_streams: AtomicU64::new(0),
            yields_count: AtomicU64::new(0),
        }
    }

    /// Yields performed so far, across all threads.
    #[must_use]
    pub fn yields_count(&self) -> u64 {
        self.yields_count.load(Ordering::Relaxed)
    }

    fn stream_for_current_thread(&self) -> DeterministicRng {
        let stream = match current_actor() {
            Some(actor) => actor as u64,
            // Unregistered threads draw after every possible actor index.
            None => u64::MAX / 2 + self.anonymous_streams.fetch_add(1, Ordering::Relaxed),
        };
        DeterministicRng::new(self.seed).derive(stream)
    }
}

impl InterleavingHook for JitterHook {
    fn at(&self, _point: HookPoint) {
        let should_yield = STREAM.with(|cell| {
            let mut slot = cell.borrow_mut();
            let stale = !matches!(slot.as_ref(), Some((id, _)) if *id == self.id);
            if stale {
                *slot = Some((self.id, self.stream_for_current_thread()));
            }
            slot.as_mut()
                .map_or(false, |(_, rng)| rng.gen_bool(self.yield_probability))
        });

        if should_yield {
            self.yields_count.fetch_add(1, Ordering::Relaxed);
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mh_core::Slot;

    #[test]
    fn test_never_and_always() {
        let never = JitterHook::new(1, 0.0);
        let always = JitterHook::new(1, 1.0);
        for _ in 0..50 {
            never.at(HookPoint::BeforeRead(Slot::A));
            always.at(HookPoint::BeforeRead(Slot::A));
        }
        assert_eq!(never.yields_count(), 0);
        assert_eq!(always.yields_count(), 50);
    }

    #[test]
    fn test_same_seed_same_yields_per_actor() {
        let run = |seed| {
            std::thread::spawn(move || {
                crate::actor::set_actor(2);
                let hook = JitterHook::new(seed, 0.5);
                for _ in 0..200 {
                    hook.at(HookPoint::AfterWrite(Slot::A));
                }
                hook.yields_count()
            })
            .join()
            .unwrap()
        };
        assert_eq!(run(77), run(77));
    }
}
