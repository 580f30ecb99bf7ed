//! # mh-cells
//!
//! Shared cells that reproduce memory hazards, one per synchronization
//! discipline.
//!
//! Each cell:
//! - Implements an `mh-core` trait (`InvariantPair`) or a small local one
//!   (`SharedCounter`)
//! - Calls the injected `HookHandle` around every physically separate access
//! - Has unit tests, and loom tests under `#[cfg(loom)]` where the hazard is
//!   an ordering question
//!
//! # Invariant Pairs
//!
//! | Strategy | Cell | Torn pair possible |
//! |----------|------|--------------------|
//! | `Unsynchronized` | [`RacyPair`] | yes |
//! | `FencedFlag` | [`FencedPair`] | only behind a stale flag |
//! | `Mutex` | [`LockedPair`] | no |
//! | `AtomicCounter` | [`AtomicPair`] | no |
//!
//! # Supplemental Hazards
//!
//! | Hazard | Cell | Broken variant | Sound variant |
//! |--------|------|----------------|---------------|
//! | Reordered publication | [`Publication`] | `Relaxed`, `FlagThenData` | `ReleaseAcquire` |
//! | Stale polling | [`StopSignal`] | `PollMode::Hoisted` | `PollMode::Acquire` |
//! | Lost update | [`SharedCounter`] | `RacyCounter` | `LockedCounter`, `InterlockedCounter` |
//! | Double entry | [`ExclusionGuard`] | `CheckThenSet` | `Exchange` |

pub mod atomic;
pub mod counter;
pub mod exclusion;
pub mod fenced;
pub mod locked;
pub mod polling;
pub mod publication;
pub mod racy;
pub mod sync;

use std::sync::Arc;

use mh_core::{HookHandle, InvariantPair, PairValue, Strategy};

pub use atomic::AtomicPair;
pub use counter::{
    shared_counter, CounterKind, InterlockedCounter, LockedCounter, RacyCounter, SharedCounter,
};
pub use exclusion::{ExclusionGuard, ExclusionKind, Occupancy};
pub use fenced::FencedPair;
pub use locked::LockedPair;
pub use polling::{PollMode, PollOutcome, StopSignal};
pub use publication::{
    Publication, PublishOrdering, ReadOrder, ReadOutcome, WriteOrder, UNINITIALIZED,
};
pub use racy::RacyPair;

/// Build the pair for `strategy`, starting at `initial`.
///
/// `AtomicPair` has a single access per operation and never consults the
/// hook.
#[must_use]
pub fn shared_pair(
    strategy: Strategy,
    initial: PairValue,
    hook: HookHandle,
) -> Arc<dyn InvariantPair> {
    match strategy {
        Strategy::Unsynchronized => Arc::new(RacyPair::with_hook(initial, hook)),
        Strategy::FencedFlag => Arc::new(FencedPair::with_hook(initial, hook)),
        Strategy::Mutex => Arc::new(LockedPair::with_hook(initial, hook)),
        Strategy::AtomicCounter => Arc::new(AtomicPair::new(initial)),
    }
}
