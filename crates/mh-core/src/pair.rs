//! The invariant-bearing pair and the disciplines that guard it.
//!
//! A pair holds two signed counters `a` and `b` whose distance `b - a` must
//! never change: the only mutation is [`InvariantPair::shift`], which moves
//! both fields by the same delta. How faithfully that is made atomic with
//! respect to concurrent readers is what each [`Strategy`] decides.
//!
//! | Strategy | Shift | Snapshot | Torn reads possible |
//! |----------|-------|----------|---------------------|
//! | `Unsynchronized` | two independent field writes | two independent field reads | yes |
//! | `FencedFlag` | writes bracketed by a release-stored flag | acquire-loaded flag, then fields | only on stale flag |
//! | `Mutex` | whole body under one lock | whole body under the same lock | no |
//! | `AtomicCounter` | CAS loop replacing the whole pair | single atomic load | no |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observation::Observation;

/// Plain value of a pair, as written or as observed.
///
/// This is a local copy, never shared; concurrency lives in the
/// [`InvariantPair`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PairValue {
    pub a: i64,
    pub b: i64,
}

impl PairValue {
    #[must_use]
    pub const fn new(a: i64, b: i64) -> Self {
        Self { a, b }
    }

    /// Pair starting at `a = 0` with `b - a == distance`.
    #[must_use]
    pub const fn with_distance(distance: i64) -> Self {
        Self { a: 0, b: distance }
    }

    /// `b - a`, wrapping on overflow.
    #[must_use]
    pub const fn distance(&self) -> i64 {
        self.b.wrapping_sub(self.a)
    }

    /// Both fields moved by `delta`.
    #[must_use]
    pub const fn shifted(&self, delta: i64) -> Self {
        Self {
            a: self.a.wrapping_add(delta),
            b: self.b.wrapping_add(delta),
        }
    }

    /// Absolute gap between the observed distance and `target_distance`.
    ///
    /// Computed in 128 bits and clamped, so extreme values never overflow.
    #[must_use]
    pub fn deviation_from(&self, target_distance: i64) -> i64 {
        let gap = i128::from(self.b) - i128::from(self.a) - i128::from(target_distance);
        i64::try_from(gap.unsigned_abs()).unwrap_or(i64::MAX)
    }
}

impl fmt::Display for PairValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a = {}, b = {}", self.a, self.b)
    }
}

/// Synchronization discipline governing one pair for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Plain field accesses, no ordering at all. The control case.
    #[default]
    #[serde(alias = "none")]
    Unsynchronized,
    /// Release-store / acquire-load of a single flag around the field accesses.
    FencedFlag,
    /// One exclusive lock around every shift and snapshot.
    Mutex,
    /// The whole pair replaced by a single compare-and-swap.
    AtomicCounter,
}

impl Strategy {
    /// All strategies, control case first.
    pub const ALL: [Strategy; 4] = [
        Strategy::Unsynchronized,
        Strategy::FencedFlag,
        Strategy::Mutex,
        Strategy::AtomicCounter,
    ];

    /// Whether the strategy promises that no observation is ever torn.
    ///
    /// `FencedFlag` only promises it for observations whose flag was seen
    /// updated, so it is not counted here.
    #[must_use]
    pub const fn guarantees_atomicity(&self) -> bool {
        matches!(self, Strategy::Mutex | Strategy::AtomicCounter)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Strategy::Unsynchronized => "unsynchronized",
            Strategy::FencedFlag => "fenced_flag",
            Strategy::Mutex => "mutex",
            Strategy::AtomicCounter => "atomic_counter",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a reader learned about the publication flag while snapshotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagState {
    /// The strategy has no flag.
    Unguarded,
    /// The flag was observed in its updated state around both field reads.
    Updated,
    /// The flag was stale or a write was in flight. The fields read alongside
    /// it carry no guarantee and are excluded from violation counting.
    NotUpdated,
}

/// One read of a pair: the value plus the flag state seen with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub value: PairValue,
    pub flag: FlagState,
}

impl Snapshot {
    #[must_use]
    pub const fn unguarded(value: PairValue) -> Self {
        Self {
            value,
            flag: FlagState::Unguarded,
        }
    }
}

/// A pair shared by many threads under one discipline.
///
/// MINIMAL interface: implementations know nothing about trials, detectors
/// or reporting. Interleaving hooks are injected at construction.
pub trait InvariantPair: Send + Sync {
    /// Discipline this implementation follows.
    fn strategy(&self) -> Strategy;

    /// Move both fields by `delta`.
    ///
    /// A zero delta still performs both field writes.
    fn shift(&self, delta: i64);

    /// Read both fields as one unit, as far as the discipline allows.
    fn snapshot(&self) -> Snapshot;

    /// Snapshot and judge against `b - a == target_distance`.
    fn observe(&self, seq: u64, target_distance: i64) -> Observation {
        Observation::check(seq, self.snapshot(), target_distance)
    }
}
