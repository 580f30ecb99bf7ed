//! Observations: single reads of a pair, checked against the invariant.

use serde::{Deserialize, Serialize};

use crate::pair::{FlagState, PairValue, Snapshot};

/// One read of a pair, judged against `b - a == target_distance`.
///
/// Produced by readers and consumed immediately by a [`Detector`]; only the
/// first violating observation of a trial is retained.
///
/// [`Detector`]: crate::detector::Detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Per-reader sequence number.
    pub seq: u64,
    /// Values read.
    pub value: PairValue,
    /// Flag state seen with the values.
    pub flag: FlagState,
    /// Whether `b - a == target_distance`.
    pub invariant_holds: bool,
    /// `|(b - a) - target_distance|`, zero when the invariant holds.
    pub deviation: i64,
}

impl Observation {
    /// Judge a snapshot.
    #[must_use]
    pub fn check(seq: u64, snapshot: Snapshot, target_distance: i64) -> Self {
        let deviation = snapshot.value.deviation_from(target_distance);
        Self {
            seq,
            value: snapshot.value,
            flag: snapshot.flag,
            invariant_holds: deviation == 0,
            deviation,
        }
    }

    /// Whether the observation takes part in violation counting.
    ///
    /// Reads made while a fenced flag was stale carry no guarantee; they are
    /// legitimate staleness, not invariant breakage.
    #[must_use]
    pub fn is_countable(&self) -> bool {
        self.flag != FlagState::NotUpdated
    }

    /// Countable and broken.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.is_countable() && !self.invariant_holds
    }
}
