//! Interleaving hooks.
//!
//! Cells call a hook around every memory access that is physically separate
//! from its neighbours. In production the hook is absent and the call is a
//! branch on `None`. Tests inject a hook to force a specific interleaving, so
//! a torn read becomes a deterministic outcome instead of timing luck.
//!
//! ```text
//!  writer                       reader
//!  ──────                       ──────
//!  write a
//!  at(AfterWrite(A))  ───────▶  at(BeforeRead(A))
//!                               read a, read b
//!  at(BeforeWrite(B)) ◀───────  at(AfterRead(B))
//!  write b
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Memory location touched at a hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// First field of a pair.
    A,
    /// Second field of a pair.
    B,
    /// Payload of a publication.
    Data,
    /// A publication or polling flag.
    Flag,
}

/// A point in a cell operation where a hook is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPoint {
    BeforeWrite(Slot),
    AfterWrite(Slot),
    BeforeRead(Slot),
    AfterRead(Slot),
}

impl HookPoint {
    #[must_use]
    pub const fn slot(&self) -> Slot {
        match self {
            HookPoint::BeforeWrite(slot)
            | HookPoint::AfterWrite(slot)
            | HookPoint::BeforeRead(slot)
            | HookPoint::AfterRead(slot) => *slot,
        }
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, HookPoint::BeforeWrite(_) | HookPoint::AfterWrite(_))
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::BeforeWrite(slot) => write!(f, "before-write({:?})", slot),
            HookPoint::AfterWrite(slot) => write!(f, "after-write({:?})", slot),
            HookPoint::BeforeRead(slot) => write!(f, "before-read({:?})", slot),
            HookPoint::AfterRead(slot) => write!(f, "after-read({:?})", slot),
        }
    }
}

/// Test seam consulted at every [`HookPoint`].
///
/// Implementations may block, yield or panic. A panic is treated as a
/// worker fault by the driver.
pub trait InterleavingHook: Send + Sync {
    fn at(&self, point: HookPoint);
}

/// Optional hook carried by a cell.
#[derive(Clone, Default)]
pub struct HookHandle(Option<Arc<dyn InterleavingHook>>);

impl HookHandle {
    /// Handle that never calls out.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn new(hook: Arc<dyn InterleavingHook>) -> Self {
        Self(Some(hook))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn at(&self, point: HookPoint) {
        if let Some(hook) = &self.0 {
            hook.at(point);
        }
    }
}

impl From<Option<Arc<dyn InterleavingHook>>> for HookHandle {
    fn from(hook: Option<Arc<dyn InterleavingHook>>) -> Self {
        Self(hook)
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HookHandle")
            .field(&if self.is_active() { "active" } else { "none" })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<HookPoint>>);

    impl InterleavingHook for Recorder {
        fn at(&self, point: HookPoint) {
            self.0.lock().unwrap().push(point);
        }
    }

    #[test]
    fn test_handle_forwards_points() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handle = HookHandle::new(recorder.clone());

        handle.at(HookPoint::AfterWrite(Slot::A));
        handle.at(HookPoint::BeforeRead(Slot::B));

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![HookPoint::AfterWrite(Slot::A), HookPoint::BeforeRead(Slot::B)]
        );
    }

    #[test]
    fn test_none_handle_is_inert() {
        let handle = HookHandle::none();
        assert!(!handle.is_active());
        handle.at(HookPoint::BeforeWrite(Slot::Flag));
    }

    #[test]
    fn test_point_accessors() {
        assert_eq!(HookPoint::AfterRead(Slot::Data).slot(), Slot::Data);
        assert!(HookPoint::BeforeWrite(Slot::A).is_write());
        assert!(!HookPoint::BeforeRead(Slot::A).is_write());
    }
}
