//! Flag-guarded publication of a single value.
//!
//! A writer stores a payload and sets an "initialized" flag; a reader checks
//! the flag and, if it is set, uses the payload. Two things can break that
//! handoff:
//!
//! - The writer's stores land in the wrong order ([`WriteOrder::FlagThenData`]),
//!   which is what a compiler or CPU may do to independent relaxed stores.
//! - The reader's loads land in the wrong order ([`ReadOrder::DataThenFlag`]),
//!   a payload read hoisted above the flag check.
//!
//! A read that reports [`ReadOutcome::Published`] with the uninitialized
//! payload is the violation. With [`PublishOrdering::ReleaseAcquire`] and
//! program-order sequences it cannot happen.

use std::fmt;

use mh_core::{HookHandle, HookPoint, Slot};

use crate::sync::{AtomicBool, AtomicI64, Ordering};

/// Payload value before publication.
pub const UNINITIALIZED: i64 = 0;

/// Memory ordering of the flag store and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishOrdering {
    /// Flag accessed with `Relaxed`: nothing orders the payload against it.
    Relaxed,
    /// Release store, acquire load.
    ReleaseAcquire,
}

impl PublishOrdering {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PublishOrdering::Relaxed => "relaxed",
            PublishOrdering::ReleaseAcquire => "release_acquire",
        }
    }

    fn store(&self) -> Ordering {
        match self {
            PublishOrdering::Relaxed => Ordering::Relaxed,
            PublishOrdering::ReleaseAcquire => Ordering::Release,
        }
    }

    fn load(&self) -> Ordering {
        match self {
            PublishOrdering::Relaxed => Ordering::Relaxed,
            PublishOrdering::ReleaseAcquire => Ordering::Acquire,
        }
    }
}

/// Order in which the writer performs its two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrder {
    /// Program order: payload, then flag.
    DataThenFlag,
    /// Reordered: flag, then payload.
    FlagThenData,
}

impl WriteOrder {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            WriteOrder::DataThenFlag => "data_then_flag",
            WriteOrder::FlagThenData => "flag_then_data",
        }
    }
}

/// Order in which the reader performs its two loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOrder {
    /// Program order: flag, then payload.
    FlagThenData,
    /// Hoisted: payload, then flag.
    DataThenFlag,
}

impl ReadOrder {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ReadOrder::FlagThenData => "flag_then_data",
            ReadOrder::DataThenFlag => "data_then_flag",
        }
    }
}

/// What a reader concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Flag not set yet.
    NotPublished,
    /// Flag set, with the payload read alongside it.
    Published(i64),
}

impl ReadOutcome {
    /// Flag seen set while the payload was still uninitialized.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        matches!(self, ReadOutcome::Published(UNINITIALIZED))
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::NotPublished => write!(f, "not published"),
            ReadOutcome::Published(value) => write!(f, "published({})", value),
        }
    }
}

/// One payload slot plus its initialized flag.
#[derive(Debug)]
pub struct Publication {
    data: AtomicI64,
    initialized: AtomicBool,
    ordering: PublishOrdering,
    hook: HookHandle,
}

impl Publication {
    #[must_use]
    pub fn new(ordering: PublishOrdering) -> Self {
        Self::with_hook(ordering, HookHandle::none())
    }

    #[must_use]
    pub fn with_hook(ordering: PublishOrdering, hook: HookHandle) -> Self {
        Self {
            data: AtomicI64::new(UNINITIALIZED),
            initialized: AtomicBool::new(false),
            ordering,
            hook,
        }
    }

    #[must_use]
    pub fn ordering(&self) -> PublishOrdering {
        self.ordering
    }

    /// Store `value` and set the flag, in `order`.
    pub fn publish(&self, value: i64, order: WriteOrder) {
        debug_assert_ne!(value, UNINITIALIZED, "Published value must differ from the sentinel");

        match order {
            WriteOrder::DataThenFlag => {
                self.write_data(value);
                self.write_flag();
            }
            WriteOrder::FlagThenData => {
                self.write_flag();
                self.write_data(value);
            }
        }
    }

    /// Check the flag and read the payload, in `order`.
    pub fn read(&self, order: ReadOrder) -> ReadOutcome {
        let (initialized, value) = match order {
            ReadOrder::FlagThenData => {
                let initialized = self.read_flag();
                (initialized, self.read_data())
            }
            ReadOrder::DataThenFlag => {
                let value = self.read_data();
                (self.read_flag(), value)
            }
        };

        if initialized {
            ReadOutcome::Published(value)
        } else {
            ReadOutcome::NotPublished
        }
    }

    /// Back to the unpublished state. Callers must ensure no reader or writer
    /// is active.
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.data.store(UNINITIALIZED, Ordering::SeqCst);
    }

    fn write_data(&self, value: i64) {
        self.hook.at(HookPoint::BeforeWrite(Slot::Data));
        self.data.store(value, Ordering::Relaxed);
        self.hook.at(HookPoint::AfterWrite(Slot::Data));
    }

    fn write_flag(&self) {
        self.hook.at(HookPoint::BeforeWrite(Slot::Flag));
        self.initialized.store(true, self.ordering.store());
        self.hook.at(HookPoint::AfterWrite(Slot::Flag));
    }

    fn read_data(&self) -> i64 {
        self.hook.at(HookPoint::BeforeRead(Slot::Data));
        let value = self.data.load(Ordering::Relaxed);
        self.hook.at(HookPoint::AfterRead(Slot::Data));
        value
    }

    fn read_flag(&self) -> bool {
        self.hook.at(HookPoint::BeforeRead(Slot::Flag));
        let initialized = self.initialized.load(self.ordering.load());
        self.hook.at(HookPoint::AfterRead(Slot::Flag));
        initialized
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_unpublished_read() {
        let publication = Publication::new(PublishOrdering::ReleaseAcquire);
        assert_eq!(
            publication.read(ReadOrder::FlagThenData),
            ReadOutcome::NotPublished
        );
    }

    #[test]
    fn test_sequential_publish_then_read() {
        for order in [WriteOrder::DataThenFlag, WriteOrder::FlagThenData] {
            let publication = Publication::new(PublishOrdering::Relaxed);
            publication.publish(42, order);
            let outcome = publication.read(ReadOrder::FlagThenData);
            assert_eq!(outcome, ReadOutcome::Published(42));
            assert!(!outcome.is_violation());
        }
    }

    #[test]
    fn test_reset() {
        let publication = Publication::new(PublishOrdering::ReleaseAcquire);
        publication.publish(7, WriteOrder::DataThenFlag);
        publication.reset();
        assert_eq!(
            publication.read(ReadOrder::DataThenFlag),
            ReadOutcome::NotPublished
        );
    }

    #[test]
    fn test_violation_detection() {
        assert!(ReadOutcome::Published(UNINITIALIZED).is_violation());
        assert!(!ReadOutcome::Published(1).is_violation());
        assert!(!ReadOutcome::NotPublished.is_violation());
    }
}

/// Loom tests - release/acquire publication is never seen half-done.
#[cfg(loom)]
mod loom_tests {
    use super::*;
    use crate::sync::{thread, Arc};

    #[test]
    fn test_release_acquire_never_shows_uninitialized() {
        loom::model(|| {
            let publication = Arc::new(Publication::new(PublishOrdering::ReleaseAcquire));

            let writer = {
                let publication = Arc::clone(&publication);
                thread::spawn(move || publication.publish(42, WriteOrder::DataThenFlag))
            };

            let outcome = publication.read(ReadOrder::FlagThenData);
            assert!(!outcome.is_violation(), "Saw {}", outcome);

            writer.join().unwrap();
        });
    }
}
