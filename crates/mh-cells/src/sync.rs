//! Synchronization primitives with loom support.
//!
//! Cells that model a memory-ordering hazard import their atomics from here,
//! so the same code runs under `std` and under loom's model checker.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test -p mh-cells --release
//! ```
//!
//! The lock-based and epoch-based cells use `parking_lot` and
//! `crossbeam-epoch` directly; loom does not model them.

#[cfg(loom)]
pub use loom::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

#[cfg(not(loom))]
pub use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

#[cfg(loom)]
pub use loom::sync::Arc;

#[cfg(not(loom))]
pub use std::sync::Arc;

#[cfg(loom)]
pub use loom::thread;

#[cfg(not(loom))]
pub use std::thread;

/// Back off inside a spin loop.
///
/// Loom needs an explicit yield to explore the other threads.
#[inline]
pub fn spin_wait() {
    #[cfg(loom)]
    loom::thread::yield_now();

    #[cfg(not(loom))]
    std::hint::spin_loop();
}
