//! # mh-core
//!
//! Core types for the memory-hazard reproduction harness.
//!
//! This crate provides:
//! - `PairValue`, `Strategy` and the `InvariantPair` trait every discipline implements
//! - `Observation` and the streaming `Detector` that judges each read
//! - `RunResult`, the only artifact handed to reporters
//! - `HookPoint` and `InterleavingHook`, the seam tests use to force interleavings
//! - `RunConfig`, loaded from defaults, `memhazard.toml` and `MEMHAZARD_*`
//!
//! ## Hazard classes
//!
//! | Class | Measured as |
//! |-------|-------------|
//! | Torn read/write | `b - a` differs from the target distance |
//! | Stale read | a fenced read whose flag was not updated, or a poll that never sees a clear |
//! | Reordering | a flag seen set with its payload still unwritten |
//!
//! Violations are the measured signal, never errors.

pub mod config;
pub mod detector;
pub mod error;
pub mod hook;
pub mod observation;
pub mod pair;
pub mod reporter;
pub mod result;

pub use config::{ConvergenceConfig, RunConfig, WORKERS_MAX};
pub use detector::Detector;
pub use error::{HazardError, Result};
pub use hook::{HookHandle, HookPoint, InterleavingHook, Slot};
pub use observation::Observation;
pub use pair::{FlagState, InvariantPair, PairValue, Snapshot, Strategy};
pub use reporter::{CollectingReporter, NullReporter, Reporter, TracingReporter};
pub use result::{HazardKind, RunResult, RunStatus, TrialSummary};
