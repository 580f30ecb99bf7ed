//! # mh-dst
//!
//! Drivers and deterministic interleaving control for the memory-hazard
//! harness.
//!
//! Hazards are timing dependent, so this crate attacks them two ways:
//!
//! - **Statistically**: [`StressDriver`] runs many real threads against one
//!   pair, optionally with a [`JitterHook`] yielding at every access.
//! - **Deterministically**: an [`OracleHook`] replays a scripted
//!   [`InterleavingTrace`], so a torn read happens on every run.
//!
//! ## Drivers
//!
//! - `driver`: stress trials over the invariant pair
//! - `convergence`: the targeted torn-value loop with fire-and-forget shifts
//! - `scenarios`: publication, polling, lost-update, exclusion and spawn handoff
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mh_core::{RunConfig, Strategy, TracingReporter};
//! use mh_dst::{InterleavingTrace, OracleHook, StressDriver};
//!
//! let config = RunConfig {
//!     observe_probability: 1.0,
//!     ..RunConfig::quick().with_strategy(Strategy::Unsynchronized)
//! };
//! let oracle = Arc::new(OracleHook::new(InterleavingTrace::torn_read(0, 1)));
//! let result = StressDriver::new(config)?
//!     .with_hook(oracle)
//!     .run(&TracingReporter)?;
//! assert!(result.violated());
//! # Ok::<(), mh_core::HazardError>(())
//! ```
//!
//! ## Reproducibility
//!
//! Every random choice derives from the run seed:
//! ```bash
//! HAZARD_SEED=12345 cargo test
//! ```

pub mod actor;
pub mod convergence;
pub mod driver;
pub mod jitter;
pub mod oracle_hook;
pub mod random;
pub mod scenarios;
pub mod seed;

pub use actor::{clear_actor, current_actor, set_actor};
pub use convergence::{ConvergenceController, Dispatcher};
pub use driver::StressDriver;
pub use jitter::JitterHook;
pub use oracle_hook::{InterleavingTrace, OracleHook, OracleHookStats, OracleStep};
pub use random::DeterministicRng;
pub use scenarios::{ScenarioConfig, ScenarioHarness};
pub use seed::{get_or_generate_seed, resolve_seed};
