//! Run configuration.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`MEMHAZARD_*`, `__` separates nested keys)
//! 2. Configuration file (`memhazard.toml`)
//! 3. Default values
//!
//! Validation happens before any worker is spawned; a rejected configuration
//! surfaces as [`HazardError::InvalidConfiguration`].

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::HazardError;
use crate::pair::{PairValue, Strategy};

/// Upper bound on concurrent workers per trial.
pub const WORKERS_MAX: usize = 1024;

/// Upper bound on convergence dispatch threads.
pub const DISPATCHERS_MAX: usize = 256;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "memhazard.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MEMHAZARD_";

/// Convergence controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Absolute value `a` is aligned to once the distance matches.
    pub target_a: i64,
    /// Maximum controller rounds; `None` is unbounded.
    pub budget: Option<u64>,
    /// Threads applying the fire-and-forget corrective shifts.
    pub dispatchers: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            target_a: 0,
            budget: Some(100_000),
            dispatchers: 4,
        }
    }
}

/// Configuration of one stress run or convergence run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Discipline guarding the pair
    pub strategy: Strategy,
    /// Concurrent workers
    pub workers: usize,
    /// Rounds per worker
    pub iterations: u64,
    /// Starting `b - a`
    pub initial_distance: i64,
    /// Distance the invariant checks against; defaults to `initial_distance`
    /// for stress runs and is the steering target for convergence runs
    pub target_distance: Option<i64>,
    /// Wall-clock limit in milliseconds
    pub deadline_ms: Option<u64>,
    /// Shift deltas are drawn from `-max_delta..=max_delta` without zero, so
    /// every shift moves the pair unless `max_delta` is zero
    pub max_delta: i64,
    /// Probability that a round also observes the pair
    pub observe_probability: f64,
    /// Seed for reproduction; `None` reads `HAZARD_SEED` or draws one
    pub seed: Option<u64>,
    /// Convergence controller settings
    pub convergence: ConvergenceConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Unsynchronized,
            workers: 4,
            iterations: 1_000,
            initial_distance: 0,
            target_distance: None,
            deadline_ms: None,
            max_delta: 16,
            observe_probability: 0.5,
            seed: None,
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl RunConfig {
    /// Configuration for quick testing.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            workers: 2,
            iterations: 200,
            ..Self::default()
        }
    }

    /// Configuration for stress testing: 50 workers, 10k rounds each.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            workers: 50,
            iterations: 10_000,
            observe_probability: 0.5,
            ..Self::default()
        }
    }

    /// Same configuration under another discipline.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Distance the detector checks against.
    #[must_use]
    pub fn effective_target_distance(&self) -> i64 {
        self.target_distance.unwrap_or(self.initial_distance)
    }

    /// Pair value a trial starts from.
    #[must_use]
    pub fn initial_pair(&self) -> PairValue {
        PairValue::with_distance(self.initial_distance)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), HazardError> {
        if self.workers == 0 {
            return Err(HazardError::invalid("workers", "must be at least 1"));
        }
        if self.workers > WORKERS_MAX {
            return Err(HazardError::invalid(
                "workers",
                format!("{} exceeds the limit of {}", self.workers, WORKERS_MAX),
            ));
        }
        if self.iterations == 0 {
            return Err(HazardError::invalid("iterations", "must be at least 1"));
        }
        if self.max_delta < 0 {
            return Err(HazardError::invalid(
                "max_delta",
                format!("must be non-negative, got {}", self.max_delta),
            ));
        }
        if !(0.0..=1.0).contains(&self.observe_probability) {
            return Err(HazardError::invalid(
                "observe_probability",
                format!("must be within [0, 1], got {}", self.observe_probability),
            ));
        }
        if self.convergence.budget == Some(0) {
            return Err(HazardError::invalid(
                "convergence.budget",
                "must be at least 1 when set",
            ));
        }
        if self.convergence.dispatchers == 0 || self.convergence.dispatchers > DISPATCHERS_MAX {
            return Err(HazardError::invalid(
                "convergence.dispatchers",
                format!(
                    "must be within 1..={}, got {}",
                    DISPATCHERS_MAX, self.convergence.dispatchers
                ),
            ));
        }
        Ok(())
    }

    /// Load from `memhazard.toml` in the working directory plus environment.
    pub fn load() -> Result<Self, HazardError> {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load from a TOML file plus environment; a missing file is skipped.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, HazardError> {
        let figment = Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment)
    }

    /// Parse a TOML string over the defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, HazardError> {
        let figment =
            Figment::from(Serialized::defaults(RunConfig::default())).merge(Toml::string(toml_str));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self, HazardError> {
        let config: RunConfig = figment
            .extract()
            .map_err(|e| HazardError::invalid("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        RunConfig::default().validate().unwrap();
        RunConfig::quick().validate().unwrap();
        RunConfig::stress().validate().unwrap();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = RunConfig {
            workers: 0,
            ..RunConfig::quick()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            HazardError::InvalidConfiguration { field: "workers", .. }
        ));
    }

    #[test]
    fn test_bad_probability_rejected() {
        let config = RunConfig {
            observe_probability: 1.5,
            ..RunConfig::quick()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_budget_rejected_but_unbounded_allowed() {
        let mut config = RunConfig::quick();
        config.convergence.budget = Some(0);
        assert!(matches!(
            config.validate(),
            Err(HazardError::InvalidConfiguration {
                field: "convergence.budget",
                ..
            })
        ));

        config.convergence.budget = None;
        config.validate().unwrap();
    }

    #[test]
    fn test_negative_iterations_rejected_at_parse() {
        let err = RunConfig::from_toml("iterations = -5").unwrap_err();
        assert!(matches!(err, HazardError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let config = RunConfig::from_toml(
            r#"
            strategy = "mutex"
            workers = 8
            initial_distance = 7
            deadline_ms = 250

            [convergence]
            target_a = 3
            budget = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, Strategy::Mutex);
        assert_eq!(config.workers, 8);
        assert_eq!(config.iterations, RunConfig::default().iterations);
        assert_eq!(config.effective_target_distance(), 7);
        assert_eq!(config.deadline(), Some(Duration::from_millis(250)));
        assert_eq!(config.convergence.target_a, 3);
        assert_eq!(config.convergence.budget, Some(500));
        assert_eq!(config.convergence.dispatchers, 4);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, "workers = 3\nstrategy = \"fenced_flag\"")?;
            jail.set_env("MEMHAZARD_WORKERS", "6");
            jail.set_env("MEMHAZARD_CONVERGENCE__DISPATCHERS", "2");

            let config = RunConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.workers, 6);
            assert_eq!(config.strategy, Strategy::FencedFlag);
            assert_eq!(config.convergence.dispatchers, 2);
            Ok(())
        });
    }
}
