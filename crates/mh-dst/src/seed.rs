//! Run seeds.

use tracing::{info, warn};

/// Environment variable that pins the seed.
pub const SEED_ENV: &str = "HAZARD_SEED";

/// Seed from `configured`, else `HAZARD_SEED`, else a random one.
///
/// The choice is logged so a run can be reproduced with
/// `HAZARD_SEED=<seed>`. An unparsable `HAZARD_SEED` is ignored with a
/// warning.
#[must_use]
pub fn resolve_seed(configured: Option<u64>) -> u64 {
    if let Some(seed) = configured {
        info!(seed, source = "config", "HAZARD_SEED={}", seed);
        return seed;
    }
    get_or_generate_seed()
}

/// Seed from `HAZARD_SEED`, or a random one.
#[must_use]
pub fn get_or_generate_seed() -> u64 {
    match std::env::var(SEED_ENV) {
        Ok(s) => match s.trim().parse::<u64>() {
            Ok(seed) => {
                info!(seed, source = "environment", "HAZARD_SEED={}", seed);
                seed
            }
            Err(e) => {
                let seed = rand::random::<u64>();
                warn!(value = %s, error = %e, seed, "Ignoring unparsable HAZARD_SEED");
                seed
            }
        },
        Err(_) => {
            let seed = rand::random::<u64>();
            info!(seed, source = "random", "HAZARD_SEED={}", seed);
            seed
        }
    }
}
