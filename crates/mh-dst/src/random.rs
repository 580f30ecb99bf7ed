//! Deterministic randomness.
//!
//! Every random choice in a run (shift deltas, observe decisions, jitter)
//! comes from a [`DeterministicRng`] derived from the run seed, so the
//! choices of a worker are reproducible even though the interleaving is not.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Odd multiplier spreading derived seeds apart.
const STREAM_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Seeded random source.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    inner: StdRng,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent stream for `stream` (a worker index, a trial number).
    #[must_use]
    pub fn derive(&self, stream: u64) -> Self {
        Self::new(derive_seed(self.seed, stream))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.inner.gen()
    }

    /// Uniform in `low..=high`.
    pub fn gen_range_inclusive(&mut self, low: i64, high: i64) -> i64 {
        debug_assert!(low <= high, "Empty range {}..={}", low, high);
        self.inner.gen_range(low..=high)
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.inner.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Non-zero delta with magnitude in `1..=max_delta`; zero when
    /// `max_delta` is zero.
    pub fn delta(&mut self, max_delta: i64) -> i64 {
        debug_assert!(max_delta >= 0, "max_delta must be non-negative");
        if max_delta == 0 {
            return 0;
        }
        let magnitude = self.gen_range_inclusive(1, max_delta);
        if self.inner.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        }
    }
}

/// Seed of stream `stream` under `seed`.
#[must_use]
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    seed ^ stream.wrapping_add(1).wrapping_mul(STREAM_MULTIPLIER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_derived_streams_differ() {
        let root = DeterministicRng::new(7);
        let mut w0 = root.derive(0);
        let mut w1 = root.derive(1);
        assert_ne!(w0.seed(), w1.seed());
        assert_ne!(w0.next_u64(), w1.next_u64());
        assert_eq!(root.derive(3).seed(), derive_seed(7, 3));
    }

    #[test]
    fn test_delta_bounds() {
        let mut rng = DeterministicRng::new(1);
        for _ in 0..1_000 {
            let delta = rng.delta(5);
            assert!(delta != 0 && (-5..=5).contains(&delta));
        }
        assert_eq!(rng.delta(0), 0);
    }

    #[test]
    fn test_gen_bool_extremes() {
        let mut rng = DeterministicRng::new(9);
        for _ in 0..100 {
            assert!(rng.gen_bool(1.0));
            assert!(!rng.gen_bool(0.0));
        }
    }
}
