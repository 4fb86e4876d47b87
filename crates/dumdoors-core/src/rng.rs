//! Random number generator abstraction for determinism.
//!
//! In production, this wraps an OS-seeded RNG. In tests, a seeded or
//! scripted implementation is injected so backoff jitter and door draws are
//! repeatable.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Abstraction over random number generation.
pub trait DeterministicRng: Send + Sync {
    /// Generate a random `u32` in the range `[min, max]` inclusive.
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32;

    /// Generate a random `f64` in `[0.0, 1.0)`.
    fn next_f64(&mut self) -> f64;
}

/// Shared, lockable RNG handle.
///
/// Lock it only around synchronous calls, never across an await point.
pub type SharedRng = Arc<Mutex<dyn DeterministicRng + Send>>;

/// Production RNG backed by [`StdRng`].
#[derive(Debug)]
pub struct StdRngSource {
    inner: StdRng,
}

impl StdRngSource {
    /// Creates an RNG seeded from the operating system.
    #[must_use]
    pub fn from_os() -> Self {
        Self {
            inner: StdRng::from_os_rng(),
        }
    }

    /// Creates an RNG with a fixed seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Wraps this RNG in a [`SharedRng`] handle.
    #[must_use]
    pub fn shared(self) -> SharedRng {
        Arc::new(Mutex::new(self))
    }
}

impl DeterministicRng for StdRngSource {
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32 {
        if max <= min {
            return min;
        }
        self.inner.random_range(min..=max)
    }

    fn next_f64(&mut self) -> f64 {
        self.inner.random::<f64>()
    }
}

/// Picks an index in `[0, len)` using `rng`. Returns `None` for an empty range.
pub fn pick_index(rng: &mut dyn DeterministicRng, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let max = u32::try_from(len - 1).unwrap_or(u32::MAX);
    let picked = rng.next_u32_range(0, max) as usize;
    Some(picked.min(len - 1))
}
