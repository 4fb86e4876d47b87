//! Test RNG: deterministic `DeterministicRng` implementations for tests.

use dumdoors_core::rng::DeterministicRng;

/// A no-op RNG that always returns `min` for `next_u32_range` and `0.0` for
/// `next_f64`. With it, backoff jitter is zero and random draws pick the
/// first candidate.
#[derive(Debug)]
pub struct MockRng;

impl DeterministicRng for MockRng {
    fn next_u32_range(&mut self, min: u32, _max: u32) -> u32 {
        min
    }

    fn next_f64(&mut self) -> f64 {
        0.0
    }
}

/// An RNG that returns values from a predetermined sequence, cycling when
/// exhausted. `next_f64` maps each value into `[0, 1)` as `value / 100`.
#[derive(Debug)]
pub struct SequenceRng {
    values: Vec<u32>,
    index: usize,
}

impl SequenceRng {
    /// Create a new `SequenceRng` with the given values.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    #[must_use]
    pub fn new(values: Vec<u32>) -> Self {
        assert!(!values.is_empty(), "SequenceRng needs at least one value");
        Self { values, index: 0 }
    }

    fn next_raw(&mut self) -> u32 {
        let val = self.values[self.index % self.values.len()];
        self.index += 1;
        val
    }
}

impl DeterministicRng for SequenceRng {
    fn next_u32_range(&mut self, min: u32, max: u32) -> u32 {
        self.next_raw().clamp(min, max.max(min))
    }

    fn next_f64(&mut self) -> f64 {
        f64::from(self.next_raw().min(99)) / 100.0
    }
}
