//! Deterministic RNG for reproducible stress workloads.
//!
//! XorShift64 with Lemire bounded sampling. The stress and soak tests mix
//! plain, checkpointed, and eventful submissions from a fixed seed so a
//! failing interleaving can be re-run exactly; nothing in the scheduler
//! itself consumes randomness.
//!
//! Not thread-safe; give each generating thread its own instance. `Copy` is
//! intentionally not implemented so a stream cannot be duplicated by
//! accident.

use std::time::Duration;

/// Deterministic xorshift generator.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Create a new generator. Seed 0 is remapped to avoid the all-zero
    /// lockup state.
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Next raw value. Shift constants (13, 7, 17) are Marsaglia's
    /// full-period triple.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)`.
    ///
    /// Power-of-two bounds take a bitmask fast path; everything else uses
    /// Lemire's nearly-divisionless method.
    ///
    /// # Panics
    /// Panics (debug) if `upper` is 0.
    #[inline]
    pub fn next_usize(&mut self, upper: usize) -> usize {
        debug_assert!(upper > 0, "upper bound must be > 0");
        if upper.is_power_of_two() {
            return (self.next_u64() as usize) & (upper - 1);
        }
        self.bounded_u64(upper as u64) as usize
    }

    /// Uniform duration in `[lo, hi)`, nanosecond granularity.
    ///
    /// Used to synthesize CPU bursts and event-wait lengths in workload
    /// generators.
    ///
    /// # Panics
    /// Panics (debug) if `hi <= lo`.
    #[inline]
    pub fn next_duration(&mut self, lo: Duration, hi: Duration) -> Duration {
        debug_assert!(hi > lo, "duration range must be non-empty");
        let span = (hi - lo).as_nanos().min(u64::MAX as u128) as u64;
        lo + Duration::from_nanos(self.bounded_u64(span))
    }

    /// True with probability `numerator / denominator`.
    ///
    /// # Panics
    /// Panics (debug) if `denominator` is 0 or `numerator > denominator`.
    #[inline]
    pub fn chance(&mut self, numerator: u64, denominator: u64) -> bool {
        debug_assert!(denominator > 0, "denominator must be > 0");
        debug_assert!(numerator <= denominator, "numerator must be <= denominator");
        self.bounded_u64(denominator) < numerator
    }

    /// Lemire rejection sampling: multiply-high, retry only inside the
    /// biased zone (probability < upper / 2^64).
    #[inline]
    fn bounded_u64(&mut self, upper: u64) -> u64 {
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let x = self.next_u64();
            let m = (x as u128) * (upper as u128);
            if (m as u64) >= threshold {
                return (m >> 64) as u64;
            }
        }
    }
}

impl Default for XorShift64 {
    fn default() -> Self {
        Self::new(0)
    }
}
