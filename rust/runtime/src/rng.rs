//! Deterministic RNG for scheduling strategies.
//!
//! Strategies own their RNG; user code never draws from it directly, every
//! random value goes through the strategy so it lands in the schedule trace.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded ChaCha8 stream.
#[derive(Debug, Clone)]
pub struct SimRng {
    stream: ChaCha8Rng,
}

impl SimRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            stream: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw the seed of the next iteration and the stream it starts.
    ///
    /// A master stream hands out one seed per iteration, so iteration `n`
    /// depends only on the master seed and `n`, never on how many draws
    /// earlier iterations made.
    pub fn next_iteration(&mut self) -> (u64, Self) {
        let seed = self.stream.next_u64();
        (seed, Self::new(seed))
    }

    /// Uniform index in `[0, len)`; 0 for empty or single-element ranges.
    pub fn next_index(&mut self, len: usize) -> usize {
        match len {
            0 | 1 => 0,
            _ => self.stream.gen_range(0..len),
        }
    }

    /// Uniform integer in `[0, bound)`; 0 when `bound <= 1`.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        match bound {
            0 | 1 => 0,
            _ => self.stream.gen_range(0..bound),
        }
    }

    pub fn next_bool(&mut self) -> bool {
        self.stream.gen()
    }
}
