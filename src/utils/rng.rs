//! Deterministic seeding for runners and vector envs.
//!
//! - SeedSequence: expands a root u64 seed into deterministic sub-seeds
//! - RngStream: a reproducible PRNG stream (ChaCha8)
//! - RunnerSeeds: the per-worker split of a root seed into an env reset seed
//!   and an action-sampling stream

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Type alias for the default RNG stream used across the crate.
pub type RngStream = ChaCha8Rng;

/// SplitMix64 expansion of a 64-bit seed into a sequence of sub-seeds.
#[derive(Clone, Debug)]
pub struct SeedSequence {
    state: u128,
}

impl SeedSequence {
    pub fn new(seed: u64) -> Self {
        Self { state: (seed as u128) ^ 0x9E3779B97F4A7C15u128 }
    }

    /// Generate the next sub-seed deterministically.
    pub fn next_subseed(&mut self) -> u64 {
        let mut z = (self.state as u64).wrapping_add(0x9E3779B97F4A7C15);
        self.state = (self.state ^ (z as u128)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Create an RNG stream seeded from the next subseed.
    pub fn next_rng(&mut self) -> RngStream {
        RngStream::seed_from_u64(self.next_subseed())
    }

    pub fn split_n(&mut self, n: usize) -> Vec<u64> {
        (0..n).map(|_| self.next_subseed()).collect()
    }
}

/// Split a root seed into N sub-seeds deterministically.
pub fn split_n(seed: u64, n: usize) -> Vec<u64> {
    SeedSequence::new(seed).split_n(n)
}

pub fn rng_from_seed(seed: u64) -> RngStream {
    RngStream::seed_from_u64(seed)
}

/// Seeds owned by one runner.
///
/// Two workers sharing a root seed still get distinct streams because the
/// worker index is mixed into the sequence.
#[derive(Clone, Debug)]
pub struct RunnerSeeds {
    /// Seed for the first vector env reset; consumed by that reset.
    pub env_seed: Option<u64>,
    /// Stream for action-space and action-distribution sampling.
    pub rng: RngStream,
}

impl RunnerSeeds {
    pub fn derive(seed: Option<u64>, worker_index: usize) -> Self {
        match seed {
            Some(seed) => {
                let mut ss = SeedSequence::new(seed);
                let skip = ss.split_n(worker_index);
                debug_assert_eq!(skip.len(), worker_index);
                let env_seed = ss.next_subseed();
                Self { env_seed: Some(env_seed), rng: ss.next_rng() }
            }
            None => Self { env_seed: None, rng: RngStream::from_entropy() },
        }
    }
}
