pub mod rng;

pub use rng::{RngStream, RunnerSeeds, SeedSequence, rng_from_seed, split_n};
