// Runner configuration.

/// How `sample()` decides when to stop if the caller names neither a
/// timestep nor an episode count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BatchMode {
    /// Sample `rollout_fragment_length * num_envs` timesteps, cutting
    /// episodes at the boundary.
    #[default]
    TruncateEpisodes,
    /// Sample whole episodes until `train_batch_size` timesteps are collected.
    CompleteEpisodes,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvRunnerConfig {
    /// Number of vector env slots. Must match the env handed to the runner.
    pub num_envs_per_worker: usize,
    pub batch_mode: BatchMode,
    /// Timesteps per slot per `sample()` in `TruncateEpisodes` mode.
    pub rollout_fragment_length: usize,
    /// Timestep threshold for `CompleteEpisodes` mode.
    pub train_batch_size: usize,
    /// Root seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Index of this runner among its peers; mixed into the seed.
    pub worker_index: usize,
}

impl Default for EnvRunnerConfig {
    fn default() -> Self {
        Self {
            num_envs_per_worker: 1,
            batch_mode: BatchMode::TruncateEpisodes,
            rollout_fragment_length: 200,
            train_batch_size: 4000,
            seed: None,
            worker_index: 0,
        }
    }
}

impl EnvRunnerConfig {
    pub fn new() -> Self { Self::default() }

    pub fn with_num_envs_per_worker(mut self, n: usize) -> Self {
        self.num_envs_per_worker = n;
        self
    }

    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn with_rollout_fragment_length(mut self, n: usize) -> Self {
        self.rollout_fragment_length = n;
        self
    }

    pub fn with_train_batch_size(mut self, n: usize) -> Self {
        self.train_batch_size = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_worker_index(mut self, index: usize) -> Self {
        self.worker_index = index;
        self
    }

    /// Timesteps a `TruncateEpisodes` sample collects across all slots.
    pub fn timesteps_per_sample(&self) -> usize {
        self.rollout_fragment_length * self.num_envs_per_worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let c = EnvRunnerConfig::new()
            .with_num_envs_per_worker(4)
            .with_rollout_fragment_length(8)
            .with_batch_mode(BatchMode::CompleteEpisodes)
            .with_seed(3);
        assert_eq!(c.num_envs_per_worker, 4);
        assert_eq!(c.timesteps_per_sample(), 32);
        assert_eq!(c.batch_mode, BatchMode::CompleteEpisodes);
        assert_eq!(c.seed, Some(3));
    }
}
