pub mod core;
pub mod spaces;
pub mod utils;
pub mod vector;
pub mod tensor;
pub mod module;
pub mod episode;
pub mod callbacks;
pub mod metrics;
pub mod config;
pub mod runner;

pub use crate::core::{Env, Info, InfoValue, RenderFrame, Result, RunnerError, Step};
pub use crate::spaces::{BoxSpace, Discrete, Space};
pub use crate::vector::{SlotInfo, SyncVectorEnv, VectorEnv, VectorStep};
pub use crate::tensor::{FromArray, NdarrayBackend, TensorBackend, ToArray};
pub use crate::module::{
    ActionDistribution, Categorical, ForwardBatch, ForwardOutput, RlModule, StateMap, Weights, WeightsPayload,
    DEFAULT_POLICY_ID,
};
pub use crate::episode::{EnvStep, EpisodeId, SingleAgentEpisode};
pub use crate::callbacks::{DefaultCallbacks, EpisodeCallbacks};
pub use crate::metrics::RolloutMetrics;
pub use crate::config::{BatchMode, EnvRunnerConfig};
pub use crate::runner::{EnvRunner, EpisodeOf, SampleOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, ArrayD};

    /// Walks right one cell per step and terminates after three steps.
    struct CorridorEnv {
        pos: i32,
        space: Discrete,
    }

    impl Env for CorridorEnv {
        type Obs = i32;
        type Act = u32;
        type ActionSpace = Discrete;

        fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
            self.pos = 0;
            (self.pos, Info::new())
        }

        fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
            self.pos += 1;
            Step::new(self.pos, 1.0, self.pos >= 3, false, Info::new())
        }

        fn action_space(&self) -> &Discrete { &self.space }
    }

    /// Always picks action 1.
    struct ConstModule;

    impl RlModule for ConstModule {
        type Backend = NdarrayBackend;

        fn forward_exploration(&mut self, batch: &ForwardBatch<ArrayD<f32>>) -> Result<ForwardOutput<ArrayD<f32>>> {
            let n = batch.obs.shape()[0];
            Ok(ForwardOutput::new().with("actions", Array1::<f32>::ones(n).into_dyn()))
        }

        fn forward_inference(&mut self, batch: &ForwardBatch<ArrayD<f32>>) -> Result<ForwardOutput<ArrayD<f32>>> {
            self.forward_exploration(batch)
        }

        fn get_state(&self) -> Weights { Weights::new() }

        fn set_state(&mut self, _weights: Weights) -> Result<()> { Ok(()) }
    }

    #[test]
    fn runner_samples_a_corridor() {
        let env = SyncVectorEnv::new(1, || CorridorEnv { pos: 0, space: Discrete::new(2) });
        let config = EnvRunnerConfig::new().with_seed(0);
        let mut runner = EnvRunner::new(config, env, Box::new(DefaultCallbacks), |_, _| Ok(ConstModule)).unwrap();
        runner.assert_healthy().unwrap();

        let episodes = runner.sample(SampleOptions::episodes(1)).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].observations(), &[0, 1, 2, 3]);
        assert_eq!(episodes[0].actions(), &[1, 1, 1]);
        assert!(episodes[0].is_terminated());

        let metrics = runner.get_metrics();
        assert_eq!(metrics, vec![RolloutMetrics { episode_length: 3, episode_reward: 3.0 }]);
    }
}
