//! The single-agent env runner.
//!
//! `EnvRunner` owns a vector env, an optional `RlModule`, and one live
//! episode plus one recurrent-state row per vector env slot. `sample()`
//! collects either a fixed number of timesteps (cutting episodes at the
//! boundary and resuming them on the next call), a fixed number of complete
//! episodes, or complete episodes until `train_batch_size` is reached.

mod episodes;
mod timesteps;

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, Axis, arr0};
use tracing::{debug, info, warn};

use crate::callbacks::EpisodeCallbacks;
use crate::config::{BatchMode, EnvRunnerConfig};
use crate::core::{Info, Result, RunnerError};
use crate::episode::SingleAgentEpisode;
use crate::metrics::{MetricsLedger, RolloutMetrics};
use crate::module::{
    ACTION_DIST_INPUTS, ACTION_LOGP, ACTIONS, ExtraModelOutputs, ForwardBatch, RlModule, StateMap,
    Weights, WeightsPayload,
};
use crate::tensor::{FromArray, TensorBackend, ToArray, row, stack_observations, stack_rows};
use crate::utils::rng::{RngStream, RunnerSeeds};
use crate::vector::{VectorEnv, VectorStep};

/// Episode type produced by a runner over vector env `V`.
pub type EpisodeOf<V> = SingleAgentEpisode<<V as VectorEnv>::Obs, <V as VectorEnv>::Act>;

/// What one `sample()` call should collect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleOptions {
    pub num_timesteps: Option<usize>,
    pub num_episodes: Option<usize>,
    /// Use the module's exploration forward pass (otherwise inference).
    pub explore: bool,
    /// Ignore the module and sample uniformly from the action space.
    pub random_actions: bool,
    /// Capture a render frame per slot (episode-count sampling only).
    pub with_render_data: bool,
    /// Reset all slots before a timestep sample.
    pub force_reset: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            num_timesteps: None,
            num_episodes: None,
            explore: true,
            random_actions: false,
            with_render_data: false,
            force_reset: false,
        }
    }
}

impl SampleOptions {
    pub fn timesteps(n: usize) -> Self {
        Self { num_timesteps: Some(n), ..Self::default() }
    }

    pub fn episodes(n: usize) -> Self {
        Self { num_episodes: Some(n), ..Self::default() }
    }

    pub fn with_explore(mut self, explore: bool) -> Self {
        self.explore = explore;
        self
    }

    pub fn with_random_actions(mut self) -> Self {
        self.random_actions = true;
        self
    }

    pub fn with_render_data(mut self) -> Self {
        self.with_render_data = true;
        self
    }

    pub fn with_force_reset(mut self) -> Self {
        self.force_reset = true;
        self
    }
}

/// Actions for every slot plus what the module produced alongside them.
struct PolicyStep<A> {
    actions: Vec<A>,
    extra_model_outputs: Vec<ExtraModelOutputs>,
    state_out: Option<StateMap>,
}

pub struct EnvRunner<V: VectorEnv, M: RlModule> {
    config: EnvRunnerConfig,
    env: Option<V>,
    num_envs: usize,
    module: Option<M>,
    callbacks: Box<dyn EpisodeCallbacks<V::Obs, V::Act>>,
    rng: RngStream,
    env_seed: Option<u64>,
    needs_initial_reset: bool,
    episodes: Vec<EpisodeOf<V>>,
    states: Vec<Option<StateMap>>,
    metrics: MetricsLedger,
    weights_seq_no: u64,
}

impl<V, M> EnvRunner<V, M>
where
    V: VectorEnv,
    V::Obs: ToArray,
    V::Act: FromArray,
    M: RlModule,
{
    /// Build a runner around `env`.
    ///
    /// `build_module` may fail with `RunnerError::NoDefaultModule`, in which
    /// case the runner works without a module and only random actions can be
    /// sampled. Any other error is returned.
    pub fn new<F>(
        config: EnvRunnerConfig,
        env: V,
        mut callbacks: Box<dyn EpisodeCallbacks<V::Obs, V::Act>>,
        build_module: F,
    ) -> Result<Self>
    where
        F: FnOnce(&EnvRunnerConfig, &V) -> Result<M>,
    {
        let num_envs = env.num_envs();
        if num_envs == 0 || num_envs != config.num_envs_per_worker {
            return Err(RunnerError::InvalidArgument(format!(
                "vector env has {num_envs} sub-envs, config expects {}",
                config.num_envs_per_worker
            )));
        }
        callbacks.on_environment_created(num_envs);

        let module = match build_module(&config, &env) {
            Ok(module) => Some(module),
            Err(RunnerError::NoDefaultModule(reason)) => {
                warn!(worker_index = config.worker_index, %reason, "no RLModule built; only random actions can be sampled");
                None
            }
            Err(e) => return Err(e),
        };

        let RunnerSeeds { env_seed, rng } = RunnerSeeds::derive(config.seed, config.worker_index);
        info!(worker_index = config.worker_index, num_envs, has_module = module.is_some(), "env runner created");

        Ok(Self {
            config,
            env: Some(env),
            num_envs,
            module,
            callbacks,
            rng,
            env_seed,
            needs_initial_reset: true,
            episodes: Vec::new(),
            states: vec![None; num_envs],
            metrics: MetricsLedger::new(),
            weights_seq_no: 0,
        })
    }

    /// Run the vector env and return the collected episodes.
    ///
    /// At most one of `num_timesteps` / `num_episodes` may be set. With
    /// neither, the config's `batch_mode` decides.
    pub fn sample(&mut self, options: SampleOptions) -> Result<Vec<EpisodeOf<V>>> {
        let SampleOptions { num_timesteps, num_episodes, explore, random_actions, with_render_data, force_reset } =
            options;
        if num_timesteps.is_some() && num_episodes.is_some() {
            return Err(RunnerError::InvalidArgument(
                "num_timesteps and num_episodes are mutually exclusive".into(),
            ));
        }
        let num_timesteps = match (num_timesteps, num_episodes) {
            (None, None) if self.config.batch_mode == BatchMode::TruncateEpisodes => {
                Some(self.config.timesteps_per_sample())
            }
            (t, _) => t,
        };

        let samples = if let Some(t) = num_timesteps {
            self.sample_timesteps(t, explore, random_actions, force_reset)?
        } else if let Some(m) = num_episodes {
            self.sample_episodes(m, explore, random_actions, with_render_data)?
        } else {
            let mut total = 0;
            let mut samples = Vec::new();
            while total < self.config.train_batch_size {
                let episodes = self.sample_episodes(self.num_envs, explore, random_actions, with_render_data)?;
                total += episodes.iter().map(|e| e.len()).sum::<usize>();
                samples.extend(episodes);
            }
            samples
        };

        self.callbacks.on_sample_end(&samples);
        Ok(samples)
    }

    pub fn get_metrics(&mut self) -> Vec<RolloutMetrics> {
        self.metrics.drain()
    }

    /// Timesteps sampled since the last `get_metrics()`.
    pub fn timesteps_since_last_metrics(&self) -> usize {
        self.metrics.timesteps_since_last_metrics()
    }

    /// Load new module weights. Call between sampling calls only.
    pub fn set_weights(&mut self, weights: WeightsPayload, weights_seq_no: u64) -> Result<()> {
        let module = self.module.as_mut().ok_or_else(no_module)?;
        module.set_state(weights.into_module_weights()?)?;
        self.weights_seq_no = weights_seq_no;
        debug!(weights_seq_no, "module weights updated");
        Ok(())
    }

    pub fn get_weights(&self) -> Result<Weights> {
        Ok(self.module.as_ref().ok_or_else(no_module)?.get_state())
    }

    /// Sequence number of the last `set_weights` call.
    pub fn weights_seq_no(&self) -> u64 { self.weights_seq_no }

    /// Fails if the runner has lost its env (after `stop`) or has no module.
    pub fn assert_healthy(&self) -> Result<()> {
        if self.env.is_none() {
            return Err(RunnerError::Unhealthy("vector env is closed".into()));
        }
        if self.module.is_none() {
            return Err(RunnerError::Unhealthy("no RLModule".into()));
        }
        Ok(())
    }

    /// Close the vector env. Sampling afterwards fails with `NotReady`.
    pub fn stop(&mut self) {
        if let Some(mut env) = self.env.take() {
            env.close();
            info!(worker_index = self.config.worker_index, "env runner stopped");
        }
    }

    pub fn config(&self) -> &EnvRunnerConfig { &self.config }
    pub fn num_envs(&self) -> usize { self.num_envs }
    pub fn module(&self) -> Option<&M> { self.module.as_ref() }
    pub fn env(&self) -> Option<&V> { self.env.as_ref() }

    /// The live (unreturned) episode of every slot, continued by the next
    /// timestep sample. Empty before the first timestep sample and after an
    /// episode-count sample, which abandons them.
    pub fn episodes(&self) -> &[EpisodeOf<V>] { &self.episodes }

    fn env_mut(&mut self) -> Result<&mut V> {
        self.env.as_mut().ok_or_else(env_closed)
    }

    /// Step every slot and check that each slot got a result.
    fn step_env(&mut self, actions: Vec<V::Act>) -> Result<VectorStep<V::Obs>> {
        let n = self.num_envs;
        let step = self.env_mut()?.step(actions)?;
        step.check_len(n)?;
        Ok(step)
    }

    /// Reset every slot, consuming the configured seed on first use.
    fn reset_env(&mut self) -> Result<(Vec<V::Obs>, Vec<Info>)> {
        let seed = self.env_seed.take();
        let n = self.num_envs;
        debug!(num_envs = n, ?seed, "resetting all sub-environments");
        let (obs, infos) = self.env_mut()?.reset(seed)?;
        if obs.len() != n || infos.len() != n {
            return Err(RunnerError::InvalidObservation(format!(
                "reset returned {} observations and {} infos for {n} sub-envs",
                obs.len(),
                infos.len()
            )));
        }
        Ok((obs, infos))
    }

    /// The module's initial state rows, or an empty map when stateless.
    fn initial_state(&self) -> StateMap {
        self.module.as_ref().and_then(|m| m.get_initial_state()).unwrap_or_default()
    }

    fn compute_actions(
        &mut self,
        obs: &[V::Obs],
        states: &StateMap,
        explore: bool,
        random_actions: bool,
    ) -> Result<PolicyStep<V::Act>> {
        let n = self.num_envs;
        if random_actions {
            let actions = self.env_mut()?.sample_actions();
            if actions.len() != n {
                return Err(RunnerError::InvalidAction(format!(
                    "action space sampling returned {} actions for {n} sub-envs",
                    actions.len()
                )));
            }
            let extra_model_outputs = (0..n)
                .map(|_| ExtraModelOutputs::from([(ACTION_LOGP.to_string(), arr0(0.0f32).into_dyn())]))
                .collect();
            return Ok(PolicyStep { actions, extra_model_outputs, state_out: None });
        }

        let module = self.module.as_mut().ok_or_else(no_module)?;
        let batch = ForwardBatch {
            obs: M::Backend::to_tensor(&stack_observations(obs)?)?,
            state_in: states
                .iter()
                .map(|(k, v)| Ok((k.clone(), M::Backend::to_tensor(v)?)))
                .collect::<Result<BTreeMap<_, _>>>()?,
        };
        let fwd = if explore { module.forward_exploration(&batch)? } else { module.forward_inference(&batch)? };

        let mut outputs = fwd
            .outputs
            .iter()
            .map(|(k, t)| Ok((k.clone(), M::Backend::from_tensor(t)?)))
            .collect::<Result<BTreeMap<String, ArrayD<f32>>>>()?;
        let state_out = fwd
            .state_out
            .map(|s| s.iter().map(|(k, t)| Ok((k.clone(), M::Backend::from_tensor(t)?))).collect::<Result<StateMap>>())
            .transpose()?
            .map(|s| conform_state(s, states))
            .transpose()?;

        let (actions, action_logp) = match outputs.remove(ACTIONS) {
            Some(actions) => {
                let logp = match (outputs.get(ACTION_LOGP), outputs.get(ACTION_DIST_INPUTS)) {
                    (Some(logp), _) => logp.clone(),
                    (None, Some(inputs)) => {
                        let dist = if explore {
                            module.exploration_action_dist(inputs)?
                        } else {
                            module.inference_action_dist(inputs)?
                        };
                        dist.logp(&actions)?
                    }
                    (None, None) => Array1::<f32>::zeros(n).into_dyn(),
                };
                (actions, logp)
            }
            None => {
                let inputs = outputs.get(ACTION_DIST_INPUTS).ok_or_else(|| {
                    RunnerError::InvalidAction(format!(
                        "module output has neither `{ACTIONS}` nor `{ACTION_DIST_INPUTS}`"
                    ))
                })?;
                let dist = if explore {
                    module.exploration_action_dist(inputs)?
                } else {
                    module.inference_action_dist(inputs)?
                };
                let actions = dist.sample(&mut self.rng)?;
                let logp = dist.logp(&actions)?;
                (actions, logp)
            }
        };

        let mut slot_actions = Vec::with_capacity(n);
        let mut extra_model_outputs = Vec::with_capacity(n);
        for i in 0..n {
            slot_actions.push(V::Act::from_array(row(&actions, i)?.view())?);
            let mut extra = outputs
                .iter()
                .map(|(k, v)| Ok((k.clone(), row(v, i)?)))
                .collect::<Result<ExtraModelOutputs>>()?;
            extra.insert(ACTION_LOGP.to_string(), row(&action_logp, i)?);
            extra_model_outputs.push(extra);
        }
        Ok(PolicyStep { actions: slot_actions, extra_model_outputs, state_out })
    }
}

fn no_module() -> RunnerError {
    RunnerError::NotReady("no RLModule; only random actions can be sampled".into())
}

fn env_closed() -> RunnerError {
    RunnerError::NotReady("vector env is closed".into())
}

/// Give each returned state tensor the shape of the one fed in.
///
/// Backends that cannot carry rank (a column matrix is both `[n]` and
/// `[n, 1]`) would otherwise change the row shape between steps.
fn conform_state(state_out: StateMap, state_in: &StateMap) -> Result<StateMap> {
    state_out
        .into_iter()
        .map(|(k, batch)| {
            let batch = match state_in.get(&k) {
                Some(prev) if prev.shape() != batch.shape() && prev.len() == batch.len() => {
                    batch.into_shape(prev.shape().to_vec())?
                }
                _ => batch,
            };
            Ok((k, batch))
        })
        .collect()
}

/// `n` stacked copies of each initial state row.
fn replicate_state(template: &StateMap, n: usize) -> Result<StateMap> {
    template
        .iter()
        .map(|(k, init)| Ok((k.clone(), stack_rows(&vec![init.clone(); n])?)))
        .collect()
}

/// Row `index` of each batched state tensor.
fn slot_state(states: &StateMap, index: usize) -> Result<StateMap> {
    states.iter().map(|(k, batch)| Ok((k.clone(), row(batch, index)?))).collect()
}

/// Overwrite row `index` of each batched state tensor with its initial value.
fn reset_state_row(states: &mut StateMap, template: &StateMap, index: usize) {
    for (k, init) in template {
        if let Some(batch) = states.get_mut(k) {
            batch.index_axis_mut(Axis(0), index).assign(init);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, arr1};

    #[test]
    fn returned_state_takes_the_shape_fed_in() {
        let state_in = StateMap::from([("h".to_string(), Array2::<f32>::zeros((3, 1)).into_dyn())]);
        let state_out = StateMap::from([("h".to_string(), arr1(&[1.0f32, 2.0, 3.0]).into_dyn())]);
        let conformed = conform_state(state_out, &state_in).unwrap();
        assert_eq!(conformed["h"].shape(), &[3, 1]);
        assert_eq!(conformed["h"].iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn state_of_another_size_is_left_alone() {
        let state_in = StateMap::from([("h".to_string(), Array2::<f32>::zeros((2, 2)).into_dyn())]);
        let state_out = StateMap::from([
            ("h".to_string(), arr1(&[1.0f32, 2.0]).into_dyn()),
            ("c".to_string(), arr1(&[0.0f32]).into_dyn()),
        ]);
        let conformed = conform_state(state_out, &state_in).unwrap();
        assert_eq!(conformed["h"].shape(), &[2]);
        assert_eq!(conformed["c"].shape(), &[1]);
    }

    #[test]
    fn replicated_rows_reset_one_slot_at_a_time() {
        let template = StateMap::from([("h".to_string(), arr1(&[0.0f32, 0.0]).into_dyn())]);
        let mut states = replicate_state(&template, 3).unwrap();
        assert_eq!(states["h"].shape(), &[3, 2]);
        states.get_mut("h").unwrap().fill(5.0);
        reset_state_row(&mut states, &template, 1);
        assert_eq!(slot_state(&states, 1).unwrap()["h"].iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0]);
        assert_eq!(slot_state(&states, 2).unwrap()["h"].iter().copied().collect::<Vec<_>>(), vec![5.0, 5.0]);
    }
}
