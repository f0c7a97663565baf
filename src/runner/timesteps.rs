// Fixed-timestep sampling.

use tracing::{debug, trace};

use super::{EnvRunner, EpisodeOf, replicate_state, reset_state_row, slot_state};
use crate::core::{Result, RunnerError};
use crate::episode::{EnvStep, SingleAgentEpisode};
use crate::module::{RlModule, StateMap};
use crate::tensor::{FromArray, ToArray, stack_rows};
use crate::vector::{VectorEnv, VectorStep};

impl<V, M> EnvRunner<V, M>
where
    V: VectorEnv,
    V::Obs: ToArray,
    V::Act: FromArray,
    M: RlModule,
{
    /// Step all slots until at least `num_timesteps` env steps are taken.
    ///
    /// Returns the episodes that ended during the call, followed by a chunk
    /// of every still-running episode. The running episodes continue from
    /// where they were cut on the next call unless a reset is forced.
    pub(super) fn sample_timesteps(
        &mut self,
        num_timesteps: usize,
        explore: bool,
        random_actions: bool,
        force_reset: bool,
    ) -> Result<Vec<EpisodeOf<V>>> {
        if num_timesteps == 0 {
            return Err(RunnerError::InvalidArgument("num_timesteps must be positive".into()));
        }
        let n = self.num_envs;
        let template = self.initial_state();
        let mut done_episodes = Vec::new();

        let (mut obs, mut states) = if force_reset || self.needs_initial_reset || self.episodes.is_empty() {
            self.start_all_episodes(&template)?
        } else {
            self.resume_episodes(&template)?
        };

        let mut ts = 0;
        while ts < num_timesteps {
            let policy = self.compute_actions(&obs, &states, explore, random_actions)?;
            if let Some(state_out) = policy.state_out {
                states = state_out;
            }
            let step = self.step_env(policy.actions.clone())?;
            ts += n;

            let VectorStep { observations, rewards, terminated, truncated, infos } = step;
            let slots = infos.into_iter().zip(policy.actions).zip(policy.extra_model_outputs).enumerate();
            for (i, ((slot_info, action), extra_model_outputs)) in slots {
                if terminated[i] || truncated[i] {
                    let (final_obs, final_info) = match (slot_info.final_observation, slot_info.final_info) {
                        (Some(o), Some(info)) => (o, info),
                        _ => {
                            return Err(RunnerError::InvalidObservation(format!(
                                "sub-env {i} finished without a final observation"
                            )));
                        }
                    };
                    self.episodes[i].add_env_step(EnvStep {
                        observation: final_obs,
                        action,
                        reward: rewards[i],
                        info: final_info,
                        terminated: terminated[i],
                        truncated: truncated[i],
                        extra_model_outputs,
                        render_image: None,
                    });
                    self.callbacks.on_episode_step(&self.episodes[i], i);

                    reset_state_row(&mut states, &template, i);
                    self.states[i] = None;

                    let finished = std::mem::replace(&mut self.episodes[i], SingleAgentEpisode::new()).finalize();
                    self.callbacks.on_episode_end(&finished, i);
                    trace!(env_index = i, episode_id = %finished.id(), length = finished.len(), "episode done");
                    done_episodes.push(finished);

                    self.callbacks.on_episode_created(&self.episodes[i], i);
                    self.episodes[i].add_env_reset(observations[i].clone(), slot_info.info, None);
                    self.callbacks.on_episode_start(&self.episodes[i], i);
                } else {
                    self.episodes[i].add_env_step(EnvStep {
                        observation: observations[i].clone(),
                        action,
                        reward: rewards[i],
                        info: slot_info.info,
                        terminated: false,
                        truncated: false,
                        extra_model_outputs,
                        render_image: None,
                    });
                    self.callbacks.on_episode_step(&self.episodes[i], i);
                    self.states[i] = Some(slot_state(&states, i)?);
                }
            }
            obs = observations;
        }

        self.metrics.add_done(&done_episodes);

        // Hand out a copy of every running episode and keep sampling into a
        // fresh chunk, so callers never share an episode with the runner.
        let mut ongoing = Vec::with_capacity(n);
        for episode in self.episodes.iter_mut() {
            let continuation = episode.cut();
            let chunk = std::mem::replace(episode, continuation).finalize();
            if chunk.t() > 0 {
                self.metrics.add_ongoing(&chunk);
                ongoing.push(chunk);
            }
        }
        self.metrics.add_timesteps(ts);

        debug!(
            timesteps = ts,
            done = done_episodes.len(),
            ongoing = ongoing.len(),
            "timestep sample finished"
        );
        done_episodes.extend(ongoing);
        Ok(done_episodes)
    }

    /// Reset the env and open a new episode in every slot.
    fn start_all_episodes(&mut self, template: &StateMap) -> Result<(Vec<V::Obs>, StateMap)> {
        let n = self.num_envs;
        // Running episodes are abandoned; their earlier chunks can never complete.
        for episode in &self.episodes {
            self.metrics.discard_ongoing(episode.id());
        }

        self.episodes = Vec::with_capacity(n);
        for i in 0..n {
            self.episodes.push(SingleAgentEpisode::new());
            self.callbacks.on_episode_created(&self.episodes[i], i);
        }

        let (obs, infos) = self.reset_env()?;
        for (i, info) in infos.into_iter().enumerate() {
            self.episodes[i].add_env_reset(obs[i].clone(), info, None);
            self.callbacks.on_episode_start(&self.episodes[i], i);
        }
        self.needs_initial_reset = false;

        let states = replicate_state(template, n)?;
        self.states = (0..n).map(|i| slot_state(&states, i).map(Some)).collect::<Result<Vec<_>>>()?;
        Ok((obs, states))
    }

    /// Rebuild the batched observation and state from the live episodes.
    fn resume_episodes(&self, template: &StateMap) -> Result<(Vec<V::Obs>, StateMap)> {
        let obs = self
            .episodes
            .iter()
            .map(|e| {
                e.last_observation()
                    .cloned()
                    .ok_or_else(|| RunnerError::NotReady(format!("episode {} has no observation", e.id())))
            })
            .collect::<Result<Vec<_>>>()?;

        // A slot that just restarted has no stored state and uses the initial one.
        let states = template
            .iter()
            .map(|(k, init)| {
                let rows: Vec<_> = self
                    .states
                    .iter()
                    .map(|s| s.as_ref().and_then(|m| m.get(k)).unwrap_or(init).clone())
                    .collect();
                Ok((k.clone(), stack_rows(&rows)?))
            })
            .collect::<Result<StateMap>>()?;
        Ok((obs, states))
    }
}
