// Episode-count sampling.

use tracing::{debug, trace};

use super::{EnvRunner, EpisodeOf, replicate_state, reset_state_row};
use crate::core::{RenderFrame, Result, RunnerError};
use crate::episode::{EnvStep, SingleAgentEpisode};
use crate::module::RlModule;
use crate::tensor::{FromArray, ToArray};
use crate::vector::{VectorEnv, VectorStep};

impl<V, M> EnvRunner<V, M>
where
    V: VectorEnv,
    V::Obs: ToArray,
    V::Act: FromArray,
    M: RlModule,
{
    /// Reset every slot and step until `num_episodes` episodes have finished.
    ///
    /// Episodes still running when the target is reached are dropped. The
    /// next timestep sample starts from a fresh reset.
    pub(super) fn sample_episodes(
        &mut self,
        num_episodes: usize,
        explore: bool,
        random_actions: bool,
        with_render_data: bool,
    ) -> Result<Vec<EpisodeOf<V>>> {
        if num_episodes == 0 {
            return Err(RunnerError::InvalidArgument("num_episodes must be positive".into()));
        }
        let n = self.num_envs;
        self.needs_initial_reset = true;
        // Slot episodes of an earlier timestep sample can never continue.
        for abandoned in self.episodes.drain(..) {
            self.metrics.discard_ongoing(abandoned.id());
        }
        self.states = vec![None; n];

        let mut episodes: Vec<EpisodeOf<V>> = Vec::with_capacity(n);
        for i in 0..n {
            episodes.push(SingleAgentEpisode::new());
            self.callbacks.on_episode_created(&episodes[i], i);
        }

        let (mut obs, infos) = self.reset_env()?;
        let mut frames = self.render_frames(with_render_data)?;
        for (i, info) in infos.into_iter().enumerate() {
            episodes[i].add_env_reset(obs[i].clone(), info, frames[i].take());
            self.callbacks.on_episode_start(&episodes[i], i);
        }

        let template = self.initial_state();
        let mut states = replicate_state(&template, n)?;
        let mut done_episodes: Vec<EpisodeOf<V>> = Vec::new();
        let mut ts = 0;

        'sampling: while done_episodes.len() < num_episodes {
            let policy = self.compute_actions(&obs, &states, explore, random_actions)?;
            if let Some(state_out) = policy.state_out {
                states = state_out;
            }
            let step = self.step_env(policy.actions.clone())?;
            ts += n;
            let mut frames = self.render_frames(with_render_data)?;

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
                    // The frame already shows the auto-reset state.
                    episodes[i].add_env_step(EnvStep {
                        observation: final_obs,
                        action,
                        reward: rewards[i],
                        info: final_info,
                        terminated: terminated[i],
                        truncated: truncated[i],
                        extra_model_outputs,
                        render_image: None,
                    });
                    self.callbacks.on_episode_step(&episodes[i], i);

                    let finished = std::mem::replace(&mut episodes[i], SingleAgentEpisode::new()).finalize();
                    self.callbacks.on_episode_end(&finished, i);
                    trace!(env_index = i, episode_id = %finished.id(), length = finished.len(), "episode done");
                    done_episodes.push(finished);
                    if done_episodes.len() >= num_episodes {
                        break 'sampling;
                    }

                    reset_state_row(&mut states, &template, i);
                    self.callbacks.on_episode_created(&episodes[i], i);
                    episodes[i].add_env_reset(observations[i].clone(), slot_info.info, frames[i].take());
                    self.callbacks.on_episode_start(&episodes[i], i);
                } else {
                    episodes[i].add_env_step(EnvStep {
                        observation: observations[i].clone(),
                        action,
                        reward: rewards[i],
                        info: slot_info.info,
                        terminated: false,
                        truncated: false,
                        extra_model_outputs,
                        render_image: frames[i].take(),
                    });
                    self.callbacks.on_episode_step(&episodes[i], i);
                }
            }
            obs = observations;
        }

        self.metrics.add_done(&done_episodes);
        let sampled: usize = done_episodes.iter().map(|e| e.len()).sum();
        self.metrics.add_timesteps(sampled);
        debug!(
            episodes = done_episodes.len(),
            timesteps = sampled,
            env_steps = ts,
            "episode sample finished"
        );
        done_episodes.retain(|e| e.t() > 0);
        Ok(done_episodes)
    }

    /// One frame per slot when requested, otherwise `None` everywhere.
    fn render_frames(&mut self, with_render_data: bool) -> Result<Vec<Option<RenderFrame>>> {
        let n = self.num_envs;
        if !with_render_data {
            return Ok(vec![None; n]);
        }
        let frames = self.env_mut()?.render();
        if frames.len() != n {
            return Err(RunnerError::InvalidObservation(format!(
                "render returned {} frames for {n} sub-envs",
                frames.len()
            )));
        }
        Ok(frames)
    }
}
