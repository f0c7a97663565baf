// Lifecycle hooks the runner fires while sampling.
//
// Order per episode instance: created -> start -> step* -> end. `end` only
// fires for episodes that terminated or truncated; chunks handed out by a
// timestep sample never see it.

use crate::episode::SingleAgentEpisode;

/// Observer of runner and episode lifecycle events.
///
/// Every method has a no-op default, so implementors only override what they
/// need. All calls are synchronous and happen on the sampling thread.
pub trait EpisodeCallbacks<O, A> {
    /// Once, after the runner has built its vector env.
    fn on_environment_created(&mut self, num_envs: usize) {
        let _ = num_envs;
    }

    /// A new episode object exists; it has no observation yet.
    fn on_episode_created(&mut self, episode: &SingleAgentEpisode<O, A>, env_index: usize) {
        let _ = (episode, env_index);
    }

    /// The reset observation has been recorded.
    fn on_episode_start(&mut self, episode: &SingleAgentEpisode<O, A>, env_index: usize) {
        let _ = (episode, env_index);
    }

    /// A step (including the terminal one) has been recorded.
    fn on_episode_step(&mut self, episode: &SingleAgentEpisode<O, A>, env_index: usize) {
        let _ = (episode, env_index);
    }

    /// The episode terminated or truncated and has been finalized.
    fn on_episode_end(&mut self, episode: &SingleAgentEpisode<O, A>, env_index: usize) {
        let _ = (episode, env_index);
    }

    /// A `sample` call is about to return `samples`.
    fn on_sample_end(&mut self, samples: &[SingleAgentEpisode<O, A>]) {
        let _ = samples;
    }
}

/// Callbacks that ignore every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCallbacks;

impl<O, A> EpisodeCallbacks<O, A> for DefaultCallbacks {}
