//! Episode records.
//!
//! A `SingleAgentEpisode` logs one trajectory of one vector env slot. It is
//! seeded by a reset, grows by one entry per env step, and ends in one of two
//! ways:
//! - `finalize`: the episode is immutable from then on;
//! - `cut`: the sampling call ended mid-episode. `cut` hands back a fresh
//!   chunk with the same id that continues from the last observation, while
//!   the original is finalized and returned to the caller.

use uuid::Uuid;

use crate::core::{Info, RenderFrame};
use crate::module::ExtraModelOutputs;

pub type EpisodeId = Uuid;

/// Everything recorded for one env step of one slot.
#[derive(Clone, Debug)]
pub struct EnvStep<O, A> {
    pub observation: O,
    pub action: A,
    pub reward: f32,
    pub info: Info,
    pub terminated: bool,
    pub truncated: bool,
    pub extra_model_outputs: ExtraModelOutputs,
    pub render_image: Option<RenderFrame>,
}

#[derive(Clone, Debug)]
pub struct SingleAgentEpisode<O, A> {
    id: EpisodeId,
    observations: Vec<O>,
    infos: Vec<Info>,
    actions: Vec<A>,
    rewards: Vec<f32>,
    extra_model_outputs: Vec<ExtraModelOutputs>,
    render_images: Vec<RenderFrame>,
    terminated: bool,
    truncated: bool,
    t_started: usize,
    t: usize,
    is_finalized: bool,
}

impl<O, A> Default for SingleAgentEpisode<O, A> {
    fn default() -> Self { Self::new() }
}

impl<O, A> SingleAgentEpisode<O, A> {
    /// An empty episode with a fresh id.
    pub fn new() -> Self { Self::with_id(Uuid::new_v4(), 0) }

    fn with_id(id: EpisodeId, t_started: usize) -> Self {
        Self {
            id,
            observations: Vec::new(),
            infos: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            extra_model_outputs: Vec::new(),
            render_images: Vec::new(),
            terminated: false,
            truncated: false,
            t_started,
            t: 0,
            is_finalized: false,
        }
    }

    /// Record the observation and info returned by an env reset.
    pub fn add_env_reset(&mut self, observation: O, info: Info, render_image: Option<RenderFrame>) {
        assert!(!self.is_finalized, "cannot reset a finalized episode");
        assert!(self.observations.is_empty(), "episode {} already has a reset observation", self.id);
        self.observations.push(observation);
        self.infos.push(info);
        self.render_images.extend(render_image);
    }

    /// Record one env step.
    pub fn add_env_step(&mut self, step: EnvStep<O, A>) {
        assert!(!self.is_finalized, "cannot add a step to finalized episode {}", self.id);
        assert!(!self.is_done(), "cannot add a step to done episode {}", self.id);
        assert!(!self.observations.is_empty(), "episode {} was never reset", self.id);
        self.observations.push(step.observation);
        self.infos.push(step.info);
        self.actions.push(step.action);
        self.rewards.push(step.reward);
        self.extra_model_outputs.push(step.extra_model_outputs);
        self.render_images.extend(step.render_image);
        self.terminated = step.terminated;
        self.truncated = step.truncated;
        self.t += 1;
    }

    /// Mark the episode immutable and hand it back.
    pub fn finalize(mut self) -> Self {
        self.is_finalized = true;
        self
    }

    /// Append the next chunk of this same episode.
    pub fn concat_episode(&mut self, other: SingleAgentEpisode<O, A>) {
        assert_eq!(self.id, other.id, "can only concatenate chunks of the same episode");
        assert!(!self.is_done(), "episode {} is already done", self.id);
        assert_eq!(
            other.t_started,
            self.t_started + self.t,
            "chunk does not start where episode {} ends",
            self.id
        );
        self.observations.extend(other.observations.into_iter().skip(1));
        self.infos.extend(other.infos.into_iter().skip(1));
        self.actions.extend(other.actions);
        self.rewards.extend(other.rewards);
        self.extra_model_outputs.extend(other.extra_model_outputs);
        self.render_images.extend(other.render_images);
        self.terminated = other.terminated;
        self.truncated = other.truncated;
        self.t += other.t;
    }

    pub fn id(&self) -> EpisodeId { self.id }

    /// Steps recorded in this chunk.
    pub fn t(&self) -> usize { self.t }

    /// Global step index at which this chunk begins.
    pub fn t_started(&self) -> usize { self.t_started }

    pub fn len(&self) -> usize { self.t }

    pub fn is_empty(&self) -> bool { self.t == 0 }

    pub fn is_terminated(&self) -> bool { self.terminated }

    pub fn is_truncated(&self) -> bool { self.truncated }

    pub fn is_done(&self) -> bool { self.terminated || self.truncated }

    pub fn is_finalized(&self) -> bool { self.is_finalized }

    /// Undiscounted sum of rewards in this chunk.
    pub fn get_return(&self) -> f64 {
        self.rewards.iter().map(|&r| r as f64).sum()
    }

    pub fn observations(&self) -> &[O] { &self.observations }
    pub fn last_observation(&self) -> Option<&O> { self.observations.last() }
    pub fn infos(&self) -> &[Info] { &self.infos }
    pub fn actions(&self) -> &[A] { &self.actions }
    pub fn rewards(&self) -> &[f32] { &self.rewards }
    pub fn extra_model_outputs(&self) -> &[ExtraModelOutputs] { &self.extra_model_outputs }
    pub fn render_images(&self) -> &[RenderFrame] { &self.render_images }
}

impl<O: Clone, A> SingleAgentEpisode<O, A> {
    /// Start the next chunk of this episode.
    ///
    /// The returned chunk has the same id and begins with this chunk's last
    /// observation and info.
    pub fn cut(&self) -> Self {
        assert!(!self.is_finalized, "cannot cut finalized episode {}", self.id);
        assert!(!self.is_done(), "cannot cut done episode {}", self.id);
        let mut next = Self::with_id(self.id, self.t_started + self.t);
        next.observations.extend(self.observations.last().cloned());
        next.infos.extend(self.infos.last().cloned());
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(obs: i32, reward: f32, done: bool) -> EnvStep<i32, u32> {
        EnvStep {
            observation: obs,
            action: 1,
            reward,
            info: Info::new(),
            terminated: done,
            truncated: false,
            extra_model_outputs: ExtraModelOutputs::new(),
            render_image: None,
        }
    }

    fn started() -> SingleAgentEpisode<i32, u32> {
        let mut e = SingleAgentEpisode::new();
        e.add_env_reset(0, Info::new(), None);
        e
    }

    #[test]
    fn fresh_episode_has_one_observation_and_no_steps() {
        let e = started();
        assert_eq!(e.t(), 0);
        assert!(e.is_empty());
        assert_eq!(e.observations().len(), 1);
        assert_eq!(e.infos().len(), 1);
    }

    #[test]
    fn steps_keep_observations_one_ahead() {
        let mut e = started();
        e.add_env_step(step(1, 1.0, false));
        e.add_env_step(step(2, 0.5, true));
        assert_eq!(e.len(), 2);
        assert_eq!(e.observations().len(), e.actions().len() + 1);
        assert_eq!(e.rewards().len(), 2);
        assert_eq!(e.extra_model_outputs().len(), 2);
        assert!(e.is_done());
        assert_eq!(e.get_return(), 1.5);
    }

    #[test]
    fn cut_continues_from_last_observation() {
        let mut e = started();
        e.add_env_step(step(1, 1.0, false));
        e.add_env_step(step(2, 1.0, false));
        let next = e.cut();
        let chunk = e.finalize();
        assert!(chunk.is_finalized());
        assert_eq!(next.id(), chunk.id());
        assert_eq!(next.observations(), &[2]);
        assert_eq!(next.t(), 0);
        assert_eq!(next.t_started(), 2);
        assert!(!next.is_finalized());
    }

    #[test]
    fn concatenated_chunks_equal_the_uncut_episode() {
        let mut whole = started();
        let mut first = whole.clone();
        for i in 1..=3 {
            whole.add_env_step(step(i, i as f32, i == 3));
        }
        first.add_env_step(step(1, 1.0, false));
        let mut second = first.cut();
        second.add_env_step(step(2, 2.0, false));
        second.add_env_step(step(3, 3.0, true));

        first.concat_episode(second);
        assert_eq!(first.observations(), whole.observations());
        assert_eq!(first.rewards(), whole.rewards());
        assert_eq!(first.len(), whole.len());
        assert!(first.is_terminated());
    }

    #[test]
    #[should_panic(expected = "finalized")]
    fn finalized_episode_rejects_steps() {
        let mut e = started().finalize();
        e.add_env_step(step(1, 1.0, false));
    }

    #[test]
    #[should_panic(expected = "does not start")]
    fn concat_rejects_gaps() {
        let mut e = started();
        e.add_env_step(step(1, 1.0, false));
        let mut later = e.cut();
        later.add_env_step(step(2, 1.0, false));
        let gap = later.cut();
        e.concat_episode(gap);
    }

    #[test]
    fn every_episode_gets_a_distinct_id() {
        let a: SingleAgentEpisode<i32, u32> = SingleAgentEpisode::new();
        let b: SingleAgentEpisode<i32, u32> = SingleAgentEpisode::new();
        assert_ne!(a.id(), b.id());
    }
}
