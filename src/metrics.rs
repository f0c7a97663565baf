//! Episode metrics that survive across sampling calls.
//!
//! A timestep sample may return an episode in several chunks before it
//! finishes. The ledger sums the length and return of the early chunks by
//! episode id and folds them into the finished episode when metrics are
//! pulled.

use std::collections::HashMap;

use crate::episode::{EpisodeId, SingleAgentEpisode};

/// Length and return of one completed episode.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RolloutMetrics {
    pub episode_length: usize,
    pub episode_reward: f64,
}

/// Length, return and done flag of one episode or chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
struct EpisodeSummary {
    id: EpisodeId,
    len: usize,
    ret: f64,
    done: bool,
}

impl EpisodeSummary {
    fn of<O, A>(episode: &SingleAgentEpisode<O, A>) -> Self {
        Self { id: episode.id(), len: episode.len(), ret: episode.get_return(), done: episode.is_done() }
    }
}

/// Per-episode bookkeeping only; no observations are retained.
#[derive(Debug, Default)]
pub struct MetricsLedger {
    done: Vec<EpisodeSummary>,
    ongoing: HashMap<EpisodeId, (usize, f64)>,
    ts_since_last_metrics: usize,
}

impl MetricsLedger {
    pub fn new() -> Self { Self::default() }

    /// Record episodes that finished during a sampling call.
    pub fn add_done<O, A>(&mut self, episodes: &[SingleAgentEpisode<O, A>]) {
        self.done.extend(episodes.iter().map(EpisodeSummary::of));
    }

    /// Record a chunk of an episode that is still running.
    pub fn add_ongoing<O, A>(&mut self, chunk: &SingleAgentEpisode<O, A>) {
        let (len, ret) = self.ongoing.entry(chunk.id()).or_default();
        *len += chunk.len();
        *ret += chunk.get_return();
    }

    pub fn add_timesteps(&mut self, n: usize) {
        self.ts_since_last_metrics += n;
    }

    pub fn timesteps_since_last_metrics(&self) -> usize { self.ts_since_last_metrics }

    /// Forget chunks of an episode that will never finish.
    pub fn discard_ongoing(&mut self, id: EpisodeId) {
        self.ongoing.remove(&id);
    }

    pub fn num_ongoing(&self) -> usize { self.ongoing.len() }

    pub fn num_done(&self) -> usize { self.done.len() }

    /// One record per episode completed since the last call.
    ///
    /// # Panics
    ///
    /// Panics if an episode recorded as done is neither terminated nor
    /// truncated.
    pub fn drain(&mut self) -> Vec<RolloutMetrics> {
        let mut metrics = Vec::with_capacity(self.done.len());
        for episode in self.done.drain(..) {
            assert!(episode.done, "episode {} recorded as done is not done", episode.id);
            let (earlier_len, earlier_ret) = self.ongoing.remove(&episode.id).unwrap_or_default();
            metrics.push(RolloutMetrics {
                episode_length: episode.len + earlier_len,
                episode_reward: episode.ret + earlier_ret,
            });
        }
        self.ts_since_last_metrics = 0;
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Info;
    use crate::episode::EnvStep;
    use crate::module::ExtraModelOutputs;

    type Ep = SingleAgentEpisode<i32, u32>;

    fn push(e: &mut Ep, reward: f32, done: bool) {
        e.add_env_step(EnvStep {
            observation: 0,
            action: 0,
            reward,
            info: Info::new(),
            terminated: done,
            truncated: false,
            extra_model_outputs: ExtraModelOutputs::new(),
            render_image: None,
        });
    }

    fn started() -> Ep {
        let mut e = Ep::new();
        e.add_env_reset(0, Info::new(), None);
        e
    }

    #[test]
    fn chunks_are_folded_into_the_finished_episode() {
        let mut ledger = MetricsLedger::new();
        let mut e = started();
        push(&mut e, 1.0, false);
        push(&mut e, 1.0, false);
        let mut next = e.cut();
        ledger.add_ongoing(&e.finalize());
        push(&mut next, 2.0, false);
        let mut last = next.cut();
        ledger.add_ongoing(&next.finalize());
        push(&mut last, 3.0, true);
        ledger.add_done(&[last.finalize()]);
        ledger.add_timesteps(4);

        assert_eq!(ledger.num_ongoing(), 1);
        let m = ledger.drain();
        assert_eq!(m, vec![RolloutMetrics { episode_length: 4, episode_reward: 7.0 }]);
        assert_eq!(ledger.num_ongoing(), 0);
        assert_eq!(ledger.timesteps_since_last_metrics(), 0);
        assert!(ledger.drain().is_empty());
    }

    #[test]
    fn unfinished_chunks_stay_until_their_episode_ends() {
        let mut ledger = MetricsLedger::new();
        let mut e = started();
        push(&mut e, 1.0, false);
        ledger.add_ongoing(&e.finalize());
        assert!(ledger.drain().is_empty());
        assert_eq!(ledger.num_ongoing(), 1);
    }

    #[test]
    fn discarded_chunks_are_forgotten() {
        let mut ledger = MetricsLedger::new();
        let mut e = started();
        push(&mut e, 1.0, false);
        let id = e.id();
        ledger.add_ongoing(&e.finalize());
        ledger.discard_ongoing(id);
        assert_eq!(ledger.num_ongoing(), 0);
    }

    #[test]
    #[should_panic(expected = "not done")]
    fn unfinished_episode_in_done_list_is_a_bug() {
        let mut ledger = MetricsLedger::new();
        let mut e = started();
        push(&mut e, 1.0, false);
        ledger.add_done(&[e.finalize()]);
        ledger.drain();
    }
}
