// Vectorized environments.
// `VectorEnv` is the batched contract the runner drives; `SyncVectorEnv` runs
// N copies of an `Env` in the current thread with gymnasium-style auto-reset.

use crate::core::{Env, Info, RenderFrame, Result, RunnerError};
use crate::spaces::Space;
use crate::utils::rng::{RngStream, rng_from_seed};

/// Per-slot info returned by `VectorEnv::step`.
///
/// When a slot's episode ended on this step, the env has already reset it:
/// `info` then belongs to the new episode and the real terminal observation
/// and info are carried in `final_observation` / `final_info`.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotInfo<O> {
    pub info: Info,
    pub final_observation: Option<O>,
    pub final_info: Option<Info>,
}

impl<O> SlotInfo<O> {
    pub fn new(info: Info) -> Self {
        Self { info, final_observation: None, final_info: None }
    }

    pub fn with_final(info: Info, final_observation: O, final_info: Info) -> Self {
        Self { info, final_observation: Some(final_observation), final_info: Some(final_info) }
    }
}

/// Batched result of one vector env step. Every vector has `num_envs` entries.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorStep<O> {
    pub observations: Vec<O>,
    pub rewards: Vec<f32>,
    pub terminated: Vec<bool>,
    pub truncated: Vec<bool>,
    pub infos: Vec<SlotInfo<O>>,
}

impl<O> VectorStep<O> {
    pub fn len(&self) -> usize { self.observations.len() }
    pub fn is_empty(&self) -> bool { self.observations.is_empty() }

    /// Fails unless every per-slot vector has exactly `n` entries.
    pub fn check_len(&self, n: usize) -> Result<()> {
        let lens = [
            self.observations.len(),
            self.rewards.len(),
            self.terminated.len(),
            self.truncated.len(),
            self.infos.len(),
        ];
        if lens.iter().any(|&len| len != n) {
            return Err(RunnerError::InvalidObservation(format!(
                "step returned {lens:?} (observations, rewards, terminated, truncated, infos) for {n} sub-envs"
            )));
        }
        Ok(())
    }
}

/// Batched reset/step/close over N sub-environments.
///
/// `reset` and `step` block until every slot has produced its result. An
/// implementation may fan out to worker processes internally.
pub trait VectorEnv {
    type Obs: Clone;
    type Act: Clone;

    fn num_envs(&self) -> usize;

    /// Reset all slots. If `seed` is provided, slot i gets `seed + i`.
    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<Self::Obs>, Vec<Info>)>;

    /// Step every slot once. Slots that finish are reset in the same call.
    fn step(&mut self, actions: Vec<Self::Act>) -> Result<VectorStep<Self::Obs>>;

    /// One uniformly sampled action per slot.
    fn sample_actions(&mut self) -> Vec<Self::Act>;

    /// One frame per slot; `None` where a slot cannot render.
    fn render(&self) -> Vec<Option<RenderFrame>> { vec![None; self.num_envs()] }

    fn close(&mut self) {}
}

/// Runs N copies of an environment in the current thread.
///
/// - Construct with `SyncVectorEnv::new(n, || MyEnv::default())`
/// - Finished slots are reset automatically inside `step`
pub struct SyncVectorEnv<E: Env> {
    envs: Vec<E>,
    rng: RngStream,
}

impl<E: Env> SyncVectorEnv<E> {
    /// Create N copies using the provided factory closure.
    pub fn new<F>(n: usize, mut factory: F) -> Self
    where
        F: FnMut() -> E,
    {
        assert!(n > 0, "SyncVectorEnv requires at least one env");
        let envs = (0..n).map(|_| factory()).collect();
        Self { envs, rng: rng_from_seed(0) }
    }

    /// Reseed the stream `sample_actions` draws from.
    pub fn seed_action_space(&mut self, seed: u64) {
        self.rng = rng_from_seed(seed);
    }

    pub fn envs(&self) -> &[E] { &self.envs }
    pub fn envs_mut(&mut self) -> &mut [E] { &mut self.envs }
}

impl<E> VectorEnv for SyncVectorEnv<E>
where
    E: Env,
    E::Obs: Clone,
    E::Act: Clone,
{
    type Obs = E::Obs;
    type Act = E::Act;

    fn num_envs(&self) -> usize { self.envs.len() }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<E::Obs>, Vec<Info>)> {
        Ok(self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(i, e)| e.reset(seed.map(|s| s.wrapping_add(i as u64))))
            .unzip())
    }

    fn step(&mut self, actions: Vec<E::Act>) -> Result<VectorStep<E::Obs>> {
        if actions.len() != self.envs.len() {
            return Err(RunnerError::InvalidAction(format!(
                "got {} actions for {} envs",
                actions.len(),
                self.envs.len()
            )));
        }
        let n = self.envs.len();
        let mut out = VectorStep {
            observations: Vec::with_capacity(n),
            rewards: Vec::with_capacity(n),
            terminated: Vec::with_capacity(n),
            truncated: Vec::with_capacity(n),
            infos: Vec::with_capacity(n),
        };
        for (env, action) in self.envs.iter_mut().zip(actions) {
            let step = env.step(action);
            out.rewards.push(step.reward);
            out.terminated.push(step.terminated);
            out.truncated.push(step.truncated);
            if step.is_done() {
                let (obs, info) = env.reset(None);
                out.observations.push(obs);
                out.infos.push(SlotInfo::with_final(info, step.observation, step.info));
            } else {
                out.observations.push(step.observation);
                out.infos.push(SlotInfo::new(step.info));
            }
        }
        Ok(out)
    }

    fn sample_actions(&mut self) -> Vec<E::Act> {
        let rng = &mut self.rng;
        self.envs.iter().map(|e| e.action_space().sample(&mut *rng)).collect()
    }

    fn render(&self) -> Vec<Option<RenderFrame>> {
        self.envs.iter().map(|e| e.render()).collect()
    }

    fn close(&mut self) {
        for e in &mut self.envs { e.close(); }
    }
}
