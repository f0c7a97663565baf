//! The policy side of the runner.
//!
//! An `RlModule` maps a batch of observations (plus recurrent state) to
//! actions or to action-distribution inputs. The runner owns exactly one
//! module and calls it with the whole vector env batch at once.

pub mod distributions;

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::core::{Result, RunnerError};
use crate::tensor::TensorBackend;

pub use distributions::{ActionDistribution, Categorical};

/// Key under which namespaced weights carry the runner's own module.
pub const DEFAULT_POLICY_ID: &str = "default_policy";

/// Output keys the runner understands. Any other key is recorded as an extra
/// model output on every step.
pub const ACTIONS: &str = "actions";
pub const ACTION_LOGP: &str = "action_logp";
pub const ACTION_DIST_INPUTS: &str = "action_dist_inputs";

/// Named recurrent-state tensors. Rows carry no batch axis; batched maps have
/// the slot index as their leading axis.
pub type StateMap = BTreeMap<String, ArrayD<f32>>;

/// Module parameters by name.
pub type Weights = BTreeMap<String, ArrayD<f32>>;

/// Per-step auxiliary outputs recorded in an episode.
pub type ExtraModelOutputs = BTreeMap<String, ArrayD<f32>>;

/// Tensor type of a module's backend.
pub type TensorOf<M> = <<M as RlModule>::Backend as TensorBackend>::Tensor;

/// Input of one forward pass.
#[derive(Clone, Debug)]
pub struct ForwardBatch<T> {
    pub obs: T,
    pub state_in: BTreeMap<String, T>,
}

/// Output of one forward pass. Every tensor has the batch as leading axis.
#[derive(Clone, Debug)]
pub struct ForwardOutput<T> {
    pub outputs: BTreeMap<String, T>,
    pub state_out: Option<BTreeMap<String, T>>,
}

impl<T> Default for ForwardOutput<T> {
    fn default() -> Self { Self { outputs: BTreeMap::new(), state_out: None } }
}

impl<T> ForwardOutput<T> {
    pub fn new() -> Self { Self::default() }

    pub fn with<K: Into<String>>(mut self, key: K, tensor: T) -> Self {
        self.outputs.insert(key.into(), tensor);
        self
    }

    pub fn with_state_out(mut self, state_out: BTreeMap<String, T>) -> Self {
        self.state_out = Some(state_out);
        self
    }
}

/// Weights as handed to `EnvRunner::set_weights`.
#[derive(Clone, Debug)]
pub enum WeightsPayload {
    /// Weights of this runner's module.
    Module(Weights),
    /// Weights of several policies keyed by policy id.
    PerPolicy(BTreeMap<String, Weights>),
}

impl WeightsPayload {
    /// The weights meant for this runner's module.
    pub fn into_module_weights(self) -> Result<Weights> {
        match self {
            WeightsPayload::Module(w) => Ok(w),
            WeightsPayload::PerPolicy(mut by_id) => by_id.remove(DEFAULT_POLICY_ID).ok_or_else(|| {
                RunnerError::InvalidArgument(format!(
                    "weights for policies {:?} contain no `{DEFAULT_POLICY_ID}` entry",
                    by_id.keys().collect::<Vec<_>>()
                ))
            }),
        }
    }
}

impl From<Weights> for WeightsPayload {
    fn from(w: Weights) -> Self { WeightsPayload::Module(w) }
}

/// A learned policy as seen by the runner.
pub trait RlModule {
    type Backend: TensorBackend;

    /// One state row per key, or `None` for a stateless module.
    fn get_initial_state(&self) -> Option<StateMap> { None }

    fn forward_exploration(
        &mut self,
        batch: &ForwardBatch<<Self::Backend as TensorBackend>::Tensor>,
    ) -> Result<ForwardOutput<<Self::Backend as TensorBackend>::Tensor>>;

    fn forward_inference(
        &mut self,
        batch: &ForwardBatch<<Self::Backend as TensorBackend>::Tensor>,
    ) -> Result<ForwardOutput<<Self::Backend as TensorBackend>::Tensor>>;

    /// Distribution sampled from when exploring and no actions were emitted.
    fn exploration_action_dist(&self, dist_inputs: &ArrayD<f32>) -> Result<Box<dyn ActionDistribution>> {
        let _ = dist_inputs;
        Err(RunnerError::NotSupported("module has no exploration action distribution".into()))
    }

    /// Distribution sampled from in inference mode when no actions were emitted.
    fn inference_action_dist(&self, dist_inputs: &ArrayD<f32>) -> Result<Box<dyn ActionDistribution>> {
        let _ = dist_inputs;
        Err(RunnerError::NotSupported("module has no inference action distribution".into()))
    }

    fn get_state(&self) -> Weights;

    fn set_state(&mut self, weights: Weights) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn weights(v: f32) -> Weights {
        Weights::from([("w".to_string(), arr1(&[v]).into_dyn())])
    }

    #[test]
    fn namespaced_weights_unwrap_default_policy() {
        let payload = WeightsPayload::PerPolicy(BTreeMap::from([
            (DEFAULT_POLICY_ID.to_string(), weights(1.0)),
            ("other".to_string(), weights(2.0)),
        ]));
        assert_eq!(payload.into_module_weights().unwrap(), weights(1.0));
    }

    #[test]
    fn namespaced_weights_without_default_policy_are_rejected() {
        let payload = WeightsPayload::PerPolicy(BTreeMap::from([("other".to_string(), weights(2.0))]));
        assert!(matches!(payload.into_module_weights(), Err(RunnerError::InvalidArgument(_))));
    }

    #[test]
    fn plain_weights_pass_through() {
        assert_eq!(WeightsPayload::from(weights(3.0)).into_module_weights().unwrap(), weights(3.0));
    }
}
