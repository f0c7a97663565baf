// Action distributions built from module outputs.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix2};
use rand::RngCore;
use rand::distributions::{Distribution, WeightedIndex};

use crate::core::{Result, RunnerError};

/// A batched action distribution: one independent distribution per slot.
pub trait ActionDistribution {
    /// One action per batch row.
    fn sample(&self, rng: &mut dyn RngCore) -> Result<ArrayD<f32>>;

    /// Log-probability of `actions` (one per batch row).
    fn logp(&self, actions: &ArrayD<f32>) -> Result<ArrayD<f32>>;
}

/// Categorical over `n` discrete actions, parameterized by logits of shape
/// `(batch, n)`.
#[derive(Clone, Debug)]
pub struct Categorical {
    log_probs: Array2<f32>,
    greedy: bool,
}

impl Categorical {
    pub fn from_logits(logits: &ArrayD<f32>) -> Result<Self> {
        let logits = logits.clone().into_dimensionality::<Ix2>()?;
        if logits.len_of(Axis(1)) == 0 {
            return Err(RunnerError::InvalidArgument("categorical needs at least one logit".into()));
        }
        let mut log_probs = logits;
        for mut row in log_probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let log_sum = row.mapv(|x| (x - max).exp()).sum().ln() + max;
            row.mapv_inplace(|x| x - log_sum);
        }
        Ok(Self { log_probs, greedy: false })
    }

    /// Always pick the most likely action (inference mode).
    pub fn greedy(mut self) -> Self {
        self.greedy = true;
        self
    }

    pub fn num_actions(&self) -> usize { self.log_probs.len_of(Axis(1)) }

    fn argmax(row: ndarray::ArrayView1<'_, f32>) -> usize {
        row.iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
            .0
    }
}

impl ActionDistribution for Categorical {
    fn sample(&self, rng: &mut dyn RngCore) -> Result<ArrayD<f32>> {
        let mut actions = Vec::with_capacity(self.log_probs.nrows());
        for row in self.log_probs.rows() {
            let a = if self.greedy {
                Self::argmax(row)
            } else {
                WeightedIndex::new(row.iter().map(|lp| lp.exp()))
                    .map_err(|e| RunnerError::InvalidArgument(format!("bad categorical weights: {e}")))?
                    .sample(rng)
            };
            actions.push(a as f32);
        }
        Ok(Array1::from_vec(actions).into_dyn())
    }

    fn logp(&self, actions: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if actions.len() != self.log_probs.nrows() {
            return Err(RunnerError::InvalidAction(format!(
                "{} actions for a batch of {}",
                actions.len(),
                self.log_probs.nrows()
            )));
        }
        let n = self.num_actions();
        let mut out = Vec::with_capacity(actions.len());
        for (i, &a) in actions.iter().enumerate() {
            if a < 0.0 || a.fract() != 0.0 || a as usize >= n {
                return Err(RunnerError::InvalidAction(format!("{a} outside 0..{n}")));
            }
            out.push(self.log_probs[[i, a as usize]]);
        }
        Ok(Array1::from_vec(out).into_dyn())
    }
}
