use std::collections::HashMap;

use ndarray::ArrayD;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_env_runner::{
    DefaultCallbacks, Discrete, Env, EnvRunner, EnvRunnerConfig, ForwardBatch, ForwardOutput, Info, NdarrayBackend,
    Result, RlModule, RunnerError, SampleOptions, Space, Step, SyncVectorEnv, Weights,
};

// Terminates after `len` steps; the observation is the step counter.
struct StepsEnv {
    len: i32,
    t: i32,
    space: Discrete,
}

impl Env for StepsEnv {
    type Obs = i32;
    type Act = u32;
    type ActionSpace = Discrete;

    fn reset(&mut self, _seed: Option<u64>) -> (Self::Obs, Info) {
        self.t = 0;
        (0, Info::new())
    }

    fn step(&mut self, _action: Self::Act) -> Step<Self::Obs> {
        self.t += 1;
        Step::new(self.t, 1.0, self.t >= self.len, false, Info::new())
    }

    fn action_space(&self) -> &Discrete { &self.space }
}

// Only used as a type parameter; the runner samples random actions.
struct NoModule;

impl RlModule for NoModule {
    type Backend = NdarrayBackend;

    fn forward_exploration(&mut self, _batch: &ForwardBatch<ArrayD<f32>>) -> Result<ForwardOutput<ArrayD<f32>>> {
        Err(RunnerError::NotSupported("no forward pass".into()))
    }

    fn forward_inference(&mut self, _batch: &ForwardBatch<ArrayD<f32>>) -> Result<ForwardOutput<ArrayD<f32>>> {
        Err(RunnerError::NotSupported("no forward pass".into()))
    }

    fn get_state(&self) -> Weights { Weights::new() }

    fn set_state(&mut self, _weights: Weights) -> Result<()> { Ok(()) }
}

fn random_runner(lens: Vec<i32>) -> EnvRunner<SyncVectorEnv<StepsEnv>, NoModule> {
    let n = lens.len();
    let mut lens = lens.into_iter();
    let env = SyncVectorEnv::new(n, move || StepsEnv { len: lens.next().unwrap(), t: 0, space: Discrete::new(3) });
    let config = EnvRunnerConfig::new().with_num_envs_per_worker(n).with_seed(1);
    EnvRunner::new(config, env, Box::new(DefaultCallbacks), |_, _| {
        Err(RunnerError::NoDefaultModule("random actions only".into()))
    })
    .unwrap()
}

proptest! {
    // Every env step lands in exactly one returned episode, and a call takes
    // the smallest multiple of the env count that reaches the target.
    #[test]
    fn timestep_samples_account_for_every_step(
        lens in proptest::collection::vec(1i32..6, 1..5),
        targets in proptest::collection::vec(1usize..30, 1..4),
    ) {
        let n = lens.len();
        let mut runner = random_runner(lens);
        let mut expected_total = 0;
        for t in targets {
            let out = runner.sample(SampleOptions::timesteps(t).with_random_actions()).unwrap();
            let expected = t.div_ceil(n) * n;
            expected_total += expected;
            prop_assert_eq!(out.iter().map(|e| e.len()).sum::<usize>(), expected);
            prop_assert!(out.iter().all(|e| e.is_finalized() && e.len() > 0));

            // Finished episodes come first, running chunks after.
            let first_running = out.iter().position(|e| !e.is_done()).unwrap_or(out.len());
            prop_assert!(out[first_running..].iter().all(|e| !e.is_done()));
            prop_assert!(out.iter().filter(|e| !e.is_done()).count() <= n);
        }
        prop_assert_eq!(runner.timesteps_since_last_metrics(), expected_total);
    }

    // Metrics report each finished episode once, at its full length.
    #[test]
    fn metrics_match_episode_lengths(
        lens in proptest::collection::vec(1i32..6, 1..4),
        rounds in 1usize..6,
        t in 1usize..12,
    ) {
        let mut runner = random_runner(lens.clone());
        let mut by_id: HashMap<_, usize> = HashMap::new();
        let mut finished = 0;
        for _ in 0..rounds {
            for e in runner.sample(SampleOptions::timesteps(t).with_random_actions()).unwrap() {
                *by_id.entry(e.id()).or_default() += e.len();
                if e.is_done() {
                    finished += 1;
                    prop_assert!(lens.contains(&(by_id[&e.id()] as i32)));
                }
            }
        }
        let metrics = runner.get_metrics();
        prop_assert_eq!(metrics.len(), finished);
        for m in &metrics {
            prop_assert!(lens.contains(&(m.episode_length as i32)));
            prop_assert_eq!(m.episode_reward, m.episode_length as f64);
        }
    }

    #[test]
    fn episode_samples_return_the_requested_count(
        lens in proptest::collection::vec(1i32..6, 1..5),
        m in 1usize..8,
    ) {
        let mut runner = random_runner(lens.clone());
        let out = runner.sample(SampleOptions::episodes(m).with_random_actions()).unwrap();
        prop_assert_eq!(out.len(), m);
        prop_assert!(out.iter().all(|e| e.is_terminated() && lens.contains(&(e.len() as i32))));
        prop_assert_eq!(runner.get_metrics().len(), m);
    }

    #[test]
    fn discrete_sampling_contains_and_deterministic(n in 1u32..1000, seed in any::<u64>()) {
        let d = Discrete::new(n);
        let mut rng1 = StdRng::seed_from_u64(seed);
        let mut rng2 = StdRng::seed_from_u64(seed);
        for _ in 0..100 {
            let v1 = d.sample(&mut rng1);
            let v2 = d.sample(&mut rng2);
            prop_assert!(d.contains(&v1));
            prop_assert_eq!(v1, v2);
        }
    }
}
