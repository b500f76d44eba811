//! Independent Proximal Policy Optimisation learners, one per agent.
//!
//! Each learner owns its policy, optimiser and rollout buffer. Learners never share parameters, so
//! they can be updated in parallel.
use crate::agent::AgentKind;
use crate::grid::{Grid, NodeID};
use crate::policy::{ActionSample, ActorCritic, Adam};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::thread;

mod buffer;
mod gae;
mod update;
pub use buffer::{RolloutBatch, RolloutBuffer};
pub use gae::{compute_gae, normalize_advantages};
pub use update::{UpdateStats, clipped_surrogate, ppo_update};

/// Hyper-parameters for a PPO learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Units in each hidden layer of the actor and critic
    pub hidden_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Smoothing factor for advantage estimation
    pub gae_lambda: f64,
    /// Limit on how far the probability ratio may move from one in a single update
    pub clip_range: f64,
    /// Weight of the value loss
    pub value_coef: f64,
    /// Weight of the entropy bonus
    pub entropy_coef: f64,
    /// Maximum L2 norm of the gradients for one step
    pub max_grad_norm: f64,
    /// Capacity of each rollout buffer
    pub buffer_size: usize,
    /// Transitions per minibatch
    pub batch_size: usize,
    /// Passes over the rollout per update
    pub n_epochs: usize,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            learning_rate: 3e-4,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_range: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: 0.5,
            buffer_size: 2048,
            batch_size: 64,
            n_epochs: 10,
        }
    }
}

/// The learner for a single agent
#[derive(Debug, Clone)]
pub struct PpoLearner {
    /// The ID of the agent (and its node)
    pub agent_id: NodeID,
    /// The kind of agent
    pub kind: AgentKind,
    /// The agent's actor-critic networks
    pub policy: ActorCritic,
    /// Optimiser state for `policy`
    pub optimiser: Adam,
    /// Number of updates applied so far
    pub training_step: u64,
    buffer: RolloutBuffer,
    config: PpoConfig,
    rng: StdRng,
}

impl PpoLearner {
    /// Create a learner with a freshly initialised policy
    pub fn new(agent_id: NodeID, kind: AgentKind, config: &PpoConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let observation_size = kind.observation_size();
        let policy = ActorCritic::new(observation_size, config.hidden_size, &mut rng);
        let optimiser = Adam::new(policy.num_params(), config.learning_rate);

        Self {
            agent_id,
            kind,
            policy,
            optimiser,
            training_step: 0,
            buffer: RolloutBuffer::new(config.buffer_size, observation_size),
            config: config.clone(),
            rng,
        }
    }

    /// Sample an action for training
    pub fn act(&mut self, observation: &[f64]) -> ActionSample {
        self.policy.sample(observation, &mut self.rng)
    }

    /// The mean action, for evaluation
    pub fn act_deterministic(&self, observation: &[f64]) -> f64 {
        self.policy.mean_action(observation)
    }

    /// The critic's value estimate for an observation
    pub fn value(&self, observation: &[f64]) -> f64 {
        self.policy.value(observation)
    }

    /// The transitions collected since the last update
    pub fn buffer(&self) -> &RolloutBuffer {
        &self.buffer
    }

    /// Store the outcome of an action taken with [`PpoLearner::act`]
    pub fn store_transition(
        &mut self,
        observation: &[f64],
        sample: &ActionSample,
        reward: f64,
        done: bool,
    ) -> Result<()> {
        self.buffer
            .add(
                observation,
                sample.action,
                reward,
                sample.value,
                sample.log_prob,
                done,
            )
            .with_context(|| format!("Could not store transition for agent {}", self.agent_id))
    }

    /// Update the policy from the collected transitions and empty the buffer.
    ///
    /// `next_value` is the value estimate for the state after the last transition.
    pub fn update(&mut self, next_value: f64) -> UpdateStats {
        let batch = self.buffer.get();
        let (advantages, returns) = compute_gae(
            batch.rewards,
            batch.values,
            batch.dones,
            next_value,
            self.config.gamma,
            self.config.gae_lambda,
        );
        let advantages = normalize_advantages(&advantages);
        let stats = ppo_update(
            &mut self.policy,
            &mut self.optimiser,
            &batch,
            &advantages,
            &returns,
            &self.config,
            &mut self.rng,
        );
        debug!(
            "Agent {}: update {} used {} transitions, loss {:.4}",
            self.agent_id,
            self.training_step,
            batch.len(),
            stats.total_loss
        );

        self.buffer.clear();
        self.training_step += 1;

        stats
    }
}

/// Learners for every agent in a grid, keyed by node ID
#[derive(Debug, Clone)]
pub struct LearnerArena {
    learners: IndexMap<NodeID, PpoLearner>,
}

impl LearnerArena {
    /// Create a learner for every node in `grid`.
    ///
    /// The learner for the `i`th node is seeded with `seed + i`.
    pub fn for_grid(grid: &Grid, config: &PpoConfig, seed: u64) -> Self {
        let learners = grid
            .nodes()
            .enumerate()
            .map(|(i, node)| {
                let learner = PpoLearner::new(
                    node.id.clone(),
                    node.agent.kind(),
                    config,
                    seed.wrapping_add(i as u64),
                );
                (node.id.clone(), learner)
            })
            .collect();

        Self { learners }
    }

    /// Number of learners
    pub fn len(&self) -> usize {
        self.learners.len()
    }

    /// Whether there are no learners
    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }

    /// Get the learner for an agent
    pub fn get(&self, id: &NodeID) -> Option<&PpoLearner> {
        self.learners.get(id)
    }

    /// Get the learner for an agent mutably
    pub fn get_mut(&mut self, id: &NodeID) -> Option<&mut PpoLearner> {
        self.learners.get_mut(id)
    }

    /// Iterate over the learners
    pub fn iter(&self) -> impl Iterator<Item = &PpoLearner> {
        self.learners.values()
    }

    /// Iterate over the learners mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PpoLearner> {
        self.learners.values_mut()
    }

    /// Sample an action for every agent with an observation
    pub fn act(
        &mut self,
        observations: &IndexMap<NodeID, Vec<f64>>,
    ) -> Result<IndexMap<NodeID, ActionSample>> {
        observations
            .iter()
            .map(|(id, observation)| {
                let learner = self
                    .learners
                    .get_mut(id)
                    .with_context(|| format!("No learner for agent {id}"))?;
                Ok((id.clone(), learner.act(observation)))
            })
            .collect()
    }

    /// Deterministic actions for every agent with an observation
    pub fn act_deterministic(
        &self,
        observations: &IndexMap<NodeID, Vec<f64>>,
    ) -> Result<IndexMap<NodeID, f64>> {
        observations
            .iter()
            .map(|(id, observation)| {
                let learner = self
                    .learners
                    .get(id)
                    .with_context(|| format!("No learner for agent {id}"))?;
                Ok((id.clone(), learner.act_deterministic(observation)))
            })
            .collect()
    }

    /// Update every learner.
    ///
    /// `next_values` gives the bootstrap value for each agent. Missing agents use zero. With
    /// `parallel`, each learner is updated on its own thread.
    pub fn update_all(
        &mut self,
        next_values: &IndexMap<NodeID, f64>,
        parallel: bool,
    ) -> IndexMap<NodeID, UpdateStats> {
        let next_value = |id: &NodeID| next_values.get(id).copied().unwrap_or(0.0);

        if !parallel {
            return self
                .learners
                .iter_mut()
                .map(|(id, learner)| (id.clone(), learner.update(next_value(id))))
                .collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = self
                .learners
                .iter_mut()
                .map(|(id, learner)| {
                    let value = next_value(id);
                    (id.clone(), scope.spawn(move || learner.update(value)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    let stats = handle.join().unwrap_or_else(|err| std::panic::resume_unwind(err));
                    (id, stats)
                })
                .collect()
        })
    }
}
