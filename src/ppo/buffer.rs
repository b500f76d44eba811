//! Fixed-capacity storage for the transitions collected by one agent.
use anyhow::{Result, ensure};

/// Transitions stored in parallel arrays, filled from the front
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutBuffer {
    capacity: usize,
    observation_size: usize,
    /// Observations, `observation_size` values per transition
    observations: Vec<f64>,
    actions: Vec<f64>,
    rewards: Vec<f64>,
    values: Vec<f64>,
    log_probs: Vec<f64>,
    dones: Vec<bool>,
    len: usize,
}

/// A borrowed view of the valid transitions in a [`RolloutBuffer`]
#[derive(Debug, Clone, Copy)]
pub struct RolloutBatch<'a> {
    observation_size: usize,
    observations: &'a [f64],
    /// Normalised actions
    pub actions: &'a [f64],
    /// Rewards received after each action
    pub rewards: &'a [f64],
    /// Value estimates when each action was taken
    pub values: &'a [f64],
    /// Log-probabilities of the actions under the policy that took them
    pub log_probs: &'a [f64],
    /// Whether each transition ended an episode
    pub dones: &'a [bool],
}

impl RolloutBatch<'_> {
    /// Number of transitions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether there are no transitions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The observation for transition `index`
    pub fn observation(&self, index: usize) -> &[f64] {
        let start = index * self.observation_size;
        &self.observations[start..start + self.observation_size]
    }
}

impl RolloutBuffer {
    /// Create an empty buffer with room for `capacity` transitions
    pub fn new(capacity: usize, observation_size: usize) -> Self {
        Self {
            capacity,
            observation_size,
            observations: vec![0.0; capacity * observation_size],
            actions: vec![0.0; capacity],
            rewards: vec![0.0; capacity],
            values: vec![0.0; capacity],
            log_probs: vec![0.0; capacity],
            dones: vec![false; capacity],
            len: 0,
        }
    }

    /// Maximum number of transitions
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of transitions stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no transitions
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer has no room for another transition
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Append a transition.
    ///
    /// Fails without modifying the buffer if it is full or the observation has the wrong length.
    pub fn add(
        &mut self,
        observation: &[f64],
        action: f64,
        reward: f64,
        value: f64,
        log_prob: f64,
        done: bool,
    ) -> Result<()> {
        ensure!(
            !self.is_full(),
            "Rollout buffer is full ({} transitions)",
            self.capacity
        );
        ensure!(
            observation.len() == self.observation_size,
            "Expected an observation of length {} but got {}",
            self.observation_size,
            observation.len()
        );

        let i = self.len;
        let start = i * self.observation_size;
        self.observations[start..start + self.observation_size].copy_from_slice(observation);
        self.actions[i] = action;
        self.rewards[i] = reward;
        self.values[i] = value;
        self.log_probs[i] = log_prob;
        self.dones[i] = done;
        self.len += 1;

        Ok(())
    }

    /// The transitions stored so far, oldest first
    pub fn get(&self) -> RolloutBatch<'_> {
        let n = self.len;
        RolloutBatch {
            observation_size: self.observation_size,
            observations: &self.observations[..n * self.observation_size],
            actions: &self.actions[..n],
            rewards: &self.rewards[..n],
            values: &self.values[..n],
            log_probs: &self.log_probs[..n],
            dones: &self.dones[..n],
        }
    }

    /// Forget every stored transition
    pub fn clear(&mut self) {
        self.len = 0;
    }
}
