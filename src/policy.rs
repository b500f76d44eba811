//! Small actor-critic networks with hand-written forward and backward passes.
//!
//! The actor maps an observation to the mean of a Gaussian over the normalised action, squashed
//! into `[-1, 1]` with `tanh`. The spread of the Gaussian is a single learned `log_std`. A separate
//! critic network estimates the value of the observation.
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Allowed range for the log standard deviation of the action distribution
pub const LOG_STD_BOUNDS: (f64, f64) = (-2.0, 0.5);

/// Initial log standard deviation (standard deviation of about 0.6)
const INITIAL_LOG_STD: f64 = -0.5;

/// A fully connected network with `tanh` hidden layers and a linear output layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    /// `(fan_in, fan_out)` for each layer
    layer_dims: Vec<(usize, usize)>,
    /// Row-major weights for each layer, indexed by `i * fan_out + j`
    weights: Vec<Vec<f64>>,
    biases: Vec<Vec<f64>>,
}

/// The activations of every layer from one forward pass, kept for the backward pass
#[derive(Debug, Clone)]
pub struct ForwardPass {
    /// The input followed by the output of each layer
    activations: Vec<Vec<f64>>,
}

impl ForwardPass {
    /// The output of the final layer
    pub fn output(&self) -> &[f64] {
        self.activations
            .last()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Gradients with the same shape as the parameters of an [`Mlp`]
#[derive(Debug, Clone, PartialEq)]
pub struct MlpGradients {
    weights: Vec<Vec<f64>>,
    biases: Vec<Vec<f64>>,
}

impl MlpGradients {
    fn values(&self) -> impl Iterator<Item = &f64> {
        self.weights
            .iter()
            .zip(&self.biases)
            .flat_map(|(w, b)| w.iter().chain(b))
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights
            .iter_mut()
            .zip(self.biases.iter_mut())
            .flat_map(|(w, b)| w.iter_mut().chain(b.iter_mut()))
    }
}

impl Mlp {
    /// Create a network with Xavier-initialised weights and zero biases
    pub fn new<R: Rng>(input_size: usize, hidden: &[usize], output_size: usize, rng: &mut R) -> Self {
        let mut layer_dims = Vec::with_capacity(hidden.len() + 1);
        let mut fan_in = input_size;
        for &size in hidden {
            layer_dims.push((fan_in, size));
            fan_in = size;
        }
        layer_dims.push((fan_in, output_size));

        let weights = layer_dims
            .iter()
            .map(|&(fan_in, fan_out)| {
                let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
                (0..fan_in * fan_out)
                    .map(|_| rng.sample::<f64, _>(StandardNormal) * std)
                    .collect()
            })
            .collect();
        let biases = layer_dims
            .iter()
            .map(|&(_, fan_out)| vec![0.0; fan_out])
            .collect();

        Self {
            layer_dims,
            weights,
            biases,
        }
    }

    /// Number of inputs the network expects
    pub fn input_size(&self) -> usize {
        self.layer_dims.first().map_or(0, |&(fan_in, _)| fan_in)
    }

    /// Total number of weights and biases
    pub fn num_params(&self) -> usize {
        self.layer_dims
            .iter()
            .map(|&(fan_in, fan_out)| fan_in * fan_out + fan_out)
            .sum()
    }

    /// Run the network on an input
    pub fn forward(&self, input: &[f64]) -> ForwardPass {
        debug_assert_eq!(input.len(), self.input_size());
        let last = self.layer_dims.len() - 1;
        let mut activations = Vec::with_capacity(self.layer_dims.len() + 1);
        activations.push(input.to_vec());

        for (layer, &(fan_in, fan_out)) in self.layer_dims.iter().enumerate() {
            let x = &activations[layer];
            let w = &self.weights[layer];
            let mut z = self.biases[layer].clone();
            for i in 0..fan_in {
                for j in 0..fan_out {
                    z[j] += x[i] * w[i * fan_out + j];
                }
            }
            if layer != last {
                z.iter_mut().for_each(|v| *v = v.tanh());
            }
            activations.push(z);
        }

        ForwardPass { activations }
    }

    /// Zero gradients for this network
    pub fn zero_gradients(&self) -> MlpGradients {
        MlpGradients {
            weights: self.weights.iter().map(|w| vec![0.0; w.len()]).collect(),
            biases: self.biases.iter().map(|b| vec![0.0; b.len()]).collect(),
        }
    }

    /// Backpropagate `d_output` (the gradient of the loss with respect to the output), adding the
    /// parameter gradients into `grads`
    pub fn backward(&self, pass: &ForwardPass, d_output: &[f64], grads: &mut MlpGradients) {
        let last = self.layer_dims.len() - 1;
        let mut delta = d_output.to_vec();

        for layer in (0..self.layer_dims.len()).rev() {
            let (fan_in, fan_out) = self.layer_dims[layer];
            if layer != last {
                // d tanh(z)/dz = 1 - tanh(z)²
                let a = &pass.activations[layer + 1];
                for j in 0..fan_out {
                    delta[j] *= 1.0 - a[j] * a[j];
                }
            }

            let a_prev = &pass.activations[layer];
            let dw = &mut grads.weights[layer];
            for i in 0..fan_in {
                for j in 0..fan_out {
                    dw[i * fan_out + j] += a_prev[i] * delta[j];
                }
            }
            for (db, d) in grads.biases[layer].iter_mut().zip(&delta) {
                *db += d;
            }

            if layer > 0 {
                let w = &self.weights[layer];
                delta = (0..fan_in)
                    .map(|i| (0..fan_out).map(|j| w[i * fan_out + j] * delta[j]).sum())
                    .collect();
            }
        }
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights
            .iter_mut()
            .zip(self.biases.iter_mut())
            .flat_map(|(w, b)| w.iter_mut().chain(b.iter_mut()))
    }
}

/// Gradients for every parameter of an [`ActorCritic`]
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    /// Gradients for the actor network
    pub actor: MlpGradients,
    /// Gradients for the critic network
    pub critic: MlpGradients,
    /// Gradient for the log standard deviation
    pub log_std: f64,
}

impl Gradients {
    fn values(&self) -> impl Iterator<Item = &f64> {
        self.actor
            .values()
            .chain(self.critic.values())
            .chain(std::iter::once(&self.log_std))
    }

    /// The L2 norm of all gradients together
    pub fn norm(&self) -> f64 {
        self.values().map(|g| g * g).sum::<f64>().sqrt()
    }

    /// Whether every gradient is a finite number
    pub fn is_finite(&self) -> bool {
        self.values().all(|g| g.is_finite())
    }

    /// Multiply every gradient by `factor`
    pub fn scale(&mut self, factor: f64) {
        for g in self.actor.values_mut().chain(self.critic.values_mut()) {
            *g *= factor;
        }
        self.log_std *= factor;
    }

    /// Scale the gradients down so that their norm is at most `max_norm`
    pub fn clip_norm(&mut self, max_norm: f64) {
        let norm = self.norm();
        if norm > max_norm {
            self.scale(max_norm / (norm + 1e-6));
        }
    }

    fn flatten(&self) -> Vec<f64> {
        self.values().copied().collect()
    }
}

/// An action drawn from the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSample {
    /// The normalised action, in `[-1, 1]`
    pub action: f64,
    /// Log-probability of the action under the policy
    pub log_prob: f64,
    /// The critic's estimate of the observation's value
    pub value: f64,
}

/// Separate actor and critic networks for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorCritic {
    actor: Mlp,
    critic: Mlp,
    log_std: f64,
}

/// Log-density of `action` under a Gaussian
pub fn gaussian_log_prob(action: f64, mean: f64, log_std: f64) -> f64 {
    let std = log_std.exp();
    -((action - mean) * (action - mean)) / (2.0 * std * std) - log_std - 0.5 * (2.0 * PI).ln()
}

/// Differential entropy of a Gaussian
pub fn gaussian_entropy(log_std: f64) -> f64 {
    0.5 + 0.5 * (2.0 * PI).ln() + log_std
}

impl ActorCritic {
    /// Create a policy for observations of the given size, with two hidden layers of
    /// `hidden_size` units in each network
    pub fn new<R: Rng>(observation_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let hidden = [hidden_size, hidden_size];
        Self {
            actor: Mlp::new(observation_size, &hidden, 1, rng),
            critic: Mlp::new(observation_size, &hidden, 1, rng),
            log_std: INITIAL_LOG_STD,
        }
    }

    /// Number of features expected in an observation
    pub fn observation_size(&self) -> usize {
        self.actor.input_size()
    }

    /// Total number of trainable parameters
    pub fn num_params(&self) -> usize {
        self.actor.num_params() + self.critic.num_params() + 1
    }

    /// Log standard deviation of the action distribution
    pub fn log_std(&self) -> f64 {
        self.log_std
    }

    /// Run the actor, returning the forward pass and the squashed mean action
    pub fn actor_forward(&self, observation: &[f64]) -> (ForwardPass, f64) {
        let pass = self.actor.forward(observation);
        let mean = pass.output()[0].tanh();
        (pass, mean)
    }

    /// Run the critic, returning the forward pass and the value estimate
    pub fn critic_forward(&self, observation: &[f64]) -> (ForwardPass, f64) {
        let pass = self.critic.forward(observation);
        let value = pass.output()[0];
        (pass, value)
    }

    /// The mean action for an observation. Used for deterministic evaluation.
    pub fn mean_action(&self, observation: &[f64]) -> f64 {
        self.actor_forward(observation).1
    }

    /// The critic's value estimate for an observation
    pub fn value(&self, observation: &[f64]) -> f64 {
        self.critic_forward(observation).1
    }

    /// Log-probability of an action under the current policy
    pub fn log_prob(&self, observation: &[f64], action: f64) -> f64 {
        gaussian_log_prob(action, self.mean_action(observation), self.log_std)
    }

    /// Entropy of the action distribution
    pub fn entropy(&self) -> f64 {
        gaussian_entropy(self.log_std)
    }

    /// Sample an action for training.
    ///
    /// The action is clamped into `[-1, 1]` and its log-probability is that of the clamped value.
    pub fn sample<R: Rng>(&self, observation: &[f64], rng: &mut R) -> ActionSample {
        let mean = self.mean_action(observation);
        let noise: f64 = rng.sample(StandardNormal);
        let action = (mean + self.log_std.exp() * noise).clamp(-1.0, 1.0);

        ActionSample {
            action,
            log_prob: gaussian_log_prob(action, mean, self.log_std),
            value: self.value(observation),
        }
    }

    /// Zero gradients for every parameter
    pub fn zero_gradients(&self) -> Gradients {
        Gradients {
            actor: self.actor.zero_gradients(),
            critic: self.critic.zero_gradients(),
            log_std: 0.0,
        }
    }

    /// Backpropagate the gradient of the loss with respect to the squashed mean action
    pub fn backward_actor(&self, pass: &ForwardPass, mean: f64, d_mean: f64, grads: &mut Gradients) {
        // d tanh(z)/dz = 1 - mean²
        let d_output = d_mean * (1.0 - mean * mean);
        self.actor.backward(pass, &[d_output], &mut grads.actor);
    }

    /// Backpropagate the gradient of the loss with respect to the value estimate
    pub fn backward_critic(&self, pass: &ForwardPass, d_value: f64, grads: &mut Gradients) {
        self.critic.backward(pass, &[d_value], &mut grads.critic);
    }

    /// Apply gradients with an optimiser step, keeping `log_std` within [`LOG_STD_BOUNDS`]
    pub fn apply_gradients(&mut self, grads: &Gradients, optimiser: &mut Adam) {
        let updates = optimiser.step(&grads.flatten());
        let mut updates = updates.into_iter();
        for (param, update) in self
            .actor
            .params_mut()
            .chain(self.critic.params_mut())
            .zip(updates.by_ref())
        {
            *param -= update;
        }
        if let Some(update) = updates.next() {
            self.log_std -= update;
        }
        self.log_std = self.log_std.clamp(LOG_STD_BOUNDS.0, LOG_STD_BOUNDS.1);
    }
}

/// The Adam optimiser, with bias correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    /// Learning rate
    pub learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
}

impl Adam {
    /// Create an optimiser for `num_params` parameters
    pub fn new(num_params: usize, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
            t: 0,
        }
    }

    /// Number of steps taken so far
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Compute the updates to subtract from the parameters for the given gradients
    pub fn step(&mut self, grads: &[f64]) -> Vec<f64> {
        debug_assert_eq!(grads.len(), self.m.len());
        self.t = self.t.saturating_add(1);
        let bias_correction1 = 1.0 - self.beta1.powi(self.t);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t);

        grads
            .iter()
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
            .map(|(&g, (m, v))| {
                *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                let m_hat = *m / bias_correction1;
                let v_hat = *v / bias_correction2;
                self.learning_rate * m_hat / (v_hat.sqrt() + self.eps)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::{fixture, rstest};

    const STEP: f64 = 1e-6;

    #[fixture]
    fn policy() -> ActorCritic {
        ActorCritic::new(4, 8, &mut StdRng::seed_from_u64(11))
    }

    fn observation() -> Vec<f64> {
        vec![0.3, -0.2, 0.5, 0.9]
    }

    /// Check an analytic gradient against a central finite difference
    fn assert_gradient(analytic: f64, plus: f64, minus: f64) {
        let numeric = (plus - minus) / (2.0 * STEP);
        assert_approx_eq!(f64, analytic, numeric, epsilon = 1e-5);
    }

    #[rstest]
    fn test_actor_gradient(policy: ActorCritic) {
        let obs = observation();
        let action = 0.4;

        // Loss is the negative log-probability of the action
        let loss = |policy: &ActorCritic| -policy.log_prob(&obs, action);

        let (pass, mean) = policy.actor_forward(&obs);
        let std = policy.log_std.exp();
        let d_mean = -(action - mean) / (std * std);
        let mut grads = policy.zero_gradients();
        policy.backward_actor(&pass, mean, d_mean, &mut grads);

        for (layer, index) in [(0, 0), (0, 13), (1, 5), (2, 3)] {
            let mut plus = policy.clone();
            plus.actor.weights[layer][index] += STEP;
            let mut minus = policy.clone();
            minus.actor.weights[layer][index] -= STEP;
            assert_gradient(grads.actor.weights[layer][index], loss(&plus), loss(&minus));
        }

        let mut plus = policy.clone();
        plus.actor.biases[1][2] += STEP;
        let mut minus = policy.clone();
        minus.actor.biases[1][2] -= STEP;
        assert_gradient(grads.actor.biases[1][2], loss(&plus), loss(&minus));
    }

    #[rstest]
    fn test_critic_gradient(policy: ActorCritic) {
        let obs = observation();
        let target = 1.5;
        let loss = |policy: &ActorCritic| (policy.value(&obs) - target).powi(2);

        let (pass, value) = policy.critic_forward(&obs);
        let mut grads = policy.zero_gradients();
        policy.backward_critic(&pass, 2.0 * (value - target), &mut grads);

        for (layer, index) in [(0, 2), (1, 40), (2, 7)] {
            let mut plus = policy.clone();
            plus.critic.weights[layer][index] += STEP;
            let mut minus = policy.clone();
            minus.critic.weights[layer][index] -= STEP;
            assert_gradient(grads.critic.weights[layer][index], loss(&plus), loss(&minus));
        }
    }

    #[test]
    fn test_log_std_gradient() {
        let (action, mean, log_std) = (0.7, 0.1, -0.3);
        let std = f64::exp(log_std);
        let analytic = (action - mean) * (action - mean) / (std * std) - 1.0;
        let numeric = (gaussian_log_prob(action, mean, log_std + STEP)
            - gaussian_log_prob(action, mean, log_std - STEP))
            / (2.0 * STEP);
        assert_approx_eq!(f64, analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn test_gaussian_log_prob_at_mean() {
        assert_approx_eq!(f64, gaussian_log_prob(0.0, 0.0, 0.0), -0.5 * (2.0 * PI).ln());
        assert_approx_eq!(f64, gaussian_entropy(0.0), 0.5 + 0.5 * (2.0 * PI).ln());
    }

    #[rstest]
    fn test_sample(policy: ActorCritic) {
        let obs = observation();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let sample = policy.sample(&obs, &mut rng);
            assert!((-1.0..=1.0).contains(&sample.action));
            assert_approx_eq!(f64, sample.log_prob, policy.log_prob(&obs, sample.action));
            assert_approx_eq!(f64, sample.value, policy.value(&obs));
        }

        let mean = policy.mean_action(&obs);
        assert!((-1.0..=1.0).contains(&mean));
    }

    #[rstest]
    fn test_apply_gradients(mut policy: ActorCritic) {
        let obs = observation();
        let mut optimiser = Adam::new(policy.num_params(), 1e-2);

        // Repeatedly push the value estimate towards a target
        let target = 2.0;
        let initial_error = (policy.value(&obs) - target).abs();
        for _ in 0..50 {
            let (pass, value) = policy.critic_forward(&obs);
            let mut grads = policy.zero_gradients();
            policy.backward_critic(&pass, 2.0 * (value - target), &mut grads);
            policy.apply_gradients(&grads, &mut optimiser);
        }
        assert!((policy.value(&obs) - target).abs() < initial_error);
        assert_eq!(optimiser.steps(), 50);
    }

    #[rstest]
    fn test_log_std_clamped(mut policy: ActorCritic) {
        let mut optimiser = Adam::new(policy.num_params(), 1.0);
        let mut grads = policy.zero_gradients();
        grads.log_std = -100.0;
        for _ in 0..10 {
            policy.apply_gradients(&grads, &mut optimiser);
        }
        assert_eq!(policy.log_std(), LOG_STD_BOUNDS.1);
    }

    #[rstest]
    fn test_clip_norm(policy: ActorCritic) {
        let mut grads = policy.zero_gradients();
        grads.log_std = 3.0;
        grads.actor.biases[0][0] = 4.0;
        assert_approx_eq!(f64, grads.norm(), 5.0);

        grads.clip_norm(0.5);
        assert!(grads.norm() <= 0.5);
        assert_approx_eq!(f64, grads.log_std / grads.actor.biases[0][0], 0.75);

        grads.actor.biases[0][0] = f64::NAN;
        assert!(!grads.is_finite());
    }

    #[rstest]
    fn test_serde_round_trip(policy: ActorCritic) {
        let json = serde_json::to_string(&policy).unwrap();
        let loaded: ActorCritic = serde_json::from_str(&json).unwrap();
        let obs = observation();
        assert_approx_eq!(
            f64,
            loaded.mean_action(&obs),
            policy.mean_action(&obs),
            epsilon = 1e-12
        );
        assert_eq!(loaded.observation_size(), 4);
    }
}
