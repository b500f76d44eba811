//! The clipped-surrogate policy and value update.
use super::PpoConfig;
use super::buffer::RolloutBatch;
use crate::policy::{ActorCritic, Adam, gaussian_log_prob};
use log::warn;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

/// Mean losses and diagnostics over the minibatches of one update
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct UpdateStats {
    /// Combined loss
    pub total_loss: f64,
    /// Clipped-surrogate policy loss
    pub policy_loss: f64,
    /// Mean squared error of the value estimates
    pub value_loss: f64,
    /// Entropy of the action distribution
    pub entropy: f64,
    /// Approximate KL divergence between the old and new policies
    pub approx_kl: f64,
    /// Fraction of samples whose probability ratio fell outside the clip range
    pub clip_fraction: f64,
    /// Number of minibatch steps applied
    pub minibatches: usize,
    /// Number of minibatch steps skipped because of non-finite values
    pub skipped: usize,
}

/// Loss for one sample of the clipped surrogate objective.
///
/// # Returns
///
/// `(loss, d_loss / d_ratio)`. The gradient is zero when the clipped term is the smaller of the
/// two, since it does not depend on the ratio there.
pub fn clipped_surrogate(ratio: f64, advantage: f64, clip_range: f64) -> (f64, f64) {
    let unclipped = ratio * advantage;
    let clipped = ratio.clamp(1.0 - clip_range, 1.0 + clip_range) * advantage;
    if unclipped <= clipped {
        (-unclipped, -advantage)
    } else {
        (-clipped, 0.0)
    }
}

/// Sums over the samples of one minibatch
#[derive(Default)]
struct MinibatchTotals {
    policy_loss: f64,
    value_loss: f64,
    approx_kl: f64,
    clipped: usize,
}

/// Run `n_epochs` passes of minibatch updates over a batch of transitions.
///
/// `advantages` should already be normalised. Minibatches with a non-finite loss or gradient are
/// skipped and counted in [`UpdateStats::skipped`].
pub fn ppo_update<R: Rng>(
    policy: &mut ActorCritic,
    optimiser: &mut Adam,
    batch: &RolloutBatch,
    advantages: &[f64],
    returns: &[f64],
    config: &PpoConfig,
    rng: &mut R,
) -> UpdateStats {
    let mut stats = UpdateStats::default();
    if batch.is_empty() {
        return stats;
    }

    let batch_size = config.batch_size.max(1);
    let mut indices: Vec<usize> = (0..batch.len()).collect();
    let mut samples = 0;
    for _ in 0..config.n_epochs {
        indices.shuffle(rng);
        for minibatch in indices.chunks(batch_size) {
            let n = minibatch.len() as f64;
            let mut grads = policy.zero_gradients();
            let mut totals = MinibatchTotals::default();
            let std = policy.log_std().exp();
            let variance = std * std;

            for &i in minibatch {
                let observation = batch.observation(i);
                let action = batch.actions[i];

                let (actor_pass, mean) = policy.actor_forward(observation);
                let log_prob = gaussian_log_prob(action, mean, policy.log_std());
                let ratio = (log_prob - batch.log_probs[i]).exp();
                let (loss, d_ratio) = clipped_surrogate(ratio, advantages[i], config.clip_range);
                totals.policy_loss += loss;
                totals.approx_kl += (ratio - 1.0) - ratio.ln();
                if (ratio - 1.0).abs() > config.clip_range {
                    totals.clipped += 1;
                }

                // d ratio / d log_prob = ratio
                let d_log_prob = d_ratio * ratio / n;
                let error = action - mean;
                policy.backward_actor(&actor_pass, mean, d_log_prob * error / variance, &mut grads);
                grads.log_std += d_log_prob * (error * error / variance - 1.0);

                let (critic_pass, value) = policy.critic_forward(observation);
                let value_error = value - returns[i];
                totals.value_loss += value_error * value_error;
                policy.backward_critic(
                    &critic_pass,
                    2.0 * config.value_coef * value_error / n,
                    &mut grads,
                );
            }

            // The entropy only depends on log_std, with a derivative of one
            let entropy = policy.entropy();
            grads.log_std -= config.entropy_coef;

            let policy_loss = totals.policy_loss / n;
            let value_loss = totals.value_loss / n;
            let total_loss =
                policy_loss + config.value_coef * value_loss - config.entropy_coef * entropy;
            if !total_loss.is_finite() || !grads.is_finite() {
                warn!("Skipping PPO step because of a non-finite loss or gradient");
                stats.skipped += 1;
                continue;
            }

            grads.clip_norm(config.max_grad_norm);
            policy.apply_gradients(&grads, optimiser);

            stats.total_loss += total_loss;
            stats.policy_loss += policy_loss;
            stats.value_loss += value_loss;
            stats.entropy += entropy;
            stats.approx_kl += totals.approx_kl;
            stats.clip_fraction += totals.clipped as f64;
            stats.minibatches += 1;
            samples += minibatch.len();
        }
    }

    if stats.minibatches > 0 {
        let steps = stats.minibatches as f64;
        stats.total_loss /= steps;
        stats.policy_loss /= steps;
        stats.value_loss /= steps;
        stats.entropy /= steps;
        stats.approx_kl /= samples as f64;
        stats.clip_fraction /= samples as f64;
    }

    stats
}
