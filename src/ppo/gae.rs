//! Generalized Advantage Estimation.

/// Compute advantages and returns for a sequence of transitions.
///
/// `next_value` is the value estimate for the state following the final transition. It is ignored
/// if the final transition ended an episode.
///
/// # Returns
///
/// `(advantages, returns)`, where each return is the advantage plus the value estimate
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    next_value: f64,
    gamma: f64,
    lambda: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = rewards.len();
    debug_assert_eq!(values.len(), n);
    debug_assert_eq!(dones.len(), n);

    let mut advantages = vec![0.0; n];
    let mut last_advantage = 0.0;
    for t in (0..n).rev() {
        let following_value = if t + 1 < n { values[t + 1] } else { next_value };
        let mask = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * following_value * mask - values[t];
        last_advantage = delta + gamma * lambda * mask * last_advantage;
        advantages[t] = last_advantage;
    }

    let returns = advantages.iter().zip(values).map(|(a, v)| a + v).collect();
    (advantages, returns)
}

/// Normalise advantages to zero mean and unit standard deviation.
///
/// With one advantage or none, the result is all zeros.
pub fn normalize_advantages(advantages: &[f64]) -> Vec<f64> {
    let n = advantages.len();
    if n <= 1 {
        return vec![0.0; n];
    }

    let mean = advantages.iter().sum::<f64>() / n as f64;
    let variance = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std = variance.sqrt();

    advantages.iter().map(|a| (a - mean) / (std + 1e-8)).collect()
}
