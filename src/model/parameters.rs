//! Defines the `ModelParameters` struct, which represents the contents of `grid.toml`.
use crate::input::{input_err_msg, read_toml};
use crate::ppo::PpoConfig;
use anyhow::{Context, Result, ensure};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MODEL_PARAMETERS_FILE_NAME: &str = "grid.toml";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_dt, f64, 1.0);
define_param_default!(default_target_hz, f64, 60.0);
define_param_default!(default_base_price, f64, 50.0);
define_param_default!(default_frequency_relaxation, f64, 0.05);
define_param_default!(default_seed, u64, 42);
define_param_default!(default_days, u32, 1);
define_param_default!(default_episodes, u32, 10);
define_param_default!(default_rollout_steps, usize, 2048);
define_param_default!(default_checkpoint_interval, u32, 5);

/// Represents the contents of the entire model file.
///
/// Every section is optional. If the file is absent, defaults are used throughout.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ModelParameters {
    /// Parameters for the physical and economic simulation
    #[serde(default)]
    pub simulation: SimulationParameters,
    /// Parameters for training agents
    #[serde(default)]
    pub training: TrainingParameters,
}

/// The `[simulation]` section of the model file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimulationParameters {
    /// Length of a tick (minutes)
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Nominal grid frequency (Hz)
    #[serde(default = "default_target_hz")]
    pub target_hz: f64,
    /// Reference price around which the market is centred ($/MWh)
    #[serde(default = "default_base_price")]
    pub base_price: f64,
    /// Fraction of the frequency deviation removed on every tick
    #[serde(default = "default_frequency_relaxation")]
    pub frequency_relaxation: f64,
    /// Seed for all random number generation
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of days to simulate with the `run` command
    #[serde(default = "default_days")]
    pub days: u32,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            target_hz: default_target_hz(),
            base_price: default_base_price(),
            frequency_relaxation: default_frequency_relaxation(),
            seed: default_seed(),
            days: default_days(),
        }
    }
}

/// The `[training]` section of the model file
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TrainingParameters {
    /// Hyper-parameters shared by every agent's learner
    #[serde(flatten)]
    pub ppo: PpoConfig,
    /// Number of rollout and update rounds
    #[serde(default = "default_episodes")]
    pub episodes: u32,
    /// Number of ticks collected before each update
    #[serde(default = "default_rollout_steps")]
    pub rollout_steps: usize,
    /// Ticks per training episode. Defaults to one simulated day.
    #[serde(default)]
    pub episode_length: Option<usize>,
    /// Whether to update learners on separate threads
    #[serde(default)]
    pub parallel: bool,
    /// Save checkpoints every this many rounds. Zero disables checkpoints.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

impl Default for TrainingParameters {
    fn default() -> Self {
        Self {
            ppo: PpoConfig::default(),
            episodes: default_episodes(),
            rollout_steps: default_rollout_steps(),
            episode_length: None,
            parallel: false,
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

/// Check that a value is a finite number greater than zero
fn check_positive(name: &str, value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "{name} must be a finite number greater than zero"
    );

    Ok(())
}

/// Check that a value is between 0 and 1 inclusive
fn check_proportion(name: &str, value: f64) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&value),
        "{name} must be between 0 and 1"
    );

    Ok(())
}

/// Check that the `dt` parameter is valid
fn check_dt(dt: f64) -> Result<()> {
    check_positive("dt", dt)?;
    ensure!(dt <= 1440.0, "dt cannot be longer than a day (1440 minutes)");

    Ok(())
}

/// Check that a count is non-zero
fn check_nonzero<T: Default + PartialEq>(name: &str, value: T) -> Result<()> {
    ensure!(value != T::default(), "{name} cannot be zero");

    Ok(())
}

impl SimulationParameters {
    /// Validate the simulation parameters
    pub fn validate(&self) -> Result<()> {
        check_dt(self.dt)?;
        check_positive("target_hz", self.target_hz)?;
        check_positive("base_price", self.base_price)?;
        check_proportion("frequency_relaxation", self.frequency_relaxation)?;
        check_nonzero("days", self.days)?;

        if self.frequency_relaxation == 0.0 {
            warn!(
                "frequency_relaxation is zero. The grid frequency will drift without returning to \
                its target."
            );
        }

        Ok(())
    }
}

impl TrainingParameters {
    /// Validate the training parameters
    pub fn validate(&self) -> Result<()> {
        let ppo = &self.ppo;
        check_nonzero("hidden_size", ppo.hidden_size)?;
        check_positive("learning_rate", ppo.learning_rate)?;
        check_proportion("gamma", ppo.gamma)?;
        check_proportion("gae_lambda", ppo.gae_lambda)?;
        check_positive("clip_range", ppo.clip_range)?;
        ensure!(
            ppo.value_coef.is_finite() && ppo.value_coef >= 0.0,
            "value_coef cannot be negative"
        );
        ensure!(
            ppo.entropy_coef.is_finite() && ppo.entropy_coef >= 0.0,
            "entropy_coef cannot be negative"
        );
        check_positive("max_grad_norm", ppo.max_grad_norm)?;
        check_nonzero("buffer_size", ppo.buffer_size)?;
        check_nonzero("batch_size", ppo.batch_size)?;
        check_nonzero("n_epochs", ppo.n_epochs)?;

        check_nonzero("episodes", self.episodes)?;
        check_nonzero("rollout_steps", self.rollout_steps)?;
        ensure!(
            self.rollout_steps <= ppo.buffer_size,
            "rollout_steps ({}) cannot be larger than buffer_size ({})",
            self.rollout_steps,
            ppo.buffer_size
        );
        if let Some(episode_length) = self.episode_length {
            check_nonzero("episode_length", episode_length)?;
        }
        if ppo.batch_size > self.rollout_steps {
            warn!(
                "batch_size ({}) is larger than rollout_steps ({}). Each update will use a single \
                minibatch.",
                ppo.batch_size, self.rollout_steps
            );
        }

        Ok(())
    }
}

impl ModelParameters {
    /// Read the model file from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    ///
    /// # Returns
    ///
    /// The model file contents as a [`ModelParameters`] struct, defaults if the file does not
    /// exist, or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<ModelParameters> {
        let file_path = model_dir.as_ref().join(MODEL_PARAMETERS_FILE_NAME);
        if !file_path.is_file() {
            return Ok(ModelParameters::default());
        }

        let model_params: ModelParameters = read_toml(&file_path)?;
        model_params
            .validate()
            .with_context(|| input_err_msg(file_path))?;

        Ok(model_params)
    }

    /// Validate parameters after reading in file
    fn validate(&self) -> Result<()> {
        self.simulation.validate()?;
        self.training.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    /// Helper function to assert validation result based on expected validity
    fn assert_validation_result(result: Result<()>, expected_valid: bool, value: f64) {
        if expected_valid {
            assert!(
                result.is_ok(),
                "Expected value {} to be valid, but got error: {:?}",
                value,
                result.err()
            );
        } else {
            assert!(
                result.is_err(),
                "Expected value {value} to be invalid, but it was accepted",
            );
        }
    }

    #[rstest]
    #[case(1.0, true)]
    #[case(0.5, true)]
    #[case(1440.0, true)]
    #[case(0.0, false)]
    #[case(-1.0, false)]
    #[case(1441.0, false)]
    #[case(f64::NAN, false)]
    #[case(f64::INFINITY, false)]
    fn test_check_dt(#[case] dt: f64, #[case] expected_valid: bool) {
        assert_validation_result(check_dt(dt), expected_valid, dt);
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(0.05, true)]
    #[case(1.0, true)]
    #[case(-0.1, false)]
    #[case(1.5, false)]
    #[case(f64::NAN, false)]
    fn test_check_proportion(#[case] value: f64, #[case] expected_valid: bool) {
        assert_validation_result(
            check_proportion("frequency_relaxation", value),
            expected_valid,
            value,
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(
            ModelParameters::from_path(dir.path()).unwrap(),
            ModelParameters::default()
        );
    }

    #[test]
    fn test_from_path() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MODEL_PARAMETERS_FILE_NAME),
            "[simulation]\ndt = 5.0\nseed = 7\n\n[training]\nlearning_rate = 0.001\nbuffer_size = 512\nrollout_steps = 256\nparallel = true\n",
        )
        .unwrap();

        let params = ModelParameters::from_path(dir.path()).unwrap();
        assert_eq!(params.simulation.dt, 5.0);
        assert_eq!(params.simulation.seed, 7);
        assert_eq!(params.simulation.target_hz, 60.0);
        assert_eq!(params.training.ppo.learning_rate, 0.001);
        assert_eq!(params.training.ppo.buffer_size, 512);
        assert_eq!(params.training.ppo.gamma, 0.99);
        assert_eq!(params.training.rollout_steps, 256);
        assert!(params.training.parallel);
    }

    #[test]
    fn test_rollout_larger_than_buffer() {
        let params = TrainingParameters {
            rollout_steps: 100,
            ppo: PpoConfig {
                buffer_size: 50,
                ..PpoConfig::default()
            },
            ..TrainingParameters::default()
        };
        assert_error!(
            params.validate(),
            "rollout_steps (100) cannot be larger than buffer_size (50)"
        );
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MODEL_PARAMETERS_FILE_NAME),
            "[simulation]\ndays = 0\n",
        )
        .unwrap();

        let result = ModelParameters::from_path(dir.path());
        let message = format!("{:?}", result.unwrap_err());
        assert!(message.contains("days cannot be zero"));
    }

    #[test]
    fn test_defaults_valid() {
        ModelParameters::default().validate().unwrap();
    }
}
