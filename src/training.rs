//! Training agents' policies by running the grid and updating each agent's learner.
//!
//! A training round collects a fixed number of ticks of experience with every agent sampling its
//! actions from its policy, then updates every learner on what it collected. Episodes last one
//! simulated day unless configured otherwise. At the end of an episode the grid is returned to rest
//! and a new temperature curve is drawn.
use crate::grid::{Grid, MINUTES_PER_DAY, NodeID, TemperatureCurve};
use crate::model::{Model, TrainingParameters};
use crate::output::{TrainingStatsWriter, get_checkpoints_dir};
use crate::ppo::{LearnerArena, UpdateStats};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::path::Path;

pub mod checkpoint;
pub use checkpoint::{Checkpoint, load_checkpoints, save_checkpoints};

/// What happened during one rollout
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutSummary {
    /// Number of ticks collected
    pub ticks: usize,
    /// Number of episodes which ended during the rollout
    pub episodes_completed: usize,
    /// Mean reward per tick for each agent
    pub mean_rewards: IndexMap<NodeID, f64>,
    /// Mean absolute deviation of the frequency from its target (Hz)
    pub mean_frequency_deviation: f64,
}

/// The results of one training round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// The round, counting from one
    pub round: u32,
    /// The experience collected
    pub rollout: RolloutSummary,
    /// Update statistics for each agent
    pub updates: IndexMap<NodeID, UpdateStats>,
}

/// Drives a grid with learned policies and trains them
pub struct Trainer {
    grid: Grid,
    arena: LearnerArena,
    params: TrainingParameters,
    episode_length: usize,
    episode_tick: usize,
    seed: u64,
    weather_rng: StdRng,
    temperature: TemperatureCurve,
}

impl Trainer {
    /// Create a trainer for a model, with freshly initialised learners
    pub fn new(model: &Model) -> Result<Self> {
        let grid = model.build_grid()?;
        let params = model.parameters.training.clone();
        let seed = model.parameters.simulation.seed;
        let arena = LearnerArena::for_grid(&grid, &params.ppo, seed);
        let episode_length = params
            .episode_length
            .unwrap_or_else(|| grid.ticks_per_day());

        let mut weather_rng = StdRng::seed_from_u64(seed);
        let temperature = TemperatureCurve::random(&mut weather_rng, grid.params().dt);

        Ok(Self {
            grid,
            arena,
            params,
            episode_length,
            episode_tick: 0,
            seed,
            weather_rng,
            temperature,
        })
    }

    /// The grid being trained on
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The agents' learners
    pub fn arena(&self) -> &LearnerArena {
        &self.arena
    }

    /// The agents' learners, mutably
    pub fn arena_mut(&mut self) -> &mut LearnerArena {
        &mut self.arena
    }

    /// Ticks per episode
    pub fn episode_length(&self) -> usize {
        self.episode_length
    }

    /// Temperature and time of day for the current tick of the episode
    fn conditions(&self) -> (f64, f64) {
        let minute = (self.episode_tick as f64 * self.grid.params().dt) % MINUTES_PER_DAY;
        (self.temperature.at(minute), minute / MINUTES_PER_DAY)
    }

    /// Start a new episode with the grid at rest and a new temperature curve
    fn start_episode(&mut self) {
        self.grid.reset_episode();
        self.episode_tick = 0;
        self.temperature = TemperatureCurve::random(&mut self.weather_rng, self.grid.params().dt);
    }

    /// Run the grid for `rollout_steps` ticks, storing every agent's transitions
    pub fn collect_rollout(&mut self) -> Result<RolloutSummary> {
        let steps = self.params.rollout_steps;
        let target_hz = self.grid.params().target_hz;
        let mut reward_sums: IndexMap<NodeID, f64> =
            self.grid.node_ids().map(|id| (id.clone(), 0.0)).collect();
        let mut deviation_sum = 0.0;
        let mut episodes_completed = 0;

        for _ in 0..steps {
            let (temperature, time_of_day) = self.conditions();
            let state = self.grid.shared_state(Some(temperature), time_of_day);
            let observations = self.grid.observations(&state);
            let samples = self.arena.act(&observations)?;
            let actions = samples
                .iter()
                .map(|(id, sample)| (id.clone(), sample.action))
                .collect();
            let report = self
                .grid
                .time_step_with_actions(Some(temperature), time_of_day, &actions);
            deviation_sum += (report.frequency - target_hz).abs();

            self.episode_tick += 1;
            let done = self.episode_tick >= self.episode_length;
            for (id, sample) in &samples {
                let reward = report
                    .reward(id)
                    .with_context(|| format!("No reward for agent {id}"))?;
                reward_sums[id] += reward;
                let learner = self
                    .arena
                    .get_mut(id)
                    .with_context(|| format!("No learner for agent {id}"))?;
                learner.store_transition(&observations[id], sample, reward, done)?;
            }

            if done {
                episodes_completed += 1;
                self.start_episode();
            }
        }

        let ticks = steps.max(1) as f64;
        Ok(RolloutSummary {
            ticks: steps,
            episodes_completed,
            mean_rewards: reward_sums
                .into_iter()
                .map(|(id, sum)| (id, sum / ticks))
                .collect(),
            mean_frequency_deviation: deviation_sum / ticks,
        })
    }

    /// Value estimates for the current state, used to bootstrap the returns of an unfinished
    /// episode
    fn bootstrap_values(&self) -> IndexMap<NodeID, f64> {
        let (temperature, time_of_day) = self.conditions();
        let state = self.grid.shared_state(Some(temperature), time_of_day);
        self.grid
            .observations(&state)
            .into_iter()
            .filter_map(|(id, observation)| {
                let value = self.arena.get(&id)?.value(&observation);
                Some((id, value))
            })
            .collect()
    }

    /// Update every learner from its collected transitions
    pub fn update_all(&mut self) -> IndexMap<NodeID, UpdateStats> {
        let next_values = self.bootstrap_values();
        self.arena.update_all(&next_values, self.params.parallel)
    }

    /// Run every training round.
    ///
    /// If `output_path` is given, statistics are written there and checkpoints are saved every
    /// `checkpoint_interval` rounds and after the final round.
    pub fn train(&mut self, output_path: Option<&Path>) -> Result<Vec<RoundSummary>> {
        let mut stats_writer = output_path.map(TrainingStatsWriter::create).transpose()?;
        let checkpoints_dir = output_path.map(get_checkpoints_dir);
        if let Some(dir) = &checkpoints_dir {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }

        let rounds = self.params.episodes;
        let mut summaries = Vec::with_capacity(rounds as usize);
        for round in 1..=rounds {
            let rollout = self.collect_rollout()?;
            let updates = self.update_all();

            let num_agents = rollout.mean_rewards.len().max(1) as f64;
            let mean_reward = rollout.mean_rewards.values().sum::<f64>() / num_agents;
            info!(
                "Round {round}/{rounds}: mean reward {mean_reward:.4}, mean frequency deviation \
                {:.4} Hz, {} episode(s) completed",
                rollout.mean_frequency_deviation, rollout.episodes_completed
            );

            if let Some(writer) = &mut stats_writer {
                for (id, stats) in &updates {
                    let kind = self.grid.node(id)?.agent.kind();
                    writer.write(round, id, kind, rollout.mean_rewards[id], stats)?;
                }
                writer.flush()?;
            }

            let interval = self.params.checkpoint_interval;
            let is_checkpoint_round = round == rounds || (interval > 0 && round % interval == 0);
            if let (Some(dir), true) = (&checkpoints_dir, is_checkpoint_round) {
                save_checkpoints(&self.arena, dir, round)?;
                info!("Saved checkpoints for round {round} to {}", dir.display());
            }

            summaries.push(RoundSummary {
                round,
                rollout,
                updates,
            });
        }

        Ok(summaries)
    }

    /// Run one episode with every agent taking its mean action, without training.
    ///
    /// The grid is returned to rest before and after. The temperature curve depends only on the
    /// seed, so repeated evaluations of the same policies give the same result.
    ///
    /// # Returns
    ///
    /// The total reward of each agent over the episode
    pub fn evaluate(&mut self) -> Result<IndexMap<NodeID, f64>> {
        self.grid.reset_episode();
        self.episode_tick = 0;
        let dt = self.grid.params().dt;
        self.temperature = TemperatureCurve::random(&mut StdRng::seed_from_u64(self.seed), dt);
        let mut totals: IndexMap<NodeID, f64> =
            self.grid.node_ids().map(|id| (id.clone(), 0.0)).collect();

        for _ in 0..self.episode_length {
            let (temperature, time_of_day) = self.conditions();
            let state = self.grid.shared_state(Some(temperature), time_of_day);
            let actions = self
                .arena
                .act_deterministic(&self.grid.observations(&state))?;
            let report = self
                .grid
                .time_step_with_actions(Some(temperature), time_of_day, &actions);
            for node in &report.nodes {
                totals[&node.node_id] += node.reward;
            }
            self.episode_tick += 1;
        }
        self.start_episode();

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::network_description;
    use crate::input::network::NetworkDescription;
    use crate::model::{ModelParameters, SimulationParameters};
    use crate::ppo::PpoConfig;
    use rstest::{fixture, rstest};
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[fixture]
    fn model(network_description: NetworkDescription) -> Model {
        Model {
            model_path: PathBuf::from("test"),
            network: network_description,
            parameters: ModelParameters {
                simulation: SimulationParameters {
                    dt: 60.0,
                    ..SimulationParameters::default()
                },
                training: TrainingParameters {
                    ppo: PpoConfig {
                        hidden_size: 8,
                        buffer_size: 32,
                        batch_size: 8,
                        n_epochs: 2,
                        ..PpoConfig::default()
                    },
                    episodes: 3,
                    rollout_steps: 30,
                    checkpoint_interval: 2,
                    ..TrainingParameters::default()
                },
            },
        }
    }

    #[rstest]
    fn test_collect_rollout(model: Model) {
        let mut trainer = Trainer::new(&model).unwrap();
        assert_eq!(trainer.episode_length(), 24);

        let summary = trainer.collect_rollout().unwrap();
        assert_eq!(summary.ticks, 30);
        assert_eq!(summary.episodes_completed, 1);
        assert_eq!(summary.mean_rewards.len(), 3);
        assert!(
            summary
                .mean_rewards
                .values()
                .all(|r| (-1.0..=1.0).contains(r))
        );

        for learner in trainer.arena().iter() {
            let batch = learner.buffer().get();
            assert_eq!(batch.len(), 30);
            // The episode ended on the 24th tick
            let done_ticks: Vec<_> = (0..30).filter(|&i| batch.dones[i]).collect();
            assert_eq!(done_ticks, vec![23]);
        }
    }

    #[rstest]
    fn test_episode_length_override(mut model: Model) {
        model.parameters.training.episode_length = Some(10);
        let mut trainer = Trainer::new(&model).unwrap();
        let summary = trainer.collect_rollout().unwrap();
        assert_eq!(summary.episodes_completed, 3);
    }

    #[rstest]
    fn test_train(model: Model) {
        let dir = tempdir().unwrap();
        let mut trainer = Trainer::new(&model).unwrap();
        let summaries = trainer.train(Some(dir.path())).unwrap();

        assert_eq!(summaries.len(), 3);
        for summary in &summaries {
            assert_eq!(summary.updates.len(), 3);
            for stats in summary.updates.values() {
                assert_eq!(stats.skipped, 0);
                assert!(stats.total_loss.is_finite());
            }
        }
        for learner in trainer.arena().iter() {
            assert_eq!(learner.training_step, 3);
            assert!(learner.buffer().is_empty());
        }

        let stats = fs::read_to_string(dir.path().join("training_stats.csv")).unwrap();
        assert_eq!(stats.lines().count(), 1 + 3 * 3);

        // Checkpoints at round 2 and the final round
        let checkpoints = get_checkpoints_dir(dir.path());
        assert!(checkpoints.join("solar_episode_2.json").is_file());
        assert!(checkpoints.join("store_episode_3.json").is_file());
        assert!(!checkpoints.join("home_episode_1.json").exists());
    }

    #[rstest]
    fn test_train_is_reproducible(model: Model) {
        let mut trainer1 = Trainer::new(&model).unwrap();
        let mut trainer2 = Trainer::new(&model).unwrap();
        let summaries1 = trainer1.train(None).unwrap();
        let summaries2 = trainer2.train(None).unwrap();
        assert_eq!(summaries1, summaries2);
    }

    #[rstest]
    fn test_evaluate(model: Model) {
        let mut trainer = Trainer::new(&model).unwrap();
        let totals = trainer.evaluate().unwrap();
        assert_eq!(totals.len(), 3);
        assert!(totals.values().all(|total| total.abs() <= 24.0));

        // Evaluation is deterministic
        assert_eq!(trainer.evaluate().unwrap(), totals);
        assert_eq!(trainer.grid().frequency(), model.parameters.simulation.target_hz);
    }
}
