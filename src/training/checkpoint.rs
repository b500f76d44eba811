//! Saving and loading the state of learners.
use crate::agent::AgentKind;
use crate::grid::NodeID;
use crate::input::read_json;
use crate::policy::{ActorCritic, Adam};
use crate::ppo::{LearnerArena, PpoLearner};
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// The saved state of one learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The ID of the agent
    pub agent_id: NodeID,
    /// The kind of agent
    pub kind: AgentKind,
    /// Number of updates the learner had applied
    pub training_step: u64,
    /// Policy parameters
    pub policy: ActorCritic,
    /// Optimiser state
    pub optimiser: Adam,
}

impl Checkpoint {
    /// Capture the state of a learner
    pub fn from_learner(learner: &PpoLearner) -> Self {
        Self {
            agent_id: learner.agent_id.clone(),
            kind: learner.kind,
            training_step: learner.training_step,
            policy: learner.policy.clone(),
            optimiser: learner.optimiser.clone(),
        }
    }

    /// Restore a learner to the saved state
    pub fn restore(self, learner: &mut PpoLearner) -> Result<()> {
        ensure!(
            self.agent_id == learner.agent_id,
            "Checkpoint is for agent {} but learner is for agent {}",
            self.agent_id,
            learner.agent_id
        );
        ensure!(
            self.kind == learner.kind,
            "Checkpoint for agent {} is for a {} but the agent is a {}",
            self.agent_id,
            self.kind,
            learner.kind
        );
        ensure!(
            self.policy.observation_size() == learner.kind.observation_size(),
            "Checkpoint for agent {} has the wrong observation size",
            self.agent_id
        );

        learner.training_step = self.training_step;
        learner.policy = self.policy;
        learner.optimiser = self.optimiser;

        Ok(())
    }

    /// Write the checkpoint to a JSON file
    pub fn save(&self, file_path: &Path) -> Result<()> {
        let file = File::create(file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("Could not write {}", file_path.display()))?;

        Ok(())
    }

    /// Read a checkpoint from a JSON file
    pub fn load(file_path: &Path) -> Result<Self> {
        read_json(file_path)
    }
}

/// Path of the checkpoint for an agent after the given training round
pub fn checkpoint_path(dir: &Path, agent_id: &NodeID, round: u32) -> PathBuf {
    dir.join(format!("{agent_id}_episode_{round}.json"))
}

/// Save a checkpoint for every learner in `dir`
pub fn save_checkpoints(arena: &LearnerArena, dir: &Path, round: u32) -> Result<()> {
    for learner in arena.iter() {
        Checkpoint::from_learner(learner).save(&checkpoint_path(dir, &learner.agent_id, round))?;
    }

    Ok(())
}

/// Restore every learner from its checkpoint in `dir`
pub fn load_checkpoints(arena: &mut LearnerArena, dir: &Path, round: u32) -> Result<()> {
    for learner in arena.iter_mut() {
        let file_path = checkpoint_path(dir, &learner.agent_id, round);
        Checkpoint::load(&file_path)?
            .restore(learner)
            .with_context(|| format!("Could not restore from {}", file_path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, network_description};
    use crate::grid::Grid;
    use crate::input::network::NetworkDescription;
    use crate::model::SimulationParameters;
    use crate::ppo::PpoConfig;
    use float_cmp::assert_approx_eq;
    use rstest::{fixture, rstest};
    use tempfile::tempdir;

    fn config() -> PpoConfig {
        PpoConfig {
            hidden_size: 4,
            ..PpoConfig::default()
        }
    }

    #[fixture]
    fn arena(network_description: NetworkDescription) -> LearnerArena {
        let grid = Grid::new(&network_description, SimulationParameters::default()).unwrap();
        LearnerArena::for_grid(&grid, &config(), 9)
    }

    #[test]
    fn test_checkpoint_path() {
        assert_eq!(
            checkpoint_path(Path::new("out"), &"home".into(), 3),
            Path::new("out").join("home_episode_3.json")
        );
    }

    #[rstest]
    fn test_save_and_load(arena: LearnerArena) {
        let dir = tempdir().unwrap();
        save_checkpoints(&arena, dir.path(), 1).unwrap();
        for learner in arena.iter() {
            assert!(checkpoint_path(dir.path(), &learner.agent_id, 1).is_file());
        }

        // Learners with a different seed have different policies until restored
        let grid_ids: Vec<_> = arena.iter().map(|l| l.agent_id.clone()).collect();
        let mut other = arena.clone();
        for learner in other.iter_mut() {
            *learner = PpoLearner::new(learner.agent_id.clone(), learner.kind, &config(), 100);
        }
        load_checkpoints(&mut other, dir.path(), 1).unwrap();

        let observation = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7];
        for id in &grid_ids {
            let original = arena.get(id).unwrap();
            let restored = other.get(id).unwrap();
            let obs = &observation[..original.kind.observation_size()];
            assert_approx_eq!(
                f64,
                restored.act_deterministic(obs),
                original.act_deterministic(obs),
                epsilon = 1e-12
            );
            assert_eq!(restored.optimiser.steps(), original.optimiser.steps());
        }
    }

    #[rstest]
    fn test_restore_wrong_agent(arena: LearnerArena) {
        let solar = arena.get(&"solar".into()).unwrap();
        let mut home = arena.get(&"home".into()).unwrap().clone();
        assert_error!(
            Checkpoint::from_learner(solar).restore(&mut home),
            "Checkpoint is for agent solar but learner is for agent home"
        );
    }

    #[rstest]
    fn test_restore_wrong_kind(arena: LearnerArena) {
        let mut checkpoint = Checkpoint::from_learner(arena.get(&"home".into()).unwrap());
        let mut home = arena.get(&"home".into()).unwrap().clone();
        checkpoint.kind = AgentKind::Business;
        assert_error!(
            checkpoint.restore(&mut home),
            "Checkpoint for agent home is for a business but the agent is a consumer"
        );
    }

    #[test]
    fn test_load_missing() {
        let dir = tempdir().unwrap();
        assert!(Checkpoint::load(&dir.path().join("nothing.json")).is_err());
    }
}
