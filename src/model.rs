//! Code for loading models from a model directory.
use crate::grid::Grid;
use crate::input::network::NetworkDescription;
use anyhow::Result;
use std::path::{Path, PathBuf};

pub mod parameters;
pub use parameters::{ModelParameters, SimulationParameters, TrainingParameters};

/// A model: a network to simulate and the parameters for simulating and training it
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Path to the model folder
    pub model_path: PathBuf,
    /// The nodes and connections of the grid
    pub network: NetworkDescription,
    /// Parameters from `grid.toml`
    pub parameters: ModelParameters,
}

impl Model {
    /// Read a model from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `model_dir` - Folder containing model configuration files
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Model> {
        let parameters = ModelParameters::from_path(&model_dir)?;
        let network = NetworkDescription::from_path(&model_dir)?;

        Ok(Model {
            model_path: model_dir.as_ref().to_path_buf(),
            network,
            parameters,
        })
    }

    /// Build a fresh grid for this model
    pub fn build_grid(&self) -> Result<Grid> {
        Grid::new(&self.network, self.parameters.simulation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::network_description;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    fn test_model_from_path(network_description: NetworkDescription) {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("network.json"),
            serde_json::to_string(&network_description).unwrap(),
        )
        .unwrap();

        let model = Model::from_path(dir.path()).unwrap();
        assert_eq!(model.network, network_description);
        assert_eq!(model.parameters, ModelParameters::default());

        let grid = model.build_grid().unwrap();
        assert_eq!(grid.num_nodes(), network_description.nodes.len());
    }

    #[test]
    fn test_model_missing_network() {
        let dir = tempdir().unwrap();
        assert!(Model::from_path(dir.path()).is_err());
    }
}
