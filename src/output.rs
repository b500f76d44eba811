//! The module responsible for writing output data to disk.
use crate::agent::AgentKind;
use crate::grid::{NodeID, TickReport};
use crate::ppo::UpdateStats;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod metadata;
pub use metadata::write_metadata;

/// The root folder in which model-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "swinggrid_results";

/// The output file name for grid-wide values at every tick
const GRID_TICKS_FILE_NAME: &str = "grid_ticks.csv";

/// The output file name for the state of every node at every tick
const NODE_STATES_FILE_NAME: &str = "node_states.csv";

/// The output file name for training statistics
const TRAINING_STATS_FILE_NAME: &str = "training_stats.csv";

/// The folder within the output folder where checkpoints are saved
const CHECKPOINTS_DIR_NAME: &str = "checkpoints";

/// Get the default output folder for the model at the specified path
pub fn get_output_dir(model_dir: &Path) -> Result<PathBuf> {
    // Canonicalise in case the user has specified "."
    let model_dir = model_dir
        .canonicalize()
        .context("Could not resolve path to model")?;

    let model_name = model_dir
        .file_name()
        .context("Model cannot be in root folder")?
        .to_str()
        .context("Invalid chars in model dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, model_name].iter().collect())
}

/// The folder within an output folder where checkpoints are saved
pub fn get_checkpoints_dir(output_path: &Path) -> PathBuf {
    output_path.join(CHECKPOINTS_DIR_NAME)
}

/// Create a new output directory for the model, if it doesn't already exist.
///
/// If the folder exists and is not empty, it is only replaced if `allow_overwrite` is true.
///
/// # Returns
///
/// Whether an existing non-empty folder was deleted
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Please delete the folder or pass the \
            --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Represents a row in the grid ticks CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct GridTickRow {
    day: u32,
    tick: usize,
    time_of_day: f64,
    temperature: Option<f64>,
    frequency: f64,
    price: f64,
    total_supply: f64,
    total_demand: f64,
    perturbation: f64,
}

impl GridTickRow {
    fn new(day: u32, report: &TickReport) -> Self {
        Self {
            day,
            tick: report.tick,
            time_of_day: report.time_of_day,
            temperature: report.temperature,
            frequency: report.frequency,
            price: report.price,
            total_supply: report.total_supply,
            total_demand: report.total_demand,
            perturbation: report.perturbation,
        }
    }
}

/// Represents a row in the node states CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct NodeStateRow {
    day: u32,
    tick: usize,
    node_id: NodeID,
    power_injection: f64,
    net_transmission: f64,
    phase_offset: f64,
    phase_velocity: f64,
    soc: Option<f64>,
    reward: f64,
}

/// Writes the results of a simulation run to CSV files
pub struct DataWriter {
    ticks_writer: csv::Writer<File>,
    node_states_writer: Option<csv::Writer<File>>,
}

impl DataWriter {
    /// Open CSV files to write output data to
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `write_node_states` - Whether to also write the state of every node at every tick
    pub fn create(output_path: &Path, write_node_states: bool) -> Result<Self> {
        let new_writer = |file_name| {
            let file_path = output_path.join(file_name);
            csv::Writer::from_path(&file_path)
                .with_context(|| format!("Could not create {}", file_path.display()))
        };

        let node_states_writer = if write_node_states {
            Some(new_writer(NODE_STATES_FILE_NAME)?)
        } else {
            None
        };

        Ok(Self {
            ticks_writer: new_writer(GRID_TICKS_FILE_NAME)?,
            node_states_writer,
        })
    }

    /// Write the results of one tick
    pub fn write_tick(&mut self, day: u32, report: &TickReport) -> Result<()> {
        self.ticks_writer.serialize(GridTickRow::new(day, report))?;

        if let Some(writer) = &mut self.node_states_writer {
            for node in &report.nodes {
                writer.serialize(NodeStateRow {
                    day,
                    tick: report.tick,
                    node_id: node.node_id.clone(),
                    power_injection: node.power_injection,
                    net_transmission: node.net_transmission,
                    phase_offset: node.phase_offset,
                    phase_velocity: node.phase_velocity,
                    soc: node.soc,
                    reward: node.reward,
                })?;
            }
        }

        Ok(())
    }

    /// Flush the underlying streams
    pub fn flush(&mut self) -> Result<()> {
        self.ticks_writer.flush()?;
        if let Some(writer) = &mut self.node_states_writer {
            writer.flush()?;
        }

        Ok(())
    }
}

/// Represents a row in the training statistics CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct TrainingStatsRow {
    round: u32,
    agent_id: NodeID,
    kind: AgentKind,
    mean_reward: f64,
    total_loss: f64,
    policy_loss: f64,
    value_loss: f64,
    entropy: f64,
    approx_kl: f64,
    clip_fraction: f64,
    skipped: usize,
}

/// Writes per-agent statistics for every training round to a CSV file
pub struct TrainingStatsWriter {
    writer: csv::Writer<File>,
}

impl TrainingStatsWriter {
    /// Create the training statistics file in `output_path`
    pub fn create(output_path: &Path) -> Result<Self> {
        let file_path = output_path.join(TRAINING_STATS_FILE_NAME);
        let writer = csv::Writer::from_path(&file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;

        Ok(Self { writer })
    }

    /// Write the statistics for one agent after a training round
    pub fn write(
        &mut self,
        round: u32,
        agent_id: &NodeID,
        kind: AgentKind,
        mean_reward: f64,
        stats: &UpdateStats,
    ) -> Result<()> {
        self.writer.serialize(TrainingStatsRow {
            round,
            agent_id: agent_id.clone(),
            kind,
            mean_reward,
            total_loss: stats.total_loss,
            policy_loss: stats.policy_loss,
            value_loss: stats.value_loss,
            entropy: stats.entropy,
            approx_kl: stats.approx_kl,
            clip_fraction: stats.clip_fraction,
            skipped: stats.skipped,
        })?;

        Ok(())
    }

    /// Flush the underlying stream
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
