//! Functionality for running the grid simulation with rule-based agents.
use crate::grid::TickReport;
use crate::model::Model;
use crate::output::DataWriter;
use anyhow::Result;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;

/// Headline figures for one simulated day
#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    /// The day, counting from one
    pub day: u32,
    /// Number of ticks simulated
    pub ticks: usize,
    /// Mean electricity price ($/MWh)
    pub mean_price: f64,
    /// Largest absolute deviation of the frequency from its target (Hz)
    pub max_frequency_deviation: f64,
    /// Sum of every agent's rewards
    pub total_reward: f64,
}

impl DaySummary {
    fn from_reports(day: u32, reports: &[TickReport], target_hz: f64) -> Self {
        let ticks = reports.len();
        let mean_price = if ticks == 0 {
            0.0
        } else {
            reports.iter().map(|r| r.price).sum::<f64>() / ticks as f64
        };
        let max_frequency_deviation = reports
            .iter()
            .map(|r| (r.frequency - target_hz).abs())
            .fold(0.0, f64::max);
        let total_reward = reports
            .iter()
            .flat_map(|r| &r.nodes)
            .map(|node| node.reward)
            .sum();

        Self {
            day,
            ticks,
            mean_price,
            max_frequency_deviation,
            total_reward,
        }
    }
}

/// Run the simulation.
///
/// Every day is a separate episode with its own random temperature curve, starting from rest with
/// fresh agent histories. Results are written to CSV files in `output_path`.
///
/// # Arguments:
///
/// * `model` - The model to run
/// * `output_path` - The folder to which output files will be written
/// * `write_node_states` - Whether to write the state of every node at every tick
pub fn run(model: &Model, output_path: &Path, write_node_states: bool) -> Result<Vec<DaySummary>> {
    let params = &model.parameters.simulation;
    let mut grid = model.build_grid()?;
    let mut weather_rng = StdRng::seed_from_u64(params.seed);
    let mut writer = DataWriter::create(output_path, write_node_states)?;
    info!(
        "Simulating {} nodes for {} day(s) with {} ticks per day",
        grid.num_nodes(),
        params.days,
        grid.ticks_per_day()
    );

    let mut summaries = Vec::with_capacity(params.days as usize);
    for day in 1..=params.days {
        if day > 1 {
            grid.reset_episode();
        }
        let reports = grid.simulate_day(&mut weather_rng);
        for report in &reports {
            writer.write_tick(day, report)?;
        }

        let summary = DaySummary::from_reports(day, &reports, params.target_hz);
        info!(
            "Day {day}: mean price {:.2} $/MWh, max frequency deviation {:.4} Hz, total reward \
            {:.2}",
            summary.mean_price, summary.max_frequency_deviation, summary.total_reward
        );
        summaries.push(summary);
    }
    writer.flush()?;

    Ok(summaries)
}
