//! The command line interface for the simulation.
use crate::log;
use crate::model::Model;
use crate::output::{create_output_directory, get_output_dir, write_metadata};
use crate::settings::Settings;
use crate::simulation;
use crate::training::{Trainer, load_checkpoints};
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub mod example;
use example::ExampleSubcommands;
pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the simulation.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to write the state of every node at every tick to a CSV file
    #[arg(long)]
    pub write_node_states: bool,
}

/// Options for the train command
#[derive(Args, Default)]
pub struct TrainOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Folder of checkpoints from which to resume training
    #[arg(long, requires = "round")]
    pub resume_from: Option<PathBuf>,
    /// The training round of the checkpoints to resume from
    #[arg(long)]
    pub round: Option<u32>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a simulation model with rule-based agents.
    Run {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Train the agents of a model.
    Train {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other training options
        #[command(flatten)]
        opts: TrainOpts,
    },
    /// Manage example models.
    Example {
        /// The available subcommands for managing example models.
        #[command(subcommand)]
        subcommand: ExampleSubcommands,
    },
    /// Validate a model.
    Validate {
        /// The path to the model directory.
        model_dir: PathBuf,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { model_dir, opts } => handle_run_command(&model_dir, &opts, None),
            Self::Train { model_dir, opts } => handle_train_command(&model_dir, &opts, None),
            Self::Example { subcommand } => subcommand.execute(),
            Self::Validate { model_dir } => handle_validate_command(&model_dir, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start swinggrid
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ swinggrid --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        // Output program help in markdown format
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load program settings, if not provided
fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Initialise the program logger, unless this has already been done
fn init_logger(settings: &Settings, output_path: Option<&Path>) -> Result<()> {
    if log::is_logger_initialised() {
        return Ok(());
    }

    log::init(&settings.log_level, output_path).context("Failed to initialise logging.")
}

/// Create the output folder for a command, returning its path and whether it was overwritten
fn prepare_output_dir(
    model_path: &Path,
    output_dir: Option<&Path>,
    overwrite: bool,
) -> Result<(PathBuf, bool)> {
    let output_path = match output_dir {
        Some(path) => path.to_path_buf(),
        None => get_output_dir(model_path)?,
    };

    let overwritten = create_output_directory(&output_path, overwrite).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;

    Ok((output_path, overwritten))
}

/// Handle the `run` command.
pub fn handle_run_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;

    // These settings can be overridden by command-line arguments
    let overwrite = opts.overwrite || settings.overwrite;
    let write_node_states = opts.write_node_states || settings.write_node_states;

    let (output_path, overwritten) =
        prepare_output_dir(model_path, opts.output_dir.as_deref(), overwrite)?;
    init_logger(&settings, Some(&output_path))?;

    let model = Model::from_path(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwritten {
        warn!("Output folder will be overwritten");
    }

    write_metadata(
        &output_path,
        "run",
        model_path,
        model.parameters.simulation.seed,
    )?;
    simulation::run(&model, &output_path, write_node_states)?;
    info!("Simulation complete!");

    Ok(())
}

/// Handle the `train` command.
pub fn handle_train_command(
    model_path: &Path,
    opts: &TrainOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;
    let overwrite = opts.overwrite || settings.overwrite;
    let (output_path, overwritten) =
        prepare_output_dir(model_path, opts.output_dir.as_deref(), overwrite)?;
    init_logger(&settings, Some(&output_path))?;

    let model = Model::from_path(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    info!("Output folder: {}", output_path.display());
    if overwritten {
        warn!("Output folder will be overwritten");
    }

    let mut trainer = Trainer::new(&model)?;
    if let (Some(dir), Some(round)) = (&opts.resume_from, opts.round) {
        load_checkpoints(trainer.arena_mut(), dir, round)
            .context("Failed to load checkpoints.")?;
        info!("Resuming from round {round} checkpoints in {}", dir.display());
    }

    write_metadata(
        &output_path,
        "train",
        model_path,
        model.parameters.simulation.seed,
    )?;
    trainer.train(Some(&output_path))?;

    for (id, total) in trainer.evaluate()? {
        info!("Evaluation reward for agent {id}: {total:.3}");
    }
    info!("Training complete!");

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = load_settings(settings)?;

    // We won't save log files when running the validate command
    init_logger(&settings, None)?;

    let model = Model::from_path(model_path).context("Failed to validate model.")?;
    let grid = model.build_grid().context("Failed to validate model.")?;
    info!(
        "Model validation successful! {} nodes with a total inertia of {:.3}",
        grid.num_nodes(),
        grid.total_inertia()
    );

    Ok(())
}
