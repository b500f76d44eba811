//! Common functionality for swinggrid.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod agent;
pub mod cli;
pub mod grid;
pub mod id;
pub mod input;
pub mod log;
pub mod model;
pub mod output;
pub mod policy;
pub mod ppo;
pub mod settings;
pub mod simulation;
pub mod training;

#[cfg(test)]
mod fixture;

/// Get config dir for program.
///
/// On Linux this is `~/.config/swinggrid`.
pub fn get_swinggrid_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        panic!("Could not get user's config directory");
    };

    config_dir.push("swinggrid");
    config_dir
}
