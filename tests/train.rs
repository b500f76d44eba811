//! Integration tests for the `train` command.
use std::fs;
use std::path::PathBuf;
use swinggrid::cli::{TrainOpts, handle_train_command};
use swinggrid::settings::Settings;
use tempfile::tempdir;

/// Get the path to a demo model
fn get_model_dir(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "demos", name].iter().collect()
}

/// Train the simple demo model, then resume from its checkpoints
#[test]
fn test_handle_train_command() {
    unsafe { std::env::set_var("SWINGGRID_LOG_LEVEL", "off") };
    let model_dir = get_model_dir("simple");

    let output_dir = tempdir().unwrap();
    let opts = TrainOpts {
        output_dir: Some(output_dir.path().to_path_buf()),
        ..TrainOpts::default()
    };
    handle_train_command(&model_dir, &opts, Some(Settings::default())).unwrap();

    // Three rounds for four agents, plus a header
    let stats = fs::read_to_string(output_dir.path().join("training_stats.csv")).unwrap();
    assert_eq!(stats.lines().count(), 1 + 3 * 4);

    let checkpoints = output_dir.path().join("checkpoints");
    for agent in ["solar_farm", "gas_plant", "houses", "community_battery"] {
        assert!(checkpoints.join(format!("{agent}_episode_2.json")).is_file());
        assert!(checkpoints.join(format!("{agent}_episode_3.json")).is_file());
    }

    let resumed_dir = tempdir().unwrap();
    let opts = TrainOpts {
        output_dir: Some(resumed_dir.path().to_path_buf()),
        resume_from: Some(checkpoints),
        round: Some(3),
        ..TrainOpts::default()
    };
    handle_train_command(&model_dir, &opts, Some(Settings::default())).unwrap();
    assert!(resumed_dir.path().join("training_stats.csv").is_file());
}
