//! Integration tests for loading the demo models.
use std::path::PathBuf;
use swinggrid::agent::AgentKind;
use swinggrid::grid::NodeID;
use swinggrid::model::Model;

/// Get the path to a demo model
fn get_model_dir(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "demos", name].iter().collect()
}

#[test]
fn test_load_simple() {
    let model = Model::from_path(get_model_dir("simple")).unwrap();
    assert_eq!(model.parameters.simulation.dt, 15.0);
    assert_eq!(model.parameters.training.rollout_steps, 96);

    let grid = model.build_grid().unwrap();
    assert_eq!(grid.num_nodes(), 4);
    assert_eq!(grid.ticks_per_day(), 96);
    assert_eq!(grid.total_inertia(), 9.5);
}

#[test]
fn test_load_mixed() {
    let model = Model::from_path(get_model_dir("mixed")).unwrap();
    let grid = model.build_grid().unwrap();
    assert_eq!(grid.num_nodes(), 9);

    let kind = |id: &str| grid.node(&NodeID::from(id)).unwrap().agent.kind();
    assert_eq!(kind("solar_roofs"), AgentKind::Producer);
    assert_eq!(kind("office_park"), AgentKind::Business);
    assert_eq!(kind("grid_storage"), AgentKind::Battery);
    assert_eq!(kind("street_lights"), AgentKind::Consumer);

    // Missing inertia and friction are drawn from the model's seed
    let other = model.build_grid().unwrap();
    assert_eq!(grid.get_network_state(), other.get_network_state());
    let solar = grid.get_node_state(&"solar_roofs".into()).unwrap();
    assert!((0.0..1.0).contains(&solar.settings.inertia.unwrap()));
}
