//! Fixtures for tests
use crate::agent::SharedState;
use crate::input::network::{
    ConnectionDescription, ExtraFields, NetworkDescription, NodeDescription, NodeSettings,
};
use rstest::fixture;
use serde_json::Value;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A node with only its type and power specified
pub fn node_description(id: &str, node_type: &str, power: f64) -> NodeDescription {
    NodeDescription {
        id: id.into(),
        node_type: node_type.to_string(),
        settings: NodeSettings {
            power,
            ..NodeSettings::default()
        },
        extra: ExtraFields::new(),
    }
}

fn connection(id: &str, from: &str, to: &str, power: f64) -> ConnectionDescription {
    ConnectionDescription {
        id: id.into(),
        from: from.into(),
        to: to.into(),
        power,
        transmission_factor: None,
        extra: ExtraFields::new(),
    }
}

/// A generator, a household and a battery connected in a line
#[fixture]
pub fn network_description() -> NetworkDescription {
    let mut solar = node_description("solar", "solar-generator", 100.0);
    solar.settings.inertia = Some(2.0);
    solar.settings.friction = Some(0.1);
    solar.extra.insert("x".into(), Value::from(10));

    let mut home = node_description("home", "consumer", 40.0);
    home.settings.inertia = Some(1.0);
    home.settings.friction = Some(0.2);

    let mut store = node_description("store", "battery", 100.0);
    store.settings.inertia = Some(1.5);
    store.settings.friction = Some(0.1);
    store.settings.charge_rate = Some(25.0);
    store.settings.soc = Some(0.5);

    let mut solar_home = connection("solar-home", "solar", "home", 50.0);
    solar_home.transmission_factor = Some(1.0);

    NetworkDescription {
        nodes: vec![solar, home, store],
        connections: vec![solar_home, connection("home-store", "home", "store", 30.0)],
    }
}

/// Grid conditions at midday with the frequency on target and the price at its base
#[fixture]
pub fn shared_state() -> SharedState {
    SharedState {
        frequency: 60.0,
        target_frequency: 60.0,
        avg_cost: 50.0,
        prev_cost: None,
        base_price: 50.0,
        time_of_day: 0.5,
        temperature: Some(20.0),
        dt: 1.0,
    }
}
