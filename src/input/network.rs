//! Code for reading and validating network descriptions.
//!
//! A network description lists the nodes of the grid, each with an agent type and settings, plus
//! the connections between them. The same structures are returned when querying the state of a
//! running grid.
use super::{deserialise_optional_proportion, input_err_msg, read_json};
use crate::agent::CostFunctionKind;
use crate::grid::{ConnectionID, NodeID};
use anyhow::{Context, Result, ensure};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

const NETWORK_FILE_NAME: &str = "network.json";

/// Any fields of a node or connection which are not used by the simulation (e.g. layout hints)
pub type ExtraFields = Map<String, Value>;

/// The nodes and connections making up a grid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkDescription {
    /// The nodes in the network
    pub nodes: Vec<NodeDescription>,
    /// The connections between nodes
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
}

/// Network files may optionally wrap the description in a `simulation` object
#[derive(Deserialize)]
#[serde(untagged)]
enum NetworkFile {
    Wrapped { simulation: NetworkDescription },
    Bare(NetworkDescription),
}

/// A single node and the agent which controls it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Unique ID for the node
    pub id: NodeID,
    /// The node type, which determines the kind of agent (e.g. `solar-generator`, `battery`)
    #[serde(rename = "type")]
    pub node_type: String,
    /// Physical and economic parameters
    pub settings: NodeSettings,
    /// Unrecognised fields, preserved so that descriptions round trip
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Settings for a node.
///
/// `power` is interpreted according to the agent type: maximum output for producers, baseline
/// demand for consumers and businesses and energy capacity for batteries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Rated power of the node (MW, or MWh for batteries)
    pub power: f64,
    /// Rotational inertia for the swing equation. Drawn at random if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
    /// Damping for the swing equation. Drawn at random if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friction: Option<f64>,
    /// Maximum charge/discharge rate for batteries (MW)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_rate: Option<f64>,
    /// Initial state of charge for batteries
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialise_optional_proportion"
    )]
    pub soc: Option<f64>,
    /// Round-trip efficiency for batteries
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialise_optional_proportion"
    )]
    pub efficiency: Option<f64>,
    /// The shape of the agent's cost curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_function: Option<CostFunctionKind>,
    /// Coefficient for the cost curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_coefficient: Option<f64>,
}

/// A transmission line between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    /// Unique ID for the connection
    pub id: ConnectionID,
    /// The node at which positive flow originates
    pub from: NodeID,
    /// The other endpoint
    pub to: NodeID,
    /// Maximum power which can be transmitted (MW)
    #[serde(alias = "capacity")]
    pub power: f64,
    /// Coupling gain between the phases of the two endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission_factor: Option<f64>,
    /// Unrecognised fields, preserved so that descriptions round trip
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl NodeDescription {
    /// Check that the node's settings are physically meaningful
    pub fn validate(&self) -> Result<()> {
        let settings = &self.settings;
        ensure!(
            settings.power.is_finite() && settings.power >= 0.0,
            "Node {}: power must be a finite, non-negative number",
            self.id
        );
        if let Some(inertia) = settings.inertia {
            ensure!(
                inertia.is_finite() && inertia > 0.0,
                "Node {}: inertia must be greater than zero",
                self.id
            );
        }
        if let Some(friction) = settings.friction {
            ensure!(
                friction.is_finite() && friction >= 0.0,
                "Node {}: friction cannot be negative",
                self.id
            );
        }
        if let Some(charge_rate) = settings.charge_rate {
            ensure!(
                charge_rate.is_finite() && charge_rate >= 0.0,
                "Node {}: charge_rate cannot be negative",
                self.id
            );
        }
        for (name, value) in [("soc", settings.soc), ("efficiency", settings.efficiency)] {
            if let Some(value) = value {
                ensure!(
                    (0.0..=1.0).contains(&value),
                    "Node {}: {name} must be between 0 and 1",
                    self.id
                );
            }
        }

        Ok(())
    }
}

impl ConnectionDescription {
    /// Check that the connection's parameters are valid
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.power.is_finite() && self.power > 0.0,
            "Connection {}: capacity must be greater than zero",
            self.id
        );
        ensure!(
            self.from != self.to,
            "Connection {}: a node cannot be connected to itself",
            self.id
        );
        if let Some(factor) = self.transmission_factor {
            ensure!(
                factor.is_finite(),
                "Connection {}: transmission_factor must be finite",
                self.id
            );
        }

        Ok(())
    }
}

impl NetworkDescription {
    /// Check the description as a whole.
    ///
    /// IDs must be unique and connections may only reference nodes which exist.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.nodes.is_empty(), "Network must contain at least one node");

        let mut node_ids = IndexSet::new();
        for node in &self.nodes {
            node.validate()?;
            ensure!(
                node_ids.insert(node.id.clone()),
                "Duplicate node ID {}",
                node.id
            );
        }

        let mut connection_ids = IndexSet::new();
        for connection in &self.connections {
            connection.validate()?;
            ensure!(
                connection_ids.insert(connection.id.clone()),
                "Duplicate connection ID {}",
                connection.id
            );
            for endpoint in [&connection.from, &connection.to] {
                ensure!(
                    node_ids.contains(endpoint),
                    "Connection {} references unknown node {endpoint}",
                    connection.id
                );
            }
        }

        Ok(())
    }

    /// Parse a network description from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let network = match serde_json::from_str(json)? {
            NetworkFile::Wrapped { simulation } => simulation,
            NetworkFile::Bare(network) => network,
        };
        network.validate()?;

        Ok(network)
    }

    /// Read the network description from the model directory
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let file_path = model_dir.as_ref().join(NETWORK_FILE_NAME);
        let network = match read_json(&file_path)? {
            NetworkFile::Wrapped { simulation } => simulation,
            NetworkFile::Bare(network) => network,
        };
        network
            .validate()
            .with_context(|| input_err_msg(&file_path))?;

        Ok(network)
    }
}
