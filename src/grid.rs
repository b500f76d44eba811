//! The power grid: a network of nodes coupled by transmission lines.
//!
//! Every node integrates its own swing equation, driven by the power injected by its agent and the
//! power exchanged with its neighbours. The grid frequency responds to the inertia-weighted
//! imbalance of transmitted power and relaxes back towards its target.
//!
//! A tick is computed in two phases. All branch flows are first computed from the phases at the
//! start of the tick and only then are the nodes advanced, so the result does not depend on the
//! order in which nodes are visited.
use crate::agent::{MarketSnapshot, SharedState};
use crate::id::{IDCollection, define_id_type};
use crate::input::network::{ConnectionDescription, NetworkDescription, NodeDescription};
use crate::model::SimulationParameters;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use log::warn;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

mod branch;
mod node;
mod price;
mod temperature;
pub use branch::Branch;
pub use node::Node;
pub use price::calculate_electricity_price;
pub use temperature::{MINUTES_PER_DAY, TemperatureCurve};

define_id_type! {NodeID}
define_id_type! {ConnectionID}

/// Values of `friction * dt` at or above this make the integrator unstable
const STABILITY_LIMIT: f64 = 2.0;

/// The state of a single node at the end of a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    /// The node's ID
    pub node_id: NodeID,
    /// Power injected by the node's agent (MW)
    pub power_injection: f64,
    /// Net power received through branches (MW)
    pub net_transmission: f64,
    /// Phase angle (radians)
    pub phase_offset: f64,
    /// Phase velocity
    pub phase_velocity: f64,
    /// Battery state of charge, if the node is a battery
    pub soc: Option<f64>,
    /// The reward given to the node's agent
    pub reward: f64,
}

/// A summary of a single tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Number of ticks since the grid was created
    pub tick: usize,
    /// Fraction of the day elapsed
    pub time_of_day: f64,
    /// Ambient temperature (°C)
    pub temperature: Option<f64>,
    /// Grid frequency at the end of the tick (Hz)
    pub frequency: f64,
    /// Price after agents acted ($/MWh)
    pub price: f64,
    /// Total generation (MW)
    pub total_supply: f64,
    /// Total consumption (MW)
    pub total_demand: f64,
    /// Inertia-weighted mean of the nodes' net transmission
    pub perturbation: f64,
    /// Per-node state, in the order nodes were added
    pub nodes: Vec<NodeSnapshot>,
}

impl TickReport {
    /// The reward received by the given node's agent on this tick
    pub fn reward(&self, id: &NodeID) -> Option<f64> {
        self.nodes
            .iter()
            .find(|node| &node.node_id == id)
            .map(|node| node.reward)
    }
}

/// A simulated power grid
#[derive(Debug, Clone)]
pub struct Grid {
    graph: StableDiGraph<Node, Branch>,
    node_indices: IndexMap<NodeID, NodeIndex>,
    connection_indices: IndexMap<ConnectionID, EdgeIndex>,
    params: SimulationParameters,
    frequency: f64,
    total_inertia: f64,
    tick: usize,
    /// Source of random defaults for missing node parameters
    rng: StdRng,
}

impl Grid {
    /// Build a grid from a network description.
    ///
    /// Missing inertia and friction values are drawn from an RNG seeded with `params.seed`, so the
    /// same description always produces the same grid.
    pub fn new(network: &NetworkDescription, params: SimulationParameters) -> Result<Self> {
        network.validate()?;

        let mut grid = Self {
            graph: StableDiGraph::new(),
            node_indices: IndexMap::new(),
            connection_indices: IndexMap::new(),
            frequency: params.target_hz,
            rng: StdRng::seed_from_u64(params.seed),
            params,
            total_inertia: 0.0,
            tick: 0,
        };
        for node in &network.nodes {
            grid.add_node(node.clone())?;
        }
        for connection in &network.connections {
            grid.add_connection(connection.clone())?;
        }

        Ok(grid)
    }

    /// The simulation parameters
    pub fn params(&self) -> &SimulationParameters {
        &self.params
    }

    /// Current grid frequency (Hz)
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Sum of the inertia of every node
    pub fn total_inertia(&self) -> f64 {
        self.total_inertia
    }

    /// Number of ticks run so far
    pub fn tick(&self) -> usize {
        self.tick
    }

    /// Number of ticks in a simulated day
    pub fn ticks_per_day(&self) -> usize {
        ticks_per_day(self.params.dt)
    }

    /// Number of nodes in the grid
    pub fn num_nodes(&self) -> usize {
        self.node_indices.len()
    }

    /// Iterate over the IDs of all nodes, in the order they were added
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeID> {
        self.node_indices.keys()
    }

    /// Iterate over all nodes, in the order they were added
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_indices.values().map(|&index| &self.graph[index])
    }

    /// Get a node by ID
    pub fn node(&self, id: &NodeID) -> Result<&Node> {
        let index = self.node_index(id)?;
        Ok(&self.graph[index])
    }

    fn node_index(&self, id: &NodeID) -> Result<NodeIndex> {
        let id = self.node_indices.get_id(id)?;
        Ok(self.node_indices[&id])
    }

    fn connection_index(&self, id: &ConnectionID) -> Result<EdgeIndex> {
        let id = self.connection_indices.get_id(id)?;
        Ok(self.connection_indices[&id])
    }

    fn update_total_inertia(&mut self) {
        self.total_inertia = self.graph.node_weights().map(|node| node.inertia).sum();
    }

    /// Add a node to the grid.
    ///
    /// Fails if the description is invalid or a node with the same ID already exists.
    pub fn add_node(&mut self, description: NodeDescription) -> Result<()> {
        description.validate()?;
        ensure!(
            !self.node_indices.contains_key(&description.id),
            "Duplicate node ID {}",
            description.id
        );

        let node = Node::from_description(&description, &mut self.rng);
        if node.friction * self.params.dt >= STABILITY_LIMIT {
            warn!(
                "Node {}: friction {} is too high for a time step of {} minutes. The simulation \
                may be unstable.",
                node.id, node.friction, self.params.dt
            );
        }

        let index = self.graph.add_node(node);
        self.node_indices.insert(description.id, index);
        self.update_total_inertia();

        Ok(())
    }

    /// Remove a node and every connection to it, returning the node's final state
    pub fn remove_node(&mut self, id: &NodeID) -> Result<NodeDescription> {
        let index = self.node_index(id)?;

        let incident: Vec<_> = [Direction::Outgoing, Direction::Incoming]
            .into_iter()
            .flat_map(|direction| self.graph.edges_directed(index, direction))
            .map(|edge| edge.weight().id.clone())
            .collect();
        for connection_id in incident {
            self.remove_connection(&connection_id)?;
        }

        let node = self
            .graph
            .remove_node(index)
            .with_context(|| format!("Node {id} is missing from the graph"))?;
        self.node_indices.shift_remove(id);
        self.update_total_inertia();

        Ok(node.describe())
    }

    /// Connect two existing nodes.
    ///
    /// Fails if the description is invalid, the connection ID is taken or either endpoint is
    /// unknown.
    pub fn add_connection(&mut self, description: ConnectionDescription) -> Result<()> {
        description.validate()?;
        ensure!(
            !self.connection_indices.contains_key(&description.id),
            "Duplicate connection ID {}",
            description.id
        );
        let from = self
            .node_index(&description.from)
            .with_context(|| format!("Invalid endpoint for connection {}", description.id))?;
        let to = self
            .node_index(&description.to)
            .with_context(|| format!("Invalid endpoint for connection {}", description.id))?;

        let edge = self
            .graph
            .add_edge(from, to, Branch::from_description(&description));
        self.connection_indices.insert(description.id, edge);

        Ok(())
    }

    /// Remove a connection, returning its description
    pub fn remove_connection(&mut self, id: &ConnectionID) -> Result<ConnectionDescription> {
        let edge = self.connection_index(id)?;
        let description = self.describe_connection(edge)?;
        self.graph.remove_edge(edge);
        self.connection_indices.shift_remove(id);

        Ok(description)
    }

    fn describe_connection(&self, edge: EdgeIndex) -> Result<ConnectionDescription> {
        let (from, to) = self
            .graph
            .edge_endpoints(edge)
            .context("Connection is missing from the graph")?;
        Ok(self.graph[edge].describe(&self.graph[from].id, &self.graph[to].id))
    }

    /// Describe the current state of a node
    pub fn get_node_state(&self, id: &NodeID) -> Result<NodeDescription> {
        Ok(self.node(id)?.describe())
    }

    /// Describe a connection
    pub fn get_connection_state(&self, id: &ConnectionID) -> Result<ConnectionDescription> {
        self.describe_connection(self.connection_index(id)?)
    }

    /// Describe the whole network, in a form which can be used to recreate the grid
    pub fn get_network_state(&self) -> NetworkDescription {
        NetworkDescription {
            nodes: self.nodes().map(Node::describe).collect(),
            connections: self
                .connection_indices
                .values()
                .filter_map(|&edge| self.describe_connection(edge).ok())
                .collect(),
        }
    }

    /// Supply and demand from the power injections of the most recent tick
    pub fn market(&self) -> MarketSnapshot {
        MarketSnapshot::from_injections(self.nodes().map(|node| node.power_injection))
    }

    /// The electricity price given the power injections of the most recent tick
    pub fn calculate_electricity_price(&self) -> f64 {
        calculate_electricity_price(&self.market(), self.params.base_price)
    }

    /// The state seen by agents before they act on the next tick
    pub fn shared_state(&self, temperature: Option<f64>, time_of_day: f64) -> SharedState {
        SharedState {
            frequency: self.frequency,
            target_frequency: self.params.target_hz,
            avg_cost: self.calculate_electricity_price(),
            prev_cost: None,
            base_price: self.params.base_price,
            time_of_day,
            temperature,
            dt: self.params.dt,
        }
    }

    /// Observation vectors for every agent, in node order
    pub fn observations(&self, state: &SharedState) -> IndexMap<NodeID, Vec<f64>> {
        self.nodes()
            .map(|node| (node.id.clone(), node.agent.observation(state)))
            .collect()
    }

    /// Advance the grid by one tick with every agent following its rule-based behaviour
    pub fn time_step(&mut self, temperature: Option<f64>, time_of_day: f64) -> TickReport {
        self.time_step_with_actions(temperature, time_of_day, &IndexMap::new())
    }

    /// Advance the grid by one tick.
    ///
    /// Agents with an entry in `actions` take that normalised action. The others fall back on
    /// their rule-based behaviour.
    pub fn time_step_with_actions(
        &mut self,
        temperature: Option<f64>,
        time_of_day: f64,
        actions: &IndexMap<NodeID, f64>,
    ) -> TickReport {
        let dt = self.params.dt;
        let state = self.shared_state(temperature, time_of_day);

        // Flows are computed from the phases at the start of the tick
        let mut net_transmission: IndexMap<NodeIndex, f64> = self
            .node_indices
            .values()
            .map(|&index| (index, 0.0))
            .collect();
        let edges: Vec<_> = self.connection_indices.values().copied().collect();
        for edge in edges {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let flow = self.graph[edge]
                .transmission(self.graph[from].phase_offset, self.graph[to].phase_offset);
            self.graph[edge].flow = flow;
            net_transmission[&from] += flow;
            net_transmission[&to] -= flow;
        }

        for (id, &index) in &self.node_indices {
            let action = actions.get(id).copied();
            self.graph[index].time_step(&state, action, net_transmission[&index], dt);
        }

        let perturbation = self.perturbation();
        self.frequency += dt * perturbation
            - self.params.frequency_relaxation * (self.frequency - self.params.target_hz);

        let market = self.market();
        let post_state = SharedState {
            frequency: self.frequency,
            avg_cost: calculate_electricity_price(&market, self.params.base_price),
            prev_cost: Some(state.avg_cost),
            ..state
        };

        let mut nodes = Vec::with_capacity(self.node_indices.len());
        for &index in self.node_indices.values() {
            let node = &mut self.graph[index];
            let reward = node.agent.compute_reward(&post_state, &market);
            nodes.push(NodeSnapshot {
                node_id: node.id.clone(),
                power_injection: node.power_injection,
                net_transmission: node.net_transmission,
                phase_offset: node.phase_offset,
                phase_velocity: node.phase_velocity,
                soc: node.agent.soc(),
                reward,
            });
        }

        let report = TickReport {
            tick: self.tick,
            time_of_day,
            temperature,
            frequency: self.frequency,
            price: post_state.avg_cost,
            total_supply: market.total_supply,
            total_demand: market.total_demand,
            perturbation,
            nodes,
        };
        self.tick += 1;

        report
    }

    /// Inertia-weighted mean of the nodes' net transmission
    fn perturbation(&self) -> f64 {
        if self.total_inertia <= 0.0 {
            return 0.0;
        }

        self.nodes()
            .map(|node| node.inertia * node.net_transmission)
            .sum::<f64>()
            / self.total_inertia
    }

    /// Simulate a whole day, with a random temperature curve drawn from `rng`
    pub fn simulate_day<R: Rng>(&mut self, rng: &mut R) -> Vec<TickReport> {
        let dt = self.params.dt;
        let curve = TemperatureCurve::random(rng, dt);
        (0..self.ticks_per_day())
            .map(|i| {
                let minute = i as f64 * dt;
                self.time_step(Some(curve.at(minute)), minute / MINUTES_PER_DAY)
            })
            .collect()
    }

    /// Return every node to rest and the frequency to its target, ready for a new episode
    pub fn reset_episode(&mut self) {
        for node in self.graph.node_weights_mut() {
            node.reset();
        }
        for branch in self.graph.edge_weights_mut() {
            branch.flow = 0.0;
        }
        self.frequency = self.params.target_hz;
    }
}

/// Number of ticks of length `dt` minutes in a day
pub fn ticks_per_day(dt: f64) -> usize {
    ((MINUTES_PER_DAY / dt).round() as usize).max(1)
}
