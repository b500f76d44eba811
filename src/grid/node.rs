//! Nodes of the grid, each integrating the swing equation for one agent.
use super::NodeID;
use crate::agent::{Agent, SharedState};
use crate::id::define_id_getter;
use crate::input::network::NodeDescription;
use log::debug;
use rand::Rng;
use std::f64::consts::TAU;

/// A bus of the grid, controlled by a single agent
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique ID for the node
    pub id: NodeID,
    /// Rotational inertia, weighting this node's contribution to the grid frequency
    pub inertia: f64,
    /// Damping applied to the phase velocity
    pub friction: f64,
    /// Phase angle, in `[0, 2π)`
    pub phase_offset: f64,
    /// Rate of change of the phase angle
    pub phase_velocity: f64,
    /// Acceleration from the most recent tick
    pub phase_acceleration: f64,
    /// Power injected by the agent on the most recent tick (MW, positive for generation)
    pub power_injection: f64,
    /// Net power received through incident branches on the most recent tick
    pub net_transmission: f64,
    /// The agent controlling the node
    pub agent: Agent,
    description: NodeDescription,
}
define_id_getter! {Node, NodeID}

impl Node {
    /// Create a node from a validated description.
    ///
    /// Missing inertia and friction are drawn uniformly from `[0, 1)`.
    pub fn from_description<R: Rng>(description: &NodeDescription, rng: &mut R) -> Self {
        let settings = &description.settings;
        let inertia = settings.inertia.unwrap_or_else(|| {
            let inertia = rng.random_range(0.0..1.0);
            debug!("No inertia given for node {}. Using {inertia}.", description.id);
            inertia
        });
        let friction = settings.friction.unwrap_or_else(|| {
            let friction = rng.random_range(0.0..1.0);
            debug!("No friction given for node {}. Using {friction}.", description.id);
            friction
        });

        Self {
            id: description.id.clone(),
            inertia,
            friction,
            phase_offset: 0.0,
            phase_velocity: 0.0,
            phase_acceleration: 0.0,
            power_injection: 0.0,
            net_transmission: 0.0,
            agent: Agent::from_description(description),
            description: description.clone(),
        }
    }

    /// Advance the node by one tick.
    ///
    /// The agent decides its injection, then the swing equation is integrated with semi-implicit
    /// Euler using the net transmission computed from the phases at the start of the tick.
    pub fn time_step(
        &mut self,
        state: &SharedState,
        action: Option<f64>,
        net_transmission: f64,
        dt: f64,
    ) {
        self.power_injection = self.agent.act(state, action);
        self.net_transmission = net_transmission;
        self.phase_acceleration =
            self.power_injection - self.friction * self.phase_velocity + net_transmission;
        self.phase_velocity += self.phase_acceleration * dt;
        self.phase_offset = (self.phase_offset + self.phase_velocity * dt).rem_euclid(TAU);

        // rem_euclid can round up to exactly 2π for tiny negative inputs
        if self.phase_offset >= TAU {
            self.phase_offset = 0.0;
        }
    }

    /// Restore the initial physical state and reset the agent's episode
    pub fn reset(&mut self) {
        self.phase_offset = 0.0;
        self.phase_velocity = 0.0;
        self.phase_acceleration = 0.0;
        self.power_injection = 0.0;
        self.net_transmission = 0.0;
        self.agent.reset_episode();
    }

    /// Describe the node, with generated defaults filled in
    pub fn describe(&self) -> NodeDescription {
        let mut description = self.description.clone();
        description.settings.inertia = Some(self.inertia);
        description.settings.friction = Some(self.friction);
        if let Some(soc) = self.agent.soc() {
            description.settings.soc = Some(soc);
        }

        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::fixture::{node_description, shared_state};
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    fn producer_node(inertia: f64, friction: f64) -> Node {
        let mut description = node_description("gen", "producer", 10.0);
        description.settings.inertia = Some(inertia);
        description.settings.friction = Some(friction);
        Node::from_description(&description, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn test_random_defaults_are_seeded() {
        let description = node_description("home", "consumer", 5.0);
        let a = Node::from_description(&description, &mut StdRng::seed_from_u64(42));
        let b = Node::from_description(&description, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.inertia, b.inertia);
        assert_eq!(a.friction, b.friction);
        assert!((0.0..1.0).contains(&a.inertia));
        assert!((0.0..1.0).contains(&a.friction));
        assert_eq!(a.agent.kind(), AgentKind::Consumer);
    }

    #[rstest]
    fn test_semi_implicit_euler(shared_state: SharedState) {
        let mut node = producer_node(1.0, 0.5);

        // Full output: injection 10, plus 2 received from neighbours
        node.time_step(&shared_state, Some(1.0), 2.0, 0.1);
        assert_approx_eq!(f64, node.phase_acceleration, 12.0, epsilon = 1e-12);
        assert_approx_eq!(f64, node.phase_velocity, 1.2, epsilon = 1e-12);
        assert_approx_eq!(f64, node.phase_offset, 0.12, epsilon = 1e-12);

        // Friction acts on the updated velocity
        node.time_step(&shared_state, Some(-1.0), 0.0, 0.1);
        assert_approx_eq!(f64, node.phase_acceleration, -0.6, epsilon = 1e-12);
        assert_approx_eq!(f64, node.phase_velocity, 1.14, epsilon = 1e-12);
        assert_approx_eq!(f64, node.phase_offset, 0.234, epsilon = 1e-12);
    }

    #[rstest]
    fn test_phase_wrapped(shared_state: SharedState) {
        let mut node = producer_node(1.0, 0.0);
        for _ in 0..50 {
            node.time_step(&shared_state, Some(1.0), 0.0, 1.0);
            assert!((0.0..TAU).contains(&node.phase_offset));
        }

        let mut node = producer_node(1.0, 0.0);
        for _ in 0..50 {
            node.time_step(&shared_state, Some(-1.0), -3.0, 1.0);
            assert!((0.0..TAU).contains(&node.phase_offset));
        }
    }

    #[rstest]
    fn test_describe_fills_defaults(shared_state: SharedState) {
        let description = node_description("store", "battery", 100.0);
        let mut node = Node::from_description(&description, &mut StdRng::seed_from_u64(1));
        node.time_step(&shared_state, Some(1.0), 0.0, 1.0);

        let described = node.describe();
        assert_eq!(described.id, description.id);
        assert_eq!(described.settings.inertia, Some(node.inertia));
        assert_eq!(described.settings.friction, Some(node.friction));
        assert_eq!(described.settings.soc, node.agent.soc());

        node.reset();
        assert_eq!(node.phase_offset, 0.0);
        assert_eq!(node.agent.soc(), Some(0.5));
    }
}
