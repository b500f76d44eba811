//! Agents control the power injection of a single node in response to grid conditions.
//!
//! There are four kinds of agent: producers, consumers, businesses and batteries. Every agent maps
//! a normalised action in `[-1, 1]` to a signed power injection (positive for generation), scores
//! the outcome of each tick with a reward in `[-1, 1]` and exposes a fixed-length observation
//! vector for its learner.
use crate::grid::NodeID;
use crate::input::network::NodeDescription;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use strum::{Display, EnumIter};
use unicase::UniCase;

mod battery;
mod business;
mod consumer;
mod producer;
mod reward;
pub use battery::Battery;
pub use business::Business;
pub use consumer::Consumer;
pub use producer::Producer;

/// Default coefficient for quadratic cost curves ($/MW²h)
const DEFAULT_QUADRATIC_COEFFICIENT: f64 = 0.1;

/// Default coefficient for linear cost curves ($/MWh)
const DEFAULT_LINEAR_COEFFICIENT: f64 = 20.0;

/// The kind of agent controlling a node
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// A generator
    Producer,
    /// A household consumer
    Consumer,
    /// A commercial consumer
    Business,
    /// Energy storage
    Battery,
}

impl AgentKind {
    /// Map a node type name from a network description onto a kind of agent.
    ///
    /// Matching is case insensitive. Returns `None` for unrecognised names.
    pub fn from_node_type(node_type: &str) -> Option<Self> {
        let name = UniCase::new(node_type);
        if name == UniCase::new("producer")
            || name == UniCase::new("generator")
            || node_type.to_lowercase().ends_with("-generator")
        {
            Some(Self::Producer)
        } else if name == UniCase::new("consumer") {
            Some(Self::Consumer)
        } else if name == UniCase::new("business") {
            Some(Self::Business)
        } else if name == UniCase::new("storage") || name == UniCase::new("battery") {
            Some(Self::Battery)
        } else {
            None
        }
    }

    /// The length of the observation vector for this kind of agent
    pub fn observation_size(self) -> usize {
        match self {
            Self::Producer => 6,
            Self::Consumer => 5,
            Self::Business | Self::Battery => 7,
        }
    }
}

/// The shape of an agent's cost curve
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum CostFunctionKind {
    /// Cost grows with the square of the energy (convex)
    #[string = "quadratic"]
    Quadratic,
    /// Cost is proportional to the energy
    #[string = "linear"]
    Linear,
}

/// The cost to an agent of producing or moving energy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostFunction {
    /// The shape of the curve
    pub kind: CostFunctionKind,
    /// Scaling coefficient
    pub coefficient: f64,
}

impl Default for CostFunction {
    fn default() -> Self {
        Self::new(CostFunctionKind::Quadratic, None)
    }
}

impl CostFunction {
    /// Create a cost function, using the default coefficient for the kind if none is given
    pub fn new(kind: CostFunctionKind, coefficient: Option<f64>) -> Self {
        let coefficient = coefficient.unwrap_or(match kind {
            CostFunctionKind::Quadratic => DEFAULT_QUADRATIC_COEFFICIENT,
            CostFunctionKind::Linear => DEFAULT_LINEAR_COEFFICIENT,
        });
        Self { kind, coefficient }
    }

    /// Cost of an amount of energy (or power, per unit time)
    pub fn cost(&self, energy: f64) -> f64 {
        match self.kind {
            CostFunctionKind::Quadratic => self.coefficient * energy * energy,
            CostFunctionKind::Linear => self.coefficient * energy.abs(),
        }
    }
}

/// The grid conditions visible to every agent on a tick
#[derive(Debug, Clone, PartialEq)]
pub struct SharedState {
    /// Grid frequency (Hz)
    pub frequency: f64,
    /// Nominal grid frequency (Hz)
    pub target_frequency: f64,
    /// Current electricity price ($/MWh)
    pub avg_cost: f64,
    /// The price before agents acted on this tick. Only set after actions have been taken.
    pub prev_cost: Option<f64>,
    /// The reference price around which the market is centred ($/MWh)
    pub base_price: f64,
    /// Fraction of the day elapsed, in `[0, 1)`
    pub time_of_day: f64,
    /// Ambient temperature (°C)
    pub temperature: Option<f64>,
    /// Length of a tick (minutes)
    pub dt: f64,
}

impl SharedState {
    /// Signed frequency deviation from the target (Hz)
    pub fn frequency_deviation(&self) -> f64 {
        self.frequency - self.target_frequency
    }

    /// Length of a tick in hours
    pub fn dt_hours(&self) -> f64 {
        self.dt / 60.0
    }

    /// The current price relative to the base price, clamped to `[-1, 1]`
    pub fn price_level(&self) -> f64 {
        reward::clamp_unit((self.avg_cost - self.base_price) / self.base_price)
    }

    /// Features shared by every observation vector.
    ///
    /// Returns normalised frequency deviation, temperature, price and time of day.
    fn common_features(&self) -> [f64; 4] {
        [
            reward::clamp_unit(self.frequency_deviation() / 5.0),
            self.temperature.unwrap_or(20.0) / 40.0,
            self.avg_cost / 200.0,
            self.time_of_day,
        ]
    }
}

/// Aggregate market conditions after all agents have acted.
///
/// Computed once per tick so that rewards can depend on the actions of others without every
/// agent needing access to all the others.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarketSnapshot {
    /// Total generation, including discharging batteries (MW)
    pub total_supply: f64,
    /// Total consumption, including charging batteries (MW)
    pub total_demand: f64,
    /// Number of agents in the market
    pub num_agents: usize,
}

impl MarketSnapshot {
    /// Compute the snapshot from the power injections of all agents
    pub fn from_injections<I: IntoIterator<Item = f64>>(injections: I) -> Self {
        let mut snapshot = Self::default();
        for power in injections {
            if power > 0.0 {
                snapshot.total_supply += power;
            } else {
                snapshot.total_demand -= power;
            }
            snapshot.num_agents += 1;
        }

        snapshot
    }

    /// Relative shortage of supply, in `[-1, 1]`. Positive when demand exceeds supply.
    pub fn shortage(&self) -> f64 {
        let total = self.total_supply + self.total_demand;
        if total <= 0.0 {
            return 0.0;
        }

        (self.total_demand - self.total_supply) / total
    }
}

/// State common to every kind of agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCore {
    /// The ID of the agent (the same as its node)
    pub agent_id: NodeID,
    /// The agent's cost curve
    pub cost_function: CostFunction,
    /// Every normalised action the agent has taken, in order
    pub action_history: Vec<f64>,
    /// Running sum of rewards in the current episode
    pub episode_reward: f64,
}

impl AgentCore {
    fn new(agent_id: NodeID, cost_function: CostFunction) -> Self {
        Self {
            agent_id,
            cost_function,
            action_history: Vec::new(),
            episode_reward: 0.0,
        }
    }

    /// Record an action, returning it clamped to `[-1, 1]`
    fn record_action(&mut self, action: f64) -> f64 {
        let action = if action.is_finite() {
            action.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.action_history.push(action);
        action
    }

    /// The most recent action, or zero if none has been taken
    fn last_action(&self) -> f64 {
        self.action_history.last().copied().unwrap_or(0.0)
    }

    /// Normalised cumulative reward for observations
    fn episode_reward_feature(&self) -> f64 {
        reward::clamp_unit(self.episode_reward / 100.0)
    }
}

/// An agent controlling a node
#[derive(Debug, Clone, PartialEq)]
pub enum Agent {
    /// A generator
    Producer(Producer),
    /// A household consumer
    Consumer(Consumer),
    /// A commercial consumer
    Business(Business),
    /// Energy storage
    Battery(Battery),
}

impl Agent {
    /// Create an agent for a node from its description.
    ///
    /// Unrecognised node types are treated as consumers.
    pub fn from_description(description: &NodeDescription) -> Self {
        let settings = &description.settings;
        let cost_function = settings
            .cost_function
            .map(|kind| CostFunction::new(kind, settings.cost_coefficient))
            .unwrap_or_default();
        let core = AgentCore::new(description.id.clone(), cost_function);

        let kind = AgentKind::from_node_type(&description.node_type).unwrap_or_else(|| {
            warn!(
                "Unknown type '{}' for node {}. Treating it as a consumer.",
                description.node_type, description.id
            );
            AgentKind::Consumer
        });

        match kind {
            AgentKind::Producer => Self::Producer(Producer::new(core, settings.power)),
            AgentKind::Consumer => Self::Consumer(Consumer::new(core, settings.power)),
            AgentKind::Business => Self::Business(Business::new(core, settings.power)),
            AgentKind::Battery => Self::Battery(Battery::new(
                core,
                settings.power,
                settings.charge_rate,
                settings.efficiency,
                settings.soc,
            )),
        }
    }

    /// The kind of agent
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Producer(_) => AgentKind::Producer,
            Self::Consumer(_) => AgentKind::Consumer,
            Self::Business(_) => AgentKind::Business,
            Self::Battery(_) => AgentKind::Battery,
        }
    }

    /// State common to all kinds of agent
    pub fn core(&self) -> &AgentCore {
        match self {
            Self::Producer(agent) => &agent.core,
            Self::Consumer(agent) => &agent.core,
            Self::Business(agent) => &agent.core,
            Self::Battery(agent) => &agent.core,
        }
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        match self {
            Self::Producer(agent) => &mut agent.core,
            Self::Consumer(agent) => &mut agent.core,
            Self::Business(agent) => &mut agent.core,
            Self::Battery(agent) => &mut agent.core,
        }
    }

    /// Decide the power injection for this tick (MW, positive for generation).
    ///
    /// `action` is a normalised action from a learned policy. If it is `None`, the agent falls
    /// back on a rule-based action derived from the shared state.
    pub fn act(&mut self, state: &SharedState, action: Option<f64>) -> f64 {
        match self {
            Self::Producer(agent) => {
                let action = action.unwrap_or_else(|| agent.default_action(state));
                agent.act(state, action)
            }
            Self::Consumer(agent) => {
                let action = action.unwrap_or_else(|| agent.default_action(state));
                agent.act(state, action)
            }
            Self::Business(agent) => {
                let action = action.unwrap_or_else(|| agent.default_action(state));
                agent.act(state, action)
            }
            Self::Battery(agent) => {
                let action = action.unwrap_or_else(|| agent.default_action(state));
                agent.act(state, action)
            }
        }
    }

    /// Score the outcome of the last action, in `[-1, 1]`.
    ///
    /// The reward is added to the episode total.
    pub fn compute_reward(&mut self, state: &SharedState, market: &MarketSnapshot) -> f64 {
        let reward = match self {
            Self::Producer(agent) => agent.compute_reward(state, market),
            Self::Consumer(agent) => agent.compute_reward(state, market),
            Self::Business(agent) => agent.compute_reward(state, market),
            Self::Battery(agent) => agent.compute_reward(state, market),
        };
        let reward = reward::clamp_unit(reward);
        self.core_mut().episode_reward += reward;

        reward
    }

    /// The observation vector for the agent's learner
    pub fn observation(&self, state: &SharedState) -> Vec<f64> {
        let mut obs = state.common_features().to_vec();
        match self {
            Self::Producer(agent) => obs.push(agent.utilisation()),
            Self::Consumer(_) => {}
            Self::Business(agent) => {
                obs.push(agent.consumption_ratio() / business::MAX_FACTOR);
                obs.push(agent.daily_progress().min(2.0) / 2.0);
            }
            Self::Battery(agent) => {
                obs.push(agent.soc);
                obs.push(agent.rate_utilisation());
            }
        }
        obs.push(self.core().episode_reward_feature());
        debug_assert_eq!(obs.len(), self.kind().observation_size());

        obs
    }

    /// Reset per-episode state, e.g. at the start of a new training episode
    pub fn reset_episode(&mut self) {
        let core = self.core_mut();
        core.episode_reward = 0.0;
        core.action_history.clear();

        match self {
            Self::Producer(agent) => agent.reset(),
            Self::Consumer(agent) => agent.reset(),
            Self::Business(agent) => agent.reset(),
            Self::Battery(agent) => agent.reset(),
        }
    }

    /// The battery state of charge, if this agent is a battery
    pub fn soc(&self) -> Option<f64> {
        match self {
            Self::Battery(agent) => Some(agent.soc),
            _ => None,
        }
    }
}
