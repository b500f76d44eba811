//! Generators which sell power into the grid.
use super::reward::{EPSILON, clamp_unit, frequency_stability};
use super::{AgentCore, MarketSnapshot, SharedState};

const STABILITY_WEIGHT: f64 = 0.3;
const PROFIT_WEIGHT: f64 = 0.3;
const ALIGNMENT_WEIGHT: f64 = 0.2;
const RESPONSIVENESS_WEIGHT: f64 = 0.2;

/// A generator with output between zero and `max_output`
#[derive(Debug, Clone, PartialEq)]
pub struct Producer {
    /// State common to all agents
    pub core: AgentCore,
    /// Maximum output (MW)
    pub max_output: f64,
    /// Output on the most recent tick (MW)
    pub output: f64,
}

impl Producer {
    pub(super) fn new(core: AgentCore, max_output: f64) -> Self {
        Self {
            core,
            max_output,
            output: 0.0,
        }
    }

    /// Fraction of maximum output currently in use
    pub fn utilisation(&self) -> f64 {
        if self.max_output <= 0.0 {
            return 0.0;
        }

        self.output / self.max_output
    }

    /// Produce more when prices are high or the grid frequency is sagging
    pub(super) fn default_action(&self, state: &SharedState) -> f64 {
        clamp_unit(state.price_level() - 2.0 * state.frequency_deviation())
    }

    pub(super) fn act(&mut self, _state: &SharedState, action: f64) -> f64 {
        let action = self.core.record_action(action);
        self.output = ((action + 1.0) / 2.0 * self.max_output).clamp(0.0, self.max_output);
        self.output
    }

    pub(super) fn compute_reward(&self, state: &SharedState, market: &MarketSnapshot) -> f64 {
        let utilisation = self.utilisation();

        let stability = frequency_stability(state.frequency_deviation());

        let revenue = state.avg_cost * self.output;
        let cost = self.core.cost_function.cost(self.output);
        let profit_margin = clamp_unit((revenue - cost) / (revenue + EPSILON));

        let alignment = utilisation * state.price_level();

        // Positive when the grid needs more power
        let need = clamp_unit(-state.frequency_deviation() + market.shortage());
        let responsiveness = need * (2.0 * utilisation - 1.0);

        clamp_unit(
            STABILITY_WEIGHT * stability
                + PROFIT_WEIGHT * profit_margin
                + ALIGNMENT_WEIGHT * alignment
                + RESPONSIVENESS_WEIGHT * responsiveness,
        )
    }

    pub(super) fn reset(&mut self) {
        self.output = 0.0;
    }
}
