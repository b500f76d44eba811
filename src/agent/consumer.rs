//! Household consumers with a daily energy requirement.
use super::reward::{DailyEnergy, PriceWindow, clamp_unit, pacing, purchase_timing};
use super::{AgentCore, MarketSnapshot, SharedState};

/// Smallest consumption as a multiple of the baseline
pub const MIN_FACTOR: f64 = 0.5;
/// Largest consumption as a multiple of the baseline
pub const MAX_FACTOR: f64 = 2.0;

/// Number of recent prices used as the reference for purchase timing
const PRICE_WINDOW: usize = 24;

const PRICE_WEIGHT: f64 = 0.6;
const PACING_WEIGHT: f64 = 0.4;

/// A household which can shift its demand between half and double its baseline
#[derive(Debug, Clone, PartialEq)]
pub struct Consumer {
    /// State common to all agents
    pub core: AgentCore,
    /// Typical demand (MW)
    pub baseline_demand: f64,
    /// Demand on the most recent tick (MW)
    pub consumption: f64,
    daily: DailyEnergy,
    price_history: PriceWindow,
}

impl Consumer {
    pub(super) fn new(core: AgentCore, baseline_demand: f64) -> Self {
        Self {
            core,
            baseline_demand,
            consumption: baseline_demand,
            daily: DailyEnergy::new(baseline_demand * 24.0),
            price_history: PriceWindow::new(PRICE_WINDOW),
        }
    }

    /// Fraction of today's energy requirement consumed so far
    pub fn daily_progress(&self) -> f64 {
        self.daily.progress()
    }

    /// Buy more when prices are below average or consumption is behind schedule
    pub(super) fn default_action(&self, state: &SharedState) -> f64 {
        let average = self.price_history.mean().unwrap_or(state.avg_cost);
        let cheapness = purchase_timing(state.avg_cost, average, 1.0);
        clamp_unit(2.0 * cheapness + 2.0 * (state.time_of_day - self.daily.progress()))
    }

    pub(super) fn act(&mut self, state: &SharedState, action: f64) -> f64 {
        let action = self.core.record_action(action);
        let factor = (1.25 + 0.75 * action).clamp(MIN_FACTOR, MAX_FACTOR);
        self.consumption = factor * self.baseline_demand;
        self.daily
            .record(self.consumption * state.dt_hours(), state.time_of_day);

        -self.consumption
    }

    pub(super) fn compute_reward(&mut self, state: &SharedState, _market: &MarketSnapshot) -> f64 {
        let price = state.avg_cost;
        let average = self.price_history.mean().unwrap_or(price);
        self.price_history.push(price);

        let ratio = if self.baseline_demand > 0.0 {
            self.consumption / self.baseline_demand
        } else {
            1.0
        };
        let price_term = purchase_timing(price, average, ratio);
        let pacing_term = pacing(self.daily.progress(), state.time_of_day);

        clamp_unit(PRICE_WEIGHT * price_term + PACING_WEIGHT * pacing_term)
    }

    pub(super) fn reset(&mut self) {
        self.consumption = self.baseline_demand;
        self.daily.reset();
        self.price_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CostFunction;
    use crate::fixture::shared_state;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn consumer(baseline: f64) -> Consumer {
        Consumer::new(
            AgentCore::new("home".into(), CostFunction::default()),
            baseline,
        )
    }

    #[rstest]
    #[case(-1.0, -5.0)]
    #[case(0.0, -12.5)]
    #[case(1.0, -20.0)]
    #[case(-3.0, -5.0)]
    fn test_act_bounds(shared_state: SharedState, #[case] action: f64, #[case] expected: f64) {
        let mut consumer = consumer(10.0);
        assert_approx_eq!(f64, consumer.act(&shared_state, action), expected);
    }

    #[rstest]
    fn test_daily_requirement(shared_state: SharedState) {
        let mut consumer = consumer(10.0);

        // One hour at double the baseline: 20 MWh out of 240 MWh
        let state = SharedState {
            dt: 60.0,
            ..shared_state
        };
        consumer.act(&state, 1.0);
        assert_approx_eq!(f64, consumer.daily_progress(), 20.0 / 240.0);
    }

    #[rstest]
    fn test_rewards_cheap_purchases(shared_state: SharedState) {
        let market = MarketSnapshot::default();
        let mut consumer = consumer(10.0);
        consumer.act(&shared_state, 0.0);
        consumer.compute_reward(&shared_state, &market);

        // Price drops below the average: buying more now is rewarded
        let cheap = SharedState {
            avg_cost: 25.0,
            ..shared_state
        };
        let mut frugal = consumer.clone();
        frugal.act(&cheap, -1.0);
        consumer.act(&cheap, 1.0);
        assert!(consumer.compute_reward(&cheap, &market) > frugal.compute_reward(&cheap, &market));
    }
}
