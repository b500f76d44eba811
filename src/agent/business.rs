//! Commercial consumers, which are more price elastic than households but lose productivity when
//! they cut back too far.
use super::reward::{DailyEnergy, PriceWindow, clamp_unit, pacing, purchase_timing};
use super::{AgentCore, MarketSnapshot, SharedState};

/// Smallest consumption as a multiple of the baseline
pub const MIN_FACTOR: f64 = 0.3;
/// Largest consumption as a multiple of the baseline
pub const MAX_FACTOR: f64 = 1.5;

/// Businesses respond more strongly to price than households
const PRICE_ELASTICITY: f64 = 1.5;

/// Consumption ratio below which productivity suffers
const PRODUCTIVITY_THRESHOLD: f64 = 0.7;

const PRICE_WINDOW: usize = 24;

const PRICE_WEIGHT: f64 = 0.5;
const PACING_WEIGHT: f64 = 0.3;
const PRODUCTIVITY_WEIGHT: f64 = 0.2;

/// A business consuming between 0.3 and 1.5 times its baseline
#[derive(Debug, Clone, PartialEq)]
pub struct Business {
    /// State common to all agents
    pub core: AgentCore,
    /// Typical consumption (MW)
    pub baseline_consumption: f64,
    /// Consumption on the most recent tick (MW)
    pub consumption: f64,
    daily: DailyEnergy,
    price_history: PriceWindow,
}

impl Business {
    pub(super) fn new(core: AgentCore, baseline_consumption: f64) -> Self {
        Self {
            core,
            baseline_consumption,
            consumption: baseline_consumption,
            daily: DailyEnergy::new(baseline_consumption * 24.0),
            price_history: PriceWindow::new(PRICE_WINDOW),
        }
    }

    /// Current consumption as a multiple of the baseline
    pub fn consumption_ratio(&self) -> f64 {
        if self.baseline_consumption <= 0.0 {
            return 1.0;
        }

        self.consumption / self.baseline_consumption
    }

    /// Fraction of today's energy requirement consumed so far
    pub fn daily_progress(&self) -> f64 {
        self.daily.progress()
    }

    /// Cut back when prices are above average, but never below the productivity threshold
    pub(super) fn default_action(&self, state: &SharedState) -> f64 {
        let average = self.price_history.mean().unwrap_or(state.avg_cost);
        let cheapness = purchase_timing(state.avg_cost, average, PRICE_ELASTICITY);
        let lowest = (PRODUCTIVITY_THRESHOLD - 0.9) / 0.6;
        clamp_unit(2.0 * cheapness + state.time_of_day - self.daily.progress()).max(lowest)
    }

    pub(super) fn act(&mut self, state: &SharedState, action: f64) -> f64 {
        let action = self.core.record_action(action);
        let factor = (0.9 + 0.6 * action).clamp(MIN_FACTOR, MAX_FACTOR);
        self.consumption = factor * self.baseline_consumption;
        self.daily
            .record(self.consumption * state.dt_hours(), state.time_of_day);

        -self.consumption
    }

    pub(super) fn compute_reward(&mut self, state: &SharedState, _market: &MarketSnapshot) -> f64 {
        let price = state.avg_cost;
        let average = self.price_history.mean().unwrap_or(price);
        self.price_history.push(price);

        let ratio = self.consumption_ratio();
        let price_term = purchase_timing(price, average, ratio * PRICE_ELASTICITY);
        let pacing_term = pacing(self.daily.progress(), state.time_of_day);
        let productivity = if ratio < PRODUCTIVITY_THRESHOLD {
            clamp_unit(-(PRODUCTIVITY_THRESHOLD - ratio) / 0.4)
        } else {
            0.0
        };

        clamp_unit(
            PRICE_WEIGHT * price_term
                + PACING_WEIGHT * pacing_term
                + PRODUCTIVITY_WEIGHT * productivity,
        )
    }

    pub(super) fn reset(&mut self) {
        self.consumption = self.baseline_consumption;
        self.daily.reset();
        self.price_history.clear();
    }
}
