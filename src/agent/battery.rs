//! Batteries which buy energy when it is cheap and sell it when it is dear.
use super::reward::{EPSILON, PriceWindow, clamp_unit};
use super::{AgentCore, MarketSnapshot, SharedState};

/// Default state of charge for new batteries
pub const DEFAULT_SOC: f64 = 0.5;

/// Default round-trip efficiency
pub const DEFAULT_EFFICIENCY: f64 = 0.9;

/// Default charge rate as a fraction of energy capacity
const DEFAULT_C_RATE: f64 = 0.5;

/// Number of recent buy and sell prices used for the arbitrage spread
const TRADE_WINDOW: usize = 48;

/// Number of recent market prices used to judge peak and off-peak periods
const PRICE_WINDOW: usize = 24;

/// States of charge outside this range are penalised
const SOC_COMFORT_RANGE: (f64, f64) = (0.1, 0.9);

/// A spread of this much ($/MWh) earns the full arbitrage reward
const FULL_SPREAD: f64 = 50.0;

const ARBITRAGE_WEIGHT: f64 = 0.4;
const SOC_WEIGHT: f64 = 0.3;
const TIMING_WEIGHT: f64 = 0.3;

/// Energy storage which can charge or discharge at up to `charge_rate` per tick
#[derive(Debug, Clone, PartialEq)]
pub struct Battery {
    /// State common to all agents
    pub core: AgentCore,
    /// Energy capacity (MWh)
    pub capacity: f64,
    /// Maximum charge or discharge per tick
    pub charge_rate: f64,
    /// Fraction of charged energy which is stored
    pub efficiency: f64,
    /// State of charge, in `[0, 1]`
    pub soc: f64,
    /// Energy moved on the most recent tick. Positive when charging.
    pub current_rate: f64,
    initial_soc: f64,
    buy_prices: PriceWindow,
    sell_prices: PriceWindow,
    price_history: PriceWindow,
}

impl Battery {
    pub(super) fn new(
        core: AgentCore,
        capacity: f64,
        charge_rate: Option<f64>,
        efficiency: Option<f64>,
        soc: Option<f64>,
    ) -> Self {
        let soc = soc.unwrap_or(DEFAULT_SOC).clamp(0.0, 1.0);
        Self {
            core,
            capacity,
            charge_rate: charge_rate.unwrap_or(DEFAULT_C_RATE * capacity),
            efficiency: efficiency.unwrap_or(DEFAULT_EFFICIENCY),
            soc,
            current_rate: 0.0,
            initial_soc: soc,
            buy_prices: PriceWindow::new(TRADE_WINDOW),
            sell_prices: PriceWindow::new(TRADE_WINDOW),
            price_history: PriceWindow::new(PRICE_WINDOW),
        }
    }

    /// Fraction of the maximum rate used on the last tick
    pub fn rate_utilisation(&self) -> f64 {
        if self.charge_rate <= 0.0 {
            return 0.0;
        }

        (self.current_rate.abs() / self.charge_rate).min(1.0)
    }

    /// Charge when prices are below average, discharge when above or when frequency sags
    pub(super) fn default_action(&self, state: &SharedState) -> f64 {
        let average = self.price_history.mean().unwrap_or(state.base_price);
        let premium = (state.avg_cost - average) / (average + EPSILON);
        clamp_unit(-2.0 * premium + state.frequency_deviation())
    }

    /// Charge (positive action) or discharge (negative action), returning the power injection.
    ///
    /// Charging is limited by the remaining headroom and discharging by the stored energy, so the
    /// state of charge always stays within `[0, 1]`.
    pub(super) fn act(&mut self, state: &SharedState, action: f64) -> f64 {
        let action = self.core.record_action(action);
        if self.capacity <= 0.0 {
            self.current_rate = 0.0;
            return 0.0;
        }

        let injection = if action > 0.0 {
            let actual = (action * self.charge_rate).min((1.0 - self.soc) * self.capacity);
            self.soc += actual * self.efficiency / self.capacity;
            self.current_rate = actual;
            if actual > 0.0 {
                self.buy_prices.push(state.avg_cost);
            }
            -actual
        } else if action < 0.0 {
            let actual = (-action * self.charge_rate).min(self.soc * self.capacity);
            self.soc -= actual / self.capacity;
            self.current_rate = -actual;
            if actual > 0.0 {
                self.sell_prices.push(state.avg_cost);
            }
            actual
        } else {
            self.current_rate = 0.0;
            0.0
        };
        self.soc = self.soc.clamp(0.0, 1.0);

        injection
    }

    pub(super) fn compute_reward(&mut self, state: &SharedState, _market: &MarketSnapshot) -> f64 {
        let price = state.avg_cost;
        let average = self.price_history.mean().unwrap_or(price);
        self.price_history.push(price);

        let arbitrage = match (self.sell_prices.mean(), self.buy_prices.mean()) {
            (Some(sell), Some(buy)) => clamp_unit((sell - buy) / FULL_SPREAD),
            _ => 0.0,
        };

        let (low, high) = SOC_COMFORT_RANGE;
        let soc_penalty = if self.soc < low {
            -(low - self.soc) / low
        } else if self.soc > high {
            -(self.soc - high) / (1.0 - high)
        } else {
            0.0
        };

        // Charging at a premium or discharging at a discount is penalised
        let premium = clamp_unit((price - average) / (average + EPSILON));
        let timing = -self.core.last_action() * premium;

        clamp_unit(ARBITRAGE_WEIGHT * arbitrage + SOC_WEIGHT * soc_penalty + TIMING_WEIGHT * timing)
    }

    pub(super) fn reset(&mut self) {
        self.soc = self.initial_soc;
        self.current_rate = 0.0;
        self.buy_prices.clear();
        self.sell_prices.clear();
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

    fn battery(capacity: f64, charge_rate: f64, efficiency: f64, soc: f64) -> Battery {
        Battery::new(
            AgentCore::new("battery".into(), CostFunction::default()),
            capacity,
            Some(charge_rate),
            Some(efficiency),
            Some(soc),
        )
    }

    #[rstest]
    fn test_full_charge(shared_state: SharedState) {
        let mut battery = battery(100.0, 50.0, 0.9, 0.5);
        let injection = battery.act(&shared_state, 1.0);
        assert_approx_eq!(f64, injection, -50.0);
        assert_approx_eq!(f64, battery.soc, 0.95);
    }

    #[rstest]
    fn test_discharge_limited_by_stored_energy(shared_state: SharedState) {
        let mut battery = battery(100.0, 50.0, 0.9, 0.2);
        let injection = battery.act(&shared_state, -1.0);
        assert_approx_eq!(f64, injection, 20.0);
        assert_approx_eq!(f64, battery.soc, 0.0);
    }

    #[rstest]
    fn test_soc_stays_bounded(shared_state: SharedState) {
        let actions = [1.0, 1.0, 1.0, 0.3, -1.0, -1.0, -0.5, -1.0, -1.0, 0.7, 1.0, -0.2];
        for initial_soc in [0.0, 0.05, 0.5, 0.99, 1.0] {
            let mut battery = battery(100.0, 80.0, 0.95, initial_soc);
            for action in actions {
                battery.act(&shared_state, action);
                assert!(
                    (0.0..=1.0).contains(&battery.soc),
                    "soc {} out of range",
                    battery.soc
                );
            }
        }
    }

    #[rstest]
    fn test_zero_capacity(shared_state: SharedState) {
        let mut battery = battery(0.0, 0.0, 0.9, 0.5);
        assert_eq!(battery.act(&shared_state, 1.0), 0.0);
        assert_eq!(battery.soc, 0.5);
    }

    #[rstest]
    fn test_default_charge_rate() {
        let battery = Battery::new(
            AgentCore::new("battery".into(), CostFunction::default()),
            100.0,
            None,
            None,
            None,
        );
        assert_eq!(battery.charge_rate, 50.0);
        assert_eq!(battery.efficiency, DEFAULT_EFFICIENCY);
        assert_eq!(battery.soc, DEFAULT_SOC);
    }

    #[rstest]
    fn test_arbitrage_reward(shared_state: SharedState) {
        let market = MarketSnapshot::default();
        let mut battery = battery(100.0, 10.0, 1.0, 0.5);

        // Buy cheap
        let cheap = SharedState {
            avg_cost: 20.0,
            ..shared_state.clone()
        };
        battery.act(&cheap, 1.0);
        battery.compute_reward(&cheap, &market);

        // Sell dear: spread of 50 earns the full arbitrage reward and selling above the average
        // price is good timing
        let dear = SharedState {
            avg_cost: 70.0,
            ..shared_state
        };
        battery.act(&dear, -1.0);
        let reward = battery.compute_reward(&dear, &market);
        assert_approx_eq!(f64, reward, ARBITRAGE_WEIGHT + TIMING_WEIGHT, epsilon = 1e-6);
    }

    #[rstest]
    fn test_arbitrage_ignores_blocked_trades(shared_state: SharedState) {
        let market = MarketSnapshot::default();
        let mut battery = battery(100.0, 10.0, 1.0, 1.0);

        // Already full, so none of these charges happen
        let cheap = SharedState {
            avg_cost: 10.0,
            ..shared_state.clone()
        };
        for _ in 0..5 {
            assert_eq!(battery.act(&cheap, 1.0), 0.0);
            battery.compute_reward(&cheap, &market);
        }
        assert_eq!(battery.soc, 1.0);
        assert!(battery.buy_prices.mean().is_none());

        // A sale with no recorded purchase earns no arbitrage reward
        let dear = SharedState {
            avg_cost: 60.0,
            ..shared_state
        };
        battery.act(&dear, -1.0);
        let reward = battery.compute_reward(&dear, &market);
        assert!(reward < ARBITRAGE_WEIGHT);
    }

    #[rstest]
    #[case(0.05, -0.5)]
    #[case(0.5, 0.0)]
    #[case(1.0, -1.0)]
    fn test_soc_penalty(shared_state: SharedState, #[case] soc: f64, #[case] expected: f64) {
        let mut battery = battery(100.0, 10.0, 1.0, soc);
        battery.core.record_action(0.0);
        let reward = battery.compute_reward(&shared_state, &MarketSnapshot::default());
        assert_approx_eq!(f64, reward, SOC_WEIGHT * expected, epsilon = 1e-9);
    }
}
