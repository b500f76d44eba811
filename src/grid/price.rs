//! Price formation from the balance of supply and demand.
use crate::agent::MarketSnapshot;

/// Guards against division by zero
const EPSILON: f64 = 1e-6;

/// Lowest possible market price ($/MWh)
pub const MIN_PRICE: f64 = 10.0;

/// Highest possible market price ($/MWh)
pub const MAX_PRICE: f64 = 200.0;

/// Price used when nothing is being generated ($/MWh)
pub const NO_SUPPLY_PRICE: f64 = 150.0;

/// The electricity price given the current market balance.
///
/// The price is centred on `base_price` when demand is half of supply and rises with the ratio of
/// demand to supply, within `[MIN_PRICE, MAX_PRICE]`.
pub fn calculate_electricity_price(market: &MarketSnapshot, base_price: f64) -> f64 {
    if market.total_supply <= 0.0 {
        return NO_SUPPLY_PRICE;
    }

    let ratio = market.total_demand / (market.total_supply + EPSILON);
    (base_price * (0.5 + ratio)).clamp(MIN_PRICE, MAX_PRICE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 100.0, NO_SUPPLY_PRICE)]
    #[case(100.0, 50.0, 50.0)]
    #[case(100.0, 0.0, 25.0)]
    #[case(100.0, 1000.0, MAX_PRICE)]
    fn test_price(#[case] supply: f64, #[case] demand: f64, #[case] expected: f64) {
        let market = MarketSnapshot {
            total_supply: supply,
            total_demand: demand,
            num_agents: 2,
        };
        assert_approx_eq!(
            f64,
            calculate_electricity_price(&market, 50.0),
            expected,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_price_floor() {
        let market = MarketSnapshot {
            total_supply: 100.0,
            total_demand: 0.0,
            num_agents: 1,
        };
        assert_eq!(calculate_electricity_price(&market, 1.0), MIN_PRICE);
    }
}
