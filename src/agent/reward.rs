//! Helpers shared by the reward models of the different agents.
use std::collections::VecDeque;

/// Small constant to avoid division by zero
pub const EPSILON: f64 = 1e-6;

/// Clamp a value into `[-1, 1]`, mapping NaN to zero
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Reward for keeping the grid close to its target frequency.
///
/// Full reward inside 0.1 Hz, half inside 0.5 Hz, nothing inside 1 Hz and an increasing penalty
/// beyond that.
pub fn frequency_stability(deviation: f64) -> f64 {
    let deviation = deviation.abs();
    if deviation < 0.1 {
        1.0
    } else if deviation < 0.5 {
        0.5
    } else if deviation < 1.0 {
        0.0
    } else {
        -(deviation / 2.0).min(1.0)
    }
}

/// How closely consumption is keeping pace with the day, in `[-1, 1]`.
///
/// `progress` is the fraction of the daily requirement consumed so far.
pub fn pacing(progress: f64, time_of_day: f64) -> f64 {
    clamp_unit(1.0 - 2.0 * (progress - time_of_day).abs())
}

/// Reward for buying at a price below the recent average, scaled by how much was bought
pub fn purchase_timing(price: f64, average_price: f64, consumption_ratio: f64) -> f64 {
    if average_price <= 0.0 {
        return 0.0;
    }

    clamp_unit((average_price - price) / average_price * consumption_ratio)
}

/// A fixed-length window of recent prices
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWindow {
    prices: VecDeque<f64>,
    capacity: usize,
}

impl PriceWindow {
    /// Create an empty window holding at most `capacity` prices
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a price, discarding the oldest if the window is full
    pub fn push(&mut self, price: f64) {
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    /// Mean of the prices in the window, if there are any
    pub fn mean(&self) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }

        Some(self.prices.iter().sum::<f64>() / self.prices.len() as f64)
    }

    /// Remove all prices
    pub fn clear(&mut self) {
        self.prices.clear();
    }
}

/// Tracks energy consumed against a daily requirement
#[derive(Debug, Clone, PartialEq)]
pub struct DailyEnergy {
    /// Energy required over a full day (MWh)
    pub requirement: f64,
    /// Energy consumed since the start of the day (MWh)
    pub consumed: f64,
    last_time_of_day: f64,
}

impl DailyEnergy {
    /// Track consumption against the given daily requirement
    pub fn new(requirement: f64) -> Self {
        Self {
            requirement,
            consumed: 0.0,
            last_time_of_day: 0.0,
        }
    }

    /// Record energy consumed at the given time of day.
    ///
    /// The running total is reset when the time of day wraps round to a new day.
    pub fn record(&mut self, energy: f64, time_of_day: f64) {
        if time_of_day < self.last_time_of_day {
            self.consumed = 0.0;
        }
        self.last_time_of_day = time_of_day;
        self.consumed += energy;
    }

    /// Fraction of the daily requirement consumed so far
    pub fn progress(&self) -> f64 {
        if self.requirement <= 0.0 {
            return 1.0;
        }

        self.consumed / self.requirement
    }

    /// Forget all consumption
    pub fn reset(&mut self) {
        self.consumed = 0.0;
        self.last_time_of_day = 0.0;
    }
}
