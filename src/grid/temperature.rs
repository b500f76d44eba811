//! Daily ambient temperature profiles.
use rand::Rng;
use std::f64::consts::TAU;

/// Number of minutes in a day
pub const MINUTES_PER_DAY: f64 = 1440.0;

/// Mean daily temperature (°C)
const MEAN_TEMPERATURE: f64 = 20.0;

/// A sinusoidal daily temperature curve, coldest at midnight and warmest at midday
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureCurve {
    /// Half the difference between the daily maximum and minimum (°C)
    pub amplitude: f64,
    /// Time of the last tick of the day (minutes)
    last_minute: f64,
}

impl TemperatureCurve {
    /// A curve with an amplitude drawn uniformly from `[5, 15)` °C
    pub fn random<R: Rng>(rng: &mut R, dt: f64) -> Self {
        Self::new(5.0 + 10.0 * rng.random::<f64>(), dt)
    }

    /// A curve with the given amplitude for ticks of length `dt` minutes
    pub fn new(amplitude: f64, dt: f64) -> Self {
        Self {
            amplitude,
            last_minute: (MINUTES_PER_DAY - dt).max(1.0),
        }
    }

    /// The temperature at the given minute of the day
    pub fn at(&self, minute: f64) -> f64 {
        MEAN_TEMPERATURE - self.amplitude * (TAU * minute / self.last_minute).cos()
    }
}
