//! Transmission lines between pairs of nodes.
use super::{ConnectionID, NodeID};
use crate::input::network::{ConnectionDescription, ExtraFields};

/// The coupling gain used when a connection doesn't specify one
pub const DEFAULT_TRANSMISSION_FACTOR: f64 = 1.0;

/// A capacity-limited coupling between two nodes.
///
/// The endpoints are stored on the grid's graph edge. Positive flow goes from the source of the edge
/// (`node0`) to its target (`node1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Unique ID for the connection
    pub id: ConnectionID,
    /// Maximum power which can be transmitted in either direction (MW)
    pub capacity: f64,
    /// Gain applied to the sine of the phase difference
    pub transmission_factor: f64,
    /// Power flowing from `node0` to `node1` on the most recent tick
    pub flow: f64,
    extra: ExtraFields,
}

impl Branch {
    /// Create a branch from a validated connection description
    pub fn from_description(description: &ConnectionDescription) -> Self {
        Self {
            id: description.id.clone(),
            capacity: description.power,
            transmission_factor: description
                .transmission_factor
                .unwrap_or(DEFAULT_TRANSMISSION_FACTOR),
            flow: 0.0,
            extra: description.extra.clone(),
        }
    }

    /// Power flowing from `node0` to `node1` given the phases of the two endpoints.
    ///
    /// The result is always within `[-capacity, capacity]`.
    pub fn transmission(&self, phase0: f64, phase1: f64) -> f64 {
        (self.transmission_factor * (phase1 - phase0).sin()).clamp(-self.capacity, self.capacity)
    }

    /// Describe the branch, given the IDs of its endpoints
    pub fn describe(&self, from: &NodeID, to: &NodeID) -> ConnectionDescription {
        ConnectionDescription {
            id: self.id.clone(),
            from: from.clone(),
            to: to.clone(),
            power: self.capacity,
            transmission_factor: Some(self.transmission_factor),
            extra: self.extra.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn branch(capacity: f64, transmission_factor: f64) -> Branch {
        Branch {
            id: "line".into(),
            capacity,
            transmission_factor,
            flow: 0.0,
            extra: ExtraFields::new(),
        }
    }

    #[test]
    fn test_transmission_quarter_turn() {
        assert_approx_eq!(f64, branch(50.0, 1.0).transmission(0.0, FRAC_PI_2), 1.0);
        assert_approx_eq!(f64, branch(50.0, 1.0).transmission(FRAC_PI_2, 0.0), -1.0);
    }

    #[rstest]
    #[case(0.5, 100.0)]
    #[case(2.0, 1e6)]
    #[case(10.0, -1e3)]
    fn test_transmission_bounded(#[case] capacity: f64, #[case] transmission_factor: f64) {
        let branch = branch(capacity, transmission_factor);
        for i in 0..100 {
            let phase0 = i as f64 * 0.37;
            let phase1 = 2.0 * PI - i as f64 * 0.11;
            let flow = branch.transmission(phase0, phase1);
            assert!(flow.abs() <= capacity, "flow {flow} exceeds capacity {capacity}");
        }
    }
}
