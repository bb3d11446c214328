//! World configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed-step configuration of a world.
///
/// `simulation_rate` and `simulation_delta` are a reciprocal pair; setting
/// one derives the other. The solver caps bound the Gauss-Seidel iteration
/// counts of the three solve phases — hitting a cap is not an error, it
/// yields an approximate result.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Fixed simulation steps per second.
    pub simulation_rate: f64,
    /// Iteration cap for the collision (restitution) phase.
    pub collision_iterations: usize,
    /// Iteration cap for the position-constraint phase.
    pub position_iterations: usize,
    /// Iteration cap for the velocity-constraint phase.
    pub velocity_iterations: usize,
    /// Positional convergence threshold, in meters.
    pub max_distance: f64,
    /// Velocity convergence threshold, in m/s.
    pub max_velocity: f64,
    /// Relative normal velocity below which a contact is "resting" and
    /// handled by the position solver instead of restitution.
    pub resting_threshold: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            simulation_rate: 60.0,
            collision_iterations: 10,
            position_iterations: 10,
            velocity_iterations: 10,
            max_distance: 1.0e-3,
            max_velocity: 1.0e-3,
            resting_threshold: -0.4,
        }
    }
}

impl WorldConfig {
    /// Seconds per fixed simulation step.
    #[must_use]
    pub fn simulation_delta(&self) -> f64 {
        1.0 / self.simulation_rate
    }

    /// Set the fixed step rate, in steps per second.
    #[must_use]
    pub fn with_simulation_rate(mut self, rate: f64) -> Self {
        self.simulation_rate = rate;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.simulation_rate.is_finite() && self.simulation_rate > 0.0) {
            return Err(crate::MotionError::invalid_config(
                "simulation_rate must be positive and finite",
            ));
        }
        if self.max_distance <= 0.0 || self.max_velocity <= 0.0 {
            return Err(crate::MotionError::invalid_config(
                "convergence thresholds must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rate_and_delta_are_reciprocal() {
        let config = WorldConfig::default().with_simulation_rate(120.0);
        assert_relative_eq!(config.simulation_delta(), 1.0 / 120.0, epsilon = 1e-15);
    }

    #[test]
    fn zero_rate_rejected() {
        let config = WorldConfig::default().with_simulation_rate(0.0);
        assert!(config.validate().is_err());
    }
}
