//! Error types for world operations.

use thiserror::Error;

use crate::{BodyHandle, ConstraintId};

/// Convenience alias for results in the Motion crates.
pub type Result<T> = std::result::Result<T, MotionError>;

/// Errors surfaced by the world API.
///
/// Numerical degradation inside the solver (non-convergence, singular
/// effective-mass matrices) is deliberately *not* an error; the solver
/// leaves residual positional or velocity error instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    /// A handle referenced a body that was removed (or never existed).
    #[error("stale body handle: {0}")]
    StaleBodyHandle(BodyHandle),

    /// An id referenced a constraint that was removed (or never existed).
    #[error("stale constraint id: {0}")]
    StaleConstraintId(ConstraintId),

    /// The timestep passed to the simulation was not positive and finite.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMass {
        /// Description of what is wrong.
        reason: String,
    },

    /// Invalid world configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl MotionError {
    /// Create an invalid-mass error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMass {
            reason: reason.into(),
        }
    }

    /// Create an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_the_handle() {
        let err = MotionError::StaleBodyHandle(BodyHandle::new(5, 2));
        assert!(err.to_string().contains("5v2"));
    }

    #[test]
    fn display_mentions_the_timestep() {
        let err = MotionError::InvalidTimestep(-0.5);
        assert!(err.to_string().contains("-0.5"));
    }
}
