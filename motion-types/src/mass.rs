//! Mass and inertia of a rigid body.

use nalgebra::{Matrix3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mass and body-local inertia tensor of a rigid body.
///
/// The inverse quantities are what the solver actually consumes; both are
/// zero for infinite-mass (static/kinematic) configurations.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg.
    pub mass: f64,
    /// Inertia tensor in body-local coordinates (kg·m²).
    pub inertia: Matrix3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        // The original engine defaults every body to a unit-mass sphere of
        // radius 0.5 until a shape-derived tensor is set.
        Self::sphere(1.0, 0.5)
    }
}

impl MassProperties {
    /// Mass properties with an explicit inertia tensor.
    #[must_use]
    pub const fn new(mass: f64, inertia: Matrix3<f64>) -> Self {
        Self { mass, inertia }
    }

    /// Uniform solid sphere: I = (2/5)·m·r².
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self {
            mass,
            inertia: Matrix3::from_diagonal(&Vector3::new(i, i, i)),
        }
    }

    /// Uniform solid box with the given half-extents.
    #[must_use]
    pub fn cuboid(mass: f64, half_extents: Vector3<f64>) -> Self {
        let x2 = 4.0 * half_extents.x * half_extents.x;
        let y2 = 4.0 * half_extents.y * half_extents.y;
        let z2 = 4.0 * half_extents.z * half_extents.z;
        Self {
            mass,
            inertia: Matrix3::from_diagonal(&Vector3::new(
                mass * (y2 + z2) / 12.0,
                mass * (x2 + z2) / 12.0,
                mass * (x2 + y2) / 12.0,
            )),
        }
    }

    /// Inverse mass; 0 for non-positive or infinite mass.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        if self.mass <= 0.0 || self.mass.is_infinite() {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    /// Inverse body-local inertia tensor; zero matrix if singular.
    #[must_use]
    pub fn inverse_inertia(&self) -> Matrix3<f64> {
        self.inertia.try_inverse().unwrap_or_else(Matrix3::zeros)
    }

    /// Validate that the properties are physically plausible.
    pub fn validate(&self) -> crate::Result<()> {
        if self.mass < 0.0 || self.mass.is_nan() {
            return Err(crate::MotionError::invalid_mass("mass must be non-negative"));
        }
        if self.inertia.iter().any(|x| !x.is_finite()) {
            return Err(crate::MotionError::invalid_mass(
                "inertia tensor must be finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_inertia() {
        let props = MassProperties::sphere(1.0, 1.0);
        assert_relative_eq!(props.inertia[(0, 0)], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn cuboid_inertia() {
        // 1x1x1 cube, mass 12 -> I = (1/12)*12*(1+1) = 2 on each axis.
        let props = MassProperties::cuboid(12.0, Vector3::new(0.5, 0.5, 0.5));
        assert_relative_eq!(props.inertia[(2, 2)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn inverse_mass_of_infinite_body_is_zero() {
        let props = MassProperties::new(f64::INFINITY, Matrix3::identity());
        assert_eq!(props.inverse_mass(), 0.0);
    }

    #[test]
    fn negative_mass_rejected() {
        let props = MassProperties::new(-1.0, Matrix3::identity());
        assert!(props.validate().is_err());
    }
}
