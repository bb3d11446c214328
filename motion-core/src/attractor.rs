//! Force fields applied to dynamic bodies at the start of every step.

use motion_types::GRAVITATIONAL_CONSTANT;
use nalgebra::Vector3;
use tracing::trace;

use crate::body::BodyArena;

/// A force field acting on dynamic bodies.
///
/// Attractors run before collision detection each step and accumulate forces
/// that [`crate::body::RigidBody`] integrates in the force phase. A body is
/// affected only when its attraction categories intersect the attractor's.
#[derive(Debug, Clone)]
pub enum Attractor {
    /// Newtonian n-body attraction between every pair of dynamic bodies.
    Gravitational {
        /// Forces weaker than this are skipped.
        threshold: f64,
        /// Categories of bodies this attractor pulls on.
        categories: u32,
    },
    /// Constant acceleration field, e.g. planetary gravity.
    Uniform {
        /// Acceleration applied to every affected body.
        acceleration: Vector3<f64>,
        /// Categories of bodies this attractor pulls on.
        categories: u32,
    },
}

impl Attractor {
    /// N-body attractor affecting all categories.
    #[must_use]
    pub fn gravitational(threshold: f64) -> Self {
        Self::Gravitational {
            threshold,
            categories: !0,
        }
    }

    /// Uniform field affecting all categories; `acceleration` in m/s².
    #[must_use]
    pub fn uniform(acceleration: Vector3<f64>) -> Self {
        Self::Uniform {
            acceleration,
            categories: !0,
        }
    }

    /// Standard downward gravity of 9.81 m/s².
    #[must_use]
    pub fn earth_gravity() -> Self {
        Self::uniform(Vector3::new(0.0, -9.81, 0.0))
    }

    fn categories(&self) -> u32 {
        match *self {
            Self::Gravitational { categories, .. } | Self::Uniform { categories, .. } => categories,
        }
    }

    /// Accumulate this attractor's forces onto the arena's dynamic bodies.
    pub(crate) fn apply(&self, bodies: &mut BodyArena) {
        let categories = self.categories();
        match *self {
            Self::Gravitational { threshold, .. } => {
                let handles: Vec<_> = bodies
                    .iter()
                    .filter(|(_, b)| {
                        b.body_type().is_dynamic()
                            && b.masks().attraction_categories & categories != 0
                    })
                    .map(|(h, _)| h)
                    .collect();

                for i in 0..handles.len() {
                    for j in (i + 1)..handles.len() {
                        let Ok((a, b)) = bodies.pair_mut(handles[i], handles[j]) else {
                            continue;
                        };
                        let delta = b.sim_pose().position - a.sim_pose().position;
                        let dist_sq = delta.norm_squared();
                        if dist_sq <= 0.0 {
                            continue;
                        }
                        let magnitude = GRAVITATIONAL_CONSTANT * a.mass() * b.mass() / dist_sq;
                        if magnitude <= threshold {
                            continue;
                        }
                        let force = delta * (magnitude / dist_sq.sqrt());
                        trace!(
                            body_a = %handles[i],
                            body_b = %handles[j],
                            magnitude,
                            "gravitational attraction"
                        );
                        a.add_force(force);
                        b.add_force(-force);
                    }
                }
            }
            Self::Uniform { acceleration, .. } => {
                for (_, body) in bodies.iter_mut() {
                    if body.body_type().is_dynamic()
                        && body.masks().attraction_categories & categories != 0
                    {
                        let force = acceleration * body.mass();
                        body.add_force(force);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use approx::assert_relative_eq;
    use motion_types::CollisionMasks;
    use nalgebra::Point3;

    #[test]
    fn pairwise_forces_are_equal_and_opposite() {
        let mut arena = BodyArena::new();
        let mut a = RigidBody::dynamic();
        a.set_mass(1.0e10).unwrap();
        a.set_position(Point3::origin());
        let mut b = RigidBody::dynamic();
        b.set_mass(1.0e10).unwrap();
        b.set_position(Point3::new(10.0, 0.0, 0.0));
        let ha = arena.insert(a);
        let hb = arena.insert(b);

        Attractor::gravitational(0.0).apply(&mut arena);

        let fa = arena.get(ha).unwrap().total_force();
        let fb = arena.get(hb).unwrap().total_force();
        assert_relative_eq!(fa.x, -fb.x, epsilon = 1e-9);
        // F = G * m^2 / r^2 = 6.674e-11 * 1e20 / 100.
        assert_relative_eq!(fa.x, 6.674e7, epsilon = 1.0);
    }

    #[test]
    fn weak_attraction_is_skipped() {
        let mut arena = BodyArena::new();
        let mut a = RigidBody::dynamic();
        a.set_position(Point3::origin());
        let mut b = RigidBody::dynamic();
        b.set_position(Point3::new(10.0, 0.0, 0.0));
        let ha = arena.insert(a);
        arena.insert(b);

        // Unit masses at 10 m: force ~6.7e-13, below threshold.
        Attractor::gravitational(1.0e-6).apply(&mut arena);
        assert_eq!(arena.get(ha).unwrap().total_force(), Vector3::zeros());
    }

    #[test]
    fn uniform_field_scales_with_mass() {
        let mut arena = BodyArena::new();
        let mut body = RigidBody::dynamic();
        body.set_mass(3.0).unwrap();
        let h = arena.insert(body);

        Attractor::earth_gravity().apply(&mut arena);
        assert_relative_eq!(arena.get(h).unwrap().total_force().y, -29.43, epsilon = 1e-9);
    }

    #[test]
    fn categories_filter_bodies() {
        let mut arena = BodyArena::new();
        let mut body = RigidBody::dynamic();
        body.set_masks(CollisionMasks {
            attraction_categories: 0x02,
            ..CollisionMasks::default()
        });
        let h = arena.insert(body);

        let field = Attractor::Uniform {
            acceleration: Vector3::new(0.0, -9.81, 0.0),
            categories: 0x04,
        };
        field.apply(&mut arena);
        assert_eq!(arena.get(h).unwrap().total_force(), Vector3::zeros());
    }

    #[test]
    fn static_bodies_are_unaffected() {
        let mut arena = BodyArena::new();
        let h = arena.insert(RigidBody::static_body());
        Attractor::earth_gravity().apply(&mut arena);
        assert_eq!(arena.get(h).unwrap().total_force(), Vector3::zeros());
    }
}
