//! Constraint-based rigid-body dynamics.
//!
//! The centerpiece is [`MotionWorld`], which owns every body, joint,
//! attractor, and collision pair, and advances them on a fixed internal
//! timestep. Collision response, contact resolution, and joint satisfaction
//! all go through the same iterative impulse solver: each fixed step runs a
//! restitution pass on approaching contacts, a position-correction pass
//! over the predicted end-of-step state, and a velocity-correction pass
//! after integration. The solver converges gracefully — iteration caps are
//! configuration, not failure conditions.
//!
//! # Example
//!
//! ```
//! use motion_core::{Attractor, CollisionShape, MotionWorld, RigidBody};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut world = MotionWorld::new();
//! world.add_attractor(Attractor::earth_gravity());
//!
//! let mut ground = RigidBody::static_body();
//! ground.set_shape(Some(CollisionShape::cuboid(Vector3::new(20.0, 1.0, 20.0))));
//! ground.set_position(Point3::new(0.0, -0.5, 0.0));
//! world.add_body(ground);
//!
//! let ball = world.create_rigid_body();
//! world.body_mut(ball)?.set_shape(Some(CollisionShape::sphere(0.5)));
//! world.body_mut(ball)?.set_position(Point3::new(0.0, 3.0, 0.0));
//!
//! for _ in 0..120 {
//!     world.step_simulation(1.0 / 60.0)?;
//! }
//! // The ball has come to rest on the ground.
//! assert!(world.body(ball)?.pose().position.y < 1.0);
//! # Ok::<(), motion_core::MotionError>(())
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod attractor;
mod body;
mod collision;
mod constraint;
mod shape;
mod solver;
mod world;

pub use attractor::Attractor;
pub use body::{BodyArena, RigidBody};
pub use collision::{CollisionPair, Contact, ContactManifold};
pub use constraint::{BallJoint, CharacterConstraint, Constraint, HingeJoint};
pub use shape::CollisionShape;
pub use world::{CollisionCallback, MotionWorld, RayHit};

pub use motion_spatial::Ray;
pub use motion_types::{
    BodyHandle, BodyType, CollisionMasks, ConstraintId, MassProperties, MotionError, Pose, Result,
    WorldConfig,
};
