//! Shared data types for the Motion rigid-body physics engine.
//!
//! This crate is the leaf of the workspace: it defines the plain types that
//! `motion-spatial` and `motion-core` build on — poses, mass properties,
//! body handles, collision filtering masks, configuration, and the error
//! taxonomy. It contains no simulation logic.
//!
//! # Handles
//!
//! Bodies and constraints are owned by the world and referenced from outside
//! through generational handles ([`BodyHandle`], [`ConstraintId`]). A handle
//! taken before a removal never aliases a later body reusing the same slot;
//! lookups with a stale handle fail with [`MotionError::StaleBodyHandle`].

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod config;
mod error;
mod handle;
mod mass;
mod pose;

pub use config::WorldConfig;
pub use error::{MotionError, Result};
pub use handle::{BodyHandle, BodyType, CollisionMasks, ConstraintId};
pub use mass::MassProperties;
pub use pose::Pose;

/// Newtonian gravitational constant, m³·kg⁻¹·s⁻².
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674e-11;
