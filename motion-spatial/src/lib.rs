//! Spatial index structures for broad-phase collision culling and ray queries.
//!
//! Two complementary structures:
//!
//! - [`Bih`] — a bounding interval hierarchy over a set of bounding boxes.
//!   Built once from boxes and centers, then queried by ray
//!   ([`Bih::trace`]) or by box overlap ([`Bih::elements_in_box`]). Unlike a
//!   BSP, the two children of a split may overlap, so elements never need to
//!   be duplicated or clipped.
//! - [`AabbTree`] — a binary AABB tree whose child bounds are quantized to
//!   8-bit offsets within the parent box. The compression is lossy but
//!   conservative: a decoded box always contains the box that was encoded.
//!   Nodes come from a caller-provided [`NodePool`] arena.
//!
//! Both are immutable once built; rebuild via `clear()` + `build()`.

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]

mod aabb;
mod aabb_tree;
mod bih;

pub use aabb::{Aabb, Axis, Ray};
pub use aabb_tree::{AabbTree, NodePool};
pub use bih::{Bih, BihHit};
