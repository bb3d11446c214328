//! Axis-aligned bounding boxes and rays.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    /// X axis.
    X = 0,
    /// Y axis.
    Y = 1,
    /// Z axis.
    Z = 2,
}

impl Axis {
    /// All three axes.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::X, Self::Y, Self::Z]
    }

    /// Axis from an index in `0..3`.
    #[must_use]
    pub fn from_index(i: usize) -> Self {
        match i % 3 {
            0 => Self::X,
            1 => Self::Y,
            _ => Self::Z,
        }
    }

    /// Index of this axis, in `0..3`.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The next axis in X → Y → Z → X order.
    #[must_use]
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3<f64>,
    /// Maximum corner.
    pub max: Point3<f64>,
}

impl Aabb {
    /// Box from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// The inverted-infinite empty box; the identity of [`Aabb::merge`].
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Box centered at `center` with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Center point of the box.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        Point3::from((self.min.coords + self.max.coords) * 0.5)
    }

    /// Center coordinate on one axis.
    #[must_use]
    pub fn center_on(&self, axis: Axis) -> f64 {
        (self.min[axis.index()] + self.max[axis.index()]) * 0.5
    }

    /// Size along one axis.
    #[must_use]
    pub fn extent(&self, axis: Axis) -> f64 {
        self.max[axis.index()] - self.min[axis.index()]
    }

    /// `(min, max)` interval on one axis.
    #[must_use]
    pub fn slab(&self, axis: Axis) -> (f64, f64) {
        (self.min[axis.index()], self.max[axis.index()])
    }

    /// The axis along which the box is largest.
    #[must_use]
    pub fn longest_axis(&self) -> Axis {
        let ex = self.extent(Axis::X);
        let ey = self.extent(Axis::Y);
        let ez = self.extent(Axis::Z);
        if ex >= ey && ex >= ez {
            Axis::X
        } else if ey >= ez {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// Volume of the box; zero for an empty box.
    #[must_use]
    pub fn volume(&self) -> f64 {
        let d = self.max - self.min;
        if d.x <= 0.0 || d.y <= 0.0 || d.z <= 0.0 {
            0.0
        } else {
            d.x * d.y * d.z
        }
    }

    /// Smallest box containing both `self` and `other`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    /// Grow the box by `margin` on every side.
    #[must_use]
    pub fn expanded(&self, margin: f64) -> Self {
        let m = Vector3::new(margin, margin, margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }

    /// Closed-interval overlap test.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Whether the point lies inside the box.
    #[must_use]
    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        self.min.x <= p.x
            && p.x <= self.max.x
            && self.min.y <= p.y
            && p.y <= self.max.y
            && self.min.z <= p.z
            && p.z <= self.max.z
    }

    /// Slab test: entry parameter of `ray` into the box within
    /// `[0, max_t]`, or `None` if the ray misses.
    ///
    /// A ray starting inside the box reports `t = 0`.
    #[must_use]
    pub fn ray_entry(&self, ray: &Ray, max_t: f64) -> Option<f64> {
        let mut tmin: f64 = 0.0;
        let mut tmax = max_t;
        for i in 0..3 {
            let inv = 1.0 / ray.direction[i];
            let mut t0 = (self.min[i] - ray.origin[i]) * inv;
            let mut t1 = (self.max[i] - ray.origin[i]) * inv;
            if inv < 0.0 {
                std::mem::swap(&mut t0, &mut t1);
            }
            tmin = tmin.max(t0);
            tmax = tmax.min(t1);
            if tmin > tmax {
                return None;
            }
        }
        Some(tmin)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

/// A ray: origin plus (not necessarily normalized) direction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ray {
    /// Ray origin.
    pub origin: Point3<f64>,
    /// Ray direction; hit parameters are expressed in units of this vector.
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Create a ray.
    #[must_use]
    pub const fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t`.
    #[must_use]
    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }

    /// Component-wise reciprocal of the direction.
    #[must_use]
    pub fn inv_direction(&self) -> Vector3<f64> {
        Vector3::new(
            1.0 / self.direction.x,
            1.0 / self.direction.y,
            1.0 / self.direction.z,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn merge_of_empty_is_identity() {
        let a = Aabb::from_center(Point3::new(1.0, 2.0, 3.0), Vector3::new(1.0, 1.0, 1.0));
        let merged = Aabb::empty().merge(&a);
        assert_eq!(merged, a);
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = Aabb::from_center(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let b = Aabb::from_center(Point3::new(1.5, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let c = Aabb::from_center(Point3::new(5.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn longest_axis_picks_largest_extent() {
        let b = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 5.0, 2.0));
        assert_eq!(b.longest_axis(), Axis::Y);
    }

    #[test]
    fn ray_entry_front_face() {
        let b = Aabb::from_center(Point3::new(5.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Point3::origin(), Vector3::x());
        let t = b.ray_entry(&ray, f64::INFINITY).unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn ray_entry_from_inside_is_zero() {
        let b = Aabb::from_center(Point3::origin(), Vector3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Point3::origin(), Vector3::x());
        assert_eq!(b.ray_entry(&ray, f64::INFINITY), Some(0.0));
    }

    #[test]
    fn ray_entry_miss() {
        let b = Aabb::from_center(Point3::new(0.0, 5.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Point3::origin(), Vector3::x());
        assert_eq!(b.ray_entry(&ray, f64::INFINITY), None);
    }
}
