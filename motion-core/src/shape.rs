//! Collision shapes and contact generation.

use motion_spatial::{Aabb, Ray};
use motion_types::Pose;
use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::collision::{Contact, ContactManifold};

/// Convex collision geometry attached to a body.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionShape {
    /// Sphere centered on the body origin.
    Sphere {
        /// Sphere radius.
        radius: f64,
    },
    /// Axis-aligned (in body space) box centered on the body origin.
    Box {
        /// Half-extent on each local axis.
        half_extents: Vector3<f64>,
    },
}

impl CollisionShape {
    /// Sphere shape.
    #[must_use]
    pub fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Box shape from full sizes.
    #[must_use]
    pub fn cuboid(size: Vector3<f64>) -> Self {
        Self::Box {
            half_extents: size * 0.5,
        }
    }

    /// World-space bounding box of the shape under `pose`.
    #[must_use]
    pub fn bounding_box(&self, pose: &Pose) -> Aabb {
        match *self {
            Self::Sphere { radius } => Aabb::from_center(
                pose.position,
                Vector3::new(radius, radius, radius),
            ),
            Self::Box { half_extents } => {
                // Conservative extent of the rotated box.
                let abs_rot = pose.rotation.to_rotation_matrix().into_inner().abs();
                Aabb::from_center(pose.position, abs_rot * half_extents)
            }
        }
    }

    /// Entry parameter of `ray` into the shape posed at `pose`, if it hits.
    ///
    /// The parameter is in units of the ray direction; an origin inside the
    /// shape reports `0`.
    #[must_use]
    pub fn ray_intersect(&self, pose: &Pose, ray: &Ray) -> Option<f64> {
        match *self {
            Self::Sphere { radius } => {
                let oc = ray.origin - pose.position;
                let a = ray.direction.norm_squared();
                if a == 0.0 {
                    return None;
                }
                let half_b = oc.dot(&ray.direction);
                let c = oc.norm_squared() - radius * radius;
                if c <= 0.0 {
                    return Some(0.0);
                }
                let discriminant = half_b * half_b - a * c;
                if discriminant < 0.0 {
                    return None;
                }
                let t = (-half_b - discriminant.sqrt()) / a;
                (t >= 0.0).then_some(t)
            }
            Self::Box { half_extents } => {
                let local = Ray::new(
                    pose.inverse_transform_point(&ray.origin),
                    pose.inverse_transform_vector(&ray.direction),
                );
                Aabb::from_center(Point3::origin(), half_extents)
                    .ray_entry(&local, f64::INFINITY)
            }
        }
    }
}

/// Generate contacts between two posed shapes into `manifold`.
///
/// The contact normal points from body B toward body A (the direction that
/// separates A). Box-box pairs are outside the supported narrow phase and
/// produce no contacts.
pub(crate) fn collide(
    shape_a: &CollisionShape,
    pose_a: &Pose,
    shape_b: &CollisionShape,
    pose_b: &Pose,
    manifold: &mut ContactManifold,
) -> bool {
    match (*shape_a, *shape_b) {
        (CollisionShape::Sphere { radius: ra }, CollisionShape::Sphere { radius: rb }) => {
            sphere_sphere(ra, pose_a, rb, pose_b, manifold, false)
        }
        (CollisionShape::Sphere { radius }, CollisionShape::Box { half_extents }) => {
            sphere_box(radius, pose_a, half_extents, pose_b, manifold, false)
        }
        (CollisionShape::Box { half_extents }, CollisionShape::Sphere { radius }) => {
            sphere_box(radius, pose_b, half_extents, pose_a, manifold, true)
        }
        (CollisionShape::Box { .. }, CollisionShape::Box { .. }) => false,
    }
}

fn add_oriented(
    manifold: &mut ContactManifold,
    pos_a: Point3<f64>,
    pos_b: Point3<f64>,
    normal: Vector3<f64>,
    local_a: Point3<f64>,
    local_b: Point3<f64>,
    reverse: bool,
) {
    if reverse {
        manifold.add_contact(Contact::new(pos_b, pos_a, -normal, local_b, local_a));
    } else {
        manifold.add_contact(Contact::new(pos_a, pos_b, normal, local_a, local_b));
    }
}

/// Sphere-sphere: at most one contact, pushing A along the normal.
fn sphere_sphere(
    radius_a: f64,
    pose_a: &Pose,
    radius_b: f64,
    pose_b: &Pose,
    manifold: &mut ContactManifold,
    reverse: bool,
) -> bool {
    let ba = pose_a.position - pose_b.position;
    let dist_sq = ba.norm_squared();
    let r = radius_a + radius_b;
    if dist_sq > r * r {
        return false;
    }

    let normal = if dist_sq == 0.0 {
        // Coincident centers: any direction works, pick up.
        Vector3::y()
    } else {
        ba / dist_sq.sqrt()
    };

    let pos_a = pose_a.position - normal * radius_a;
    let pos_b = pose_b.position + normal * radius_b;
    let local_a = pose_a.inverse_transform_point(&pos_a);
    let local_b = pose_b.inverse_transform_point(&pos_b);
    add_oriented(manifold, pos_a, pos_b, normal, local_a, local_b, reverse);
    true
}

/// Sphere against an oriented box.
fn sphere_box(
    radius: f64,
    sphere_pose: &Pose,
    half_extents: Vector3<f64>,
    box_pose: &Pose,
    manifold: &mut ContactManifold,
    reverse: bool,
) -> bool {
    let p = sphere_pose.position - box_pose.position;
    let rot = box_pose.rotation.to_rotation_matrix();
    let mut t = rot.inverse() * p;

    // Clamp the sphere center into the box.
    let mut on_border = false;
    for i in 0..3 {
        if t[i] < -half_extents[i] {
            t[i] = -half_extents[i];
            on_border = true;
        } else if t[i] > half_extents[i] {
            t[i] = half_extents[i];
            on_border = true;
        }
    }

    if !on_border {
        // Center inside the box: push out through the nearest face.
        let mut min_distance = half_extents.x - t.x.abs();
        let mut min_axis = 0;
        for i in 1..3 {
            let face_distance = half_extents[i] - t[i].abs();
            if face_distance < min_distance {
                min_distance = face_distance;
                min_axis = i;
            }
        }

        let mut normal = Vector3::zeros();
        normal[min_axis] = t[min_axis].signum();
        let normal = rot * normal;

        let pos_a = sphere_pose.position - normal * radius;
        let pos_b = sphere_pose.position + normal * min_distance;
        let local_a = sphere_pose.inverse_transform_point(&pos_a);
        let local_b = box_pose.inverse_transform_point(&pos_b);
        add_oriented(manifold, pos_a, pos_b, normal, local_a, local_b, reverse);
        return true;
    }

    let q = rot * t;
    let r = p - q;
    let depth = radius - r.norm();
    if depth < 0.0 {
        return false;
    }

    let normal = r.normalize();
    let pos_a = sphere_pose.position - normal * radius;
    let pos_b = sphere_pose.position - normal * (radius - depth);
    let local_a = sphere_pose.inverse_transform_point(&pos_a);
    let local_b = box_pose.inverse_transform_point(&pos_b);
    add_oriented(manifold, pos_a, pos_b, normal, local_a, local_b, reverse);
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn sphere_bounding_box() {
        let shape = CollisionShape::sphere(2.0);
        let b = shape.bounding_box(&Pose::from_position(Point3::new(1.0, 0.0, 0.0)));
        assert_relative_eq!(b.min.x, -1.0, epsilon = 1e-12);
        assert_relative_eq!(b.max.x, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn rotated_box_bounding_box_is_conservative() {
        let shape = CollisionShape::cuboid(Vector3::new(2.0, 2.0, 2.0));
        let pose = Pose::new(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_4),
        );
        let b = shape.bounding_box(&pose);
        // A unit half-extent box rotated 45 degrees spans sqrt(2).
        assert_relative_eq!(b.max.x, std::f64::consts::SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn overlapping_spheres_make_one_contact() {
        let a = CollisionShape::sphere(1.0);
        let b = CollisionShape::sphere(1.0);
        let pose_a = Pose::from_position(Point3::new(1.5, 0.0, 0.0));
        let pose_b = Pose::from_position(Point3::origin());

        let mut manifold = ContactManifold::default();
        assert!(collide(&a, &pose_a, &b, &pose_b, &mut manifold));
        assert_eq!(manifold.len(), 1);

        let c = &manifold.contacts()[0];
        assert_relative_eq!(c.normal.x, 1.0, epsilon = 1e-12);
        // Overlap of 0.5 -> positive penetration depth.
        assert_relative_eq!(c.depth, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn separated_spheres_make_no_contact() {
        let a = CollisionShape::sphere(1.0);
        let b = CollisionShape::sphere(1.0);
        let pose_a = Pose::from_position(Point3::new(5.0, 0.0, 0.0));
        let pose_b = Pose::from_position(Point3::origin());
        let mut manifold = ContactManifold::default();
        assert!(!collide(&a, &pose_a, &b, &pose_b, &mut manifold));
        assert!(manifold.is_empty());
    }

    #[test]
    fn sphere_resting_on_box() {
        let sphere = CollisionShape::sphere(0.5);
        let ground = CollisionShape::cuboid(Vector3::new(10.0, 1.0, 10.0));
        // Sphere center 0.4 above the box top surface (y = 0.5): 0.1 overlap.
        let pose_s = Pose::from_position(Point3::new(0.0, 0.9, 0.0));
        let pose_g = Pose::from_position(Point3::origin());

        let mut manifold = ContactManifold::default();
        assert!(collide(&sphere, &pose_s, &ground, &pose_g, &mut manifold));
        let c = &manifold.contacts()[0];
        assert_relative_eq!(c.normal.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.depth, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn ray_hits_sphere_front_face() {
        let shape = CollisionShape::sphere(1.0);
        let pose = Pose::from_position(Point3::new(0.0, 0.0, 5.0));
        let ray = Ray::new(Point3::origin(), Vector3::z());
        let t = shape.ray_intersect(&pose, &ray).unwrap();
        assert_relative_eq!(t, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn ray_misses_offset_sphere() {
        let shape = CollisionShape::sphere(1.0);
        let pose = Pose::from_position(Point3::new(3.0, 0.0, 5.0));
        let ray = Ray::new(Point3::origin(), Vector3::z());
        assert!(shape.ray_intersect(&pose, &ray).is_none());
    }

    #[test]
    fn ray_enters_rotated_box() {
        let shape = CollisionShape::cuboid(Vector3::new(2.0, 2.0, 2.0));
        let pose = Pose::new(
            Point3::new(0.0, -2.0, 0.0),
            UnitQuaternion::from_euler_angles(0.0, std::f64::consts::FRAC_PI_4, 0.0),
        );
        // Straight down onto the box top (rotation is about y: top face flat).
        let ray = Ray::new(Point3::origin(), -Vector3::y());
        let t = shape.ray_intersect(&pose, &ray).unwrap();
        assert_relative_eq!(t, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn box_sphere_order_flips_normal() {
        let sphere = CollisionShape::sphere(0.5);
        let ground = CollisionShape::cuboid(Vector3::new(10.0, 1.0, 10.0));
        let pose_s = Pose::from_position(Point3::new(0.0, 0.9, 0.0));
        let pose_g = Pose::from_position(Point3::origin());

        let mut manifold = ContactManifold::default();
        assert!(collide(&ground, &pose_g, &sphere, &pose_s, &mut manifold));
        let c = &manifold.contacts()[0];
        // Normal separates A (the box) from B (the sphere): downward.
        assert_relative_eq!(c.normal.y, -1.0, epsilon = 1e-12);
    }
}
