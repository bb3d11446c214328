//! Contact points and per-pair collision state.

use motion_types::{BodyHandle, Pose};
use nalgebra::{Matrix3, Point3, Vector3};

/// Maximum contacts kept per body pair.
const MAX_CONTACTS: usize = 4;

/// Distance beyond which a persisted contact is dropped.
const INVALID_THRESHOLD: f64 = -0.01;

/// A single contact point between two bodies.
///
/// Positions are stored both in each body's local frame (stable across
/// steps) and in world space (refreshed from the local frame every step).
/// The normal separates body A from body B. The solver fields (`k`,
/// `norm_k`, `p`, `n_rel_vel`) are step-scoped caches and carry no meaning
/// outside the solve that set them.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    /// Contact point on body A, in A's local frame.
    pub local_a: Point3<f64>,
    /// Contact point on body B, in B's local frame.
    pub local_b: Point3<f64>,
    /// Contact point on body A, world space.
    pub world_a: Point3<f64>,
    /// Contact point on body B, world space.
    pub world_b: Point3<f64>,
    /// Contact normal (world space, pointing from B toward A).
    pub normal: Vector3<f64>,
    /// Penetration depth; negative when the points have separated.
    pub depth: f64,

    pub(crate) k: Matrix3<f64>,
    pub(crate) norm_k: f64,
    pub(crate) p: f64,
    pub(crate) n_rel_vel: f64,
}

impl Contact {
    /// New contact from world positions, normal, and local positions.
    #[must_use]
    pub fn new(
        world_a: Point3<f64>,
        world_b: Point3<f64>,
        normal: Vector3<f64>,
        local_a: Point3<f64>,
        local_b: Point3<f64>,
    ) -> Self {
        Self {
            local_a,
            local_b,
            world_a,
            world_b,
            normal,
            depth: (world_b - world_a).dot(&normal),
            k: Matrix3::zeros(),
            norm_k: 0.0,
            p: 0.0,
            n_rel_vel: 0.0,
        }
    }

    /// Refresh the world positions (and depth) from the body poses.
    pub fn update_world_positions(&mut self, pose_a: &Pose, pose_b: &Pose) {
        self.world_a = pose_a.transform_point(&self.local_a);
        self.world_b = pose_b.transform_point(&self.local_b);
        self.depth = (self.world_b - self.world_a).dot(&self.normal);
    }
}

/// The persistent contact set of one body pair.
///
/// Contacts accumulate across steps while the pair keeps overlapping; the
/// manifold caps itself at four points. When a fifth arrives, the deepest
/// point is protected and the candidate whose removal leaves the best-spread
/// set is dropped (which may be the new point itself).
#[derive(Debug, Clone, Default)]
pub struct ContactManifold {
    contacts: Vec<Contact>,
}

impl ContactManifold {
    /// Contacts currently in the manifold.
    #[must_use]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub(crate) fn contacts_mut(&mut self) -> &mut [Contact] {
        &mut self.contacts
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the manifold holds no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Drop all contacts.
    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    /// Add a contact, keeping at most four well-spread points.
    pub fn add_contact(&mut self, contact: Contact) {
        if self.contacts.len() < MAX_CONTACTS {
            self.contacts.push(contact);
            return;
        }

        // Full manifold. The deepest point is never evicted; among the
        // rest, keep the four whose pairwise spread (sum of edge lengths)
        // is largest.
        let mut max_depth_id: isize = -1;
        let mut max_depth = contact.depth;
        for (i, c) in self.contacts.iter().enumerate() {
            if c.depth > max_depth {
                max_depth = c.depth;
                max_depth_id = i as isize;
            }
        }

        let pts: [Point3<f64>; 5] = [
            self.contacts[0].local_a,
            self.contacts[1].local_a,
            self.contacts[2].local_a,
            self.contacts[3].local_a,
            contact.local_a,
        ];
        let edge = |i: usize, j: usize| (pts[i] - pts[j]).norm();

        // sums[i] = spread of the set that drops point i; sums[4] drops the
        // new contact itself.
        let mut sums = [0.0f64; 5];
        for drop in 0..5 {
            if drop as isize == max_depth_id {
                continue;
            }
            if drop == 4 && max_depth_id == -1 {
                continue;
            }
            for i in 0..5 {
                for j in (i + 1)..5 {
                    if i != drop && j != drop {
                        sums[drop] += edge(i, j);
                    }
                }
            }
        }

        let mut id = 0;
        let mut best = sums[0];
        for (i, &s) in sums.iter().enumerate().take(4).skip(1) {
            if s > best {
                best = s;
                id = i;
            }
        }
        // Rejecting the new point gives the best spread: keep the manifold.
        if sums[4] > best {
            return;
        }
        self.contacts[id] = contact;
    }

    /// Refresh every contact's world positions from the body poses.
    pub fn update_positions(&mut self, pose_a: &Pose, pose_b: &Pose) {
        for c in &mut self.contacts {
            c.update_world_positions(pose_a, pose_b);
        }
    }

    /// Drop contacts that have drifted apart, either separating along the
    /// normal or sliding tangentially.
    pub fn remove_invalids(&mut self) {
        let mut i = 0;
        while i < self.contacts.len() {
            let c = self.contacts[i];
            if c.depth < INVALID_THRESHOLD {
                self.contacts.swap_remove(i);
                continue;
            }
            let projected = c.world_a + c.normal * c.depth;
            let tangent = c.world_b - projected;
            if tangent.norm_squared() > INVALID_THRESHOLD * INVALID_THRESHOLD {
                self.contacts.swap_remove(i);
                continue;
            }
            i += 1;
        }
    }
}

/// A pair of bodies whose bounding volumes overlapped.
///
/// Pairs persist across steps so their manifolds can accumulate; the frame
/// stamp marks the last step the broad phase refreshed the pair, and stale
/// pairs are evicted after detection.
#[derive(Debug, Clone)]
pub struct CollisionPair {
    body_a: BodyHandle,
    body_b: BodyHandle,
    manifold: ContactManifold,
    frame: u64,
}

impl CollisionPair {
    /// New pair; bodies are stored in canonical (index) order.
    #[must_use]
    pub fn new(a: BodyHandle, b: BodyHandle, frame: u64) -> Self {
        let (body_a, body_b) = if a.index <= b.index { (a, b) } else { (b, a) };
        Self {
            body_a,
            body_b,
            manifold: ContactManifold::default(),
            frame,
        }
    }

    /// First body of the pair (lower arena index).
    #[must_use]
    pub fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    /// Second body of the pair.
    #[must_use]
    pub fn body_b(&self) -> BodyHandle {
        self.body_b
    }

    /// Whether this pair joins `a` and `b` (in either order).
    #[must_use]
    pub fn matches(&self, a: BodyHandle, b: BodyHandle) -> bool {
        (self.body_a == a && self.body_b == b) || (self.body_a == b && self.body_b == a)
    }

    /// Whether the pair references `h`.
    #[must_use]
    pub fn involves(&self, h: BodyHandle) -> bool {
        self.body_a == h || self.body_b == h
    }

    /// The pair's contact manifold.
    #[must_use]
    pub fn manifold(&self) -> &ContactManifold {
        &self.manifold
    }

    pub(crate) fn manifold_mut(&mut self) -> &mut ContactManifold {
        &mut self.manifold
    }

    pub(crate) fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn touch(&mut self, frame: u64) {
        self.frame = frame;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn contact_at(x: f64, z: f64, depth: f64) -> Contact {
        let world_a = Point3::new(x, 0.0, z);
        let world_b = Point3::new(x, depth, z);
        Contact::new(world_a, world_b, Vector3::y(), world_a, world_b)
    }

    #[test]
    fn depth_follows_normal() {
        let c = contact_at(0.0, 0.0, 0.25);
        assert_relative_eq!(c.depth, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn manifold_caps_at_four() {
        let mut m = ContactManifold::default();
        for i in 0..6 {
            m.add_contact(contact_at(i as f64, 0.0, 0.0));
        }
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn replacement_keeps_spread_points() {
        let mut m = ContactManifold::default();
        // Three corners of a square plus a point right next to one corner.
        m.add_contact(contact_at(0.0, 0.0, 0.0));
        m.add_contact(contact_at(1.0, 0.0, 0.0));
        m.add_contact(contact_at(0.0, 1.0, 0.0));
        m.add_contact(contact_at(0.01, 0.01, 0.0));
        // The far corner should displace the redundant near-duplicate.
        m.add_contact(contact_at(1.0, 1.0, 0.0));
        assert_eq!(m.len(), 4);
        let has_far = m
            .contacts()
            .iter()
            .any(|c| (c.world_a - Point3::new(1.0, 0.0, 1.0)).norm() < 1e-9);
        assert!(has_far);
    }

    #[test]
    fn separated_contacts_are_removed() {
        let mut m = ContactManifold::default();
        m.add_contact(contact_at(0.0, 0.0, 0.1)); // still touching
        m.add_contact(contact_at(1.0, 0.0, -0.5)); // pulled apart
        m.remove_invalids();
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn pair_is_canonically_ordered() {
        let a = BodyHandle::new(7, 0);
        let b = BodyHandle::new(2, 0);
        let pair = CollisionPair::new(a, b, 0);
        assert_eq!(pair.body_a().index, 2);
        assert!(pair.matches(a, b));
        assert!(pair.involves(a));
    }
}
