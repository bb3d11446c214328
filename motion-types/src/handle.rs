//! Generational handles and collision filtering.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a body participates in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BodyType {
    /// Integrates forces and velocities; fully simulated.
    #[default]
    Dynamic,
    /// Never moves; infinite effective mass.
    Static,
    /// Moved by the application through its velocity; unaffected by forces
    /// and impulses.
    Kinematic,
}

impl BodyType {
    /// Whether bodies of this type respond to forces and impulses.
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// Non-owning reference to a body stored in a world's arena.
///
/// The generation counter detects stale handles: removing a body bumps the
/// generation of its slot, so a handle kept across the removal no longer
/// resolves even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyHandle {
    /// Slot index in the body arena.
    pub index: u32,
    /// Generation of the slot at the time the handle was issued.
    pub generation: u32,
}

impl BodyHandle {
    /// Create a handle from raw parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl std::fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({}v{})", self.index, self.generation)
    }
}

/// Stable identifier for a constraint added to a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintId(pub u64);

impl ConstraintId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Constraint({})", self.0)
    }
}

/// Collision and callback filtering masks for a body.
///
/// Two bodies can collide when either one's categories intersect the other's
/// collision mask; the same symmetric test against `callback_mask` decides
/// whether a discovered collision is reported to the world's callback.
/// Attractors only act on bodies whose `attraction_categories` intersect the
/// attractor's own category set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionMasks {
    /// Categories this body belongs to.
    pub categories: u32,
    /// Categories this body collides with.
    pub collision_mask: u32,
    /// Categories whose collisions with this body trigger the callback.
    pub callback_mask: u32,
    /// Attractor categories that affect this body.
    pub attraction_categories: u32,
}

impl Default for CollisionMasks {
    fn default() -> Self {
        Self {
            categories: 0x01,
            collision_mask: !0,
            callback_mask: !0,
            attraction_categories: !0,
        }
    }
}

impl CollisionMasks {
    /// Symmetric test: can bodies with masks `a` and `b` collide?
    #[must_use]
    pub fn can_collide(a: &Self, b: &Self) -> bool {
        (a.categories & b.collision_mask) | (b.categories & a.collision_mask) != 0
    }

    /// Symmetric test: does a collision between `a` and `b` trigger the
    /// collision callback?
    #[must_use]
    pub fn triggers_callback(a: &Self, b: &Self) -> bool {
        (a.categories & b.callback_mask) | (b.categories & a.callback_mask) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_masks_collide() {
        let a = CollisionMasks::default();
        let b = CollisionMasks::default();
        assert!(CollisionMasks::can_collide(&a, &b));
        assert!(CollisionMasks::triggers_callback(&a, &b));
    }

    #[test]
    fn disjoint_masks_do_not_collide() {
        let a = CollisionMasks {
            categories: 0x02,
            collision_mask: 0x02,
            ..CollisionMasks::default()
        };
        let b = CollisionMasks {
            categories: 0x04,
            collision_mask: 0x04,
            ..CollisionMasks::default()
        };
        assert!(!CollisionMasks::can_collide(&a, &b));
    }

    #[test]
    fn one_sided_mask_is_enough() {
        // a accepts b's category even though b ignores a's.
        let a = CollisionMasks {
            categories: 0x02,
            collision_mask: 0x04,
            ..CollisionMasks::default()
        };
        let b = CollisionMasks {
            categories: 0x04,
            collision_mask: 0x00,
            ..CollisionMasks::default()
        };
        assert!(CollisionMasks::can_collide(&a, &b));
    }

    #[test]
    fn handle_display() {
        let h = BodyHandle::new(3, 7);
        assert_eq!(h.to_string(), "Body(3v7)");
    }
}
