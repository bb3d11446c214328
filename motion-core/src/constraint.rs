//! Joints and the character controller.
//!
//! Constraints participate in the solver's two correction phases. The
//! position phase runs between force and velocity integration and corrects
//! predicted (looked-ahead) positions; the velocity phase runs after
//! integration and removes residual relative velocity. Both phases follow
//! the same protocol: a `pre_*` pass that refreshes world anchors and
//! response matrices, then an iterated `solve_*` pass that returns `true`
//! while another iteration is still needed.

use motion_types::{BodyHandle, Pose};
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

use crate::body::BodyArena;

// 1 mm positional precision, compared against squared distances.
const MAX_DISTANCE_SQ: f64 = 0.001 * 0.001;
const MAX_VELOCITY_SQ: f64 = 0.001 * 0.001;

fn inverse_or_zero(m: Matrix3<f64>) -> Matrix3<f64> {
    m.try_inverse().unwrap_or_else(Matrix3::zeros)
}

/// Point-to-point joint: two body-local anchors are driven to coincide.
#[derive(Debug, Clone)]
pub struct BallJoint {
    body_a: BodyHandle,
    body_b: BodyHandle,
    anchor_a: Point3<f64>,
    anchor_b: Point3<f64>,
    world_anchor_a: Point3<f64>,
    world_anchor_b: Point3<f64>,
    kinv: Matrix3<f64>,
}

impl BallJoint {
    /// Joint between `body_a` and `body_b`, anchored at both origins.
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            anchor_a: Point3::origin(),
            anchor_b: Point3::origin(),
            world_anchor_a: Point3::origin(),
            world_anchor_b: Point3::origin(),
            kinv: Matrix3::zeros(),
        }
    }

    /// First constrained body.
    #[must_use]
    pub fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    /// Second constrained body.
    #[must_use]
    pub fn body_b(&self) -> BodyHandle {
        self.body_b
    }

    /// Set the shared anchor from a world-space point, converting it into
    /// both bodies' local frames at their current simulation poses.
    pub fn set_anchor(&mut self, pose_a: &Pose, pose_b: &Pose, world_point: Point3<f64>) {
        self.anchor_a = pose_a.inverse_transform_point(&world_point);
        self.anchor_b = pose_b.inverse_transform_point(&world_point);
    }

    fn refresh(&mut self, bodies: &BodyArena) {
        let (Ok(a), Ok(b)) = (bodies.get(self.body_a), bodies.get(self.body_b)) else {
            return;
        };
        self.world_anchor_a = a.sim_pose().transform_point(&self.anchor_a);
        self.world_anchor_b = b.sim_pose().transform_point(&self.anchor_b);
        self.kinv =
            inverse_or_zero(a.compute_k(&self.world_anchor_a) + b.compute_k(&self.world_anchor_b));
    }

    fn solve_position(&mut self, bodies: &mut BodyArena, step: f64) -> bool {
        let Ok((a, b)) = bodies.pair_mut(self.body_a, self.body_b) else {
            return false;
        };

        // Predicted anchor separation at the end of the step.
        let pred_a = a.look_ahead_point(&self.world_anchor_a, step);
        let pred_b = b.look_ahead_point(&self.world_anchor_b, step);
        let d = pred_a - pred_b;

        if d.norm_squared() <= MAX_DISTANCE_SQ {
            return false;
        }

        let p = self.kinv * (-d / step);
        a.apply_impulse_at(p, &self.world_anchor_a);
        b.apply_impulse_at(-p, &self.world_anchor_b);
        true
    }

    fn solve_velocities(&mut self, bodies: &mut BodyArena) -> bool {
        let Ok((a, b)) = bodies.pair_mut(self.body_a, self.body_b) else {
            return false;
        };

        let du = b.velocity_at(&self.world_anchor_b) - a.velocity_at(&self.world_anchor_a);
        if du.norm_squared() <= MAX_VELOCITY_SQ {
            return false;
        }

        let p = self.kinv * du;
        a.apply_impulse_at(p, &self.world_anchor_a);
        b.apply_impulse_at(-p, &self.world_anchor_b);
        true
    }
}

/// Hinge joint: a ball joint that also remembers a body-local axis.
///
/// Only the positional (anchor coincidence) part is solved; the rotational
/// lock around the stored axis is not enforced, so the joint currently
/// behaves like a ball joint with an axis attached.
#[derive(Debug, Clone)]
pub struct HingeJoint {
    body_a: BodyHandle,
    body_b: BodyHandle,
    anchor_a: Point3<f64>,
    anchor_b: Point3<f64>,
    axis_a: Vector3<f64>,
    axis_b: Vector3<f64>,
    world_anchor_a: Point3<f64>,
    world_anchor_b: Point3<f64>,
    kinv: Matrix3<f64>,
}

impl HingeJoint {
    /// Hinge between `body_a` and `body_b`, anchored at both origins with a
    /// Y axis.
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            anchor_a: Point3::origin(),
            anchor_b: Point3::origin(),
            axis_a: Vector3::y(),
            axis_b: Vector3::y(),
            world_anchor_a: Point3::origin(),
            world_anchor_b: Point3::origin(),
            kinv: Matrix3::zeros(),
        }
    }

    /// First constrained body.
    #[must_use]
    pub fn body_a(&self) -> BodyHandle {
        self.body_a
    }

    /// Second constrained body.
    #[must_use]
    pub fn body_b(&self) -> BodyHandle {
        self.body_b
    }

    /// Set the shared anchor from a world-space point.
    pub fn set_anchor(&mut self, pose_a: &Pose, pose_b: &Pose, world_point: Point3<f64>) {
        self.anchor_a = pose_a.inverse_transform_point(&world_point);
        self.anchor_b = pose_b.inverse_transform_point(&world_point);
    }

    /// Set the hinge axis from a world-space direction.
    pub fn set_axis(&mut self, pose_a: &Pose, pose_b: &Pose, world_dir: Vector3<f64>) {
        self.axis_a = pose_a.inverse_transform_vector(&world_dir);
        self.axis_b = pose_b.inverse_transform_vector(&world_dir);
    }

    /// Hinge axis in body A's local frame.
    #[must_use]
    pub fn local_axis_a(&self) -> Vector3<f64> {
        self.axis_a
    }

    /// Hinge axis in body B's local frame.
    #[must_use]
    pub fn local_axis_b(&self) -> Vector3<f64> {
        self.axis_b
    }

    fn refresh(&mut self, bodies: &BodyArena) {
        let (Ok(a), Ok(b)) = (bodies.get(self.body_a), bodies.get(self.body_b)) else {
            return;
        };
        self.world_anchor_a = a.sim_pose().transform_point(&self.anchor_a);
        self.world_anchor_b = b.sim_pose().transform_point(&self.anchor_b);
        self.kinv =
            inverse_or_zero(a.compute_k(&self.world_anchor_a) + b.compute_k(&self.world_anchor_b));
    }

    fn solve_position(&mut self, bodies: &mut BodyArena, step: f64) -> bool {
        let Ok((a, b)) = bodies.pair_mut(self.body_a, self.body_b) else {
            return false;
        };

        let pred_a = a.look_ahead_point(&self.world_anchor_a, step);
        let pred_b = b.look_ahead_point(&self.world_anchor_b, step);
        let d = pred_a - pred_b;

        if d.norm_squared() <= MAX_DISTANCE_SQ {
            return false;
        }

        let p = self.kinv * (-d / step);
        a.apply_impulse_at(p, &self.world_anchor_a);
        b.apply_impulse_at(-p, &self.world_anchor_b);
        true
    }
}

/// Drives a body at a target horizontal velocity while it stands on
/// something, and keeps it upright.
///
/// The world probes for ground with a short downward ray before the
/// position phase; while grounded and velocity control is enabled, the
/// position phase steers the body toward `target_velocity · step` with the
/// accumulated impulse clamped to `max_force · step`, and the velocity
/// phase restores the horizontal velocity exactly. The orientation is
/// pinned every step and angular momentum is cancelled regardless of ground
/// contact.
#[derive(Debug, Clone)]
pub struct CharacterConstraint {
    body: BodyHandle,
    target_velocity: Vector3<f64>,
    control_velocity: bool,
    max_force: f64,
    on_ground: bool,

    p_sum: Vector3<f64>,
    max_p: f64,
    desired_pos: Point3<f64>,
    desired_ori: UnitQuaternion<f64>,
    kinv: Matrix3<f64>,
}

// Ground probe segment, relative to the body center.
const PROBE_START_OFFSET: f64 = 0.5;
const PROBE_END_OFFSET: f64 = -0.045;

impl CharacterConstraint {
    /// Character controller for `body`.
    #[must_use]
    pub fn new(body: BodyHandle) -> Self {
        Self {
            body,
            target_velocity: Vector3::zeros(),
            control_velocity: true,
            max_force: 200.0,
            on_ground: false,
            p_sum: Vector3::zeros(),
            max_p: 0.0,
            desired_pos: Point3::origin(),
            desired_ori: UnitQuaternion::identity(),
            kinv: Matrix3::zeros(),
        }
    }

    /// The controlled body.
    #[must_use]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    /// Desired walking velocity (the vertical component is ignored).
    #[must_use]
    pub fn target_velocity(&self) -> Vector3<f64> {
        self.target_velocity
    }

    /// Set the desired walking velocity.
    pub fn set_target_velocity(&mut self, velocity: Vector3<f64>) {
        self.target_velocity = velocity;
    }

    /// Enable or disable velocity control (orientation stays pinned).
    pub fn set_control_velocity(&mut self, control: bool) {
        self.control_velocity = control;
    }

    /// Maximum steering force in newtons.
    #[must_use]
    pub fn max_force(&self) -> f64 {
        self.max_force
    }

    /// Set the maximum steering force.
    pub fn set_max_force(&mut self, force: f64) {
        self.max_force = force;
    }

    /// Whether the last ground probe found support under the body.
    #[must_use]
    pub fn is_on_ground(&self) -> bool {
        self.on_ground
    }

    /// Whether the body is airborne.
    #[must_use]
    pub fn is_falling(&self) -> bool {
        !self.on_ground
    }

    pub(crate) fn set_on_ground(&mut self, on_ground: bool) {
        self.on_ground = on_ground;
    }

    /// The world-space ground probe segment: start point and downward reach.
    pub(crate) fn probe_segment(&self, bodies: &BodyArena) -> Option<(Point3<f64>, f64)> {
        let body = bodies.get(self.body).ok()?;
        let center = body.sim_pose().position;
        let start = center + Vector3::y() * PROBE_START_OFFSET;
        Some((start, PROBE_START_OFFSET - PROBE_END_OFFSET))
    }

    fn pre_position_step(&mut self, bodies: &BodyArena, step: f64) {
        let Ok(body) = bodies.get(self.body) else {
            return;
        };
        if self.control_velocity && self.on_ground {
            self.p_sum = Vector3::zeros();
            self.max_p = self.max_force * step;
            self.desired_pos = body.sim_pose().position + self.target_velocity * step;
            self.kinv = inverse_or_zero(body.compute_k(&body.sim_pose().position));
        }
        self.desired_ori = body.sim_pose().rotation;
    }

    fn solve_position(&mut self, bodies: &mut BodyArena, step: f64) -> bool {
        if !(self.control_velocity && self.on_ground) {
            return false;
        }
        let Ok(body) = bodies.get_mut(self.body) else {
            return false;
        };

        let expected = body.look_ahead(step).position;
        let mut dif = self.desired_pos - expected;
        dif.y = 0.0;
        if dif.norm_squared() <= MAX_DISTANCE_SQ {
            return false;
        }

        let p = self.kinv * (dif / step);

        // Clamp the accumulated impulse to the force budget.
        let p_sum_old = self.p_sum;
        self.p_sum += p;
        let len = self.p_sum.norm();
        if len > self.max_p && len > 0.0 {
            self.p_sum *= self.max_p / len;
        }
        let p = self.p_sum - p_sum_old;

        let center = body.sim_pose().position;
        body.apply_impulse_at(p, &center);
        true
    }

    fn solve_velocities(&mut self, bodies: &mut BodyArena) -> bool {
        let Ok(body) = bodies.get_mut(self.body) else {
            return false;
        };

        let mut changed = false;
        if self.control_velocity && self.on_ground {
            let mut v = body.linear_velocity();
            let dx = v.x - self.target_velocity.x;
            let dz = v.z - self.target_velocity.z;
            if dx * dx + dz * dz > MAX_VELOCITY_SQ {
                changed = true;
            }
            v.x = self.target_velocity.x;
            v.z = self.target_velocity.z;
            body.set_linear_velocity(v);
        }

        // Pin the orientation captured before the position phase and cancel
        // angular momentum, grounded or not.
        if body.angular_velocity().norm_squared() > MAX_VELOCITY_SQ {
            changed = true;
        }
        let position = body.sim_pose().position;
        body.set_sim_pose(Pose::new(position, self.desired_ori));
        body.set_angular_velocity(Vector3::zeros());

        changed
    }
}

/// Any constraint the world can solve.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Point-to-point joint.
    BallJoint(BallJoint),
    /// Anchored joint with a stored axis.
    HingeJoint(HingeJoint),
    /// Character controller.
    Character(CharacterConstraint),
}

impl Constraint {
    /// Whether this constraint references `handle`.
    #[must_use]
    pub fn references(&self, handle: BodyHandle) -> bool {
        match self {
            Self::BallJoint(j) => j.body_a == handle || j.body_b == handle,
            Self::HingeJoint(j) => j.body_a == handle || j.body_b == handle,
            Self::Character(c) => c.body == handle,
        }
    }

    pub(crate) fn pre_position_step(&mut self, bodies: &BodyArena, step: f64) {
        match self {
            Self::BallJoint(j) => j.refresh(bodies),
            Self::HingeJoint(j) => j.refresh(bodies),
            Self::Character(c) => c.pre_position_step(bodies, step),
        }
    }

    /// Returns `true` while another position iteration is needed.
    pub(crate) fn solve_position(&mut self, bodies: &mut BodyArena, step: f64) -> bool {
        match self {
            Self::BallJoint(j) => j.solve_position(bodies, step),
            Self::HingeJoint(j) => j.solve_position(bodies, step),
            Self::Character(c) => c.solve_position(bodies, step),
        }
    }

    pub(crate) fn pre_velocities_step(&mut self, bodies: &BodyArena) {
        match self {
            Self::BallJoint(j) => j.refresh(bodies),
            Self::HingeJoint(_) | Self::Character(_) => {}
        }
    }

    /// Returns `true` while another velocity iteration is needed.
    pub(crate) fn solve_velocities(&mut self, bodies: &mut BodyArena) -> bool {
        match self {
            Self::BallJoint(j) => j.solve_velocities(bodies),
            Self::HingeJoint(_) => false,
            Self::Character(c) => c.solve_velocities(bodies),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::body::RigidBody;
    use approx::assert_relative_eq;

    fn two_body_arena() -> (BodyArena, BodyHandle, BodyHandle) {
        let mut arena = BodyArena::new();
        let mut a = RigidBody::dynamic();
        a.set_position(Point3::new(-1.0, 0.0, 0.0));
        let mut b = RigidBody::dynamic();
        b.set_position(Point3::new(1.0, 0.0, 0.0));
        let ha = arena.insert(a);
        let hb = arena.insert(b);
        (arena, ha, hb)
    }

    #[test]
    fn satisfied_joint_does_nothing() {
        let (mut arena, ha, hb) = two_body_arena();
        let mut joint = BallJoint::new(ha, hb);
        {
            let pa = *arena.get(ha).unwrap().sim_pose();
            let pb = *arena.get(hb).unwrap().sim_pose();
            joint.set_anchor(&pa, &pb, Point3::origin());
        }
        let mut c = Constraint::BallJoint(joint);
        let step = 1.0 / 60.0;
        c.pre_position_step(&arena, step);
        assert!(!c.solve_position(&mut arena, step));
        assert_eq!(arena.get(ha).unwrap().linear_velocity(), Vector3::zeros());
    }

    #[test]
    fn stretched_joint_pulls_bodies_together() {
        let (mut arena, ha, hb) = two_body_arena();
        let mut joint = BallJoint::new(ha, hb);
        {
            let pa = *arena.get(ha).unwrap().sim_pose();
            let pb = *arena.get(hb).unwrap().sim_pose();
            // Anchor at A's center: B must come to A.
            joint.set_anchor(&pa, &pb, Point3::new(-1.0, 0.0, 0.0));
        }
        let mut c = Constraint::BallJoint(joint);
        let step = 1.0 / 60.0;
        c.pre_position_step(&arena, step);
        assert!(c.solve_position(&mut arena, step));

        // Impulses are opposite: total momentum unchanged.
        let va = arena.get(ha).unwrap().linear_velocity();
        let vb = arena.get(hb).unwrap().linear_velocity();
        assert_relative_eq!((va + vb).norm(), 0.0, epsilon = 1e-9);
        // B accelerates toward A.
        assert!(vb.x < 0.0);
    }

    #[test]
    fn joint_removes_relative_velocity() {
        let (mut arena, ha, hb) = two_body_arena();
        arena
            .get_mut(hb)
            .unwrap()
            .set_linear_velocity(Vector3::new(2.0, 0.0, 0.0));
        let mut joint = BallJoint::new(ha, hb);
        {
            let pa = *arena.get(ha).unwrap().sim_pose();
            let pb = *arena.get(hb).unwrap().sim_pose();
            joint.set_anchor(&pa, &pb, Point3::origin());
        }
        let mut c = Constraint::BallJoint(joint);
        c.pre_velocities_step(&arena);
        let mut iterations = 0;
        while c.solve_velocities(&mut arena) && iterations < 10 {
            iterations += 1;
        }

        let va = arena.get(ha).unwrap().velocity_at(&Point3::origin());
        let vb = arena.get(hb).unwrap().velocity_at(&Point3::origin());
        assert_relative_eq!((vb - va).norm(), 0.0, epsilon = 1e-2);
    }

    #[test]
    fn hinge_velocity_phase_is_inert() {
        let (mut arena, ha, hb) = two_body_arena();
        let mut c = Constraint::HingeJoint(HingeJoint::new(ha, hb));
        c.pre_velocities_step(&arena);
        assert!(!c.solve_velocities(&mut arena));
    }

    #[test]
    fn airborne_character_only_pins_orientation() {
        let mut arena = BodyArena::new();
        let mut body = RigidBody::dynamic();
        body.set_angular_velocity(Vector3::new(0.0, 5.0, 0.0));
        body.set_linear_velocity(Vector3::new(0.0, -3.0, 0.0));
        let h = arena.insert(body);

        let mut character = CharacterConstraint::new(h);
        character.set_target_velocity(Vector3::new(1.0, 0.0, 0.0));
        character.set_on_ground(false);
        let mut c = Constraint::Character(character);

        let step = 1.0 / 60.0;
        c.pre_position_step(&arena, step);
        assert!(!c.solve_position(&mut arena, step));
        c.solve_velocities(&mut arena);

        let body = arena.get(h).unwrap();
        // Falling velocity untouched, spin cancelled.
        assert_relative_eq!(body.linear_velocity().y, -3.0, epsilon = 1e-12);
        assert_eq!(body.angular_velocity(), Vector3::zeros());
    }

    #[test]
    fn grounded_character_steers_toward_target() {
        let mut arena = BodyArena::new();
        let h = arena.insert(RigidBody::dynamic());

        let mut character = CharacterConstraint::new(h);
        character.set_target_velocity(Vector3::new(2.0, 0.0, 0.0));
        character.set_on_ground(true);
        let mut c = Constraint::Character(character);

        let step = 1.0 / 60.0;
        c.pre_position_step(&arena, step);
        let mut iterations = 0;
        while c.solve_position(&mut arena, step) && iterations < 10 {
            iterations += 1;
        }
        c.solve_velocities(&mut arena);

        let v = arena.get(h).unwrap().linear_velocity();
        assert_relative_eq!(v.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(v.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn character_impulse_respects_force_budget() {
        let mut arena = BodyArena::new();
        let mut body = RigidBody::dynamic();
        body.set_mass(80.0).unwrap();
        let h = arena.insert(body);

        let mut character = CharacterConstraint::new(h);
        // An unreachable target in one step for a heavy body.
        character.set_target_velocity(Vector3::new(100.0, 0.0, 0.0));
        character.set_on_ground(true);
        let step = 1.0 / 60.0;
        let max_p = character.max_force() * step;
        let mut c = Constraint::Character(character);

        c.pre_position_step(&arena, step);
        let mut iterations = 0;
        while c.solve_position(&mut arena, step) && iterations < 10 {
            iterations += 1;
        }

        let body = arena.get(h).unwrap();
        let momentum = body.linear_velocity() * body.mass();
        assert!(momentum.norm() <= max_p + 1e-9);
    }
}
