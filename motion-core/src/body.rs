//! Rigid bodies and the generational arena that stores them.

use motion_spatial::Aabb;
use motion_types::{BodyHandle, BodyType, CollisionMasks, MassProperties, MotionError, Pose, Result};
use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};

use crate::shape::CollisionShape;

/// A rigid body: simulation pose, velocities, mass properties and shape.
///
/// Each body carries two poses. The simulation pose is the one the fixed-step
/// integrator and solver advance; the render pose trails it and is
/// interpolated by [`crate::MotionWorld::step_simulation`] so callers see
/// smooth motion between fixed steps.
#[derive(Debug, Clone)]
pub struct RigidBody {
    body_type: BodyType,
    active: bool,
    friction: f64,
    restitution: f64,

    mass_props: MassProperties,
    inv_mass: f64,
    inv_inertia: Matrix3<f64>,
    inv_world_inertia: Matrix3<f64>,

    // State at the start of the last velocity integration, consumed by the
    // velocity solve.
    prev_inv_world_inertia: Matrix3<f64>,
    prev_position: Point3<f64>,

    render_pose: Pose,
    sim_pose: Pose,

    linear_velocity: Vector3<f64>,
    angular_velocity: Vector3<f64>,
    total_force: Vector3<f64>,
    total_torque: Vector3<f64>,

    shape: Option<CollisionShape>,
    masks: CollisionMasks,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self::dynamic()
    }
}

impl RigidBody {
    /// Body of the given type with default mass properties and no shape.
    #[must_use]
    pub fn new(body_type: BodyType) -> Self {
        let mut body = Self {
            body_type,
            active: true,
            friction: 0.5,
            restitution: 0.5,
            mass_props: MassProperties::default(),
            inv_mass: 0.0,
            inv_inertia: Matrix3::zeros(),
            inv_world_inertia: Matrix3::zeros(),
            prev_inv_world_inertia: Matrix3::zeros(),
            prev_position: Point3::origin(),
            render_pose: Pose::identity(),
            sim_pose: Pose::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            total_force: Vector3::zeros(),
            total_torque: Vector3::zeros(),
            shape: None,
            masks: CollisionMasks::default(),
        };
        body.update_mass_derived();
        body.update_pose_derived();
        body
    }

    /// Fully simulated body.
    #[must_use]
    pub fn dynamic() -> Self {
        Self::new(BodyType::Dynamic)
    }

    /// Immovable body.
    #[must_use]
    pub fn static_body() -> Self {
        Self::new(BodyType::Static)
    }

    /// Application-driven body: moves by its velocity, ignores forces.
    #[must_use]
    pub fn kinematic() -> Self {
        Self::new(BodyType::Kinematic)
    }

    /// The body's simulation kind.
    #[must_use]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Whether the body is advanced by the simulation.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enable or disable simulation of this body.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Friction coefficient.
    #[must_use]
    pub fn friction(&self) -> f64 {
        self.friction
    }

    /// Set the friction coefficient.
    pub fn set_friction(&mut self, friction: f64) {
        self.friction = friction;
    }

    /// Restitution (bounciness) coefficient.
    #[must_use]
    pub fn restitution(&self) -> f64 {
        self.restitution
    }

    /// Set the restitution coefficient.
    pub fn set_restitution(&mut self, restitution: f64) {
        self.restitution = restitution;
    }

    /// Combined friction for a contact between `self` and `other`.
    #[must_use]
    pub fn friction_with(&self, other: &Self) -> f64 {
        (self.friction + other.friction) * 0.5
    }

    /// Combined restitution for a contact between `self` and `other`.
    #[must_use]
    pub fn restitution_with(&self, other: &Self) -> f64 {
        (self.restitution + other.restitution) * 0.5
    }

    /// Collision filtering masks.
    #[must_use]
    pub fn masks(&self) -> &CollisionMasks {
        &self.masks
    }

    /// Set the collision filtering masks.
    pub fn set_masks(&mut self, masks: CollisionMasks) {
        self.masks = masks;
    }

    /// Attached collision shape, if any.
    #[must_use]
    pub fn shape(&self) -> Option<&CollisionShape> {
        self.shape.as_ref()
    }

    /// Attach (or remove) a collision shape.
    pub fn set_shape(&mut self, shape: Option<CollisionShape>) {
        self.shape = shape;
    }

    /// World-space bounding box of the shape at the simulation pose.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Aabb> {
        self.shape.as_ref().map(|s| s.bounding_box(&self.sim_pose))
    }

    /// Mass and body-local inertia.
    #[must_use]
    pub fn mass_properties(&self) -> &MassProperties {
        &self.mass_props
    }

    /// Total mass.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass_props.mass
    }

    /// Inverse mass; zero for static and kinematic bodies.
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        self.inv_mass
    }

    /// Set the mass, deriving the inertia of a radius-0.5 sphere.
    pub fn set_mass(&mut self, mass: f64) -> Result<()> {
        self.set_mass_properties(MassProperties::sphere(mass, 0.5))
    }

    /// Set full mass properties.
    pub fn set_mass_properties(&mut self, props: MassProperties) -> Result<()> {
        props.validate()?;
        self.mass_props = props;
        self.update_mass_derived();
        self.update_pose_derived();
        Ok(())
    }

    /// Render (interpolated) pose.
    #[must_use]
    pub fn pose(&self) -> &Pose {
        &self.render_pose
    }

    /// Simulation pose.
    #[must_use]
    pub fn sim_pose(&self) -> &Pose {
        &self.sim_pose
    }

    /// Teleport the body: simulation and render poses both jump to `pose`.
    pub fn set_pose(&mut self, pose: Pose) {
        self.sim_pose = pose;
        self.render_pose = pose;
        self.prev_position = pose.position;
        self.update_pose_derived();
    }

    /// Teleport to `position`, keeping the orientation.
    pub fn set_position(&mut self, position: Point3<f64>) {
        let rotation = self.sim_pose.rotation;
        self.set_pose(Pose::new(position, rotation));
    }

    /// Teleport to `orientation`, keeping the position.
    pub fn set_orientation(&mut self, orientation: UnitQuaternion<f64>) {
        let position = self.sim_pose.position;
        self.set_pose(Pose::new(position, orientation));
    }

    pub(crate) fn set_sim_pose(&mut self, pose: Pose) {
        self.sim_pose = pose;
        self.update_pose_derived();
    }

    /// Linear velocity of the center of mass.
    #[must_use]
    pub fn linear_velocity(&self) -> Vector3<f64> {
        self.linear_velocity
    }

    /// Set the linear velocity.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f64>) {
        self.linear_velocity = velocity;
    }

    /// Angular velocity (world space, radians per second).
    #[must_use]
    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity
    }

    /// Set the angular velocity.
    pub fn set_angular_velocity(&mut self, velocity: Vector3<f64>) {
        self.angular_velocity = velocity;
    }

    /// Velocity of the world-space point `pos` carried by this body.
    #[must_use]
    pub fn velocity_at(&self, pos: &Point3<f64>) -> Vector3<f64> {
        self.linear_velocity + self.angular_velocity.cross(&(pos - self.sim_pose.position))
    }

    /// Like [`Self::velocity_at`], but with the lever arm measured from the
    /// position the body held before the last velocity integration.
    #[must_use]
    pub fn velocity_prev_at(&self, pos: &Point3<f64>) -> Vector3<f64> {
        self.linear_velocity + self.angular_velocity.cross(&(pos - self.prev_position))
    }

    /// Accumulate a force through the center of mass for the next step.
    pub fn add_force(&mut self, force: Vector3<f64>) {
        self.total_force += force;
    }

    /// Accumulate a torque for the next step.
    pub fn add_torque(&mut self, torque: Vector3<f64>) {
        self.total_torque += torque;
    }

    /// Accumulated force, cleared by [`Self::apply_forces`].
    #[must_use]
    pub fn total_force(&self) -> Vector3<f64> {
        self.total_force
    }

    /// Apply an impulse through the center of mass.
    pub fn apply_impulse(&mut self, impulse: Vector3<f64>) {
        if self.body_type.is_dynamic() {
            self.linear_velocity += impulse * self.inv_mass;
        }
    }

    /// Apply an impulse at the world-space point `pos`.
    pub fn apply_impulse_at(&mut self, impulse: Vector3<f64>, pos: &Point3<f64>) {
        if self.body_type.is_dynamic() {
            self.linear_velocity += impulse * self.inv_mass;
            self.apply_torque_impulse((pos - self.sim_pose.position).cross(&impulse));
        }
    }

    /// Apply a pure torque impulse.
    pub fn apply_torque_impulse(&mut self, impulse: Vector3<f64>) {
        if self.body_type.is_dynamic() {
            self.angular_velocity += self.inv_world_inertia * impulse;
        }
    }

    /// Apply an impulse at `pos` with the lever arm and inertia the body had
    /// before the last velocity integration.
    pub(crate) fn apply_impulse_prev(&mut self, impulse: Vector3<f64>, pos: &Point3<f64>) {
        if self.body_type.is_dynamic() {
            self.linear_velocity += impulse * self.inv_mass;
            self.angular_velocity +=
                self.prev_inv_world_inertia * (pos - self.prev_position).cross(&impulse);
        }
    }

    /// Integrate accumulated forces into velocities, then clear them.
    pub(crate) fn apply_forces(&mut self, step: f64) {
        if !self.active {
            return;
        }
        self.linear_velocity += self.total_force * (self.inv_mass * step);
        self.angular_velocity += self.inv_world_inertia * (self.total_torque * step);
        self.total_force = Vector3::zeros();
        self.total_torque = Vector3::zeros();
    }

    /// Integrate velocities into the simulation pose.
    ///
    /// Snapshots the pre-integration position and world inertia for the
    /// velocity solve, then advances position and orientation. The
    /// orientation is renormalized after the angular update.
    pub(crate) fn apply_velocities(&mut self, step: f64) {
        if !self.active || self.body_type == BodyType::Static {
            return;
        }
        self.prev_position = self.sim_pose.position;
        self.prev_inv_world_inertia = self.inv_world_inertia;

        let position = self.sim_pose.position + self.linear_velocity * step;
        let mut rotation = self.sim_pose.rotation;

        let av_len = self.angular_velocity.norm();
        if av_len > 0.0 {
            let drot = UnitQuaternion::from_scaled_axis(self.angular_velocity * step);
            rotation = UnitQuaternion::new_normalize((drot * rotation).into_inner());
        }

        self.sim_pose = Pose::new(position, rotation);
        self.update_pose_derived();
    }

    /// Pose extrapolated `step` seconds ahead along the current velocities.
    #[must_use]
    pub fn look_ahead(&self, step: f64) -> Pose {
        let position = self.sim_pose.position + self.linear_velocity * step;
        let mut rotation = self.sim_pose.rotation;
        let av_len = self.angular_velocity.norm();
        if av_len > 0.0 {
            let drot = UnitQuaternion::from_scaled_axis(self.angular_velocity * step);
            rotation = UnitQuaternion::new_normalize((drot * rotation).into_inner());
        }
        Pose::new(position, rotation)
    }

    /// World-space point `pos` extrapolated `step` seconds ahead: the lever
    /// arm is rotated by the angular motion and the linear motion added.
    #[must_use]
    pub fn look_ahead_point(&self, pos: &Point3<f64>, step: f64) -> Point3<f64> {
        let r = pos - self.sim_pose.position;
        let av_len = self.angular_velocity.norm();
        let r = if av_len > 0.0 {
            UnitQuaternion::from_scaled_axis(self.angular_velocity * step) * r
        } else {
            r
        };
        self.sim_pose.position + self.linear_velocity * step + r
    }

    /// Advance the render pose a fraction `t` of the way to the simulation
    /// pose.
    pub(crate) fn update_render(&mut self, t: f64) {
        self.render_pose = self.render_pose.lerp(&self.sim_pose, t);
    }

    /// Collision response matrix of the world-space point `pos`:
    /// `K = (1/m)·I − [r]× · I_w⁻¹ · [r]×`. Zero for non-dynamic bodies.
    #[must_use]
    pub fn compute_k(&self, pos: &Point3<f64>) -> Matrix3<f64> {
        if !self.body_type.is_dynamic() {
            return Matrix3::zeros();
        }
        let r = pos - self.sim_pose.position;
        let rx = r.cross_matrix();
        Matrix3::identity() * self.inv_mass - rx * self.inv_world_inertia * rx
    }

    /// Angular response matrix: the world-space inverse inertia tensor.
    /// Zero for non-dynamic bodies.
    #[must_use]
    pub fn compute_l(&self) -> Matrix3<f64> {
        if !self.body_type.is_dynamic() {
            return Matrix3::zeros();
        }
        self.inv_world_inertia
    }

    fn update_mass_derived(&mut self) {
        if self.body_type.is_dynamic() {
            self.inv_mass = self.mass_props.inverse_mass();
            self.inv_inertia = self.mass_props.inverse_inertia();
        } else {
            self.inv_mass = 0.0;
            self.inv_inertia = Matrix3::zeros();
        }
    }

    fn update_pose_derived(&mut self) {
        let rot = self.sim_pose.rotation.to_rotation_matrix().into_inner();
        self.inv_world_inertia = rot * self.inv_inertia * rot.transpose();
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    body: Option<RigidBody>,
}

/// Generational arena of rigid bodies.
///
/// Handles issued by [`Self::insert`] stay valid until the body is removed;
/// removal bumps the slot's generation so stale handles resolve to
/// [`MotionError::StaleBodyHandle`] instead of the slot's next occupant.
#[derive(Debug, Default)]
pub struct BodyArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl BodyArena {
    /// Empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether the arena holds no bodies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a body and return its handle.
    pub fn insert(&mut self, body: RigidBody) -> BodyHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.body = Some(body);
            BodyHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                body: Some(body),
            });
            BodyHandle::new(index, 0)
        }
    }

    /// Remove the body behind `handle`, invalidating it.
    pub fn remove(&mut self, handle: BodyHandle) -> Result<RigidBody> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.body.is_some())
            .ok_or(MotionError::StaleBodyHandle(handle))?;
        let body = slot.body.take().ok_or(MotionError::StaleBodyHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(body)
    }

    /// Remove every body and invalidate all handles.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.body.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    /// Whether `handle` still refers to a live body.
    #[must_use]
    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|s| s.generation == handle.generation && s.body.is_some())
    }

    /// Resolve a handle.
    pub fn get(&self, handle: BodyHandle) -> Result<&RigidBody> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.body.as_ref())
            .ok_or(MotionError::StaleBodyHandle(handle))
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.body.as_mut())
            .ok_or(MotionError::StaleBodyHandle(handle))
    }

    /// Resolve two distinct handles mutably at once.
    pub fn pair_mut(
        &mut self,
        a: BodyHandle,
        b: BodyHandle,
    ) -> Result<(&mut RigidBody, &mut RigidBody)> {
        if a.index == b.index {
            return Err(MotionError::StaleBodyHandle(b));
        }
        if !self.contains(a) {
            return Err(MotionError::StaleBodyHandle(a));
        }
        if !self.contains(b) {
            return Err(MotionError::StaleBodyHandle(b));
        }
        let (lo, hi, swapped) = if a.index < b.index {
            (a.index as usize, b.index as usize, false)
        } else {
            (b.index as usize, a.index as usize, true)
        };
        let (head, tail) = self.slots.split_at_mut(hi);
        let first = head[lo].body.as_mut().ok_or(MotionError::StaleBodyHandle(a))?;
        let second = tail[0].body.as_mut().ok_or(MotionError::StaleBodyHandle(b))?;
        if swapped {
            Ok((second, first))
        } else {
            Ok((first, second))
        }
    }

    /// Iterate over live bodies.
    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.body
                .as_ref()
                .map(|b| (BodyHandle::new(i as u32, s.generation), b))
        })
    }

    /// Iterate mutably over live bodies.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (BodyHandle, &mut RigidBody)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.body
                .as_mut()
                .map(move |b| (BodyHandle::new(i as u32, generation), b))
        })
    }

    /// Handles of all live bodies.
    #[must_use]
    pub fn handles(&self) -> Vec<BodyHandle> {
        self.iter().map(|(h, _)| h).collect()
    }
}
