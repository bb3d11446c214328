//! The simulation world: bodies, constraints, attractors, and the
//! fixed-step loop that binds them together.

use motion_spatial::{Aabb, AabbTree, Bih, BihHit, NodePool, Ray};
use motion_types::{
    BodyHandle, BodyType, CollisionMasks, ConstraintId, MotionError, Result, WorldConfig,
};
use nalgebra::{Point3, Vector3};
use tracing::{debug, trace};

use crate::attractor::Attractor;
use crate::body::{BodyArena, RigidBody};
use crate::collision::{CollisionPair, ContactManifold};
use crate::constraint::{BallJoint, CharacterConstraint, Constraint, HingeJoint};
use crate::shape;
use crate::solver::ImpulseSolver;

/// Called for every colliding pair whose masks allow callbacks.
pub type CollisionCallback = Box<dyn FnMut(BodyHandle, BodyHandle, &ContactManifold)>;

/// A body hit by [`MotionWorld::ray_cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// The hit body.
    pub body: BodyHandle,
    /// Hit parameter, in units of the ray direction.
    pub t: f64,
}

/// A rigid-body simulation world.
///
/// The world advances on a fixed internal step regardless of the timestep
/// passed to [`Self::step_simulation`]: wall-clock time accumulates and as
/// many fixed steps run as fit, after which every body's render pose is
/// interpolated toward its simulation pose. Each fixed step applies
/// attractor forces, detects collisions, and runs the impulse solver's
/// three phases around force and velocity integration.
pub struct MotionWorld {
    config: WorldConfig,
    time: f64,
    simulation_time: f64,
    frame: u64,

    bodies: BodyArena,
    attractors: Vec<Attractor>,
    constraint_ids: Vec<ConstraintId>,
    constraints: Vec<Constraint>,
    next_constraint_id: u64,

    collisions: Vec<CollisionPair>,
    solver: ImpulseSolver,

    pool: NodePool,
    dynamic_tree: AabbTree,
    static_tree: AabbTree,
    kinematic_tree: AabbTree,

    callback: Option<CollisionCallback>,
}

impl Default for MotionWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionWorld {
    /// World with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: WorldConfig::default(),
            time: 0.0,
            simulation_time: 0.0,
            frame: 0,
            bodies: BodyArena::new(),
            attractors: Vec::new(),
            constraint_ids: Vec::new(),
            constraints: Vec::new(),
            next_constraint_id: 1,
            collisions: Vec::new(),
            solver: ImpulseSolver::default(),
            pool: NodePool::new(),
            dynamic_tree: AabbTree::new(),
            static_tree: AabbTree::new(),
            kinematic_tree: AabbTree::new(),
            callback: None,
        }
    }

    /// World with an explicit configuration.
    pub fn with_config(config: WorldConfig) -> Result<Self> {
        config.validate()?;
        let mut world = Self::new();
        world.config = config;
        Ok(world)
    }

    /// The world configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Accumulated wall-clock time fed to [`Self::step_simulation`].
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time the fixed-step simulation has reached.
    #[must_use]
    pub fn simulation_time(&self) -> f64 {
        self.simulation_time
    }

    // --- bodies ---------------------------------------------------------

    /// Add a dynamic body.
    pub fn create_rigid_body(&mut self) -> BodyHandle {
        self.add_body(RigidBody::dynamic())
    }

    /// Add a static body.
    pub fn create_static_body(&mut self) -> BodyHandle {
        self.add_body(RigidBody::static_body())
    }

    /// Add a kinematic body.
    pub fn create_kinematic_body(&mut self) -> BodyHandle {
        self.add_body(RigidBody::kinematic())
    }

    /// Add a prepared body and return its handle.
    pub fn add_body(&mut self, body: RigidBody) -> BodyHandle {
        let handle = self.bodies.insert(body);
        debug!(%handle, "body added");
        handle
    }

    /// Remove a body, dropping every constraint and collision pair that
    /// referenced it.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<RigidBody> {
        let body = self.bodies.remove(handle)?;
        let mut i = 0;
        while i < self.constraints.len() {
            if self.constraints[i].references(handle) {
                self.constraints.swap_remove(i);
                self.constraint_ids.swap_remove(i);
            } else {
                i += 1;
            }
        }
        self.collisions.retain(|pair| !pair.involves(handle));
        debug!(%handle, "body removed");
        Ok(body)
    }

    /// Remove every body, constraint, and collision pair.
    pub fn remove_all_bodies(&mut self) {
        self.bodies.clear();
        self.constraints.clear();
        self.constraint_ids.clear();
        self.collisions.clear();
    }

    /// Resolve a body handle.
    pub fn body(&self, handle: BodyHandle) -> Result<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Resolve a body handle mutably.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    /// Iterate over all bodies.
    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies.iter()
    }

    // --- constraints ----------------------------------------------------

    /// Join two bodies with a ball joint.
    pub fn create_ball_joint(&mut self, a: BodyHandle, b: BodyHandle) -> Result<ConstraintId> {
        self.bodies.get(a)?;
        self.bodies.get(b)?;
        Ok(self.push_constraint(Constraint::BallJoint(BallJoint::new(a, b))))
    }

    /// Join two bodies with a hinge joint.
    pub fn create_hinge_joint(&mut self, a: BodyHandle, b: BodyHandle) -> Result<ConstraintId> {
        self.bodies.get(a)?;
        self.bodies.get(b)?;
        Ok(self.push_constraint(Constraint::HingeJoint(HingeJoint::new(a, b))))
    }

    /// Attach a character controller to a body.
    pub fn create_character_constraint(&mut self, body: BodyHandle) -> Result<ConstraintId> {
        self.bodies.get(body)?;
        Ok(self.push_constraint(Constraint::Character(CharacterConstraint::new(body))))
    }

    fn push_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        let id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        self.constraint_ids.push(id);
        self.constraints.push(constraint);
        id
    }

    /// Remove a constraint.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Constraint> {
        let index = self.constraint_index(id)?;
        self.constraint_ids.swap_remove(index);
        Ok(self.constraints.swap_remove(index))
    }

    /// Resolve a constraint id.
    pub fn constraint(&self, id: ConstraintId) -> Result<&Constraint> {
        Ok(&self.constraints[self.constraint_index(id)?])
    }

    /// Resolve a constraint id mutably.
    pub fn constraint_mut(&mut self, id: ConstraintId) -> Result<&mut Constraint> {
        let index = self.constraint_index(id)?;
        Ok(&mut self.constraints[index])
    }

    fn constraint_index(&self, id: ConstraintId) -> Result<usize> {
        self.constraint_ids
            .iter()
            .position(|&i| i == id)
            .ok_or(MotionError::StaleConstraintId(id))
    }

    /// Set a joint's anchor from a world-space point, using the constrained
    /// bodies' current simulation poses. Fails for constraints that have no
    /// anchor (the character controller).
    pub fn set_constraint_anchor(&mut self, id: ConstraintId, point: Point3<f64>) -> Result<()> {
        let index = self.constraint_index(id)?;
        let (a, b) = match &self.constraints[index] {
            Constraint::BallJoint(j) => (j.body_a(), j.body_b()),
            Constraint::HingeJoint(j) => (j.body_a(), j.body_b()),
            Constraint::Character(_) => {
                return Err(MotionError::StaleConstraintId(id));
            }
        };
        let pose_a = *self.bodies.get(a)?.sim_pose();
        let pose_b = *self.bodies.get(b)?.sim_pose();
        match &mut self.constraints[index] {
            Constraint::BallJoint(j) => j.set_anchor(&pose_a, &pose_b, point),
            Constraint::HingeJoint(j) => j.set_anchor(&pose_a, &pose_b, point),
            Constraint::Character(_) => {}
        }
        Ok(())
    }

    /// Set a hinge joint's axis from a world-space direction.
    pub fn set_hinge_axis(&mut self, id: ConstraintId, dir: Vector3<f64>) -> Result<()> {
        let index = self.constraint_index(id)?;
        let Constraint::HingeJoint(j) = &self.constraints[index] else {
            return Err(MotionError::StaleConstraintId(id));
        };
        let (a, b) = (j.body_a(), j.body_b());
        let pose_a = *self.bodies.get(a)?.sim_pose();
        let pose_b = *self.bodies.get(b)?.sim_pose();
        if let Constraint::HingeJoint(j) = &mut self.constraints[index] {
            j.set_axis(&pose_a, &pose_b, dir);
        }
        Ok(())
    }

    // --- attractors and callbacks ---------------------------------------

    /// Add a force field.
    pub fn add_attractor(&mut self, attractor: Attractor) {
        self.attractors.push(attractor);
    }

    /// Remove every force field.
    pub fn clear_attractors(&mut self) {
        self.attractors.clear();
    }

    /// The active force fields.
    #[must_use]
    pub fn attractors(&self) -> &[Attractor] {
        &self.attractors
    }

    /// Install the collision callback, replacing any previous one.
    pub fn set_collision_callback(&mut self, callback: CollisionCallback) {
        self.callback = Some(callback);
    }

    /// Remove the collision callback.
    pub fn clear_collision_callback(&mut self) {
        self.callback = None;
    }

    /// The collision pairs found by the last detection pass.
    #[must_use]
    pub fn collisions(&self) -> &[CollisionPair] {
        &self.collisions
    }

    // --- queries --------------------------------------------------------

    /// Closest body hit by `ray` within `max_t`, optionally excluding one
    /// body (a caster ignoring itself).
    #[must_use]
    pub fn ray_cast(
        &self,
        ray: &Ray,
        max_t: f64,
        exclude: Option<BodyHandle>,
    ) -> Option<RayHit> {
        let mut handles = Vec::new();
        let mut boxes = Vec::new();
        let mut centers = Vec::new();
        for (handle, body) in self.bodies.iter() {
            if Some(handle) == exclude {
                continue;
            }
            let Some(bb) = body.bounding_box() else {
                continue;
            };
            handles.push(handle);
            centers.push(bb.center());
            boxes.push(bb);
        }
        if handles.is_empty() {
            return None;
        }

        let bih = Bih::build(&boxes, &centers, None, 2, 0);
        let mut hit = BihHit {
            t: max_t,
            id: u32::MAX,
        };
        bih.trace(ray, &mut hit, |ray, id, closest| {
            let body = match self.bodies.get(handles[id as usize]) {
                Ok(b) => b,
                Err(_) => return false,
            };
            let Some(shape) = body.shape() else {
                return false;
            };
            match shape.ray_intersect(body.sim_pose(), ray) {
                Some(t) if t < *closest => {
                    *closest = t;
                    true
                }
                _ => false,
            }
        });

        (hit.id != u32::MAX).then(|| RayHit {
            body: handles[hit.id as usize],
            t: hit.t,
        })
    }

    // --- stepping -------------------------------------------------------

    /// Advance the simulation by `step` seconds of wall-clock time.
    ///
    /// Runs as many fixed steps as fit in the accumulated time, then
    /// interpolates every body's render pose. Returns whether at least one
    /// fixed step ran.
    pub fn step_simulation(&mut self, step: f64) -> Result<bool> {
        if !(step.is_finite() && step > 0.0) {
            return Err(MotionError::InvalidTimestep(step));
        }

        let previous_time = self.time;
        self.time += step;

        let delta = self.config.simulation_delta();
        let mut ran = false;
        while self.simulation_time <= self.time {
            self.single_step(delta);
            ran = true;
        }

        let elapsed = self.simulation_time - previous_time;
        if elapsed > 0.0 {
            let t = step / elapsed;
            for (_, body) in self.bodies.iter_mut() {
                body.update_render(t);
            }
        }
        Ok(ran)
    }

    fn single_step(&mut self, step: f64) {
        trace!(time = self.simulation_time, "fixed step");

        for attractor in &self.attractors {
            attractor.apply(&mut self.bodies);
        }

        self.collision_detection();
        self.update_character_ground();

        for (_, body) in self.bodies.iter_mut() {
            body.apply_forces(step);
        }

        self.solver
            .solve_collisions(&self.config, &mut self.bodies, &mut self.collisions);
        self.solver.solve_positions(
            &self.config,
            &mut self.bodies,
            &mut self.collisions,
            &mut self.constraints,
            step,
        );

        for (_, body) in self.bodies.iter_mut() {
            body.apply_velocities(step);
        }

        self.solver.solve_velocities(
            &self.config,
            &mut self.bodies,
            &mut self.collisions,
            &mut self.constraints,
        );

        self.simulation_time += step;
    }

    /// Broad phase over the spatial indexes, then narrow phase and manifold
    /// upkeep for every surviving pair.
    fn collision_detection(&mut self) {
        self.frame += 1;
        let frame = self.frame;

        let mut dyn_handles = Vec::new();
        let mut dyn_boxes: Vec<Aabb> = Vec::new();
        let mut dyn_centers = Vec::new();
        let mut static_handles = Vec::new();
        let mut static_boxes: Vec<Aabb> = Vec::new();
        let mut kin_handles = Vec::new();
        let mut kin_boxes: Vec<Aabb> = Vec::new();

        for (handle, body) in self.bodies.iter() {
            let Some(bb) = body.bounding_box() else {
                continue;
            };
            match body.body_type() {
                BodyType::Dynamic => {
                    dyn_handles.push(handle);
                    dyn_centers.push(bb.center());
                    dyn_boxes.push(bb);
                }
                BodyType::Static => {
                    static_handles.push(handle);
                    static_boxes.push(bb);
                }
                BodyType::Kinematic => {
                    kin_handles.push(handle);
                    kin_boxes.push(bb);
                }
            }
        }

        let mut candidates: Vec<(BodyHandle, BodyHandle)> = Vec::new();

        // Dynamic tree against the static and kinematic trees.
        self.dynamic_tree.clear(&mut self.pool);
        self.static_tree.clear(&mut self.pool);
        self.kinematic_tree.clear(&mut self.pool);

        let mut ids: Vec<u32> = (0..dyn_boxes.len() as u32).collect();
        let mut boxes = dyn_boxes.clone();
        self.dynamic_tree.build(&mut self.pool, &mut boxes, &mut ids);

        let mut ids: Vec<u32> = (0..static_boxes.len() as u32).collect();
        self.static_tree
            .build(&mut self.pool, &mut static_boxes, &mut ids);

        let mut ids: Vec<u32> = (0..kin_boxes.len() as u32).collect();
        self.kinematic_tree
            .build(&mut self.pool, &mut kin_boxes, &mut ids);

        self.dynamic_tree
            .for_each_collision(&self.pool, &self.static_tree, |d, s| {
                candidates.push((dyn_handles[d as usize], static_handles[s as usize]));
            });
        self.dynamic_tree
            .for_each_collision(&self.pool, &self.kinematic_tree, |d, k| {
                candidates.push((dyn_handles[d as usize], kin_handles[k as usize]));
            });

        // Dynamic-dynamic pairs through the interval hierarchy, each pair
        // reported once.
        let bih = Bih::build(&dyn_boxes, &dyn_centers, None, 2, 0);
        let mut found = Vec::new();
        for a in 0..dyn_handles.len() {
            found.clear();
            bih.elements_in_box_filtered(&dyn_boxes[a], &mut found, |query, id| {
                (id as usize) > a && dyn_boxes[id as usize].overlaps(query)
            });
            for &b in &found {
                candidates.push((dyn_handles[a], dyn_handles[b as usize]));
            }
        }

        // Refresh or create the persistent pairs.
        for (a, b) in candidates {
            if let Some(pair) = self.collisions.iter_mut().find(|p| p.matches(a, b)) {
                pair.touch(frame);
            } else {
                self.collisions.push(CollisionPair::new(a, b, frame));
            }
        }
        self.collisions.retain(|pair| pair.frame() == frame);

        // Narrow phase and manifold upkeep.
        for pair in &mut self.collisions {
            let (Ok(a), Ok(b)) = (
                self.bodies.get(pair.body_a()),
                self.bodies.get(pair.body_b()),
            ) else {
                continue;
            };
            let (Some(shape_a), Some(shape_b)) = (a.shape(), b.shape()) else {
                continue;
            };
            let (pose_a, pose_b) = (*a.sim_pose(), *b.sim_pose());
            shape::collide(shape_a, &pose_a, shape_b, &pose_b, pair.manifold_mut());
            pair.manifold_mut().update_positions(&pose_a, &pose_b);
            pair.manifold_mut().remove_invalids();
        }

        if let Some(callback) = self.callback.as_mut() {
            for pair in &self.collisions {
                if pair.manifold().is_empty() {
                    continue;
                }
                let (Ok(a), Ok(b)) = (
                    self.bodies.get(pair.body_a()),
                    self.bodies.get(pair.body_b()),
                ) else {
                    continue;
                };
                if CollisionMasks::triggers_callback(a.masks(), b.masks()) {
                    callback(pair.body_a(), pair.body_b(), pair.manifold());
                }
            }
        }
    }

    /// Probe for ground under every character controller with a short
    /// downward ray, ignoring the controlled body itself.
    fn update_character_ground(&mut self) {
        let mut probes = Vec::new();
        for (index, constraint) in self.constraints.iter().enumerate() {
            if let Constraint::Character(character) = constraint {
                if let Some((start, reach)) = character.probe_segment(&self.bodies) {
                    probes.push((index, character.body(), start, reach));
                }
            }
        }
        for (index, body, start, reach) in probes {
            let ray = Ray::new(start, -Vector3::y());
            let grounded = self.ray_cast(&ray, reach, Some(body)).is_some();
            if let Constraint::Character(character) = &mut self.constraints[index] {
                character.set_on_ground(grounded);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shape::CollisionShape;
    use approx::assert_relative_eq;

    fn ground_body() -> RigidBody {
        let mut ground = RigidBody::static_body();
        ground.set_shape(Some(CollisionShape::cuboid(Vector3::new(20.0, 1.0, 20.0))));
        ground.set_position(Point3::new(0.0, -0.5, 0.0));
        ground
    }

    #[test]
    fn fixed_steps_accumulate() {
        // A rate of 64 Hz keeps the arithmetic exact in binary.
        let config = WorldConfig::default().with_simulation_rate(64.0);
        let mut world = MotionWorld::with_config(config).unwrap();
        // Quarter of a fixed step: the first call runs the pending step at
        // t=0, further ones accumulate until the next boundary.
        assert!(world.step_simulation(1.0 / 256.0).unwrap());
        assert!(!world.step_simulation(1.0 / 256.0).unwrap());
        assert!(!world.step_simulation(1.0 / 256.0).unwrap());
        assert!(world.step_simulation(1.0 / 256.0).unwrap());
    }

    #[test]
    fn bad_timestep_is_rejected() {
        let mut world = MotionWorld::new();
        assert!(matches!(
            world.step_simulation(0.0),
            Err(MotionError::InvalidTimestep(_))
        ));
        assert!(world.step_simulation(f64::NAN).is_err());
    }

    #[test]
    fn removing_a_body_drops_its_constraints() {
        let mut world = MotionWorld::new();
        let a = world.create_rigid_body();
        let b = world.create_rigid_body();
        let joint = world.create_ball_joint(a, b).unwrap();

        world.remove_body(b).unwrap();
        assert!(world.constraint(joint).is_err());
        assert!(world.body(b).is_err());
        assert!(world.body(a).is_ok());
    }

    #[test]
    fn anchor_setting_rejects_character_constraints() {
        let mut world = MotionWorld::new();
        let a = world.create_rigid_body();
        let id = world.create_character_constraint(a).unwrap();
        assert!(world.set_constraint_anchor(id, Point3::origin()).is_err());
    }

    #[test]
    fn ray_cast_finds_the_closest_body() {
        let mut world = MotionWorld::new();
        let near = world.create_rigid_body();
        world
            .body_mut(near)
            .unwrap()
            .set_shape(Some(CollisionShape::sphere(0.5)));
        world
            .body_mut(near)
            .unwrap()
            .set_position(Point3::new(0.0, 0.0, 3.0));
        let far = world.create_rigid_body();
        world
            .body_mut(far)
            .unwrap()
            .set_shape(Some(CollisionShape::sphere(0.5)));
        world
            .body_mut(far)
            .unwrap()
            .set_position(Point3::new(0.0, 0.0, 8.0));

        let ray = Ray::new(Point3::origin(), Vector3::z());
        let hit = world.ray_cast(&ray, 100.0, None).unwrap();
        assert_eq!(hit.body, near);
        assert_relative_eq!(hit.t, 2.5, epsilon = 1e-9);

        // Excluding the near body exposes the far one.
        let hit = world.ray_cast(&ray, 100.0, Some(near)).unwrap();
        assert_eq!(hit.body, far);
    }

    #[test]
    fn overlapping_bodies_produce_one_pair() {
        let mut world = MotionWorld::new();
        world.add_body(ground_body());
        let ball = world.create_rigid_body();
        world
            .body_mut(ball)
            .unwrap()
            .set_shape(Some(CollisionShape::sphere(0.5)));
        world
            .body_mut(ball)
            .unwrap()
            .set_position(Point3::new(0.0, 0.45, 0.0));

        world.step_simulation(1.0 / 60.0).unwrap();
        assert_eq!(world.collisions().len(), 1);
        assert!(!world.collisions()[0].manifold().is_empty());
    }

    #[test]
    fn separated_bodies_produce_no_pairs() {
        let mut world = MotionWorld::new();
        world.add_body(ground_body());
        let ball = world.create_rigid_body();
        world
            .body_mut(ball)
            .unwrap()
            .set_shape(Some(CollisionShape::sphere(0.5)));
        world
            .body_mut(ball)
            .unwrap()
            .set_position(Point3::new(0.0, 50.0, 0.0));

        world.step_simulation(1.0 / 60.0).unwrap();
        assert!(world.collisions().is_empty());
    }

    #[test]
    fn collision_callback_fires_for_touching_pairs() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut world = MotionWorld::new();
        world.add_body(ground_body());
        let ball = world.create_rigid_body();
        world
            .body_mut(ball)
            .unwrap()
            .set_shape(Some(CollisionShape::sphere(0.5)));
        world
            .body_mut(ball)
            .unwrap()
            .set_position(Point3::new(0.0, 0.45, 0.0));

        let hits = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&hits);
        world.set_collision_callback(Box::new(move |a, b, manifold| {
            sink.borrow_mut().push((a, b, manifold.len()));
        }));

        world.step_simulation(1.0 / 60.0).unwrap();
        let hits = hits.borrow();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].2 >= 1);
    }

    #[test]
    fn render_pose_trails_simulation_pose() {
        let mut world = MotionWorld::new();
        let ball = world.create_rigid_body();
        world
            .body_mut(ball)
            .unwrap()
            .set_linear_velocity(Vector3::new(6.0, 0.0, 0.0));

        world.step_simulation(1.0 / 240.0).unwrap();
        let body = world.body(ball).unwrap();
        let render_x = body.pose().position.x;
        let sim_x = body.sim_pose().position.x;
        assert!(render_x > 0.0);
        assert!(render_x <= sim_x + 1e-12);
    }
}
