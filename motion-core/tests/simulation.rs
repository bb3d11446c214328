//! End-to-end simulation scenarios driving the public world API.

use approx::assert_relative_eq;
use motion_core::{
    Attractor, CollisionShape, Constraint, MotionWorld, RigidBody, WorldConfig,
};
use nalgebra::{Point3, Vector3};

const STEP: f64 = 1.0 / 60.0;

fn ground() -> RigidBody {
    let mut body = RigidBody::static_body();
    body.set_shape(Some(CollisionShape::cuboid(Vector3::new(40.0, 1.0, 40.0))));
    body.set_position(Point3::new(0.0, -0.5, 0.0));
    body.set_restitution(0.0);
    body
}

#[test]
fn dropped_ball_comes_to_rest_on_the_ground() {
    let mut world = MotionWorld::new();
    world.add_attractor(Attractor::earth_gravity());
    world.add_body(ground());

    let ball = world.create_rigid_body();
    {
        let body = world.body_mut(ball).unwrap();
        body.set_shape(Some(CollisionShape::sphere(0.5)));
        body.set_position(Point3::new(0.0, 2.0, 0.0));
        body.set_restitution(0.0);
    }

    for _ in 0..240 {
        world.step_simulation(STEP).unwrap();
    }

    let body = world.body(ball).unwrap();
    let y = body.sim_pose().position.y;
    assert!((0.45..=0.56).contains(&y), "ball rests at y={y}");
    assert!(body.linear_velocity().norm() < 0.2);

    // The resting state is stable: another stretch of simulation does not
    // disturb it.
    for _ in 0..120 {
        world.step_simulation(STEP).unwrap();
    }
    let y2 = world.body(ball).unwrap().sim_pose().position.y;
    assert!((y - y2).abs() < 0.02, "rest drifted from {y} to {y2}");
}

#[test]
fn two_bodies_attract_with_opposite_momenta() {
    let mut world = MotionWorld::new();
    world.add_attractor(Attractor::gravitational(0.0));

    let a = world.create_rigid_body();
    let b = world.create_rigid_body();
    {
        let body = world.body_mut(a).unwrap();
        body.set_mass(1.0e10).unwrap();
        body.set_position(Point3::new(-5.0, 0.0, 0.0));
    }
    {
        let body = world.body_mut(b).unwrap();
        body.set_mass(1.0e10).unwrap();
        body.set_position(Point3::new(5.0, 0.0, 0.0));
    }

    for _ in 0..60 {
        world.step_simulation(STEP).unwrap();
    }

    let va = world.body(a).unwrap().linear_velocity();
    let vb = world.body(b).unwrap().linear_velocity();
    assert!(va.x > 0.0, "a accelerates toward b");
    assert!(vb.x < 0.0, "b accelerates toward a");
    // Equal masses: the total momentum stays zero.
    assert_relative_eq!(va.x + vb.x, 0.0, epsilon = 1e-9);
    assert_relative_eq!(va.y, 0.0, epsilon = 1e-12);
}

#[test]
fn ball_joint_at_equilibrium_stays_inert() {
    let mut world = MotionWorld::new();
    let a = world.create_rigid_body();
    let b = world.create_rigid_body();
    world
        .body_mut(a)
        .unwrap()
        .set_position(Point3::new(-1.0, 0.0, 0.0));
    world
        .body_mut(b)
        .unwrap()
        .set_position(Point3::new(1.0, 0.0, 0.0));

    let joint = world.create_ball_joint(a, b).unwrap();
    world.set_constraint_anchor(joint, Point3::origin()).unwrap();

    for _ in 0..60 {
        world.step_simulation(STEP).unwrap();
    }

    // A satisfied joint with no external forces must not inject energy.
    assert!(world.body(a).unwrap().linear_velocity().norm() < 1e-9);
    assert!(world.body(b).unwrap().linear_velocity().norm() < 1e-9);
    assert_relative_eq!(
        world.body(a).unwrap().sim_pose().position.x,
        -1.0,
        epsilon = 1e-9
    );
}

#[test]
fn ball_joint_keeps_anchors_coincident_under_motion() {
    let mut world = MotionWorld::new();
    let pivot = world.create_static_body();
    let bob = world.create_rigid_body();
    world
        .body_mut(bob)
        .unwrap()
        .set_position(Point3::new(1.0, 0.0, 0.0));
    world
        .body_mut(bob)
        .unwrap()
        .set_linear_velocity(Vector3::new(0.0, 0.0, 2.0));

    let joint = world.create_ball_joint(pivot, bob).unwrap();
    world.set_constraint_anchor(joint, Point3::origin()).unwrap();

    for _ in 0..120 {
        world.step_simulation(STEP).unwrap();
    }

    // The bob's anchor point (its local -X surface direction) stays pinned
    // to the pivot within solver tolerance, so the bob stays on a unit
    // circle around the origin.
    let pos = world.body(bob).unwrap().sim_pose().position;
    let radius = pos.coords.norm();
    assert!((radius - 1.0).abs() < 0.05, "bob wandered to radius {radius}");
}

#[test]
fn long_spins_keep_unit_quaternions() {
    let mut world = MotionWorld::new();
    let top = world.create_rigid_body();
    world
        .body_mut(top)
        .unwrap()
        .set_angular_velocity(Vector3::new(3.0, -5.0, 2.0));

    for _ in 0..600 {
        world.step_simulation(STEP).unwrap();
    }

    let rotation = world.body(top).unwrap().sim_pose().rotation;
    assert_relative_eq!(rotation.norm(), 1.0, epsilon = 1e-5);
}

#[test]
fn character_converges_to_its_target_velocity() {
    let mut world = MotionWorld::new();
    world.add_body(ground());

    // The character body's origin is at foot level, just above the ground.
    let hero = world.create_rigid_body();
    world
        .body_mut(hero)
        .unwrap()
        .set_position(Point3::new(0.0, 0.02, 0.0));

    let id = world.create_character_constraint(hero).unwrap();
    if let Constraint::Character(character) = world.constraint_mut(id).unwrap() {
        character.set_target_velocity(Vector3::new(2.0, 0.0, 0.0));
    }

    for _ in 0..60 {
        world.step_simulation(STEP).unwrap();
    }

    let body = world.body(hero).unwrap();
    assert_relative_eq!(body.linear_velocity().x, 2.0, epsilon = 1e-6);
    assert_relative_eq!(body.linear_velocity().z, 0.0, epsilon = 1e-6);
    assert!(body.sim_pose().position.x > 1.5, "character moved forward");
    // Upright and not spinning.
    assert_eq!(body.angular_velocity(), Vector3::zeros());
    assert_relative_eq!(body.sim_pose().rotation.angle(), 0.0, epsilon = 1e-9);

    if let Constraint::Character(character) = world.constraint(id).unwrap() {
        assert!(character.is_on_ground());
    }
}

#[test]
fn airborne_character_reports_falling() {
    let mut world = MotionWorld::new();
    world.add_body(ground());

    let hero = world.create_rigid_body();
    world
        .body_mut(hero)
        .unwrap()
        .set_position(Point3::new(0.0, 5.0, 0.0));

    let id = world.create_character_constraint(hero).unwrap();
    world.step_simulation(STEP).unwrap();

    if let Constraint::Character(character) = world.constraint(id).unwrap() {
        assert!(character.is_falling());
    }

    // Teleport to foot level: the next probe finds the ground.
    world
        .body_mut(hero)
        .unwrap()
        .set_position(Point3::new(0.0, 0.02, 0.0));
    world.step_simulation(STEP).unwrap();

    if let Constraint::Character(character) = world.constraint(id).unwrap() {
        assert!(character.is_on_ground());
    }
}

#[test]
fn overlapping_static_and_dynamic_make_one_pair() {
    let config = WorldConfig::default();
    let mut world = MotionWorld::with_config(config).unwrap();
    world.add_body(ground());

    let ball = world.create_rigid_body();
    {
        let body = world.body_mut(ball).unwrap();
        body.set_shape(Some(CollisionShape::sphere(0.5)));
        body.set_position(Point3::new(0.0, 0.45, 0.0));
    }

    world.step_simulation(STEP).unwrap();
    assert_eq!(world.collisions().len(), 1);
    let pair = &world.collisions()[0];
    assert!(pair.involves(ball));
    assert!(!pair.manifold().is_empty());
}
