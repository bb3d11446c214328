//! Iterative impulse solver.
//!
//! Three phases run inside every fixed step, each a Gauss-Seidel sweep over
//! the active contacts (and, for the last two, the joints):
//!
//! 1. collision response: restitution impulses on approaching contacts,
//! 2. position correction: penetration and joint drift removed from the
//!    looked-ahead positions before velocities are integrated,
//! 3. velocity correction: residual relative velocity removed after
//!    integration, using the pre-integration body state.
//!
//! Sweeps stop early once a pass applies no impulse, and give up after the
//! configured iteration cap without reporting an error; an unconverged step
//! just leaves a small residual for the next one.

use motion_types::{BodyHandle, CollisionMasks, WorldConfig};
use tracing::trace;

use crate::body::BodyArena;
use crate::collision::CollisionPair;
use crate::constraint::Constraint;

// Below this tangential speed/drift, friction is not applied.
const TANGENT_EPSILON: f64 = 1.0e-6;

#[derive(Debug, Clone, Copy)]
struct ContactRef {
    pair: usize,
    contact: usize,
    body_a: BodyHandle,
    body_b: BodyHandle,
}

/// The impulse solver and its step-scoped contact list.
///
/// `solve_collisions` selects which contacts behave as resting contacts for
/// the rest of the step; the position and velocity phases then iterate over
/// that list. The list is rebuilt from scratch every step.
#[derive(Debug, Default)]
pub(crate) struct ImpulseSolver {
    contacts: Vec<ContactRef>,
}

impl ImpulseSolver {
    /// Resolve approaching contacts with restitution and friction, then
    /// collect the resting contacts for the correction phases.
    pub(crate) fn solve_collisions(
        &mut self,
        config: &WorldConfig,
        bodies: &mut BodyArena,
        pairs: &mut [CollisionPair],
    ) {
        self.contacts.clear();
        for (pair_idx, pair) in pairs.iter_mut().enumerate() {
            let (Ok(a), Ok(b)) = (bodies.get(pair.body_a()), bodies.get(pair.body_b())) else {
                continue;
            };
            if !CollisionMasks::can_collide(a.masks(), b.masks()) {
                continue;
            }
            if !a.body_type().is_dynamic() && !b.body_type().is_dynamic() {
                continue;
            }
            let (body_a, body_b) = (pair.body_a(), pair.body_b());
            for (contact_idx, contact) in pair.manifold_mut().contacts_mut().iter_mut().enumerate()
            {
                let (Ok(a), Ok(b)) = (bodies.get(body_a), bodies.get(body_b)) else {
                    continue;
                };
                contact.k = a.compute_k(&contact.world_a) + b.compute_k(&contact.world_b);
                let denom = contact.normal.dot(&(contact.k * contact.normal));
                if denom <= 0.0 {
                    continue;
                }
                contact.norm_k = 1.0 / denom;
                contact.p = 0.0;
                self.contacts.push(ContactRef {
                    pair: pair_idx,
                    contact: contact_idx,
                    body_a,
                    body_b,
                });
            }
        }

        let mut iteration = 0;
        loop {
            let mut collisions = 0;
            for r in &self.contacts {
                let contact = &mut pairs[r.pair].manifold_mut().contacts_mut()[r.contact];
                let Ok((a, b)) = bodies.pair_mut(r.body_a, r.body_b) else {
                    continue;
                };
                let n = contact.normal;
                let pos_a = contact.world_a;
                let pos_b = contact.world_b;

                contact.n_rel_vel = (a.velocity_at(&pos_a) - b.velocity_at(&pos_b)).dot(&n);
                if contact.n_rel_vel > config.resting_threshold {
                    continue;
                }
                collisions += 1;

                // Restitution impulse along the normal, with the running sum
                // clamped so accumulated impulses never pull.
                let after = -contact.n_rel_vel * a.restitution_with(b);
                let mut p = (after - contact.n_rel_vel) * contact.norm_k;
                if -p > contact.p {
                    p = -contact.p;
                    contact.p = 0.0;
                } else {
                    contact.p += p;
                }
                a.apply_impulse_at(n * p, &pos_a);
                b.apply_impulse_at(n * -p, &pos_b);

                // Friction against the remaining tangential velocity.
                let du = a.velocity_at(&pos_a) - b.velocity_at(&pos_b);
                contact.n_rel_vel = du.dot(&n);
                let t_rel_vel = du - n * contact.n_rel_vel;
                let t_len = t_rel_vel.norm();
                if t_len > TANGENT_EPSILON {
                    let tan = t_rel_vel / t_len;
                    let denom = tan.dot(&(contact.k * tan));
                    if denom > 0.0 {
                        let mut tp = -p.abs() * a.friction_with(b);
                        let tp_max = -t_len / denom;
                        if tp_max > tp {
                            tp = tp_max;
                        }
                        a.apply_impulse_at(tan * tp, &pos_a);
                        b.apply_impulse_at(tan * -tp, &pos_b);
                    }
                }
            }

            iteration += 1;
            if collisions == 0 || iteration >= config.collision_iterations {
                break;
            }
        }

        // Contacts still approaching (or resting) after response become the
        // step's contact constraints.
        self.contacts.retain(|r| {
            pairs[r.pair].manifold().contacts()[r.contact].n_rel_vel <= 0.1
        });
        trace!(contacts = self.contacts.len(), "collision response done");
    }

    /// Remove predicted penetration and joint drift before integration.
    pub(crate) fn solve_positions(
        &mut self,
        config: &WorldConfig,
        bodies: &mut BodyArena,
        pairs: &mut [CollisionPair],
        constraints: &mut [Constraint],
        step: f64,
    ) {
        for r in &self.contacts {
            pairs[r.pair].manifold_mut().contacts_mut()[r.contact].p = 0.0;
        }
        for c in constraints.iter_mut() {
            c.pre_position_step(bodies, step);
        }

        let mut iteration = 0;
        loop {
            let mut unsatisfied = 0;

            for r in &self.contacts {
                let contact = &mut pairs[r.pair].manifold_mut().contacts_mut()[r.contact];
                let Ok((a, b)) = bodies.pair_mut(r.body_a, r.body_b) else {
                    continue;
                };
                let n = contact.normal;
                let pos_a = contact.world_a;
                let pos_b = contact.world_b;

                let d = a.look_ahead_point(&pos_a, step) - b.look_ahead_point(&pos_b, step);
                let dn = -d.dot(&n);
                if dn.abs() <= config.max_distance {
                    continue;
                }
                unsatisfied += 1;

                let mut p = contact.norm_k * dn / step;
                if -p > contact.p {
                    p = -contact.p;
                    contact.p = 0.0;
                } else {
                    contact.p += p;
                }
                a.apply_impulse_at(n * p, &pos_a);
                b.apply_impulse_at(n * -p, &pos_b);

                // Friction against the predicted tangential drift.
                let d = a.look_ahead_point(&pos_a, step) - b.look_ahead_point(&pos_b, step);
                let dn = -d.dot(&n);
                let dt = d + n * dn;
                let dt_len = dt.norm();
                if dt_len > TANGENT_EPSILON {
                    let tan = dt / dt_len;
                    let denom = tan.dot(&(contact.k * tan)) * step;
                    if denom > 0.0 {
                        let tp = -dt_len / denom * a.friction_with(b);
                        a.apply_impulse_at(tan * tp, &pos_a);
                        b.apply_impulse_at(tan * -tp, &pos_b);
                    }
                }
            }

            for c in constraints.iter_mut() {
                if c.solve_position(bodies, step) {
                    unsatisfied += 1;
                }
            }

            iteration += 1;
            if unsatisfied == 0 || iteration >= config.position_iterations {
                break;
            }
        }
    }

    /// Remove residual relative velocity after integration.
    pub(crate) fn solve_velocities(
        &mut self,
        config: &WorldConfig,
        bodies: &mut BodyArena,
        pairs: &mut [CollisionPair],
        constraints: &mut [Constraint],
    ) {
        for c in constraints.iter_mut() {
            c.pre_velocities_step(bodies);
        }

        let mut iteration = 0;
        loop {
            let mut unsatisfied = 0;

            for r in &self.contacts {
                let contact = &pairs[r.pair].manifold().contacts()[r.contact];
                let Ok((a, b)) = bodies.pair_mut(r.body_a, r.body_b) else {
                    continue;
                };
                let n = contact.normal;
                let pos_a = contact.world_a;
                let pos_b = contact.world_b;

                let n_rel_vel =
                    (a.velocity_prev_at(&pos_a) - b.velocity_prev_at(&pos_b)).dot(&n);
                if n_rel_vel.abs() <= config.max_velocity {
                    continue;
                }
                unsatisfied += 1;

                let p = -n_rel_vel * contact.norm_k;
                a.apply_impulse_prev(n * p, &pos_a);
                b.apply_impulse_prev(n * -p, &pos_b);
            }

            for c in constraints.iter_mut() {
                if c.solve_velocities(bodies) {
                    unsatisfied += 1;
                }
            }

            iteration += 1;
            if unsatisfied == 0 || iteration >= config.velocity_iterations {
                break;
            }
        }
    }

    /// Contacts selected as resting constraints for the current step.
    #[cfg(test)]
    pub(crate) fn contact_count(&self) -> usize {
        self.contacts.len()
    }
}
