//! Orchestrates one simulation step: initializes joints and contacts,
//! iterates velocity solving, hands control back to the caller for
//! integration, then iterates position correction until convergence or the
//! iteration budget runs out.
//!
//! The caller owns bodies, integrates velocities into positions between the
//! velocity and position phases, and supplies the contact manifolds for
//! this step (collision detection is out of scope for the core).

use crate::body::Body;
use crate::contact::ContactConstraint;
use crate::joint::JointSet;
use crate::step::{Settings, TimeStep};

/// Runs the velocity phase, calls `integrate` to advance body positions,
/// then runs the position phase. `integrate` is the caller's responsibility
/// since body integration is explicitly out of scope for the core.
pub fn step<B: Body, T>(
    step: TimeStep,
    settings: &Settings,
    bodies: &mut [B],
    joints: &mut JointSet,
    contacts: &mut [ContactConstraint<T>],
    mut integrate: impl FnMut(&mut [B], TimeStep),
) {
    let _span = tracy_span!("world_step", "step");

    {
        let _span = tracy_span!("initialize_constraints", "step");
        for (_, joint) in joints.iter_mut() {
            if joint.is_enabled(bodies) {
                joint.initialize_constraints(step, settings, bodies);
            }
        }
        for contact in contacts.iter_mut() {
            contact.initialize(step, settings, bodies);
        }
    }

    {
        let _span = tracy_span!("velocity_iterations", "step");
        for _ in 0..settings.velocity_iterations {
            for (_, joint) in joints.iter_mut() {
                if joint.is_enabled(bodies) {
                    joint.solve_velocity_constraints(step, bodies);
                }
            }
            for contact in contacts.iter_mut() {
                contact.solve_velocity(bodies);
            }
        }
    }

    integrate(bodies, step);

    {
        let _span = tracy_span!("position_iterations", "step");
        for _ in 0..settings.position_iterations {
            let mut joints_converged = true;
            for (_, joint) in joints.iter_mut() {
                if joint.is_enabled(bodies) && !joint.solve_position_constraints(settings, bodies) {
                    joints_converged = false;
                }
            }

            let mut min_separation = f64::INFINITY;
            for contact in contacts.iter_mut() {
                min_separation = min_separation.min(contact.solve_position(settings, bodies));
            }
            let contacts_converged = min_separation >= -3.0 * settings.linear_tolerance;

            if joints_converged && contacts_converged {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;
    use crate::body::BodyHandle;
    use crate::contact::SolvableContact;
    use crate::joint::{distance::DistanceJoint, Joint, JointBodies, JointKind};
    use crate::math::Vec2;

    #[test]
    fn step_settles_a_pendulum_and_a_resting_contact_together() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
            SimpleBody::immovable(Vec2::new(0.0, -2.0)),
            SimpleBody::dynamic(Vec2::new(0.0, -1.5), 1.0, 1.0),
        ];
        bodies[3].set_linear_velocity(Vec2::new(0.0, -4.0));

        let mut joints = JointSet::new();
        let distance =
            DistanceJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 1.0)
                .unwrap();
        joints.insert(Joint {
            bodies: JointBodies::Pair(BodyHandle(0), BodyHandle(1)),
            collision_allowed: false,
            kind: JointKind::Distance(distance),
        });

        let contact_point = SolvableContact::new(Vec2::new(0.0, -1.5), 0.0);
        let mut contacts = vec![ContactConstraint::new(
            BodyHandle(2),
            BodyHandle(3),
            Vec2::new(0.0, 1.0),
            0.0,
            0.2,
            vec![contact_point],
            (),
        )];

        let settings = Settings::default();
        let mut prev_dt = 1.0 / 60.0;
        for _ in 0..120 {
            let ts = TimeStep::new(1.0 / 60.0, prev_dt);
            prev_dt = ts.dt;
            step(ts, &settings, &mut bodies, &mut joints, &mut contacts, |bodies, ts| {
                for b in bodies.iter_mut() {
                    let v = b.linear_velocity();
                    b.translate(v * ts.dt);
                }
            });
        }

        let dist = bodies[1].world_center().mag();
        assert!((dist - 1.0).abs() < 0.1, "pendulum settled at distance {dist}");
        assert!(bodies[3].world_center().y >= -1.51, "box sank through the floor");
    }
}
