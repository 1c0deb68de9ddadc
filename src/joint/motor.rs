//! Drives body2 toward a commanded linear + angular offset relative to
//! body1, with bounded force and torque. `FrictionJoint` is the special
//! case with zero commanded offset (see [`MotorJoint::friction`]) -- both
//! share identical velocity-constraint math, only the targets differ.

use crate::body::{two_bodies_mut, Body, BodyHandle, MassData};
use crate::error::JointError;
use crate::joint::JointBodies;
use crate::math::{clamp, cross_vv, Mat22, Vec2, EPSILON};
use crate::step::{Settings, TimeStep};

pub struct MotorJoint {
    pub bodies: JointBodies,
    pub linear_offset: Vec2,
    pub angular_offset: f64,
    pub max_force: f64,
    pub max_torque: f64,
    pub correction_factor: f64,

    linear_impulse: Vec2,
    angular_impulse: f64,

    r_a: Vec2,
    r_b: Vec2,
    linear_mass: Mat22,
    angular_mass: f64,
}

impl MotorJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        linear_offset: Vec2,
        angular_offset: f64,
        max_force: f64,
        max_torque: f64,
    ) -> Result<Self, JointError> {
        if max_force < 0.0 {
            return Err(JointError::OutOfRange {
                field: "max_force",
                value: max_force,
                reason: "must be non-negative",
            });
        }
        if max_torque < 0.0 {
            return Err(JointError::OutOfRange {
                field: "max_torque",
                value: max_torque,
                reason: "must be non-negative",
            });
        }
        Ok(MotorJoint {
            bodies: JointBodies::pair(a, b)?,
            linear_offset,
            angular_offset,
            max_force,
            max_torque,
            correction_factor: 0.3,
            linear_impulse: Vec2::zero(),
            angular_impulse: 0.0,
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            linear_mass: Mat22::default(),
            angular_mass: 0.0,
        })
    }

    /// Zero commanded offset: caps relative linear/angular velocity rather
    /// than driving toward a target pose.
    pub fn friction(
        a: BodyHandle,
        b: BodyHandle,
        max_force: f64,
        max_torque: f64,
    ) -> Result<Self, JointError> {
        Self::new(a, b, Vec2::zero(), 0.0, max_force, max_torque)
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.linear_impulse * inv_dt
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        self.angular_impulse * inv_dt
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("MotorJoint is always a pair"),
        }
    }

    pub(crate) fn initialize_constraints<B: Body>(
        &mut self,
        step: TimeStep,
        settings: &Settings,
        bodies: &mut [B],
    ) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        self.r_a = body_a.transformed_r(-ma.local_center);
        self.r_b = body_b.transformed_r(-mb.local_center);

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        self.linear_mass = Mat22::new(
            inv_mass_sum + ma.inv_inertia * self.r_a.y * self.r_a.y + mb.inv_inertia * self.r_b.y * self.r_b.y,
            -ma.inv_inertia * self.r_a.x * self.r_a.y - mb.inv_inertia * self.r_b.x * self.r_b.y,
            -ma.inv_inertia * self.r_a.x * self.r_a.y - mb.inv_inertia * self.r_b.x * self.r_b.y,
            inv_mass_sum + ma.inv_inertia * self.r_a.x * self.r_a.x + mb.inv_inertia * self.r_b.x * self.r_b.x,
        );

        let inv_i_sum = ma.inv_inertia + mb.inv_inertia;
        self.angular_mass = if inv_i_sum > EPSILON { 1.0 / inv_i_sum } else { 0.0 };

        if settings.warm_starting_enabled {
            self.linear_impulse *= step.dt_ratio;
            self.angular_impulse *= step.dt_ratio;
        } else {
            self.linear_impulse = Vec2::zero();
            self.angular_impulse = 0.0;
        }

        apply_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.linear_impulse, self.angular_impulse);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        {
            let cdot = body_b.angular_velocity() - body_a.angular_velocity()
                - self.angular_offset * self.correction_factor * step.inv_dt;
            let d = -self.angular_mass * cdot;
            let max_impulse = self.max_torque * step.dt;
            let old = self.angular_impulse;
            self.angular_impulse = clamp(old + d, -max_impulse, max_impulse);
            let applied = self.angular_impulse - old;
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * applied);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * applied);
        }

        {
            let va = body_a.linear_velocity() + crate::math::cross_sv(body_a.angular_velocity(), self.r_a);
            let vb = body_b.linear_velocity() + crate::math::cross_sv(body_b.angular_velocity(), self.r_b);
            let target_offset = self.linear_offset * self.correction_factor * step.inv_dt;
            let cdot = vb - va - target_offset;
            let d = self.linear_mass.solve(-cdot);
            let max_impulse = self.max_force * step.dt;
            let old = self.linear_impulse;
            let new_impulse = old + d;
            let applied = if new_impulse.mag() > max_impulse {
                let clamped = new_impulse.normalized() * max_impulse;
                self.linear_impulse = clamped;
                clamped - old
            } else {
                self.linear_impulse = new_impulse;
                d
            };
            body_a.set_linear_velocity(body_a.linear_velocity() - applied * ma.inv_mass);
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * cross_vv(self.r_a, applied));
            body_b.set_linear_velocity(body_b.linear_velocity() + applied * mb.inv_mass);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * cross_vv(self.r_b, applied));
        }
    }
}

fn apply_impulse<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: MassData,
    mb: MassData,
    r_a: Vec2,
    r_b: Vec2,
    linear: Vec2,
    angular: f64,
) {
    body_a.set_linear_velocity(body_a.linear_velocity() - linear * ma.inv_mass);
    body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * (cross_vv(r_a, linear) + angular));
    body_b.set_linear_velocity(body_b.linear_velocity() + linear * mb.inv_mass);
    body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * (cross_vv(r_b, linear) + angular));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn friction_joint_damps_relative_velocity() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(5.0, 0.0));
        let mut joint = MotorJoint::friction(BodyHandle(0), BodyHandle(1), 2.0, 2.0).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..10 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
        }
        assert!(bodies[1].linear_velocity().mag() < 5.0);
    }

    #[test]
    fn motor_joint_impulse_never_exceeds_force_cap() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.0, 0.0), 1.0, 1.0),
        ];
        let mut joint =
            MotorJoint::new(BodyHandle(0), BodyHandle(1), Vec2::new(5.0, 0.0), 0.0, 1.0, 1.0).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        joint.initialize_constraints(step, &settings, &mut bodies);
        for _ in 0..8 {
            joint.solve_velocity_constraints(step, &mut bodies);
        }
        assert!(joint.linear_impulse.mag() <= 1.0 * step.dt + 1e-9);
    }
}
