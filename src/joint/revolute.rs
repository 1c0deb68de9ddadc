//! Two bodies share a world point; one angular degree of freedom remains.
//! Optional angular limits (with a reference angle) and an angular motor
//! with an optional torque cap.

use crate::body::{two_bodies_mut, Body, BodyHandle};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit, Motor};
use crate::math::{clamp, cross_sv, cross_vv, wrap_angle, Mat22, Vec2, EPSILON};
use crate::step::{Settings, TimeStep};

pub struct RevoluteJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub reference_angle: f64,
    pub limit: Limit,
    pub motor: Motor,

    point_impulse: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    k: Mat22,
}

impl RevoluteJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        world_anchor: Vec2,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        reference_angle: f64,
    ) -> Result<Self, JointError> {
        let _ = world_anchor;
        Ok(RevoluteJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            reference_angle,
            limit: Limit::disabled(),
            motor: Motor::default(),
            point_impulse: Vec2::zero(),
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            k: Mat22::default(),
        })
    }

    pub fn set_motor(&mut self, speed: f64, max_torque: Option<f64>) -> Result<(), JointError> {
        self.motor = Motor::new(speed, max_torque)?;
        Ok(())
    }

    pub fn set_limit(&mut self, lower: f64, upper: f64) -> Result<(), JointError> {
        self.limit = Limit::new(lower, upper)?;
        Ok(())
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.point_impulse * inv_dt
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        (self.motor.impulse + self.limit.upper_impulse - self.limit.lower_impulse) * inv_dt
    }

    fn relative_angle<B: Body>(&self, body_a: &B, body_b: &B) -> f64 {
        wrap_angle(body_b.rotation_angle() - body_a.rotation_angle() - self.reference_angle)
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

        self.r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        self.r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        self.k = Mat22::new(
            inv_mass_sum + ma.inv_inertia * self.r_a.y * self.r_a.y
                + mb.inv_inertia * self.r_b.y * self.r_b.y,
            -ma.inv_inertia * self.r_a.x * self.r_a.y - mb.inv_inertia * self.r_b.x * self.r_b.y,
            -ma.inv_inertia * self.r_a.x * self.r_a.y - mb.inv_inertia * self.r_b.x * self.r_b.y,
            inv_mass_sum
                + ma.inv_inertia * self.r_a.x * self.r_a.x
                + mb.inv_inertia * self.r_b.x * self.r_b.x,
        );

        if ma.inv_inertia + mb.inv_inertia <= EPSILON {
            self.motor.enabled = false;
            self.limit.lower_enabled = false;
            self.limit.upper_enabled = false;
        }

        if settings.warm_starting_enabled {
            self.point_impulse *= step.dt_ratio;
            self.motor.rescale_impulse(step.dt_ratio);
            self.limit.rescale_impulses(step.dt_ratio);
        } else {
            self.point_impulse = Vec2::zero();
            self.motor.zero_impulse();
            self.limit.zero_impulses();
        }

        let axial = self.motor.impulse + self.limit.upper_impulse - self.limit.lower_impulse;
        body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * axial);
        body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * axial);

        let va = body_a.linear_velocity() - self.point_impulse * ma.inv_mass;
        body_a.set_linear_velocity(va);
        let wa = body_a.angular_velocity() - ma.inv_inertia * cross_vv(self.r_a, self.point_impulse);
        body_a.set_angular_velocity(wa);
        let vb = body_b.linear_velocity() + self.point_impulse * mb.inv_mass;
        body_b.set_linear_velocity(vb);
        let wb = body_b.angular_velocity() + mb.inv_inertia * cross_vv(self.r_b, self.point_impulse);
        body_b.set_angular_velocity(wb);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        if self.motor.enabled && !self.limit.active_fully_constrains() {
            let cdot = body_b.angular_velocity() - body_a.angular_velocity() - self.motor.speed;
            let mass = ma.inv_inertia + mb.inv_inertia;
            let mut d = if mass > EPSILON { -cdot / mass } else { 0.0 };
            let old = self.motor.impulse;
            if let Some(max_torque) = self.motor.max_load {
                let max_impulse = max_torque * step.dt;
                self.motor.impulse = clamp(old + d, -max_impulse, max_impulse);
            } else {
                self.motor.impulse += d;
            }
            d = self.motor.impulse - old;
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * d);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * d);
        }

        if self.limit.active() {
            let angle = self.relative_angle(body_a, body_b);
            let mass = ma.inv_inertia + mb.inv_inertia;
            if self.limit.lower_enabled {
                let cdot = body_b.angular_velocity() - body_a.angular_velocity();
                let c = angle - self.limit.lower;
                let bias = c.min(0.0) * step.inv_dt;
                let d = if mass > EPSILON { -(cdot + bias) / mass } else { 0.0 };
                let old = self.limit.lower_impulse;
                self.limit.lower_impulse = (old + d).max(0.0);
                let applied = self.limit.lower_impulse - old;
                body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * applied);
                body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * applied);
            }
            if self.limit.upper_enabled {
                let cdot = body_a.angular_velocity() - body_b.angular_velocity();
                let c = self.limit.upper - angle;
                let bias = c.min(0.0) * step.inv_dt;
                let d = if mass > EPSILON { -(cdot + bias) / mass } else { 0.0 };
                let old = self.limit.upper_impulse;
                self.limit.upper_impulse = (old + d).max(0.0);
                let applied = self.limit.upper_impulse - old;
                body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * applied);
                body_b.set_angular_velocity(body_b.angular_velocity() - mb.inv_inertia * applied);
            }
        }

        let cdot = (body_b.linear_velocity() + cross_sv(body_b.angular_velocity(), self.r_b))
            - (body_a.linear_velocity() + cross_sv(body_a.angular_velocity(), self.r_a));
        let impulse = self.k.solve(-cdot);
        self.point_impulse += impulse;

        let va = body_a.linear_velocity() - impulse * ma.inv_mass;
        body_a.set_linear_velocity(va);
        let wa = body_a.angular_velocity() - ma.inv_inertia * cross_vv(self.r_a, impulse);
        body_a.set_angular_velocity(wa);
        let vb = body_b.linear_velocity() + impulse * mb.inv_mass;
        body_b.set_linear_velocity(vb);
        let wb = body_b.angular_velocity() + mb.inv_inertia * cross_vv(self.r_b, impulse);
        body_b.set_angular_velocity(wb);
    }

    pub(crate) fn solve_position_constraints<B: Body>(
        &mut self,
        settings: &Settings,
        bodies: &mut [B],
    ) -> bool {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        let mut angular_ok = true;
        if self.limit.active() {
            let angle = self.relative_angle(body_a, body_b);
            let c = if self.limit.lower_enabled && angle < self.limit.lower {
                angle - self.limit.lower
            } else if self.limit.upper_enabled && angle > self.limit.upper {
                angle - self.limit.upper
            } else {
                0.0
            };
            if c != 0.0 {
                let c_clamped =
                    clamp(c, -settings.max_angular_correction, settings.max_angular_correction);
                let mass = ma.inv_inertia + mb.inv_inertia;
                let impulse = if mass > EPSILON { -c_clamped / mass } else { 0.0 };
                body_a.rotate_about_center(-ma.inv_inertia * impulse);
                body_b.rotate_about_center(mb.inv_inertia * impulse);
                angular_ok = c.abs() <= settings.angular_tolerance;
            }
        }

        let r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        let r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);
        let c = (body_b.world_center() + r_b) - (body_a.world_center() + r_a);
        let c_len = c.mag();

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        let k = Mat22::new(
            inv_mass_sum + ma.inv_inertia * r_a.y * r_a.y + mb.inv_inertia * r_b.y * r_b.y,
            -ma.inv_inertia * r_a.x * r_a.y - mb.inv_inertia * r_b.x * r_b.y,
            -ma.inv_inertia * r_a.x * r_a.y - mb.inv_inertia * r_b.x * r_b.y,
            inv_mass_sum + ma.inv_inertia * r_a.x * r_a.x + mb.inv_inertia * r_b.x * r_b.x,
        );
        let impulse = k.solve(-c);

        body_a.translate(-impulse * ma.inv_mass);
        body_a.rotate_about_center(-ma.inv_inertia * cross_vv(r_a, impulse));
        body_b.translate(impulse * mb.inv_mass);
        body_b.rotate_about_center(mb.inv_inertia * cross_vv(r_b, impulse));

        angular_ok && c_len <= settings.linear_tolerance
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("RevoluteJoint is always a pair"),
        }
    }
}

impl Limit {
    /// True when both sides are enabled and pinned to the same value, in
    /// which case the motor contributes nothing (the limit fully
    /// determines the angle).
    fn active_fully_constrains(&self) -> bool {
        self.lower_enabled && self.upper_enabled && (self.upper - self.lower).abs() < EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn revolute_joint_keeps_shared_point_coincident() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(0.0, 3.0));
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(-1.0, 0.0),
            0.0,
        )
        .unwrap();
        let settings = Settings::default();
        let mut prev_dt = 1.0 / 60.0;
        for _ in 0..120 {
            let step = TimeStep::new(1.0 / 60.0, prev_dt);
            prev_dt = step.dt;
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            let v = bodies[1].linear_velocity();
            let w = bodies[1].angular_velocity();
            bodies[1].translate(v * step.dt);
            bodies[1].rotate_about_center(w * step.dt);
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        let anchor_a = bodies[0].world_point(Vec2::zero());
        let anchor_b = bodies[1].world_point(Vec2::new(-1.0, 0.0));
        assert!((anchor_a - anchor_b).mag() < 0.05);
    }

    #[test]
    fn motor_drives_relative_angular_velocity_to_target() {
        let mut bodies = vec![
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::zero(),
            0.0,
        )
        .unwrap();
        joint.set_motor(2.0, Some(5.0)).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..60 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
        }
        let relative = bodies[1].angular_velocity() - bodies[0].angular_velocity();
        assert!((relative - 2.0).abs() < 0.1, "relative velocity {relative}");
    }

    #[test]
    fn limit_pins_relative_angle_when_lower_equals_upper() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        bodies[1].set_angular_velocity(3.0);
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::zero(),
            0.0,
        )
        .unwrap();
        joint.set_limit(0.0, 0.0).unwrap();
        let settings = Settings::default();
        let mut prev_dt = 1.0 / 60.0;
        for _ in 0..120 {
            let step = TimeStep::new(1.0 / 60.0, prev_dt);
            prev_dt = step.dt;
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            let w = bodies[1].angular_velocity();
            bodies[1].rotate_about_center(w * step.dt);
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        let angle = bodies[1].rotation_angle() - bodies[0].rotation_angle();
        assert!(angle.abs() < 0.05, "relative angle {angle}");
    }
}
