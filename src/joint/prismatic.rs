//! Two linear degrees of freedom removed: bodies may only translate
//! relative to each other along a single axis fixed in body1's frame, with
//! no relative rotation. Optional linear limits, a linear motor, and a
//! linear spring-damper with rest offset.

use crate::body::{two_bodies_mut, Body, BodyHandle};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit, Motor};
use crate::math::{clamp, cross_vv, left_normal, Mat33, Vec2, EPSILON};
use crate::spring::{cim, damping_coefficient, erp, omega_from_stiffness, SpringMode};
use crate::step::{Settings, TimeStep};

pub struct PrismaticJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Axis of translation, fixed in body1's local frame (the "frame
    /// body" — see catalog design notes on which body owns the axis).
    pub local_axis_a: Vec2,
    pub reference_angle: f64,
    pub limit: Limit,
    pub motor: Motor,
    pub spring: Option<(SpringMode, f64, f64)>, // (mode, damping ratio, rest offset)

    impulse_perp: f64,
    impulse_angular: f64,
    spring_impulse: f64,

    r_a: Vec2,
    r_b: Vec2,
    axis: Vec2,
    perp: Vec2,
    s1: f64,
    s2: f64,
    a1: f64,
    a2: f64,
    k11: f64,
    k12: f64,
    k22: f64,
    axial_mass: f64,
    spring_mass: f64,
    spring_gamma: f64,
    spring_bias: f64,
    translation: f64,
}

impl PrismaticJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        local_axis_a: Vec2,
        reference_angle: f64,
    ) -> Result<Self, JointError> {
        if local_axis_a.mag() <= EPSILON {
            return Err(JointError::ArgumentNull { field: "local_axis_a" });
        }
        Ok(PrismaticJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            local_axis_a: local_axis_a.normalized(),
            reference_angle,
            limit: Limit::disabled(),
            motor: Motor::default(),
            spring: None,
            impulse_perp: 0.0,
            impulse_angular: 0.0,
            spring_impulse: 0.0,
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            axis: Vec2::zero(),
            perp: Vec2::zero(),
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            k11: 0.0,
            k12: 0.0,
            k22: 0.0,
            axial_mass: 0.0,
            spring_mass: 0.0,
            spring_gamma: 0.0,
            spring_bias: 0.0,
            translation: 0.0,
        })
    }

    pub fn set_motor(&mut self, speed: f64, max_force: Option<f64>) -> Result<(), JointError> {
        self.motor = Motor::new(speed, max_force)?;
        Ok(())
    }

    pub fn set_limit(&mut self, lower: f64, upper: f64) -> Result<(), JointError> {
        self.limit = Limit::new(lower, upper)?;
        Ok(())
    }

    pub fn set_spring(
        &mut self,
        mode: SpringMode,
        damping_ratio: f64,
        rest_offset: f64,
    ) -> Result<(), JointError> {
        if !(0.0..=1.0).contains(&damping_ratio) {
            return Err(JointError::OutOfRange {
                field: "damping_ratio",
                value: damping_ratio,
                reason: "must be within [0, 1]",
            });
        }
        self.spring = Some((mode, damping_ratio, rest_offset));
        Ok(())
    }

    pub fn linear_translation(&self) -> f64 {
        self.translation
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("PrismaticJoint is always a pair"),
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

        self.r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        self.r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);
        self.axis = body_a.world_vector(self.local_axis_a);
        self.perp = left_normal(self.axis);

        let d = (body_b.world_center() + self.r_b) - (body_a.world_center() + self.r_a);
        self.translation = self.axis.dot(d);

        self.s1 = cross_vv(self.r_a + d, self.perp);
        self.s2 = cross_vv(self.r_b, self.perp);
        self.a1 = cross_vv(self.r_a + d, self.axis);
        self.a2 = cross_vv(self.r_b, self.axis);

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        self.k11 = inv_mass_sum + ma.inv_inertia * self.s1 * self.s1 + mb.inv_inertia * self.s2 * self.s2;
        self.k12 = ma.inv_inertia * self.s1 + mb.inv_inertia * self.s2;
        self.k22 = ma.inv_inertia + mb.inv_inertia;
        if self.k22 <= EPSILON {
            self.k22 = 1.0;
        }

        let inv_axial = inv_mass_sum + ma.inv_inertia * self.a1 * self.a1 + mb.inv_inertia * self.a2 * self.a2;
        self.axial_mass = if inv_axial > EPSILON { 1.0 / inv_axial } else { 0.0 };

        self.spring_gamma = 0.0;
        self.spring_bias = 0.0;
        self.spring_mass = 0.0;
        if let Some((mode, damping_ratio, rest_offset)) = self.spring {
            let k = mode.stiffness(self.axial_mass);
            let omega = omega_from_stiffness(k, self.axial_mass);
            let d_coef = damping_coefficient(damping_ratio, self.axial_mass, omega);
            self.spring_gamma = cim(step.dt, k, d_coef);
            let c = self.translation - rest_offset;
            self.spring_bias = c * erp(step.dt, k, d_coef);
            self.spring_mass = if inv_axial + self.spring_gamma > EPSILON {
                1.0 / (inv_axial + self.spring_gamma)
            } else {
                0.0
            };
        }

        if ma.inv_inertia + mb.inv_inertia <= EPSILON {
            self.motor.enabled = false;
        }

        if settings.warm_starting_enabled {
            self.impulse_perp *= step.dt_ratio;
            self.impulse_angular *= step.dt_ratio;
            self.spring_impulse *= step.dt_ratio;
            self.motor.rescale_impulse(step.dt_ratio);
            self.limit.rescale_impulses(step.dt_ratio);
        } else {
            self.impulse_perp = 0.0;
            self.impulse_angular = 0.0;
            self.spring_impulse = 0.0;
            self.motor.zero_impulse();
            self.limit.zero_impulses();
        }

        let axial = self.motor.impulse + self.limit.upper_impulse - self.limit.lower_impulse
            + self.spring_impulse;
        let p = self.perp * self.impulse_perp + self.axis * axial;
        let la = self.s1 * self.impulse_perp + self.impulse_angular + self.a1 * axial;
        let lb = self.s2 * self.impulse_perp + self.impulse_angular + self.a2 * axial;

        body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
        body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * la);
        body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
        body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * lb);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        if self.spring.is_some() {
            let cdot = self.axis.dot(body_b.linear_velocity() - body_a.linear_velocity())
                + self.a2 * body_b.angular_velocity()
                - self.a1 * body_a.angular_velocity();
            let d = -self.spring_mass * (cdot + self.spring_bias + self.spring_gamma * self.spring_impulse);
            self.spring_impulse += d;
            apply_axial(body_a, body_b, ma, mb, self.axis, self.a1, self.a2, d);
        }

        if self.motor.enabled {
            let cdot = self.axis.dot(body_b.linear_velocity() - body_a.linear_velocity())
                + self.a2 * body_b.angular_velocity()
                - self.a1 * body_a.angular_velocity()
                - self.motor.speed;
            let mut d = if self.axial_mass > EPSILON { -self.axial_mass * cdot } else { 0.0 };
            let old = self.motor.impulse;
            if let Some(max_force) = self.motor.max_load {
                let max_impulse = max_force * step.dt;
                self.motor.impulse = clamp(old + d, -max_impulse, max_impulse);
            } else {
                self.motor.impulse += d;
            }
            d = self.motor.impulse - old;
            apply_axial(body_a, body_b, ma, mb, self.axis, self.a1, self.a2, d);
        }

        if self.limit.lower_enabled {
            let cdot = self.axis.dot(body_b.linear_velocity() - body_a.linear_velocity())
                + self.a2 * body_b.angular_velocity()
                - self.a1 * body_a.angular_velocity();
            let c = self.translation - self.limit.lower;
            let bias = c.min(0.0) * step.inv_dt;
            let d = if self.axial_mass > EPSILON { -self.axial_mass * (cdot + bias) } else { 0.0 };
            let old = self.limit.lower_impulse;
            self.limit.lower_impulse = (old + d).max(0.0);
            let applied = self.limit.lower_impulse - old;
            apply_axial(body_a, body_b, ma, mb, self.axis, self.a1, self.a2, applied);
        }
        if self.limit.upper_enabled {
            let cdot = -(self.axis.dot(body_b.linear_velocity() - body_a.linear_velocity())
                + self.a2 * body_b.angular_velocity()
                - self.a1 * body_a.angular_velocity());
            let c = self.limit.upper - self.translation;
            let bias = c.min(0.0) * step.inv_dt;
            let d = if self.axial_mass > EPSILON { -self.axial_mass * (cdot + bias) } else { 0.0 };
            let old = self.limit.upper_impulse;
            self.limit.upper_impulse = (old + d).max(0.0);
            let applied = self.limit.upper_impulse - old;
            apply_axial(body_a, body_b, ma, mb, self.axis, self.a1, self.a2, -applied);
        }

        // Perpendicular + angular block solve.
        let cdot1 = self.perp.dot(body_b.linear_velocity() - body_a.linear_velocity())
            + self.s2 * body_b.angular_velocity()
            - self.s1 * body_a.angular_velocity();
        let cdot2 = body_b.angular_velocity() - body_a.angular_velocity();
        let det = self.k11 * self.k22 - self.k12 * self.k12;
        let (d_perp, d_ang) = if det.abs() > EPSILON {
            let inv_det = 1.0 / det;
            (
                inv_det * (self.k22 * -cdot1 - self.k12 * -cdot2),
                inv_det * (self.k11 * -cdot2 - self.k12 * -cdot1),
            )
        } else {
            (0.0, 0.0)
        };
        self.impulse_perp += d_perp;
        self.impulse_angular += d_ang;

        let p = self.perp * d_perp;
        let la = self.s1 * d_perp + d_ang;
        let lb = self.s2 * d_perp + d_ang;
        body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
        body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * la);
        body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
        body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * lb);
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

        let axis = body_a.world_vector(self.local_axis_a);
        let perp = left_normal(axis);
        let r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        let r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);
        let d = (body_b.world_center() + r_b) - (body_a.world_center() + r_a);
        let translation = axis.dot(d);

        let s1 = cross_vv(r_a + d, perp);
        let s2 = cross_vv(r_b, perp);
        let a1 = cross_vv(r_a + d, axis);
        let a2 = cross_vv(r_b, axis);

        let c1 = Vec2::new(
            perp.dot(d),
            body_b.rotation_angle() - body_a.rotation_angle() - self.reference_angle,
        );

        let limit_c = if self.limit.lower_enabled && translation <= self.limit.lower {
            clamp(
                translation - self.limit.lower,
                -settings.max_linear_correction,
                settings.max_linear_correction,
            )
        } else if self.limit.upper_enabled && translation >= self.limit.upper {
            clamp(
                translation - self.limit.upper,
                -settings.max_linear_correction,
                settings.max_linear_correction,
            )
        } else {
            0.0
        };

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        let linear_ok = c1.x.abs() <= settings.linear_tolerance;
        let angular_ok = c1.y.abs() <= settings.angular_tolerance;

        if limit_c != 0.0 {
            let mut m = Mat33::default();
            m.set(0, 0, inv_mass_sum + ma.inv_inertia * s1 * s1 + mb.inv_inertia * s2 * s2);
            m.set(0, 1, ma.inv_inertia * s1 + mb.inv_inertia * s2);
            m.set(0, 2, ma.inv_inertia * s1 * a1 + mb.inv_inertia * s2 * a2);
            m.set(1, 0, m.get(0, 1));
            m.set(1, 1, ma.inv_inertia + mb.inv_inertia);
            let k22 = if m.get(1, 1) <= EPSILON { 1.0 } else { m.get(1, 1) };
            m.set(1, 1, k22);
            m.set(1, 2, ma.inv_inertia * a1 + mb.inv_inertia * a2);
            m.set(2, 0, m.get(0, 2));
            m.set(2, 1, m.get(1, 2));
            m.set(2, 2, inv_mass_sum + ma.inv_inertia * a1 * a1 + mb.inv_inertia * a2 * a2);

            let impulse3 = m.solve33([-c1.x, -c1.y, -limit_c]);
            let p = perp * impulse3[0] + axis * impulse3[2];
            let la = s1 * impulse3[0] + impulse3[1] + a1 * impulse3[2];
            let lb = s2 * impulse3[0] + impulse3[1] + a2 * impulse3[2];

            body_a.translate(-p * ma.inv_mass);
            body_a.rotate_about_center(-ma.inv_inertia * la);
            body_b.translate(p * mb.inv_mass);
            body_b.rotate_about_center(mb.inv_inertia * lb);

            linear_ok && angular_ok && limit_c.abs() <= settings.linear_tolerance
        } else {
            let k11 = inv_mass_sum + ma.inv_inertia * s1 * s1 + mb.inv_inertia * s2 * s2;
            let k12 = ma.inv_inertia * s1 + mb.inv_inertia * s2;
            let mut k22 = ma.inv_inertia + mb.inv_inertia;
            if k22 <= EPSILON {
                k22 = 1.0;
            }
            let k = crate::math::Mat22::new(k11, k12, k12, k22);
            let impulse = k.solve(-c1);
            let p = perp * impulse.x;
            let la = s1 * impulse.x + impulse.y;
            let lb = s2 * impulse.x + impulse.y;

            body_a.translate(-p * ma.inv_mass);
            body_a.rotate_about_center(-ma.inv_inertia * la);
            body_b.translate(p * mb.inv_mass);
            body_b.rotate_about_center(mb.inv_inertia * lb);

            linear_ok && angular_ok
        }
    }
}

fn apply_axial<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: crate::body::MassData,
    mb: crate::body::MassData,
    axis: Vec2,
    a1: f64,
    a2: f64,
    d: f64,
) {
    let p = axis * d;
    body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
    body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * a1 * d);
    body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
    body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * a2 * d);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn prismatic_joint_constrains_off_axis_motion() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::new(3.0, 0.0), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(1.0, 2.0));
        bodies[1].set_angular_velocity(1.5);
        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(1.0, 0.0),
            0.0,
        )
        .unwrap();
        let settings = Settings::default();
        let mut prev_dt = 1.0 / 60.0;
        for _ in 0..150 {
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
        assert!(bodies[1].world_center().y.abs() < 0.05, "y {}", bodies[1].world_center().y);
        assert!(bodies[1].rotation_angle().abs() < 0.05, "angle {}", bodies[1].rotation_angle());
    }

    #[test]
    fn limit_stops_translation_at_bound() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(5.0, 0.0));
        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(1.0, 0.0),
            0.0,
        )
        .unwrap();
        joint.set_limit(-1.0, 1.0).unwrap();
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
            bodies[1].translate(v * step.dt);
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        assert!(bodies[1].world_center().x <= 1.05, "x {}", bodies[1].world_center().x);
        assert!(joint.linear_translation() <= 1.05);
    }

    #[test]
    fn motor_drives_translation_at_target_speed() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(1.0, 0.0),
            0.0,
        )
        .unwrap();
        joint.set_motor(2.0, Some(10.0)).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..30 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
        }
        let vx = bodies[1].linear_velocity().x;
        assert!((vx - 2.0).abs() < 0.1, "vx {vx}");
    }
}
