//! Like [`super::prismatic`] but allows free relative rotation: motion is
//! constrained to the axis (point-on-line) with a mandatory perpendicular
//! constraint. The spring acts along the axis; the motor is angular
//! (vehicle wheel drive).

use crate::body::{two_bodies_mut, Body, BodyHandle};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit, Motor};
use crate::math::{clamp, cross_vv, left_normal, Vec2, EPSILON};
use crate::spring::{cim, damping_coefficient, erp, omega_from_stiffness, SpringMode};
use crate::step::{Settings, TimeStep};

pub struct WheelJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub local_axis_a: Vec2,
    pub limit: Limit,
    pub motor: Motor,
    pub spring: Option<(SpringMode, f64, f64)>,

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

impl WheelJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        local_axis_a: Vec2,
    ) -> Result<Self, JointError> {
        if local_axis_a.mag() <= EPSILON {
            return Err(JointError::ArgumentNull { field: "local_axis_a" });
        }
        Ok(WheelJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            local_axis_a: local_axis_a.normalized(),
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

    pub fn set_motor(&mut self, speed: f64, max_torque: Option<f64>) -> Result<(), JointError> {
        self.motor = Motor::new(speed, max_torque)?;
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

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("WheelJoint is always a pair"),
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

        let axial = self.limit.upper_impulse - self.limit.lower_impulse + self.spring_impulse;
        let p = self.perp * self.impulse_perp + self.axis * axial;
        let la = self.s1 * self.impulse_perp + self.impulse_angular + self.a1 * axial + self.motor.impulse;
        let lb = self.s2 * self.impulse_perp + self.impulse_angular + self.a2 * axial + self.motor.impulse;

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
            let p = self.axis * d;
            body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * self.a1 * d);
            body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * self.a2 * d);
        }

        if self.motor.enabled {
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
            let p = self.axis * applied;
            body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * self.a1 * applied);
            body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * self.a2 * applied);
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
            let p = self.axis * -applied;
            body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * self.a1 * -applied);
            body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * self.a2 * -applied);
        }

        // Mandatory point-on-line (perpendicular) constraint.
        let cdot = self.perp.dot(body_b.linear_velocity() - body_a.linear_velocity())
            + self.s2 * body_b.angular_velocity()
            - self.s1 * body_a.angular_velocity();
        let mass = if self.k11 > EPSILON { 1.0 / self.k11 } else { 0.0 };
        let d = -mass * cdot;
        self.impulse_perp += d;
        let p = self.perp * d;
        body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
        body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * self.s1 * d);
        body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
        body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * self.s2 * d);
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

        let mut ok = true;
        if self.limit.lower_enabled && translation <= self.limit.lower {
            let c = clamp(
                translation - self.limit.lower,
                -settings.max_linear_correction,
                settings.max_linear_correction,
            );
            ok &= c.abs() <= settings.linear_tolerance;
            self.apply_axial_position_correction(body_a, body_b, ma, mb, axis, r_a, r_b, d, c);
        } else if self.limit.upper_enabled && translation >= self.limit.upper {
            let c = clamp(
                translation - self.limit.upper,
                -settings.max_linear_correction,
                settings.max_linear_correction,
            );
            ok &= c.abs() <= settings.linear_tolerance;
            self.apply_axial_position_correction(body_a, body_b, ma, mb, axis, r_a, r_b, d, c);
        }

        let c_perp = perp.dot(d);
        ok &= c_perp.abs() <= settings.linear_tolerance;
        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        let k11 = inv_mass_sum + ma.inv_inertia * s1 * s1 + mb.inv_inertia * s2 * s2;
        let impulse = if k11 > EPSILON { -c_perp / k11 } else { 0.0 };
        let p = perp * impulse;
        body_a.translate(-p * ma.inv_mass);
        body_a.rotate_about_center(-ma.inv_inertia * s1 * impulse);
        body_b.translate(p * mb.inv_mass);
        body_b.rotate_about_center(mb.inv_inertia * s2 * impulse);

        ok
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_axial_position_correction<B: Body>(
        &self,
        body_a: &mut B,
        body_b: &mut B,
        ma: crate::body::MassData,
        mb: crate::body::MassData,
        axis: Vec2,
        r_a: Vec2,
        r_b: Vec2,
        d: Vec2,
        c: f64,
    ) {
        let a1 = cross_vv(r_a + d, axis);
        let a2 = cross_vv(r_b, axis);
        let inv_k = ma.inv_mass + mb.inv_mass + ma.inv_inertia * a1 * a1 + mb.inv_inertia * a2 * a2;
        let impulse = if inv_k > EPSILON { -c / inv_k } else { 0.0 };
        let p = axis * impulse;
        body_a.translate(-p * ma.inv_mass);
        body_a.rotate_about_center(-ma.inv_inertia * a1 * impulse);
        body_b.translate(p * mb.inv_mass);
        body_b.rotate_about_center(mb.inv_inertia * a2 * impulse);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn perpendicular_constraint_keeps_body_on_axis() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::new(3.0, 0.0), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(1.0, 2.0));
        let mut joint =
            WheelJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), Vec2::new(1.0, 0.0))
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
        assert!(bodies[1].world_center().y.abs() < 0.05, "y {}", bodies[1].world_center().y);
    }

    #[test]
    fn spring_pulls_translation_toward_rest_offset() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        let mut joint =
            WheelJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), Vec2::new(1.0, 0.0))
                .unwrap();
        joint.set_spring(SpringMode::Frequency(4.0), 0.7, 2.0).unwrap();
        let settings = Settings::default();
        let mut prev_dt = 1.0 / 60.0;
        for _ in 0..180 {
            let step = TimeStep::new(1.0 / 60.0, prev_dt);
            prev_dt = step.dt;
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            let v = bodies[1].linear_velocity();
            bodies[1].translate(v * step.dt);
        }
        let x = bodies[1].world_center().x;
        assert!((x - 2.0).abs() < 0.2, "x {x}");
    }

    #[test]
    fn limit_stops_translation_at_bound() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::zero()),
            SimpleBody::dynamic(Vec2::zero(), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(5.0, 0.0));
        let mut joint =
            WheelJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), Vec2::new(1.0, 0.0))
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
    }
}
