//! Removes all three relative degrees of freedom. The angular bilateral
//! may optionally be replaced with a soft angular spring (plus angular
//! limits, only meaningful while the spring is active).

use crate::body::{two_bodies_mut, Body, BodyHandle};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit};
use crate::math::{clamp, cross_vv, wrap_angle, Mat22, Mat33, Vec2, EPSILON};
use crate::spring::{cim, damping_coefficient, erp, omega_from_stiffness, SpringMode};
use crate::step::{Settings, TimeStep};

pub struct WeldJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub reference_angle: f64,
    pub angular_spring: Option<(SpringMode, f64)>,
    pub limit: Limit,

    linear_impulse: Vec2,
    angular_impulse: f64,

    r_a: Vec2,
    r_b: Vec2,
    k: Mat33,
    angular_mass: f64,
    gamma: f64,
    bias: f64,
}

impl WeldJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        reference_angle: f64,
    ) -> Result<Self, JointError> {
        Ok(WeldJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            reference_angle,
            angular_spring: None,
            limit: Limit::disabled(),
            linear_impulse: Vec2::zero(),
            angular_impulse: 0.0,
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            k: Mat33::default(),
            angular_mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
        })
    }

    pub fn set_angular_spring(&mut self, mode: SpringMode, damping_ratio: f64) -> Result<(), JointError> {
        if !(0.0..=1.0).contains(&damping_ratio) {
            return Err(JointError::OutOfRange {
                field: "damping_ratio",
                value: damping_ratio,
                reason: "must be within [0, 1]",
            });
        }
        self.angular_spring = Some((mode, damping_ratio));
        Ok(())
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("WeldJoint is always a pair"),
        }
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
        self.k = Mat33::default();
        self.k.set(0, 0, inv_mass_sum + ma.inv_inertia * self.r_a.y * self.r_a.y + mb.inv_inertia * self.r_b.y * self.r_b.y);
        self.k.set(0, 1, -ma.inv_inertia * self.r_a.x * self.r_a.y - mb.inv_inertia * self.r_b.x * self.r_b.y);
        self.k.set(0, 2, -ma.inv_inertia * self.r_a.y - mb.inv_inertia * self.r_b.y);
        self.k.set(1, 0, self.k.get(0, 1));
        self.k.set(1, 1, inv_mass_sum + ma.inv_inertia * self.r_a.x * self.r_a.x + mb.inv_inertia * self.r_b.x * self.r_b.x);
        self.k.set(1, 2, ma.inv_inertia * self.r_a.x + mb.inv_inertia * self.r_b.x);
        self.k.set(2, 0, self.k.get(0, 2));
        self.k.set(2, 1, self.k.get(1, 2));
        let mut k22 = ma.inv_inertia + mb.inv_inertia;
        if k22 <= EPSILON {
            // Floor to 1 when both bodies have fixed rotation: avoids a
            // singular 3x3 while the (2,2) row/col stays otherwise zero,
            // so it contributes nothing to the linear solve.
            k22 = 1.0;
        }
        self.k.set(2, 2, k22);

        self.gamma = 0.0;
        self.bias = 0.0;
        self.angular_mass = if ma.inv_inertia + mb.inv_inertia > EPSILON {
            1.0 / (ma.inv_inertia + mb.inv_inertia)
        } else {
            0.0
        };
        if let Some((mode, damping_ratio)) = self.angular_spring {
            let c = self.relative_angle(body_a, body_b);
            let k = mode.stiffness(self.angular_mass);
            let omega = omega_from_stiffness(k, self.angular_mass);
            let d_coef = damping_coefficient(damping_ratio, self.angular_mass, omega);
            self.gamma = cim(step.dt, k, d_coef);
            self.bias = c * erp(step.dt, k, d_coef);
        }

        if settings.warm_starting_enabled {
            self.linear_impulse *= step.dt_ratio;
            self.angular_impulse *= step.dt_ratio;
            self.limit.rescale_impulses(step.dt_ratio);
        } else {
            self.linear_impulse = Vec2::zero();
            self.angular_impulse = 0.0;
            self.limit.zero_impulses();
        }

        let angular = self.angular_impulse + self.limit.upper_impulse - self.limit.lower_impulse;
        apply_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.linear_impulse, angular);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        if self.angular_spring.is_some() {
            let cdot = body_b.angular_velocity() - body_a.angular_velocity();
            let soft_mass = if ma.inv_inertia + mb.inv_inertia + self.gamma > EPSILON {
                1.0 / (ma.inv_inertia + mb.inv_inertia + self.gamma)
            } else {
                0.0
            };
            let d = -soft_mass * (cdot + self.bias + self.gamma * self.angular_impulse);
            self.angular_impulse += d;
            body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * d);
            body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * d);

            if self.limit.active() {
                let angle = self.relative_angle(body_a, body_b);
                if self.limit.lower_enabled {
                    let cdot = body_b.angular_velocity() - body_a.angular_velocity();
                    let c = angle - self.limit.lower;
                    let bias = c.min(0.0) * step.inv_dt;
                    let d = if self.angular_mass > EPSILON { -(cdot + bias) / (ma.inv_inertia + mb.inv_inertia) } else { 0.0 };
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
                    let d = if self.angular_mass > EPSILON { -(cdot + bias) / (ma.inv_inertia + mb.inv_inertia) } else { 0.0 };
                    let old = self.limit.upper_impulse;
                    self.limit.upper_impulse = (old + d).max(0.0);
                    let applied = self.limit.upper_impulse - old;
                    body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * applied);
                    body_b.set_angular_velocity(body_b.angular_velocity() - mb.inv_inertia * applied);
                }
            }

            let cdot = (body_b.linear_velocity() + crate::math::cross_sv(body_b.angular_velocity(), self.r_b))
                - (body_a.linear_velocity() + crate::math::cross_sv(body_a.angular_velocity(), self.r_a));
            let k2 = self.k.upper_left();
            let impulse = k2.solve(-cdot);
            self.linear_impulse += impulse;
            apply_linear(body_a, body_b, ma, mb, self.r_a, self.r_b, impulse);
        } else {
            let cdot1 = (body_b.linear_velocity() + crate::math::cross_sv(body_b.angular_velocity(), self.r_b))
                - (body_a.linear_velocity() + crate::math::cross_sv(body_a.angular_velocity(), self.r_a));
            let cdot2 = body_b.angular_velocity() - body_a.angular_velocity();
            let impulse3 = self.k.solve33([-cdot1.x, -cdot1.y, -cdot2]);
            self.linear_impulse += Vec2::new(impulse3[0], impulse3[1]);
            self.angular_impulse += impulse3[2];
            apply_impulse(
                body_a,
                body_b,
                ma,
                mb,
                self.r_a,
                self.r_b,
                Vec2::new(impulse3[0], impulse3[1]),
                impulse3[2],
            );
        }
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

        let r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        let r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);
        let c_linear = (body_b.world_center() + r_b) - (body_a.world_center() + r_a);
        let c_angular = self.relative_angle(body_a, body_b);

        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        let k00 = inv_mass_sum + ma.inv_inertia * r_a.y * r_a.y + mb.inv_inertia * r_b.y * r_b.y;
        let k01 = -ma.inv_inertia * r_a.x * r_a.y - mb.inv_inertia * r_b.x * r_b.y;
        let k11 = inv_mass_sum + ma.inv_inertia * r_a.x * r_a.x + mb.inv_inertia * r_b.x * r_b.x;

        if self.angular_spring.is_some() {
            let k = Mat22::new(k00, k01, k01, k11);
            let impulse = k.solve(-c_linear);
            body_a.translate(-impulse * ma.inv_mass);
            body_a.rotate_about_center(-ma.inv_inertia * cross_vv(r_a, impulse));
            body_b.translate(impulse * mb.inv_mass);
            body_b.rotate_about_center(mb.inv_inertia * cross_vv(r_b, impulse));
            c_linear.mag() <= settings.linear_tolerance
        } else {
            let c_angular_clamped =
                clamp(c_angular, -settings.max_angular_correction, settings.max_angular_correction);
            let mut k22 = ma.inv_inertia + mb.inv_inertia;
            if k22 <= EPSILON {
                k22 = 1.0;
            }
            let mut m = Mat33::default();
            m.set(0, 0, k00);
            m.set(0, 1, k01);
            m.set(0, 2, -ma.inv_inertia * r_a.y - mb.inv_inertia * r_b.y);
            m.set(1, 0, k01);
            m.set(1, 1, k11);
            m.set(1, 2, ma.inv_inertia * r_a.x + mb.inv_inertia * r_b.x);
            m.set(2, 0, m.get(0, 2));
            m.set(2, 1, m.get(1, 2));
            m.set(2, 2, k22);

            let impulse3 = m.solve33([-c_linear.x, -c_linear.y, -c_angular_clamped]);
            let p = Vec2::new(impulse3[0], impulse3[1]);
            body_a.translate(-p * ma.inv_mass);
            body_a.rotate_about_center(-ma.inv_inertia * (cross_vv(r_a, p) + impulse3[2]));
            body_b.translate(p * mb.inv_mass);
            body_b.rotate_about_center(mb.inv_inertia * (cross_vv(r_b, p) + impulse3[2]));

            c_linear.mag() <= settings.linear_tolerance
                && c_angular.abs() <= settings.angular_tolerance
        }
    }
}

fn apply_impulse<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: crate::body::MassData,
    mb: crate::body::MassData,
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

fn apply_linear<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: crate::body::MassData,
    mb: crate::body::MassData,
    r_a: Vec2,
    r_b: Vec2,
    p: Vec2,
) {
    body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
    body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * cross_vv(r_a, p));
    body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
    body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * cross_vv(r_b, p));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn weld_locks_relative_angle_and_position() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
        ];
        bodies[1].set_angular_velocity(3.0);
        bodies[1].set_linear_velocity(Vec2::new(0.0, 2.0));
        let mut joint =
            WeldJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 0.0).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..300 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            let v = bodies[1].linear_velocity();
            bodies[1].translate(v * step.dt);
            let w = bodies[1].angular_velocity();
            bodies[1].rotate_about_center(w * step.dt);
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        assert!((bodies[1].world_center() - Vec2::new(1.0, 0.0)).mag() < 0.05);
        assert!(bodies[1].rotation_angle().abs() < 0.05);
    }

    #[test]
    fn soft_angular_spring_leaves_position_solve_satisfied() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
        ];
        let mut joint =
            WeldJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 0.0).unwrap();
        joint.set_angular_spring(SpringMode::Frequency(4.0), 0.5).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        joint.initialize_constraints(step, &settings, &mut bodies);
        joint.solve_velocity_constraints(step, &mut bodies);
        assert!(joint.solve_position_constraints(&settings, &mut bodies));
    }
}
