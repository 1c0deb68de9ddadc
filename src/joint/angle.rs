//! Constrains the relative angular velocity (and, with limits enabled, the
//! relative angle) of two bodies, with an optional gear ratio.

use crate::body::{two_bodies_mut, Body, BodyHandle};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit};
use crate::math::{clamp, wrap_angle, EPSILON};
use crate::step::{Settings, TimeStep};

pub struct AngleJoint {
    pub bodies: JointBodies,
    pub reference_angle: f64,
    pub ratio: f64,
    pub limit: Limit,

    ratio_impulse: f64,
    mass: f64,
}

impl AngleJoint {
    pub fn new(a: BodyHandle, b: BodyHandle, reference_angle: f64) -> Result<Self, JointError> {
        Ok(AngleJoint {
            bodies: JointBodies::pair(a, b)?,
            reference_angle,
            ratio: 1.0,
            limit: Limit::disabled(),
            ratio_impulse: 0.0,
            mass: 0.0,
        })
    }

    pub fn set_limit(&mut self, lower: f64, upper: f64) -> Result<(), JointError> {
        self.limit = Limit::new(lower, upper)?;
        Ok(())
    }

    pub fn set_ratio(&mut self, ratio: f64) -> Result<(), JointError> {
        if ratio == 0.0 {
            return Err(JointError::OutOfRange {
                field: "ratio",
                value: ratio,
                reason: "gear ratio must be non-zero",
            });
        }
        self.ratio = ratio;
        Ok(())
    }

    pub fn reaction_torque(&self, inv_dt: f64) -> f64 {
        (self.limit.upper_impulse - self.limit.lower_impulse + self.ratio_impulse) * inv_dt
    }

    fn relative_angle<B: Body>(&self, body_a: &B, body_b: &B) -> f64 {
        wrap_angle(body_a.rotation_angle() - body_b.rotation_angle() - self.reference_angle)
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

        let inv_k = ma.inv_inertia + self.ratio.abs() * mb.inv_inertia;
        self.mass = if inv_k > EPSILON { 1.0 / inv_k } else { 0.0 };

        if settings.warm_starting_enabled {
            self.limit.rescale_impulses(step.dt_ratio);
            self.ratio_impulse *= step.dt_ratio;
        } else {
            self.limit.zero_impulses();
            self.ratio_impulse = 0.0;
        }

        let torque = self.ratio_impulse;
        body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * torque);
        body_b.set_angular_velocity(
            body_b.angular_velocity() - mb.inv_inertia * self.ratio.signum() * torque,
        );
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        if self.limit.active() {
            let angle = self.relative_angle(body_a, body_b);
            if self.limit.lower_enabled {
                let cdot = body_a.angular_velocity() - body_b.angular_velocity();
                let c = angle - self.limit.lower;
                let bias = c.min(0.0) * step.inv_dt;
                let d = -self.mass * (cdot + bias);
                let old = self.limit.lower_impulse;
                self.limit.lower_impulse = (old + d).max(0.0);
                let applied = self.limit.lower_impulse - old;
                body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * applied);
                body_b.set_angular_velocity(body_b.angular_velocity() - mb.inv_inertia * applied);
            }
            if self.limit.upper_enabled {
                let cdot = body_b.angular_velocity() - body_a.angular_velocity();
                let c = self.limit.upper - angle;
                let bias = c.min(0.0) * step.inv_dt;
                let d = -self.mass * (cdot + bias);
                let old = self.limit.upper_impulse;
                self.limit.upper_impulse = (old + d).max(0.0);
                let applied = self.limit.upper_impulse - old;
                body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * applied);
                body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * applied);
            }
        } else if self.ratio != 1.0 {
            let cdot = body_a.angular_velocity() - self.ratio * body_b.angular_velocity();
            let d = -self.mass * cdot;
            self.ratio_impulse += d;
            body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * d);
            body_b.set_angular_velocity(
                body_b.angular_velocity() - mb.inv_inertia * self.ratio.signum() * d,
            );
        }
    }

    pub(crate) fn solve_position_constraints<B: Body>(
        &mut self,
        settings: &Settings,
        bodies: &mut [B],
    ) -> bool {
        if !self.limit.active() {
            return true;
        }
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();
        let angle = self.relative_angle(body_a, body_b);

        let c = if self.limit.lower_enabled && angle < self.limit.lower {
            angle - self.limit.lower
        } else if self.limit.upper_enabled && angle > self.limit.upper {
            angle - self.limit.upper
        } else {
            return true;
        };
        let c_clamped = clamp(c, -settings.max_angular_correction, settings.max_angular_correction);
        let inv_k = ma.inv_inertia + mb.inv_inertia;
        let impulse = if inv_k > EPSILON { -c_clamped / inv_k } else { 0.0 };
        body_a.rotate_about_center(ma.inv_inertia * impulse);
        body_b.rotate_about_center(-mb.inv_inertia * impulse);

        c.abs() <= settings.angular_tolerance
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("AngleJoint is always a pair"),
        }
    }
}
