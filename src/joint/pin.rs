//! Pins an anchor point on a single body to a fixed world-space target.
//! Defaults to a soft spring-damper with a maximum force; can be switched
//! to a hard pin.

use crate::body::{Body, BodyHandle};
use crate::error::JointError;
use crate::joint::JointBodies;
use crate::math::{cross_sv, cross_vv, Mat22, Vec2, EPSILON};
use crate::spring::{cim, damping_coefficient, erp, omega_from_stiffness, SpringMode};
use crate::step::{Settings, TimeStep};

pub struct PinJoint {
    pub bodies: JointBodies,
    pub local_anchor: Vec2,
    pub target: Vec2,
    /// `None` means a hard pin; `Some` carries the spring mode, damping
    /// ratio, and an optional force cap (defaults to a capped spring).
    pub spring: Option<(SpringMode, f64, Option<f64>)>,

    impulse: Vec2,

    r: Vec2,
    k: Mat22,
    gamma: f64,
    bias: Vec2,
}

impl PinJoint {
    pub fn new(body: BodyHandle, local_anchor: Vec2, target: Vec2) -> Self {
        PinJoint {
            bodies: JointBodies::Single(body),
            local_anchor,
            target,
            spring: Some((SpringMode::Frequency(5.0), 0.7, None)),
            impulse: Vec2::zero(),
            r: Vec2::zero(),
            k: Mat22::default(),
            gamma: 0.0,
            bias: Vec2::zero(),
        }
    }

    pub fn set_spring(
        &mut self,
        mode: SpringMode,
        damping_ratio: f64,
        max_force: Option<f64>,
    ) -> Result<(), JointError> {
        if !(0.0..=1.0).contains(&damping_ratio) {
            return Err(JointError::OutOfRange {
                field: "damping_ratio",
                value: damping_ratio,
                reason: "must be within [0, 1]",
            });
        }
        if let Some(force) = max_force {
            if force < 0.0 {
                return Err(JointError::OutOfRange {
                    field: "max_force",
                    value: force,
                    reason: "must be non-negative",
                });
            }
        }
        self.spring = Some((mode, damping_ratio, max_force));
        Ok(())
    }

    pub fn set_hard(&mut self) {
        self.spring = None;
    }

    pub fn set_target(&mut self, target: Vec2) {
        self.target = target;
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.impulse * inv_dt
    }

    pub fn shift(&mut self, delta: Vec2) {
        self.target += delta;
    }

    fn handle(&self) -> BodyHandle {
        match self.bodies {
            JointBodies::Single(a) => a,
            JointBodies::Pair(..) => unreachable!("PinJoint is always single-bodied"),
        }
    }

    pub(crate) fn initialize_constraints<B: Body>(
        &mut self,
        step: TimeStep,
        settings: &Settings,
        bodies: &mut [B],
    ) {
        let handle = self.handle();
        let body = &mut bodies[handle.0];
        let m = body.mass_data();

        self.r = body.transformed_r(self.local_anchor - m.local_center);

        // When the body has no mass (e.g. fixed-rotation dynamic body used
        // purely to spin), fall back to inertia so the joint still has
        // something to build an effective mass from.
        let inv_mass = if m.inv_mass > EPSILON {
            m.inv_mass
        } else {
            m.inv_inertia
        };

        self.k = Mat22::new(
            inv_mass + m.inv_inertia * self.r.y * self.r.y,
            -m.inv_inertia * self.r.x * self.r.y,
            -m.inv_inertia * self.r.x * self.r.y,
            inv_mass + m.inv_inertia * self.r.x * self.r.x,
        );

        self.gamma = 0.0;
        self.bias = Vec2::zero();
        if let Some((mode, damping_ratio, _)) = self.spring {
            let reduced = if inv_mass > EPSILON { 1.0 / inv_mass } else { 0.0 };
            let c = (body.world_center() + self.r) - self.target;
            let k = mode.stiffness(reduced);
            let omega = omega_from_stiffness(k, reduced);
            let d = damping_coefficient(damping_ratio, reduced, omega);
            self.gamma = cim(step.dt, k, d);
            self.bias = c * erp(step.dt, k, d);
        }

        if settings.warm_starting_enabled {
            self.impulse *= step.dt_ratio;
        } else {
            self.impulse = Vec2::zero();
        }

        let v = body.linear_velocity() + self.impulse * m.inv_mass;
        body.set_linear_velocity(v);
        let w = body.angular_velocity() + m.inv_inertia * cross_vv(self.r, self.impulse);
        body.set_angular_velocity(w);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        let handle = self.handle();
        let body = &mut bodies[handle.0];
        let m = body.mass_data();

        let cdot = body.linear_velocity() + cross_sv(body.angular_velocity(), self.r);
        let rhs = -(cdot + self.bias + self.gamma * self.impulse);
        let mut d = self.k.solve(rhs);

        if let Some((_, _, Some(max_force))) = self.spring {
            let max_impulse = max_force * step.dt;
            let new_impulse = self.impulse + d;
            if new_impulse.mag() > max_impulse {
                let clamped = new_impulse.normalized() * max_impulse;
                d = clamped - self.impulse;
                self.impulse = clamped;
            } else {
                self.impulse = new_impulse;
            }
        } else {
            self.impulse += d;
        }

        body.set_linear_velocity(body.linear_velocity() + d * m.inv_mass);
        body.set_angular_velocity(body.angular_velocity() + m.inv_inertia * cross_vv(self.r, d));
    }

    pub(crate) fn solve_position_constraints<B: Body>(
        &mut self,
        settings: &Settings,
        bodies: &mut [B],
    ) -> bool {
        if self.spring.is_some() {
            return true;
        }
        let handle = self.handle();
        let body = &mut bodies[handle.0];
        let m = body.mass_data();

        let r = body.transformed_r(self.local_anchor - m.local_center);
        let c = (body.world_center() + r) - self.target;

        let inv_mass = if m.inv_mass > EPSILON { m.inv_mass } else { m.inv_inertia };
        let k = Mat22::new(
            inv_mass + m.inv_inertia * r.y * r.y,
            -m.inv_inertia * r.x * r.y,
            -m.inv_inertia * r.x * r.y,
            inv_mass + m.inv_inertia * r.x * r.x,
        );
        let impulse = k.solve(-c);

        body.translate(impulse * m.inv_mass);
        body.rotate_about_center(m.inv_inertia * cross_vv(r, impulse));

        c.mag() <= settings.linear_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn hard_pin_holds_anchor_at_target() {
        let mut bodies = vec![SimpleBody::dynamic(Vec2::new(2.0, 0.0), 1.0, 1.0)];
        bodies[0].set_linear_velocity(Vec2::new(0.0, 5.0));
        let mut joint = PinJoint::new(BodyHandle(0), Vec2::zero(), Vec2::new(2.0, 0.0));
        joint.set_hard();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..120 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            let v = bodies[0].linear_velocity();
            bodies[0].translate(v * step.dt);
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        assert!((bodies[0].world_center() - Vec2::new(2.0, 0.0)).mag() < 0.05);
    }

    #[test]
    fn spring_pin_respects_force_cap() {
        let mut bodies = vec![SimpleBody::dynamic(Vec2::new(10.0, 0.0), 1.0, 1.0)];
        let mut joint = PinJoint::new(BodyHandle(0), Vec2::zero(), Vec2::zero());
        joint.set_spring(SpringMode::Frequency(4.0), 0.5, Some(1.0)).unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        joint.initialize_constraints(step, &settings, &mut bodies);
        joint.solve_velocity_constraints(step, &mut bodies);
        assert!(joint.impulse.mag() <= 1.0 * step.dt + 1e-9);
    }

    #[test]
    fn shift_moves_target_with_world() {
        let mut joint = PinJoint::new(BodyHandle(0), Vec2::zero(), Vec2::new(1.0, 1.0));
        joint.shift(Vec2::new(2.0, -1.0));
        assert_eq!(joint.target, Vec2::new(3.0, 0.0));
    }
}
