//! Two bodies connected by a rope routed over two world-space pulley
//! anchors, with a block-and-tackle ratio. Optional slack mode.

use crate::body::{two_bodies_mut, Body, BodyHandle, MassData};
use crate::error::JointError;
use crate::joint::JointBodies;
use crate::math::{clamp, cross_vv, Vec2, EPSILON};
use crate::step::{Settings, TimeStep};

pub struct PulleyJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub pulley_a: Vec2,
    pub pulley_b: Vec2,
    pub ratio: f64,
    /// Total rope length `l1 + ratio*l2`, fixed at construction.
    pub total_length: f64,
    /// When true the constraint only activates once `l1 + ratio*l2 > total_length`.
    pub allow_slack: bool,

    impulse: f64,

    r_a: Vec2,
    r_b: Vec2,
    axis_a: Vec2,
    axis_b: Vec2,
    mass: f64,
    active: bool,
}

impl PulleyJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        pulley_a: Vec2,
        pulley_b: Vec2,
        ratio: f64,
        allow_slack: bool,
    ) -> Result<Self, JointError> {
        if ratio <= 0.0 {
            return Err(JointError::OutOfRange {
                field: "ratio",
                value: ratio,
                reason: "pulley ratio must be positive",
            });
        }
        let mut joint = PulleyJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            pulley_a,
            pulley_b,
            ratio,
            total_length: 0.0,
            allow_slack,
            impulse: 0.0,
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            axis_a: Vec2::zero(),
            axis_b: Vec2::zero(),
            mass: 0.0,
            active: true,
        };
        joint.total_length = ratio; // replaced by caller via `set_total_length` once anchors are known
        Ok(joint)
    }

    /// Fixes the rope's total length from the bodies' current anchor
    /// positions; called once at setup after construction.
    pub fn set_total_length_from<B: Body>(&mut self, bodies: &[B]) {
        let (a, b) = self.handles();
        let anchor_a = bodies[a.0].world_point(self.local_anchor_a);
        let anchor_b = bodies[b.0].world_point(self.local_anchor_b);
        let l1 = (anchor_a - self.pulley_a).mag();
        let l2 = (anchor_b - self.pulley_b).mag();
        self.total_length = l1 + self.ratio * l2;
    }

    pub fn reaction_force(&self, inv_dt: f64) -> f64 {
        self.impulse * inv_dt
    }

    pub fn shift(&mut self, delta: Vec2) {
        self.pulley_a += delta;
        self.pulley_b += delta;
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("PulleyJoint is always a pair"),
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

        let anchor_a = body_a.world_center() + self.r_a;
        let anchor_b = body_b.world_center() + self.r_b;
        let d_a = anchor_a - self.pulley_a;
        let d_b = anchor_b - self.pulley_b;
        let l1 = d_a.mag();
        let l2 = d_b.mag();
        self.axis_a = if l1 > settings.linear_tolerance { d_a / l1 } else { Vec2::zero() };
        self.axis_b = if l2 > settings.linear_tolerance { d_b / l2 } else { Vec2::zero() };

        self.active = !self.allow_slack || l1 + self.ratio * l2 >= self.total_length;

        if self.active {
            let cr_a = cross_vv(self.r_a, self.axis_a);
            let cr_b = cross_vv(self.r_b, self.axis_b);
            let inv_k = ma.inv_mass
                + ma.inv_inertia * cr_a * cr_a
                + self.ratio * self.ratio * (mb.inv_mass + mb.inv_inertia * cr_b * cr_b);
            self.mass = if inv_k > EPSILON { 1.0 / inv_k } else { 0.0 };
        } else {
            self.mass = 0.0;
        }

        if settings.warm_starting_enabled && self.active {
            self.impulse *= step.dt_ratio;
        } else {
            self.impulse = 0.0;
        }

        let pa = self.axis_a * -self.impulse;
        let pb = self.axis_b * (-self.ratio * self.impulse);
        apply_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, pa, pb);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, _step: TimeStep, bodies: &mut [B]) {
        if !self.active || self.mass <= 0.0 {
            return;
        }
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        let va = body_a.linear_velocity() + crate::math::cross_sv(body_a.angular_velocity(), self.r_a);
        let vb = body_b.linear_velocity() + crate::math::cross_sv(body_b.angular_velocity(), self.r_b);
        let cdot = -self.axis_a.dot(va) - self.ratio * self.axis_b.dot(vb);
        let d = -self.mass * cdot;
        self.impulse += d;

        let pa = self.axis_a * -d;
        let pb = self.axis_b * (-self.ratio * d);
        apply_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, pa, pb);
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
        let d_a = (body_a.world_center() + r_a) - self.pulley_a;
        let d_b = (body_b.world_center() + r_b) - self.pulley_b;
        let l1 = d_a.mag();
        let l2 = d_b.mag();
        let axis_a = if l1 > EPSILON { d_a / l1 } else { return true };
        let axis_b = if l2 > EPSILON { d_b / l2 } else { return true };

        let c = self.total_length - l1 - self.ratio * l2;
        if self.allow_slack && c >= 0.0 {
            return true;
        }
        let c_clamped = clamp(-c, -settings.max_linear_correction, settings.max_linear_correction);

        let cr_a = cross_vv(r_a, axis_a);
        let cr_b = cross_vv(r_b, axis_b);
        let inv_k = ma.inv_mass
            + ma.inv_inertia * cr_a * cr_a
            + self.ratio * self.ratio * (mb.inv_mass + mb.inv_inertia * cr_b * cr_b);
        let impulse = if inv_k > EPSILON { -c_clamped / inv_k } else { 0.0 };

        let pa = axis_a * -impulse;
        let pb = axis_b * (-self.ratio * impulse);
        body_a.translate(pa * ma.inv_mass);
        body_a.rotate_about_center(ma.inv_inertia * cross_vv(r_a, pa));
        body_b.translate(pb * mb.inv_mass);
        body_b.rotate_about_center(mb.inv_inertia * cross_vv(r_b, pb));

        c.abs() <= settings.linear_tolerance
    }
}

fn apply_impulse<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: MassData,
    mb: MassData,
    r_a: Vec2,
    r_b: Vec2,
    pa: Vec2,
    pb: Vec2,
) {
    body_a.set_linear_velocity(body_a.linear_velocity() + pa * ma.inv_mass);
    body_a.set_angular_velocity(body_a.angular_velocity() + ma.inv_inertia * cross_vv(r_a, pa));
    body_b.set_linear_velocity(body_b.linear_velocity() + pb * mb.inv_mass);
    body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * cross_vv(r_b, pb));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn pulley_keeps_total_rope_length_constant() {
        let mut bodies = vec![
            SimpleBody::dynamic(Vec2::new(-2.0, -1.0), 1.0, 1.0),
            SimpleBody::dynamic(Vec2::new(2.0, -3.0), 1.0, 1.0),
        ];
        let mut joint = PulleyJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(-2.0, 0.0),
            Vec2::new(2.0, 0.0),
            1.0,
            false,
        )
        .unwrap();
        joint.set_total_length_from(&bodies);
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..200 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            for i in 0..2 {
                let v = bodies[i].linear_velocity();
                bodies[i].translate(v * step.dt);
            }
            for _ in 0..settings.position_iterations {
                if joint.solve_position_constraints(&settings, &mut bodies) {
                    break;
                }
            }
        }
        let l1 = (bodies[0].world_center() - joint.pulley_a).mag();
        let l2 = (bodies[1].world_center() - joint.pulley_b).mag();
        assert!((l1 + joint.ratio * l2 - joint.total_length).abs() < 0.05);
    }

    #[test]
    fn slack_pulley_is_inactive_when_rope_is_not_taut() {
        let bodies = vec![
            SimpleBody::dynamic(Vec2::new(-2.0, -0.5), 1.0, 1.0),
            SimpleBody::dynamic(Vec2::new(2.0, -0.5), 1.0, 1.0),
        ];
        let mut joint = PulleyJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::zero(),
            Vec2::zero(),
            Vec2::new(-2.0, 0.0),
            Vec2::new(2.0, 0.0),
            1.0,
            true,
        )
        .unwrap();
        joint.total_length = 10.0;
        let mut bodies = bodies;
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        joint.initialize_constraints(step, &settings, &mut bodies);
        assert!(!joint.active);
    }
}
