//! Fixed or soft distance between two anchor points, with independently
//! enabled lower/upper distance limits. `RopeJoint` is the limits-only
//! special case and is modeled here as a constructor rather than a
//! separate type, since it is the same state and solve path with the
//! spring disabled and at least one limit forced on.

use crate::body::{two_bodies_mut, Body, BodyHandle, MassData};
use crate::error::JointError;
use crate::joint::{JointBodies, Limit};
use crate::math::{clamp, cross_vv, Vec2, EPSILON};
use crate::spring::{cim, damping_coefficient, erp, omega_from_stiffness, SpringMode};
use crate::step::{Settings, TimeStep};

pub struct DistanceJoint {
    pub bodies: JointBodies,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub rest_length: f64,
    pub spring: Option<(SpringMode, f64)>,
    pub limit: Limit,

    impulse: f64,

    r_a: Vec2,
    r_b: Vec2,
    axis: Vec2,
    length: f64,
    /// Hard effective mass, `1 / invK`.
    mass: f64,
    /// Soft effective mass, `1 / (invK + gamma)`; only meaningful when a
    /// spring is configured.
    soft_mass: f64,
    gamma: f64,
    bias: f64,
}

impl DistanceJoint {
    pub fn new(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        rest_length: f64,
    ) -> Result<Self, JointError> {
        if rest_length < 0.0 {
            return Err(JointError::OutOfRange {
                field: "rest_length",
                value: rest_length,
                reason: "must be non-negative",
            });
        }
        Ok(DistanceJoint {
            bodies: JointBodies::pair(a, b)?,
            local_anchor_a,
            local_anchor_b,
            rest_length,
            spring: None,
            limit: Limit::disabled(),
            impulse: 0.0,
            r_a: Vec2::zero(),
            r_b: Vec2::zero(),
            axis: Vec2::zero(),
            length: rest_length,
            mass: 0.0,
            soft_mass: 0.0,
            gamma: 0.0,
            bias: 0.0,
        })
    }

    /// The limits-only variant: at least one of `lower`/`upper` must be
    /// enabled, and no spring.
    pub fn rope(
        a: BodyHandle,
        b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        max_length: f64,
    ) -> Result<Self, JointError> {
        let mut joint = Self::new(a, b, local_anchor_a, local_anchor_b, max_length)?;
        joint.limit = Limit::new(0.0, max_length)?;
        joint.limit.lower_enabled = false;
        Ok(joint)
    }

    pub fn set_spring(&mut self, mode: SpringMode, damping_ratio: f64) -> Result<(), JointError> {
        if !(0.0..=1.0).contains(&damping_ratio) {
            return Err(JointError::OutOfRange {
                field: "damping_ratio",
                value: damping_ratio,
                reason: "must be within [0, 1]",
            });
        }
        self.spring = Some((mode, damping_ratio));
        Ok(())
    }

    pub fn disable_spring(&mut self) {
        self.spring = None;
    }

    pub fn reaction_force(&self, inv_dt: f64) -> Vec2 {
        self.axis * (self.impulse + self.limit.upper_impulse - self.limit.lower_impulse) * inv_dt
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

        let d = (body_b.world_center() + self.r_b) - (body_a.world_center() + self.r_a);
        self.length = d.mag();
        self.axis = if self.length > settings.linear_tolerance {
            d / self.length
        } else {
            Vec2::zero()
        };

        let cr_a = cross_vv(self.r_a, self.axis);
        let cr_b = cross_vv(self.r_b, self.axis);
        let inv_k =
            ma.inv_mass + mb.inv_mass + ma.inv_inertia * cr_a * cr_a + mb.inv_inertia * cr_b * cr_b;
        self.mass = if inv_k > EPSILON { 1.0 / inv_k } else { 0.0 };

        self.gamma = 0.0;
        self.bias = 0.0;
        self.soft_mass = 0.0;
        if let Some((mode, damping_ratio)) = self.spring {
            if self.axis != Vec2::zero() {
                let c = self.length - self.rest_length;
                let k = mode.stiffness(self.mass);
                let omega = omega_from_stiffness(k, self.mass);
                let d_coef = damping_coefficient(damping_ratio, self.mass, omega);
                self.gamma = cim(step.dt, k, d_coef);
                self.bias = c * erp(step.dt, k, d_coef);
                self.soft_mass = if inv_k + self.gamma > EPSILON {
                    1.0 / (inv_k + self.gamma)
                } else {
                    0.0
                };
            }
        }

        if settings.warm_starting_enabled {
            self.impulse *= step.dt_ratio;
            self.limit.rescale_impulses(step.dt_ratio);
        } else {
            self.impulse = 0.0;
            self.limit.zero_impulses();
        }

        let p = self.axis * (self.impulse + self.limit.upper_impulse - self.limit.lower_impulse);
        apply_pair_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, p);
    }

    pub(crate) fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        if self.axis == Vec2::zero() {
            return;
        }
        let (a, b) = self.handles();

        if self.spring.is_some() {
            let (body_a, body_b) = two_bodies_mut(bodies, a, b);
            let ma = body_a.mass_data();
            let mb = body_b.mass_data();
            let cdot = axial_velocity(self.axis, self.r_a, self.r_b, body_a, body_b);
            let d_impulse = -self.soft_mass * (cdot + self.bias + self.gamma * self.impulse);
            self.impulse += d_impulse;
            apply_pair_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.axis * d_impulse);
        } else if !self.limit.active() {
            let (body_a, body_b) = two_bodies_mut(bodies, a, b);
            let ma = body_a.mass_data();
            let mb = body_b.mass_data();
            let cdot = axial_velocity(self.axis, self.r_a, self.r_b, body_a, body_b);
            let d_impulse = -self.mass * cdot;
            self.impulse += d_impulse;
            apply_pair_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.axis * d_impulse);
        }

        if self.limit.lower_enabled {
            let (body_a, body_b) = two_bodies_mut(bodies, a, b);
            let ma = body_a.mass_data();
            let mb = body_b.mass_data();
            let cdot = axial_velocity(self.axis, self.r_a, self.r_b, body_a, body_b);
            let c = self.length - self.limit.lower;
            let bias = (c / step.dt).min(0.0);
            let d_impulse = -self.mass * (cdot + bias);
            let old = self.limit.lower_impulse;
            self.limit.lower_impulse = (old + d_impulse).max(0.0);
            let applied = self.limit.lower_impulse - old;
            apply_pair_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.axis * applied);
        }
        if self.limit.upper_enabled {
            let (body_a, body_b) = two_bodies_mut(bodies, a, b);
            let ma = body_a.mass_data();
            let mb = body_b.mass_data();
            let cdot = -axial_velocity(self.axis, self.r_a, self.r_b, body_a, body_b);
            let c = self.limit.upper - self.length;
            let bias = (c / step.dt).min(0.0);
            let d_impulse = -self.mass * (cdot + bias);
            let old = self.limit.upper_impulse;
            self.limit.upper_impulse = (old + d_impulse).max(0.0);
            let applied = self.limit.upper_impulse - old;
            apply_pair_impulse(body_a, body_b, ma, mb, self.r_a, self.r_b, self.axis * -applied);
        }
    }

    pub(crate) fn solve_position_constraints<B: Body>(
        &mut self,
        settings: &Settings,
        bodies: &mut [B],
    ) -> bool {
        if self.spring.is_some() {
            return true;
        }
        let (a, b) = self.handles();
        let (body_a, body_b) = two_bodies_mut(bodies, a, b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();

        let r_a = body_a.transformed_r(self.local_anchor_a - ma.local_center);
        let r_b = body_b.transformed_r(self.local_anchor_b - mb.local_center);
        let d = (body_b.world_center() + r_b) - (body_a.world_center() + r_a);
        let length = d.mag();
        let axis = if length > EPSILON {
            d / length
        } else {
            return true;
        };

        let c = if self.limit.lower_enabled && length < self.limit.lower {
            length - self.limit.lower
        } else if self.limit.upper_enabled && length > self.limit.upper {
            length - self.limit.upper
        } else if !self.limit.active() {
            length - self.rest_length
        } else {
            return true;
        };

        let c_clamped = clamp(c, -settings.max_linear_correction, settings.max_linear_correction);
        let cr_a = cross_vv(r_a, axis);
        let cr_b = cross_vv(r_b, axis);
        let inv_k =
            ma.inv_mass + mb.inv_mass + ma.inv_inertia * cr_a * cr_a + mb.inv_inertia * cr_b * cr_b;
        let impulse = if inv_k > EPSILON { -c_clamped / inv_k } else { 0.0 };
        let p = axis * impulse;

        body_a.translate(-p * ma.inv_mass);
        if ma.inv_inertia > 0.0 {
            body_a.rotate_about_center(-ma.inv_inertia * cross_vv(r_a, p));
        }
        body_b.translate(p * mb.inv_mass);
        if mb.inv_inertia > 0.0 {
            body_b.rotate_about_center(mb.inv_inertia * cross_vv(r_b, p));
        }

        c.abs() <= settings.linear_tolerance
    }

    fn handles(&self) -> (BodyHandle, BodyHandle) {
        match self.bodies {
            JointBodies::Pair(a, b) => (a, b),
            JointBodies::Single(_) => unreachable!("DistanceJoint is always a pair"),
        }
    }
}

/// Relative velocity of the two anchors projected onto `axis`, i.e. `Cdot`.
fn axial_velocity<B: Body>(axis: Vec2, r_a: Vec2, r_b: Vec2, body_a: &B, body_b: &B) -> f64 {
    let v_a = body_a.linear_velocity() + crate::math::cross_sv(body_a.angular_velocity(), r_a);
    let v_b = body_b.linear_velocity() + crate::math::cross_sv(body_b.angular_velocity(), r_b);
    axis.dot(v_b - v_a)
}

/// Applies impulse `p` along the constraint axis: `-p` to body A (scaled by
/// its inverse mass/inertia about `r_a`), `+p` to body B about `r_b`.
pub(crate) fn apply_pair_impulse<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: MassData,
    mb: MassData,
    r_a: Vec2,
    r_b: Vec2,
    p: Vec2,
) {
    let va = body_a.linear_velocity() - p * ma.inv_mass;
    body_a.set_linear_velocity(va);
    let wa = body_a.angular_velocity() - ma.inv_inertia * cross_vv(r_a, p);
    body_a.set_angular_velocity(wa);

    let vb = body_b.linear_velocity() + p * mb.inv_mass;
    body_b.set_linear_velocity(vb);
    let wb = body_b.angular_velocity() + mb.inv_inertia * cross_vv(r_b, p);
    body_b.set_angular_velocity(wb);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    #[test]
    fn hard_distance_pulls_bodies_to_rest_length() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(3.0, 0.0), 1.0, 1.0),
        ];
        let mut joint =
            DistanceJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 1.0)
                .unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        for _ in 0..300 {
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
        let dist = bodies[1].world_center().mag();
        assert!((dist - 1.0).abs() < 0.05, "distance settled at {dist}");
    }

    #[test]
    fn coincident_anchors_apply_no_impulse() {
        let mut bodies = vec![
            SimpleBody::dynamic(Vec2::new(0.0, 0.0), 1.0, 1.0),
            SimpleBody::dynamic(Vec2::new(0.0, 0.0), 1.0, 1.0),
        ];
        let mut joint =
            DistanceJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 1.0)
                .unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        joint.initialize_constraints(step, &settings, &mut bodies);
        joint.solve_velocity_constraints(step, &mut bodies);
        assert_eq!(joint.impulse, 0.0);
    }

    #[test]
    fn rope_limit_impulse_is_never_negative() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.5, 0.0), 1.0, 1.0),
        ];
        let mut joint =
            DistanceJoint::rope(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 1.0)
                .unwrap();
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        bodies[1].set_linear_velocity(Vec2::new(50.0, 0.0));
        for _ in 0..10 {
            joint.initialize_constraints(step, &settings, &mut bodies);
            for _ in 0..settings.velocity_iterations {
                joint.solve_velocity_constraints(step, &mut bodies);
            }
            assert!(joint.limit.upper_impulse >= 0.0);
            let v = bodies[1].linear_velocity();
            bodies[1].translate(v * step.dt);
        }
    }
}
