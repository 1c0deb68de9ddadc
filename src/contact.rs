//! Sequential-impulse contact solver: non-penetration plus Coulomb friction
//! for manifolds of one or two points, with a block solve for the two-point
//! case and iterated non-linear position projection.
//!
//! Contact manifold generation (broad/narrow-phase collision detection) is
//! the caller's responsibility; this module only consumes the resulting
//! [`ContactConstraint`]s.

use crate::body::{two_bodies_mut, Body, BodyHandle, MassData};
use crate::math::{clamp, cross_sv, cross_vv, Mat22, Vec2, EPSILON};
use crate::step::Settings;
use crate::step::TimeStep;

/// One contact point within a manifold.
pub struct SolvableContact {
    pub point: Vec2,
    pub depth: f64,

    /// Contact point in each body's local frame, captured at `initialize`,
    /// used to recompute `r1`/`r2` as bodies move during position solving.
    local_point_a: Vec2,
    local_point_b: Vec2,

    pub normal_impulse: f64,
    pub tangent_impulse: f64,
    position_impulse: f64,

    /// False when the two-point block solve was ill-conditioned and this
    /// (the shallower) contact was excluded from this step's velocity
    /// solve. Left in the manifold for the caller's event stream.
    pub solved: bool,

    mass_n: f64,
    mass_t: f64,
    velocity_bias: f64,
    r1: Vec2,
    r2: Vec2,
}

impl SolvableContact {
    pub fn new(point: Vec2, depth: f64) -> Self {
        SolvableContact {
            point,
            depth,
            local_point_a: Vec2::zero(),
            local_point_b: Vec2::zero(),
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
            position_impulse: 0.0,
            solved: true,
            mass_n: 0.0,
            mass_t: 0.0,
            velocity_bias: 0.0,
            r1: Vec2::zero(),
            r2: Vec2::zero(),
        }
    }
}

struct BlockMass {
    inv_k: Mat22,
}

/// A full manifold between two bodies: shared normal/tangent/material
/// properties plus one or two [`SolvableContact`]s. `T` is caller-defined
/// user data (e.g. a shape pair id) the core never inspects.
pub struct ContactConstraint<T> {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Unit normal from body A to body B.
    pub normal: Vec2,
    pub tangent: Vec2,
    pub restitution: f64,
    pub friction: f64,
    /// Surface speed along the tangent, e.g. a conveyor belt.
    pub tangent_speed: f64,
    pub points: Vec<SolvableContact>,
    pub user_data: T,

    block: Option<BlockMass>,
}

impl<T> ContactConstraint<T> {
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        normal: Vec2,
        restitution: f64,
        friction: f64,
        points: Vec<SolvableContact>,
        user_data: T,
    ) -> Self {
        ContactConstraint {
            body_a,
            body_b,
            tangent: crate::math::right_normal(normal),
            normal,
            restitution,
            friction,
            tangent_speed: 0.0,
            points,
            user_data,
            block: None,
        }
    }

    /// `vB - vA` at the contact point: negative along `normal` means the
    /// bodies are approaching (normal points from A to B).
    fn relative_velocity<B: Body>(body_a: &B, body_b: &B, r1: Vec2, r2: Vec2) -> Vec2 {
        let va = body_a.linear_velocity() + cross_sv(body_a.angular_velocity(), r1);
        let vb = body_b.linear_velocity() + cross_sv(body_b.angular_velocity(), r2);
        vb - va
    }

    pub fn initialize<B: Body>(&mut self, step: TimeStep, settings: &Settings, bodies: &mut [B]) {
        if self.points.is_empty() {
            return;
        }
        let (body_a, body_b) = two_bodies_mut(bodies, self.body_a, self.body_b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();
        let n = self.normal;
        let t = self.tangent;

        for c in self.points.iter_mut() {
            c.local_point_a = body_a.local_point(c.point);
            c.local_point_b = body_b.local_point(c.point);
            c.r1 = c.point - body_a.world_center();
            c.r2 = c.point - body_b.world_center();
            c.solved = true;
            c.position_impulse = 0.0;

            let rn1 = cross_vv(c.r1, n);
            let rn2 = cross_vv(c.r2, n);
            let inv_k_n = ma.inv_mass + mb.inv_mass + ma.inv_inertia * rn1 * rn1 + mb.inv_inertia * rn2 * rn2;
            c.mass_n = if inv_k_n > EPSILON { 1.0 / inv_k_n } else { 0.0 };

            let rt1 = cross_vv(c.r1, t);
            let rt2 = cross_vv(c.r2, t);
            let inv_k_t = ma.inv_mass + mb.inv_mass + ma.inv_inertia * rt1 * rt1 + mb.inv_inertia * rt2 * rt2;
            c.mass_t = if inv_k_t > EPSILON { 1.0 / inv_k_t } else { 0.0 };

            let rv = Self::relative_velocity(body_a, body_b, c.r1, c.r2);
            let rvn = n.dot(rv);
            c.velocity_bias = if rvn < -settings.restitution_velocity_threshold {
                -self.restitution * rvn
            } else {
                0.0
            };
        }

        self.block = None;
        if self.points.len() == 2 {
            let (ca, cb) = (&self.points[0], &self.points[1]);
            let rn1a = cross_vv(ca.r1, n);
            let rn2a = cross_vv(ca.r2, n);
            let rn1b = cross_vv(cb.r1, n);
            let rn2b = cross_vv(cb.r2, n);
            let inv_mass_sum = ma.inv_mass + mb.inv_mass;
            let k00 = inv_mass_sum + ma.inv_inertia * rn1a * rn1a + mb.inv_inertia * rn2a * rn2a;
            let k11 = inv_mass_sum + ma.inv_inertia * rn1b * rn1b + mb.inv_inertia * rn2b * rn2b;
            let k01 = inv_mass_sum + ma.inv_inertia * rn1a * rn1b + mb.inv_inertia * rn2a * rn2b;
            let k = Mat22::new(k00, k01, k01, k11);
            let det = k.determinant();
            if k00 * k00 < 1000.0 * det {
                self.block = Some(BlockMass { inv_k: k.inverse() });
            } else {
                // Ill-conditioned manifold: drop the shallower contact from
                // this step's velocity solve but keep it in the list.
                if ca.depth < cb.depth {
                    self.points[0].solved = false;
                } else {
                    self.points[1].solved = false;
                }
            }
        }

        if settings.warm_starting_enabled {
            for c in self.points.iter_mut() {
                c.normal_impulse *= step.dt_ratio;
                c.tangent_impulse *= step.dt_ratio;
            }
        } else {
            for c in self.points.iter_mut() {
                c.normal_impulse = 0.0;
                c.tangent_impulse = 0.0;
            }
        }

        for c in self.points.iter() {
            let p = n * c.normal_impulse + t * c.tangent_impulse;
            apply_impulse(body_a, body_b, ma, mb, c.r1, c.r2, p);
        }
    }

    pub fn solve_velocity<B: Body>(&mut self, bodies: &mut [B]) {
        if self.points.is_empty() {
            return;
        }
        let (body_a, body_b) = two_bodies_mut(bodies, self.body_a, self.body_b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();
        let n = self.normal;
        let t = self.tangent;

        // Friction first, using the normal impulse from the previous
        // iteration (or warm start) as this iteration's cap.
        for c in self.points.iter_mut().filter(|c| c.solved) {
            let rv = Self::relative_velocity(body_a, body_b, c.r1, c.r2);
            let rvt = t.dot(rv) - self.tangent_speed;
            let d_raw = -c.mass_t * rvt;
            let max_friction = self.friction * c.normal_impulse;
            let old = c.tangent_impulse;
            c.tangent_impulse = clamp(old + d_raw, -max_friction, max_friction);
            let applied = c.tangent_impulse - old;
            apply_impulse(body_a, body_b, ma, mb, c.r1, c.r2, t * applied);
        }

        let solved_count = self.points.iter().filter(|c| c.solved).count();
        if solved_count == 2 && self.block.is_some() {
            self.solve_normal_block(body_a, body_b, ma, mb);
        } else {
            for c in self.points.iter_mut().filter(|c| c.solved) {
                let rv = {
                    let va = body_a.linear_velocity() + cross_sv(body_a.angular_velocity(), c.r1);
                    let vb = body_b.linear_velocity() + cross_sv(body_b.angular_velocity(), c.r2);
                    vb - va
                };
                let rvn = n.dot(rv);
                let d_raw = c.mass_n * (c.velocity_bias - rvn);
                let old = c.normal_impulse;
                c.normal_impulse = (old + d_raw).max(0.0);
                let applied = c.normal_impulse - old;
                apply_impulse(body_a, body_b, ma, mb, c.r1, c.r2, n * applied);
            }
        }
    }

    /// The two-contact block solve: Murty's total enumeration of the
    /// normal-impulse complementarity problem's four sign cases, tried in
    /// fixed order and applied on the first one that is consistent.
    fn solve_normal_block<B: Body>(&mut self, body_a: &mut B, body_b: &mut B, ma: MassData, mb: MassData) {
        let n = self.normal;
        let inv_k = match &self.block {
            Some(b) => b.inv_k,
            None => return,
        };

        let a_old = Vec2::new(self.points[0].normal_impulse, self.points[1].normal_impulse);

        let rv1 = {
            let va = body_a.linear_velocity() + cross_sv(body_a.angular_velocity(), self.points[0].r1);
            let vb = body_b.linear_velocity() + cross_sv(body_b.angular_velocity(), self.points[0].r2);
            n.dot(vb - va)
        };
        let rv2 = {
            let va = body_a.linear_velocity() + cross_sv(body_a.angular_velocity(), self.points[1].r1);
            let vb = body_b.linear_velocity() + cross_sv(body_b.angular_velocity(), self.points[1].r2);
            n.dot(vb - va)
        };

        // Recover the raw (non-inverted) block matrix from its masses plus
        // the shared off-diagonal coupling term, since `inv_k` alone can't
        // be un-inverted losslessly when nearly singular; cheaper to just
        // recompute it the same way `initialize` did.
        let rn1a = cross_vv(self.points[0].r1, n);
        let rn2a = cross_vv(self.points[0].r2, n);
        let rn1b = cross_vv(self.points[1].r1, n);
        let rn2b = cross_vv(self.points[1].r2, n);
        let inv_mass_sum = ma.inv_mass + mb.inv_mass;
        let k00 = inv_mass_sum + ma.inv_inertia * rn1a * rn1a + mb.inv_inertia * rn2a * rn2a;
        let k11 = inv_mass_sum + ma.inv_inertia * rn1b * rn1b + mb.inv_inertia * rn2b * rn2b;
        let k01 = inv_mass_sum + ma.inv_inertia * rn1a * rn1b + mb.inv_inertia * rn2a * rn2b;
        let k_mat = Mat22::new(k00, k01, k01, k11);

        let b = Vec2::new(
            rv1 - self.points[0].velocity_bias,
            rv2 - self.points[1].velocity_bias,
        ) - k_mat.mul_vec(a_old);

        // Case 1: both active.
        let x = -inv_k.mul_vec(b);
        if x.x >= 0.0 && x.y >= 0.0 {
            self.apply_block_result(body_a, body_b, ma, mb, x, a_old);
            return;
        }

        // Case 2: contact 2 inactive (x2 = 0, vn1 = 0).
        if k00 > EPSILON {
            let x1 = -self.points[0].mass_n * b.x;
            let vn2 = k01 * x1 + b.y;
            if x1 >= 0.0 && vn2 >= 0.0 {
                self.apply_block_result(body_a, body_b, ma, mb, Vec2::new(x1, 0.0), a_old);
                return;
            }
        }

        // Case 3: contact 1 inactive (x1 = 0, vn2 = 0).
        if k11 > EPSILON {
            let x2 = -self.points[1].mass_n * b.y;
            let vn1 = k01 * x2 + b.x;
            if x2 >= 0.0 && vn1 >= 0.0 {
                self.apply_block_result(body_a, body_b, ma, mb, Vec2::new(0.0, x2), a_old);
                return;
            }
        }

        // Case 4: both inactive.
        if b.x >= 0.0 && b.y >= 0.0 {
            self.apply_block_result(body_a, body_b, ma, mb, Vec2::zero(), a_old);
        }
        // Otherwise no case is consistent (rare, numerical edge case);
        // leave the accumulated impulses and velocities unchanged.
    }

    fn apply_block_result<B: Body>(
        &mut self,
        body_a: &mut B,
        body_b: &mut B,
        ma: MassData,
        mb: MassData,
        x: Vec2,
        a_old: Vec2,
    ) {
        let n = self.normal;
        let d = x - a_old;
        self.points[0].normal_impulse = x.x;
        self.points[1].normal_impulse = x.y;
        apply_impulse(body_a, body_b, ma, mb, self.points[0].r1, self.points[0].r2, n * d.x);
        apply_impulse(body_a, body_b, ma, mb, self.points[1].r1, self.points[1].r2, n * d.y);
    }

    /// One iteration of non-linear position projection. Returns the
    /// smallest (most negative) separation seen across this constraint's
    /// points, for the caller to fold into the overall convergence check.
    pub fn solve_position<B: Body>(&mut self, settings: &Settings, bodies: &mut [B]) -> f64 {
        let mut min_separation = f64::INFINITY;
        if self.points.is_empty() {
            return min_separation;
        }
        let (body_a, body_b) = two_bodies_mut(bodies, self.body_a, self.body_b);
        let ma = body_a.mass_data();
        let mb = body_b.mass_data();
        let n = self.normal;

        for c in self.points.iter_mut() {
            let p1 = body_a.world_point(c.local_point_a);
            let p2 = body_b.world_point(c.local_point_b);
            let r1 = p1 - body_a.world_center();
            let r2 = p2 - body_b.world_center();

            let pen = n.dot(p1 - p2) - c.depth;
            min_separation = min_separation.min(pen);

            let cp = settings.baumgarte
                * clamp(pen + settings.linear_tolerance, -settings.max_linear_correction, 0.0);

            let rn1 = cross_vv(r1, n);
            let rn2 = cross_vv(r2, n);
            let k = ma.inv_mass + mb.inv_mass + ma.inv_inertia * rn1 * rn1 + mb.inv_inertia * rn2 * rn2;
            let d_impulse = if k > EPSILON { -cp / k } else { 0.0 };
            let old = c.position_impulse;
            c.position_impulse = (old + d_impulse).max(0.0);
            let applied = c.position_impulse - old;
            let p = n * applied;

            body_a.translate(-p * ma.inv_mass);
            body_a.rotate_about_center(-ma.inv_inertia * cross_vv(r1, p));
            body_b.translate(p * mb.inv_mass);
            body_b.rotate_about_center(mb.inv_inertia * cross_vv(r2, p));
        }

        min_separation
    }
}

fn apply_impulse<B: Body>(
    body_a: &mut B,
    body_b: &mut B,
    ma: MassData,
    mb: MassData,
    r1: Vec2,
    r2: Vec2,
    p: Vec2,
) {
    body_a.set_linear_velocity(body_a.linear_velocity() - p * ma.inv_mass);
    body_a.set_angular_velocity(body_a.angular_velocity() - ma.inv_inertia * cross_vv(r1, p));
    body_b.set_linear_velocity(body_b.linear_velocity() + p * mb.inv_mass);
    body_b.set_angular_velocity(body_b.angular_velocity() + mb.inv_inertia * cross_vv(r2, p));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;

    fn one_point_constraint(depth: f64, restitution: f64) -> ContactConstraint<()> {
        let mut c = SolvableContact::new(Vec2::new(0.0, 0.5), depth);
        c.normal_impulse = 0.0;
        ContactConstraint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::new(0.0, 1.0),
            restitution,
            0.3,
            vec![c],
            (),
        )
    }

    #[test]
    fn resting_contact_stops_approach_velocity() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.0, 0.5), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(0.0, -3.0));
        let mut constraint = one_point_constraint(0.01, 0.0);
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        constraint.initialize(step, &settings, &mut bodies);
        for _ in 0..settings.velocity_iterations {
            constraint.solve_velocity(&mut bodies);
        }
        assert!(bodies[1].linear_velocity().y >= -1e-6);
    }

    #[test]
    fn normal_impulse_never_goes_negative() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.0, 0.5), 1.0, 1.0),
        ];
        bodies[1].set_linear_velocity(Vec2::new(0.0, 5.0));
        let mut constraint = one_point_constraint(0.0, 0.0);
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        constraint.initialize(step, &settings, &mut bodies);
        for _ in 0..settings.velocity_iterations {
            constraint.solve_velocity(&mut bodies);
        }
        assert!(constraint.points[0].normal_impulse >= 0.0);
    }

    #[test]
    fn two_point_manifold_drops_shallower_on_ill_conditioned_block() {
        // Two coincident points (degenerate r1/r2) make K singular, which
        // should mark one contact unsolved rather than panicking.
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.0, 1.0), 1.0, 1.0),
        ];
        let c1 = SolvableContact::new(Vec2::new(-0.5, 0.5), 0.01);
        let c2 = SolvableContact::new(Vec2::new(-0.5, 0.5), 0.02);
        let mut constraint = ContactConstraint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::new(0.0, 1.0),
            0.0,
            0.5,
            vec![c1, c2],
            (),
        );
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        constraint.initialize(step, &settings, &mut bodies);
        assert!(constraint.points.iter().any(|c| !c.solved) || constraint.block.is_some());
    }

    #[test]
    fn position_projection_reduces_penetration() {
        let mut bodies = vec![
            SimpleBody::immovable(Vec2::new(0.0, 0.0)),
            SimpleBody::dynamic(Vec2::new(0.0, 0.4), 1.0, 1.0),
        ];
        let mut constraint = one_point_constraint(0.1, 0.0);
        let settings = Settings::default();
        let step = TimeStep::new(1.0 / 60.0, 1.0 / 60.0);
        constraint.initialize(step, &settings, &mut bodies);
        let before = constraint.solve_position(&settings, &mut bodies);
        let after = constraint.solve_position(&settings, &mut bodies);
        assert!(after >= before);
    }
}
