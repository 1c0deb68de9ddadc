//! The joint catalog: a tagged union of concrete joint kinds, each carrying
//! its own state and exposing the four-operation protocol shared with the
//! contact solver (initialize / solve velocity / solve position / shift).
//!
//! Modeled as a sum type rather than an abstract class hierarchy, per the
//! catalog's own design notes: feature toggles (spring, limit, motor)
//! become small record sub-structures instead of capability interfaces,
//! which sidesteps the combinatorial explosion of mixins a class hierarchy
//! would need for ten-odd joint kinds that each opt into zero to three of
//! those features independently.

pub mod angle;
pub mod distance;
pub mod motor;
pub mod pin;
pub mod prismatic;
pub mod pulley;
pub mod revolute;
pub mod weld;
pub mod wheel;

pub use angle::AngleJoint;
pub use distance::DistanceJoint;
pub use motor::MotorJoint;
pub use pin::PinJoint;
pub use prismatic::PrismaticJoint;
pub use pulley::PulleyJoint;
pub use revolute::RevoluteJoint;
pub use weld::WeldJoint;
pub use wheel::WheelJoint;

use crate::body::{Body, BodyHandle};
use crate::error::JointError;
use crate::math::Vec2;
use crate::step::{Settings, TimeStep};

/// The bodies a joint constrains: every catalog joint is single- or
/// pair-bodied; the n-ary case from the abstract framework has no concrete
/// member in this catalog and is left to callers who need it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointBodies {
    Single(BodyHandle),
    Pair(BodyHandle, BodyHandle),
}

impl JointBodies {
    pub fn pair(a: BodyHandle, b: BodyHandle) -> Result<Self, JointError> {
        if a == b {
            return Err(JointError::SameBody);
        }
        Ok(JointBodies::Pair(a, b))
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        match *self {
            JointBodies::Single(a) => a == handle,
            JointBodies::Pair(a, b) => a == handle || b == handle,
        }
    }
}

/// A one-sided or two-sided linear/angular limit: independently-enabled
/// lower and upper bounds plus the accumulated unilateral impulses warm
/// start needs to carry across steps.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Limit {
    pub lower_enabled: bool,
    pub upper_enabled: bool,
    pub lower: f64,
    pub upper: f64,
    #[cfg_attr(feature = "serde-types", serde(skip))]
    pub lower_impulse: f64,
    #[cfg_attr(feature = "serde-types", serde(skip))]
    pub upper_impulse: f64,
}

impl Limit {
    pub fn new(lower: f64, upper: f64) -> Result<Self, JointError> {
        if lower > upper {
            return Err(JointError::OutOfRange {
                field: "lower",
                value: lower,
                reason: "lower limit must not exceed upper limit",
            });
        }
        Ok(Limit {
            lower_enabled: true,
            upper_enabled: true,
            lower,
            upper,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
        })
    }

    pub fn disabled() -> Self {
        Limit::default()
    }

    pub fn set_bounds(&mut self, lower: f64, upper: f64) -> Result<(), JointError> {
        if lower > upper {
            return Err(JointError::OutOfRange {
                field: "lower",
                value: lower,
                reason: "lower limit must not exceed upper limit",
            });
        }
        self.lower = lower;
        self.upper = upper;
        Ok(())
    }

    pub fn active(&self) -> bool {
        self.lower_enabled || self.upper_enabled
    }

    pub fn rescale_impulses(&mut self, ratio: f64) {
        self.lower_impulse *= ratio;
        self.upper_impulse *= ratio;
    }

    pub fn zero_impulses(&mut self) {
        self.lower_impulse = 0.0;
        self.upper_impulse = 0.0;
    }
}

/// A motor driving a single scalar degree of freedom at a commanded speed,
/// optionally capped by a maximum force or torque.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Motor {
    pub enabled: bool,
    pub speed: f64,
    /// Maximum force (linear motors) or torque (angular motors) the motor
    /// may apply. `None` means unbounded.
    pub max_load: Option<f64>,
    #[cfg_attr(feature = "serde-types", serde(skip))]
    pub impulse: f64,
}

impl Motor {
    pub fn new(speed: f64, max_load: Option<f64>) -> Result<Self, JointError> {
        if let Some(load) = max_load {
            if load < 0.0 {
                return Err(JointError::OutOfRange {
                    field: "max_load",
                    value: load,
                    reason: "must be non-negative",
                });
            }
        }
        Ok(Motor {
            enabled: true,
            speed,
            max_load,
            impulse: 0.0,
        })
    }

    pub fn rescale_impulse(&mut self, ratio: f64) {
        self.impulse *= ratio;
    }

    pub fn zero_impulse(&mut self) {
        self.impulse = 0.0;
    }
}

/// One catalog joint kind plus the state common to all of them.
pub struct Joint {
    pub bodies: JointBodies,
    /// Whether broad-phase should still generate contacts between the
    /// joined bodies.
    pub collision_allowed: bool,
    pub kind: JointKind,
}

pub enum JointKind {
    Distance(DistanceJoint),
    Angle(AngleJoint),
    Revolute(RevoluteJoint),
    Prismatic(PrismaticJoint),
    Wheel(WheelJoint),
    Weld(WeldJoint),
    Pin(PinJoint),
    Pulley(PulleyJoint),
    Motor(MotorJoint),
}

impl Joint {
    pub fn is_enabled<B: Body>(&self, bodies: &[B]) -> bool {
        match self.bodies {
            JointBodies::Single(a) => bodies[a.0].is_awake(),
            JointBodies::Pair(a, b) => bodies[a.0].is_awake() && bodies[b.0].is_awake(),
        }
    }

    pub fn is_member(&self, handle: BodyHandle) -> bool {
        self.bodies.contains(handle)
    }

    pub fn initialize_constraints<B: Body>(
        &mut self,
        step: TimeStep,
        settings: &Settings,
        bodies: &mut [B],
    ) {
        match &mut self.kind {
            JointKind::Distance(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Angle(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Revolute(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Prismatic(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Wheel(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Weld(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Pin(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Pulley(j) => j.initialize_constraints(step, settings, bodies),
            JointKind::Motor(j) => j.initialize_constraints(step, settings, bodies),
        }
    }

    pub fn solve_velocity_constraints<B: Body>(&mut self, step: TimeStep, bodies: &mut [B]) {
        match &mut self.kind {
            JointKind::Distance(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Angle(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Revolute(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Prismatic(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Wheel(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Weld(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Pin(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Pulley(j) => j.solve_velocity_constraints(step, bodies),
            JointKind::Motor(j) => j.solve_velocity_constraints(step, bodies),
        }
    }

    pub fn solve_position_constraints<B: Body>(
        &mut self,
        settings: &Settings,
        bodies: &mut [B],
    ) -> bool {
        match &mut self.kind {
            JointKind::Distance(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Angle(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Revolute(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Prismatic(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Wheel(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Weld(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Pin(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Pulley(j) => j.solve_position_constraints(settings, bodies),
            JointKind::Motor(_) => true,
        }
    }

    pub fn shift(&mut self, delta: Vec2) {
        match &mut self.kind {
            JointKind::Pulley(j) => j.shift(delta),
            JointKind::Pin(j) => j.shift(delta),
            _ => {}
        }
    }
}

slotmap::new_key_type! {
    /// Stable identity for a joint held in a [`JointSet`], surviving
    /// insertion/removal of unrelated joints.
    pub struct JointHandle;
}

/// Owns a collection of joints addressed by stable [`JointHandle`]s.
#[derive(Default)]
pub struct JointSet {
    joints: slotmap::DenseSlotMap<JointHandle, Joint>,
}

impl JointSet {
    pub fn new() -> Self {
        JointSet {
            joints: slotmap::DenseSlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, joint: Joint) -> JointHandle {
        self.joints.insert(joint)
    }

    pub fn remove(&mut self, handle: JointHandle) -> Option<Joint> {
        self.joints.remove(handle)
    }

    pub fn get(&self, handle: JointHandle) -> Option<&Joint> {
        self.joints.get(handle)
    }

    pub fn get_mut(&mut self, handle: JointHandle) -> Option<&mut Joint> {
        self.joints.get_mut(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JointHandle, &Joint)> {
        self.joints.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (JointHandle, &mut Joint)> {
        self.joints.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Drops every joint referencing a body for which `is_valid` returns
    /// false, e.g. because the owning body has been destroyed.
    pub fn retain_valid(&mut self, is_valid: impl Fn(BodyHandle) -> bool) {
        self.joints.retain(|_, j| match j.bodies {
            JointBodies::Single(a) => is_valid(a),
            JointBodies::Pair(a, b) => is_valid(a) && is_valid(b),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::test_body::SimpleBody;
    use crate::joint::distance::DistanceJoint;

    fn pair_joint() -> Joint {
        let distance = DistanceJoint::new(BodyHandle(0), BodyHandle(1), Vec2::zero(), Vec2::zero(), 1.0)
            .unwrap();
        Joint {
            bodies: JointBodies::Pair(BodyHandle(0), BodyHandle(1)),
            collision_allowed: false,
            kind: JointKind::Distance(distance),
        }
    }

    #[test]
    fn pair_joint_is_enabled_only_when_both_bodies_are_awake() {
        let mut bodies = vec![
            SimpleBody::dynamic(Vec2::new(0.0, 0.0), 1.0, 1.0),
            SimpleBody::dynamic(Vec2::new(1.0, 0.0), 1.0, 1.0),
        ];
        let joint = pair_joint();

        assert!(joint.is_enabled(&bodies));

        bodies[1].awake = false;
        assert!(
            !joint.is_enabled(&bodies),
            "a joint with one sleeping body must not be enabled"
        );

        bodies[0].awake = false;
        assert!(!joint.is_enabled(&bodies));
    }

    #[test]
    fn single_body_joint_is_enabled_tracks_that_bodys_sleep_state() {
        let bodies = vec![SimpleBody::dynamic(Vec2::new(0.0, 0.0), 1.0, 1.0)];
        let joint = Joint {
            bodies: JointBodies::Single(BodyHandle(0)),
            collision_allowed: false,
            kind: JointKind::Pin(PinJoint::new(BodyHandle(0), Vec2::zero(), Vec2::zero())),
        };
        assert!(joint.is_enabled(&bodies));

        let mut asleep = bodies;
        asleep[0].awake = false;
        assert!(!joint.is_enabled(&asleep));
    }

    #[test]
    fn is_member_checks_both_bodies_of_a_pair() {
        let joint = pair_joint();
        assert!(joint.is_member(BodyHandle(0)));
        assert!(joint.is_member(BodyHandle(1)));
        assert!(!joint.is_member(BodyHandle(2)));
    }
}
