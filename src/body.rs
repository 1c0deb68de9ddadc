//! The capability interface the solver needs from a rigid body.
//!
//! The core never owns bodies or knows about shapes; callers implement
//! `Body` for whatever rigid body representation their engine already has
//! and hand the solver a slice of `&mut dyn Body` (or a generic slice of a
//! concrete type) addressed by [`BodyHandle`].

use crate::math::Vec2;

/// A plain index into a caller-owned body array. Cheap to copy, carries no
/// lifetime, and is what joints and contacts store internally -- never a
/// reference to the body itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyHandle(pub usize);

/// Mass, inertia, and their inverses. Zero inverse mass/inertia represents
/// an immovable body (static or kinematic); the solver must tolerate either
/// or both of a pair being zero without dividing by it.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct MassData {
    pub mass: f64,
    pub inv_mass: f64,
    pub inertia: f64,
    pub inv_inertia: f64,
    /// Centre of mass in the body's local frame.
    pub local_center: Vec2,
}

impl MassData {
    pub fn new(mass: f64, inertia: f64, local_center: Vec2) -> Self {
        let inv_mass = if mass > crate::math::EPSILON {
            1.0 / mass
        } else {
            0.0
        };
        let inv_inertia = if inertia > crate::math::EPSILON {
            1.0 / inertia
        } else {
            0.0
        };
        MassData {
            mass,
            inv_mass,
            inertia,
            inv_inertia,
            local_center,
        }
    }

    pub fn immovable() -> Self {
        MassData {
            mass: 0.0,
            inv_mass: 0.0,
            inertia: 0.0,
            inv_inertia: 0.0,
            local_center: Vec2::zero(),
        }
    }
}

/// Everything the solver may read or write on a rigid body. Shapes, colors,
/// user data -- anything beyond motion state -- are opaque to the core.
pub trait Body {
    fn transform(&self) -> crate::math::Transform;
    fn rotation_angle(&self) -> f64 {
        self.transform().rotation.angle()
    }

    /// Centre of mass in world space.
    fn world_center(&self) -> Vec2;
    /// Centre of mass in the body's local frame.
    fn local_center(&self) -> Vec2 {
        self.mass_data().local_center
    }

    fn linear_velocity(&self) -> Vec2;
    fn angular_velocity(&self) -> f64;
    fn set_linear_velocity(&mut self, v: Vec2);
    fn set_angular_velocity(&mut self, w: f64);

    fn mass_data(&self) -> MassData;

    /// Translates the body's origin by `v` in world space, leaving rotation
    /// unchanged.
    fn translate(&mut self, v: Vec2);
    /// Rotates the body by `angle` radians about `pivot` (world space),
    /// updating both rotation and position.
    fn rotate_about(&mut self, angle: f64, pivot: Vec2);
    /// Rotates the body by `angle` radians about its own centre of mass.
    fn rotate_about_center(&mut self, angle: f64) {
        let center = self.world_center();
        self.rotate_about(angle, center);
    }

    fn local_point(&self, world: Vec2) -> Vec2 {
        self.transform().point_to_local(world)
    }
    fn world_point(&self, local: Vec2) -> Vec2 {
        self.transform().point_to_world(local)
    }
    fn local_vector(&self, world: Vec2) -> Vec2 {
        self.transform().vector_to_local(world)
    }
    fn world_vector(&self, local: Vec2) -> Vec2 {
        self.transform().vector_to_world(local)
    }
    /// Rotates `v` by the body's current rotation (no translation).
    fn transformed_r(&self, v: Vec2) -> Vec2 {
        self.transform().rotation.rotate(v)
    }

    /// Marks the body as not at rest, e.g. because a joint parameter that
    /// could change this step's impulses was just edited.
    fn wake(&mut self);
    fn is_awake(&self) -> bool {
        true
    }
}

/// Splits a body slice into two disjoint mutable references. Joints and
/// contacts need simultaneous mutable access to both of their bodies; this
/// is the single place that `panic`s if asked for the same handle twice so
/// callers get a clear message instead of a borrow-checker error at the
/// call site.
pub fn two_bodies_mut<B>(bodies: &mut [B], a: BodyHandle, b: BodyHandle) -> (&mut B, &mut B) {
    assert!(a.0 != b.0, "two_bodies_mut called with the same handle twice");
    if a.0 < b.0 {
        let (left, right) = bodies.split_at_mut(b.0);
        (&mut left[a.0], &mut right[0])
    } else {
        let (left, right) = bodies.split_at_mut(a.0);
        (&mut right[0], &mut left[b.0])
    }
}

#[cfg(test)]
pub(crate) mod test_body {
    use super::*;
    use crate::math::Transform;

    /// A minimal in-memory body used across the joint/contact unit tests.
    #[derive(Clone, Debug)]
    pub struct SimpleBody {
        pub transform: Transform,
        pub linear_velocity: Vec2,
        pub angular_velocity: f64,
        pub mass_data: MassData,
        pub awake: bool,
    }

    impl SimpleBody {
        pub fn dynamic(position: Vec2, mass: f64, inertia: f64) -> Self {
            SimpleBody {
                transform: Transform::new(position, 0.0),
                linear_velocity: Vec2::zero(),
                angular_velocity: 0.0,
                mass_data: MassData::new(mass, inertia, Vec2::zero()),
                awake: true,
            }
        }

        pub fn immovable(position: Vec2) -> Self {
            SimpleBody {
                transform: Transform::new(position, 0.0),
                linear_velocity: Vec2::zero(),
                angular_velocity: 0.0,
                mass_data: MassData::immovable(),
                awake: true,
            }
        }
    }

    impl Body for SimpleBody {
        fn transform(&self) -> Transform {
            self.transform
        }
        fn world_center(&self) -> Vec2 {
            self.transform.point_to_world(self.mass_data.local_center)
        }
        fn linear_velocity(&self) -> Vec2 {
            self.linear_velocity
        }
        fn angular_velocity(&self) -> f64 {
            self.angular_velocity
        }
        fn set_linear_velocity(&mut self, v: Vec2) {
            self.linear_velocity = v;
        }
        fn set_angular_velocity(&mut self, w: f64) {
            self.angular_velocity = w;
        }
        fn mass_data(&self) -> MassData {
            self.mass_data
        }
        fn translate(&mut self, v: Vec2) {
            self.transform.position += v;
        }
        fn rotate_about(&mut self, angle: f64, pivot: Vec2) {
            let offset = self.transform.position - pivot;
            let rot = crate::math::Rotation::from_angle(angle);
            self.transform.position = pivot + rot.rotate(offset);
            let new_angle = self.transform.rotation.angle() + angle;
            self.transform.rotation = crate::math::Rotation::from_angle(new_angle);
        }
        fn wake(&mut self) {
            self.awake = true;
        }
        fn is_awake(&self) -> bool {
            self.awake
        }
    }
}
