//! A 2D rigid-body constraint solver: a body-agnostic joint catalog and a
//! two-point block contact solver built on Baumgarte/soft-constraint
//! position correction and sequential-impulse velocity solving. Collision
//! detection and body integration are out of scope -- callers own the
//! bodies, supply contact manifolds, and integrate velocities into
//! positions between the velocity and position phases of [`world::step`].

#[macro_use]
mod tracy_helpers {
    macro_rules! tracy_span {
        ($name: literal, $func_name: literal) => {
            tracy_client::Client::running()
                .expect("tracy span without a running Client")
                .span_alloc(Some($name), $func_name, file!(), line!(), 100)
        };
    }
}

pub mod body;
pub mod contact;
pub mod error;
pub mod joint;
pub mod math;
pub mod spring;
pub mod step;
pub mod world;

pub use body::{Body, BodyHandle, MassData};
pub use contact::{ContactConstraint, SolvableContact};
pub use error::JointError;
pub use joint::{Joint, JointHandle, JointKind, JointSet};
pub use step::{Settings, TimeStep};
pub use world::step as step_world;
