//! Per-step scalars and engine-wide tolerances.

/// Immutable per-step timing data, shared read-only by every joint and the
/// contact solver during one call to [`crate::world::step`](crate::world).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeStep {
    pub dt: f64,
    pub inv_dt: f64,
    /// Current `dt` divided by the previous step's `dt`; 1.0 on the first
    /// step. Used to rescale warm-start impulses when the step size changes.
    pub dt_ratio: f64,
}

impl TimeStep {
    pub fn new(dt: f64, prev_dt: f64) -> Self {
        let inv_dt = if dt > crate::math::EPSILON { 1.0 / dt } else { 0.0 };
        let dt_ratio = if prev_dt > crate::math::EPSILON {
            dt / prev_dt
        } else {
            1.0
        };
        TimeStep { dt, inv_dt, dt_ratio }
    }
}

/// Engine-wide tolerances and iteration counts. Named scalars only -- no
/// policy flags beyond warm-start enablement.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    pub linear_tolerance: f64,
    pub angular_tolerance: f64,
    pub max_linear_correction: f64,
    pub max_angular_correction: f64,
    /// Fraction of positional error corrected per position iteration, in
    /// `[0, 1]`.
    pub baumgarte: f64,
    /// Minimum approach speed below which restitution is suppressed.
    pub restitution_velocity_threshold: f64,
    pub warm_starting_enabled: bool,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            linear_tolerance: 0.005,
            angular_tolerance: 2.0 / 180.0 * std::f64::consts::PI,
            max_linear_correction: 0.2,
            max_angular_correction: 8.0 / 180.0 * std::f64::consts::PI,
            baumgarte: 0.2,
            restitution_velocity_threshold: 1.0,
            warm_starting_enabled: true,
            velocity_iterations: 8,
            position_iterations: 3,
        }
    }
}
