//! Small 2D math kernel: vectors, 2x2/3x3 matrices with guarded solves, and
//! the handful of free functions the joint and contact solvers share.

use ultraviolet::DVec2 as UvVec2;

/// Below this magnitude a scalar or diagonal entry is treated as zero rather
/// than inverted, matching the reference engine's epsilon-guarded divides.
pub const EPSILON: f64 = 1.0e-9;

pub type Vec2 = UvVec2;

/// `v` rotated -90 degrees: `(y, -x)`.
pub fn right_normal(v: Vec2) -> Vec2 {
    Vec2::new(v.y, -v.x)
}

/// `v` rotated +90 degrees: `(-y, x)`.
pub fn left_normal(v: Vec2) -> Vec2 {
    Vec2::new(-v.y, v.x)
}

/// Scalar x scalar -> perpendicular vector, `(-y*s, x*s)`.
pub fn cross_sv(s: f64, v: Vec2) -> Vec2 {
    Vec2::new(-s * v.y, s * v.x)
}

/// Vector x scalar -> perpendicular vector, `(y*s, -x*s)`.
pub fn cross_vs(v: Vec2, s: f64) -> Vec2 {
    Vec2::new(s * v.y, -s * v.x)
}

/// Vector x vector -> scalar, `x*y' - y*x'`.
pub fn cross_vv(a: Vec2, b: Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// Wraps an angle into `(-pi, pi]`.
pub fn wrap_angle(theta: f64) -> f64 {
    use std::f64::consts::PI;
    let mut t = (theta + PI) % (2.0 * PI);
    if t < 0.0 {
        t += 2.0 * PI;
    }
    t - PI
}

/// A 2D rotation, stored as sin/cos to avoid repeated trig calls.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Rotation {
    pub sin: f64,
    pub cos: f64,
}

impl Rotation {
    pub fn identity() -> Self {
        Rotation { sin: 0.0, cos: 1.0 }
    }

    pub fn from_angle(angle: f64) -> Self {
        Rotation {
            sin: angle.sin(),
            cos: angle.cos(),
        }
    }

    pub fn angle(&self) -> f64 {
        self.sin.atan2(self.cos)
    }

    pub fn rotate(&self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.cos * v.x - self.sin * v.y,
            self.sin * v.x + self.cos * v.y,
        )
    }

    pub fn inv_rotate(&self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.cos * v.x + self.sin * v.y,
            -self.sin * v.x + self.cos * v.y,
        )
    }
}

/// Rigid transform: rotation then translation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub position: Vec2,
    pub rotation: Rotation,
}

impl Transform {
    pub fn new(position: Vec2, angle: f64) -> Self {
        Transform {
            position,
            rotation: Rotation::from_angle(angle),
        }
    }

    pub fn point_to_world(&self, local: Vec2) -> Vec2 {
        self.position + self.rotation.rotate(local)
    }

    pub fn point_to_local(&self, world: Vec2) -> Vec2 {
        self.rotation.inv_rotate(world - self.position)
    }

    pub fn vector_to_world(&self, local: Vec2) -> Vec2 {
        self.rotation.rotate(local)
    }

    pub fn vector_to_local(&self, world: Vec2) -> Vec2 {
        self.rotation.inv_rotate(world)
    }
}

/// Symmetric-ish 2x2 matrix stored row major, used for point-to-point and
/// block-LCP effective masses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat22 {
    pub m00: f64,
    pub m01: f64,
    pub m10: f64,
    pub m11: f64,
}

impl Mat22 {
    pub fn new(m00: f64, m01: f64, m10: f64, m11: f64) -> Self {
        Mat22 { m00, m01, m10, m11 }
    }

    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    pub fn inverse(&self) -> Mat22 {
        let det = self.determinant();
        if det.abs() <= EPSILON {
            return Mat22::default();
        }
        let inv_det = 1.0 / det;
        Mat22::new(
            inv_det * self.m11,
            -inv_det * self.m01,
            -inv_det * self.m10,
            inv_det * self.m00,
        )
    }

    pub fn mul_vec(&self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.m00 * v.x + self.m01 * v.y,
            self.m10 * v.x + self.m11 * v.y,
        )
    }

    /// Solves `self * x = b` for `x`, returning zero when the system is
    /// singular within `EPSILON`.
    pub fn solve(&self, b: Vec2) -> Vec2 {
        let det = self.determinant();
        if det.abs() <= EPSILON {
            return Vec2::zero();
        }
        let inv_det = 1.0 / det;
        Vec2::new(
            inv_det * (self.m11 * b.x - self.m01 * b.y),
            inv_det * (self.m00 * b.y - self.m10 * b.x),
        )
    }
}

/// Row-major 3x3 matrix used by joints that couple two linear DOFs with one
/// angular DOF (weld, and prismatic's limited position solve).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat33 {
    pub rows: [[f64; 3]; 3],
}

impl Mat33 {
    pub fn new(rows: [[f64; 3]; 3]) -> Self {
        Mat33 { rows }
    }

    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.rows[r][c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f64) {
        self.rows[r][c] = v;
    }

    /// The upper-left 2x2 block, used for the degenerate fallback when the
    /// (2,2) entry is too small to invert.
    pub fn upper_left(&self) -> Mat22 {
        Mat22::new(
            self.rows[0][0],
            self.rows[0][1],
            self.rows[1][0],
            self.rows[1][1],
        )
    }

    pub fn determinant(&self) -> f64 {
        let a = &self.rows;
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    }

    /// Solves the full 3x3 system, falling back to the upper-left 2x2 (with
    /// zero third component) when the matrix is singular.
    pub fn solve33(&self, b: [f64; 3]) -> [f64; 3] {
        let det = self.determinant();
        if det.abs() <= EPSILON {
            let xy = self.solve22(Vec2::new(b[0], b[1]));
            return [xy.x, xy.y, 0.0];
        }
        let inv_det = 1.0 / det;
        let a = &self.rows;
        // Cramer's rule.
        let det_x = b[0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
            - a[0][1] * (b[1] * a[2][2] - a[1][2] * b[2])
            + a[0][2] * (b[1] * a[2][1] - a[1][1] * b[2]);
        let det_y = a[0][0] * (b[1] * a[2][2] - a[1][2] * b[2])
            - b[0] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * b[2] - b[1] * a[2][0]);
        let det_z = a[0][0] * (a[1][1] * b[2] - b[1] * a[2][1])
            - a[0][1] * (a[1][0] * b[2] - b[1] * a[2][0])
            + b[0] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);
        [det_x * inv_det, det_y * inv_det, det_z * inv_det]
    }

    /// Solves only the upper-left 2x2 block against `(b.x, b.y)`.
    pub fn solve22(&self, b: Vec2) -> Vec2 {
        self.upper_left().solve(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mat22_solve_roundtrip() {
        let m = Mat22::new(4.0, 1.0, 1.0, 3.0);
        let x = Vec2::new(2.0, -1.0);
        let b = m.mul_vec(x);
        let solved = m.solve(b);
        assert!((solved - x).mag() < 1e-9);
    }

    #[test]
    fn mat22_singular_returns_zero() {
        let m = Mat22::new(1.0, 2.0, 2.0, 4.0);
        assert_eq!(m.solve(Vec2::new(1.0, 1.0)), Vec2::zero());
    }

    #[test]
    fn mat33_degenerate_falls_back_to_solve22() {
        let mut m = Mat33::default();
        m.set(0, 0, 2.0);
        m.set(1, 1, 2.0);
        // (2,2) left at zero: whole matrix is singular.
        let x = m.solve33([2.0, 4.0, 100.0]);
        assert!((x[0] - 1.0).abs() < 1e-9);
        assert!((x[1] - 2.0).abs() < 1e-9);
        assert_eq!(x[2], 0.0);
    }

    #[test]
    fn wrap_angle_stays_in_range() {
        use std::f64::consts::PI;
        let wrapped = wrap_angle(3.0 * PI);
        assert!(wrapped > -PI && wrapped <= PI);
    }
}
