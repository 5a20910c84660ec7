pub mod linear;

pub use linear::{solve_least_squares, solve_linear_system, triangulate_dlt};

use nalgebra::{Matrix3, Vector3};

use crate::error::{GeometryError, GeometryResult};

pub type Mat3 = Matrix3<f64>;
pub type Vec3 = Vector3<f64>;

/// Below this |det| a 3×3 matrix is treated as singular.
pub const SINGULAR_DET_EPS: f64 = 1e-10;
/// Below this length a vector is treated as zero.
pub const ZERO_NORM_EPS: f64 = 1e-12;

pub fn multiply3x3(a: &Mat3, b: &Mat3) -> Mat3 {
    a * b
}

pub fn transpose3x3(m: &Mat3) -> Mat3 {
    m.transpose()
}

/// Inverse via the adjugate. Fails when |det| < 1e-10.
pub fn invert3x3(m: &Mat3) -> GeometryResult<Mat3> {
    let det = m.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_DET_EPS {
        return Err(GeometryError::SingularMatrix { det });
    }

    let c = |r0: usize, c0: usize, r1: usize, c1: usize| {
        m[(r0, c0)] * m[(r1, c1)] - m[(r0, c1)] * m[(r1, c0)]
    };

    // adjugate = transpose of the cofactor matrix
    let adj = Mat3::new(
        c(1, 1, 2, 2),
        -c(0, 1, 2, 2),
        c(0, 1, 1, 2),
        -c(1, 0, 2, 2),
        c(0, 0, 2, 2),
        -c(0, 0, 1, 2),
        c(1, 0, 2, 1),
        -c(0, 0, 2, 1),
        c(0, 0, 1, 1),
    );

    Ok(adj / det)
}

pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a.dot(b)
}

pub fn cross(a: &Vec3, b: &Vec3) -> Vec3 {
    a.cross(b)
}

/// Unit vector in the direction of `v`.
pub fn normalize(v: &Vec3) -> GeometryResult<Vec3> {
    if !v.iter().all(|c| c.is_finite()) {
        return Err(GeometryError::NonFiniteValue { context: "normalize" });
    }
    let n = v.norm();
    if n < ZERO_NORM_EPS {
        return Err(GeometryError::ZeroMagnitude);
    }
    Ok(v / n)
}

/// Rounds to one decimal place, the precision angles are reported with.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
