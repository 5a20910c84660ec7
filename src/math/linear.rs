use nalgebra::{DMatrix, DVector, Matrix3x4, Matrix4, Vector4};

use super::Vec3;
use crate::error::{GeometryError, GeometryResult};
use crate::io::input::Point2D;

/// Pivots smaller than this (after the row swap search) are treated as zero.
const PIVOT_EPS: f64 = 1e-12;

/// Solves `A x = b` by Gaussian elimination with partial pivoting.
///
/// `a` must be square with as many rows as `b`.
pub fn solve_linear_system(a: &DMatrix<f64>, b: &DVector<f64>) -> GeometryResult<DVector<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(GeometryError::InvalidInput(format!(
            "linear system shape mismatch: A is {}x{}, b has {} rows",
            a.nrows(),
            a.ncols(),
            b.len()
        )));
    }

    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| {
                m[(i, col)]
                    .abs()
                    .partial_cmp(&m[(j, col)].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);

        let pivot = m[(pivot_row, col)];
        if !pivot.is_finite() || pivot.abs() < PIVOT_EPS {
            return Err(GeometryError::SingularSystem { column: col });
        }
        if pivot_row != col {
            m.swap_rows(pivot_row, col);
            rhs.swap_rows(pivot_row, col);
        }

        for row in (col + 1)..n {
            let factor = m[(row, col)] / m[(col, col)];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[(row, k)] -= factor * m[(col, k)];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    // back substitution
    let mut x = DVector::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| m[(row, k)] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[(row, row)];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFiniteValue {
            context: "solve_linear_system",
        });
    }
    Ok(x)
}

/// Least-squares solution of an (over)determined system through the normal
/// equations `AᵀA x = Aᵀb`.
pub fn solve_least_squares(a: &DMatrix<f64>, b: &DVector<f64>) -> GeometryResult<DVector<f64>> {
    if a.nrows() != b.len() {
        return Err(GeometryError::InvalidInput(format!(
            "least squares shape mismatch: A has {} rows, b has {}",
            a.nrows(),
            b.len()
        )));
    }
    let at = a.transpose();
    let ata = &at * a;
    let atb = &at * b;
    solve_linear_system(&ata, &atb)
}

/// Linear triangulation of one 3D point from two views.
///
/// Each view contributes the two rows `u·P₃ − P₁` and `v·P₃ − P₂`; the
/// homogeneous solution is the right singular vector of the smallest
/// singular value.
pub fn triangulate_dlt(
    p1: &Matrix3x4<f64>,
    x1: &Point2D,
    p2: &Matrix3x4<f64>,
    x2: &Point2D,
) -> GeometryResult<Vec3> {
    let mut a = Matrix4::<f64>::zeros();
    for (i, (p, x)) in [(p1, x1), (p2, x2)].into_iter().enumerate() {
        let r0 = p.row(0);
        let r1 = p.row(1);
        let r2 = p.row(2);
        a.set_row(2 * i, &(r2 * x.x - r0));
        a.set_row(2 * i + 1, &(r2 * x.y - r1));
    }

    if a.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFiniteValue {
            context: "triangulate_dlt",
        });
    }

    let svd = a.svd(true, true);
    let v_t = svd.v_t.ok_or(GeometryError::TriangulationFailed)?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or(GeometryError::TriangulationFailed)?;
    let h: Vector4<f64> = v_t.row(min_idx).transpose();

    if h[3].abs() < 1e-12 {
        return Err(GeometryError::TriangulationFailed);
    }
    let point = Vec3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);
    if point.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::TriangulationFailed);
    }
    Ok(point)
}

#[cfg(test)]
mod linear_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_linear_system_needs_pivoting() {
        // zero in the leading position forces a row swap
        let a = DMatrix::from_row_slice(3, 3, &[0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let expected = DVector::from_vec(vec![1.0, -2.0, 3.0]);
        let b = &a * &expected;
        let x = solve_linear_system(&a, &b).unwrap();
        assert_relative_eq!(x, expected, epsilon = 1e-10);
    }

    #[test]
    fn test_solve_linear_system_singular() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            solve_linear_system(&a, &b),
            Err(GeometryError::SingularSystem { column: 1 })
        ));
    }

    #[test]
    fn test_solve_linear_system_shape_mismatch() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            solve_linear_system(&a, &b),
            Err(GeometryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_least_squares_fits_line() {
        // y = 2x + 1 with symmetric noise
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let noise = [0.1, -0.1, 0.0, 0.1, -0.1];
        let mut a = DMatrix::zeros(xs.len(), 2);
        let mut b = DVector::zeros(xs.len());
        for (i, (&x, &e)) in xs.iter().zip(noise.iter()).enumerate() {
            a[(i, 0)] = x;
            a[(i, 1)] = 1.0;
            b[i] = 2.0 * x + 1.0 + e;
        }
        let sol = solve_least_squares(&a, &b).unwrap();
        assert_relative_eq!(sol[0], 2.0, epsilon = 0.05);
        assert_relative_eq!(sol[1], 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_triangulate_dlt_two_simple_cameras() {
        // camera 1 at origin looking down +Z, camera 2 shifted along X
        let p1 = Matrix3x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let p2 = Matrix3x4::new(1.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        let world = Vec3::new(0.3, -0.2, 4.0);

        let project = |p: &Matrix3x4<f64>| {
            let h = p * Vector4::new(world.x, world.y, world.z, 1.0);
            Point2D::new(h[0] / h[2], h[1] / h[2])
        };
        let x1 = project(&p1);
        let x2 = project(&p2);

        let recovered = triangulate_dlt(&p1, &x1, &p2, &x2).unwrap();
        assert_relative_eq!(recovered, world, epsilon = 1e-6);
    }
}
