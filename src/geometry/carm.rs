use nalgebra::{Matrix3x4, Vector4};
use serde::{Deserialize, Serialize};

use super::ProjectionAngles;
use crate::error::{GeometryError, GeometryResult};
use crate::io::input::Point2D;
use crate::math::{Mat3, Vec3};

/// Idealized isocentric C-arm: point source, flat detector, square pixels,
/// isocenter at the patient-frame origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CArmGeometry {
    pub source_to_detector_mm: f64,
    pub source_to_isocenter_mm: f64,
    pub pixel_spacing_mm: f64,
}

impl Default for CArmGeometry {
    fn default() -> Self {
        Self {
            source_to_detector_mm: 1000.0,
            source_to_isocenter_mm: 750.0,
            pixel_spacing_mm: 0.3,
        }
    }
}

impl CArmGeometry {
    pub fn validate(&self) -> GeometryResult<()> {
        let values = [
            self.source_to_detector_mm,
            self.source_to_isocenter_mm,
            self.pixel_spacing_mm,
        ];
        if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(GeometryError::InvalidInput(
                "C-arm distances and pixel spacing must be positive".to_string(),
            ));
        }
        if self.source_to_isocenter_mm >= self.source_to_detector_mm {
            return Err(GeometryError::InvalidInput(
                "isocenter must lie between source and detector".to_string(),
            ));
        }
        Ok(())
    }

    /// Focal length in pixels.
    pub fn focal_length_px(&self) -> f64 {
        self.source_to_detector_mm / self.pixel_spacing_mm
    }

    /// Source position in patient coordinates (opposite the detector).
    pub fn source_position(&self, angles: &ProjectionAngles) -> Vec3 {
        -angles.viewing_direction() * self.source_to_isocenter_mm
    }

    /// 3×4 camera matrix `K·[R | t]` mapping patient millimetres to pixels
    /// of a `width × height` detector image.
    pub fn projection_matrix(
        &self,
        angles: &ProjectionAngles,
        width: f64,
        height: f64,
    ) -> Matrix3x4<f64> {
        let f = self.focal_length_px();
        // rows grow downward in the image, camera Y points up
        let k = Mat3::new(f, 0.0, width / 2.0, 0.0, -f, height / 2.0, 0.0, 0.0, 1.0);
        let r = angles.rotation();
        let t = Vec3::new(0.0, 0.0, self.source_to_isocenter_mm);

        let mut rt = Matrix3x4::<f64>::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        rt.set_column(3, &t);
        k * rt
    }
}

/// Projects a patient-frame point through `p`.
pub fn project_point(p: &Matrix3x4<f64>, point: &Vec3) -> GeometryResult<Point2D> {
    let h = p * Vector4::new(point.x, point.y, point.z, 1.0);
    if h[2].abs() < 1e-12 {
        return Err(GeometryError::NonFiniteValue {
            context: "project_point (point on the source plane)",
        });
    }
    let projected = Point2D::new(h[0] / h[2], h[1] / h[2]);
    if !projected.is_finite() {
        return Err(GeometryError::NonFiniteValue {
            context: "project_point",
        });
    }
    Ok(projected)
}
