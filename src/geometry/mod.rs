//! Angiographic projection geometry.
//!
//! Every conversion between C-arm angles and 3D directions goes through this
//! module so that the composition order and sign conventions exist exactly
//! once.
//!
//! Patient frame:
//! - `+X` toward the patient's left (lateral axis)
//! - `+Y` toward the head (longitudinal axis, "up" in the image)
//! - `+Z` from the patient toward the detector in the neutral AP view
//!
//! A rotation matrix returned by [`angles_to_rotation`] maps patient
//! coordinates into the camera frame whose X axis is image right, Y axis is
//! image up and Z axis is the viewing direction.
pub mod carm;

pub use carm::CArmGeometry;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GeometryError, GeometryResult};
use crate::io::input::Point2D;
use crate::math::{normalize, Mat3, Vec3};

pub const RAO_LAO_LIMIT: f64 = 90.0;
pub const CRANIAL_CAUDAL_LIMIT: f64 = 45.0;

/// C-arm pose of one acquisition, in degrees.
///
/// Positive `rao_lao` is RAO, negative LAO. Positive `cranial_caudal` is
/// cranial, negative caudal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectionAngles {
    pub rao_lao: f64,
    pub cranial_caudal: f64,
}

impl ProjectionAngles {
    pub fn new(rao_lao: f64, cranial_caudal: f64) -> GeometryResult<Self> {
        check_range("rao_lao", rao_lao, RAO_LAO_LIMIT)?;
        check_range("cranial_caudal", cranial_caudal, CRANIAL_CAUDAL_LIMIT)?;
        Ok(Self {
            rao_lao,
            cranial_caudal,
        })
    }

    pub fn rotation(&self) -> Mat3 {
        angles_to_rotation(self.rao_lao, self.cranial_caudal)
    }

    pub fn viewing_direction(&self) -> Vec3 {
        viewing_direction(self.rao_lao, self.cranial_caudal)
    }
}

impl fmt::Display for ProjectionAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.rao_lao >= 0.0 { "RAO" } else { "LAO" };
        let tilt = if self.cranial_caudal >= 0.0 {
            "CRA"
        } else {
            "CAU"
        };
        write!(
            f,
            "{} {:.1}° / {} {:.1}°",
            side,
            self.rao_lao.abs(),
            tilt,
            self.cranial_caudal.abs()
        )
    }
}

fn check_range(name: &'static str, value: f64, limit: f64) -> GeometryResult<()> {
    if !value.is_finite() {
        return Err(GeometryError::NonFiniteValue { context: name });
    }
    if value < -limit || value > limit {
        return Err(GeometryError::AngleOutOfRange {
            name,
            value,
            min: -limit,
            max: limit,
        });
    }
    Ok(())
}

/// Rotation about the longitudinal axis.
fn rotation_rao_lao(angle_rad: f64) -> Mat3 {
    let (s, c) = angle_rad.sin_cos();
    Mat3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

/// Rotation about the lateral axis.
fn rotation_cranial(angle_rad: f64) -> Mat3 {
    let (s, c) = angle_rad.sin_cos();
    Mat3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c)
}

/// `R = R_cranial · R_raoLao`. The order is fixed; swapping it changes
/// every reconstructed direction.
pub fn angles_to_rotation(rao_lao_deg: f64, cranial_caudal_deg: f64) -> Mat3 {
    rotation_cranial(cranial_caudal_deg.to_radians()) * rotation_rao_lao(rao_lao_deg.to_radians())
}

/// Unit vector from the patient toward the detector, `Rᵀ·ẑ`.
pub fn viewing_direction(rao_lao_deg: f64, cranial_caudal_deg: f64) -> Vec3 {
    let (sr, cr) = rao_lao_deg.to_radians().sin_cos();
    let (sc, cc) = cranial_caudal_deg.to_radians().sin_cos();
    Vec3::new(-sr * cc, sc, cr * cc)
}

/// Maps a 3D direction back to the angle pair viewing along it.
///
/// Lossy: a normal pointing away from the detector is replaced by its
/// antipode (same viewing axis) and the cranial/caudal component is clamped
/// to ±45°.
///
/// Folding negates the whole normal, so the cranial/caudal sign flips along
/// with RAO/LAO. This is not the same as shifting RAO/LAO by 180° while
/// keeping `asin(ny)`.
pub fn normal_to_angles(normal: &Vec3) -> GeometryResult<ProjectionAngles> {
    let mut n = normalize(normal)?;
    let mut rao = (-n.x).atan2(n.z).to_degrees();
    if rao > RAO_LAO_LIMIT || rao < -RAO_LAO_LIMIT {
        n = -n;
        rao = (-n.x).atan2(n.z).to_degrees();
    }
    // n.z == 0 with n.x > 0 lands exactly on the boundary after folding
    let rao = rao.clamp(-RAO_LAO_LIMIT, RAO_LAO_LIMIT);
    let cranial = n
        .y
        .clamp(-1.0, 1.0)
        .asin()
        .to_degrees()
        .clamp(-CRANIAL_CAUDAL_LIMIT, CRANIAL_CAUDAL_LIMIT);

    Ok(ProjectionAngles {
        rao_lao: rao,
        cranial_caudal: cranial,
    })
}

/// Normalizes a pixel coordinate to `[-1, 1]²` with Y pointing up.
pub fn normalize_image_point(point: &Point2D, width: f64, height: f64) -> Point2D {
    Point2D {
        x: 2.0 * point.x / width - 1.0,
        y: 1.0 - 2.0 * point.y / height,
    }
}

/// World-space direction of the image segment `point1 → point2` as seen in
/// a projection with rotation `rotation`.
///
/// The direction lies in the image plane (orthogonal to the viewing
/// direction); depth is not recoverable from a single view.
pub fn image_direction_to_3d(
    point1: &Point2D,
    point2: &Point2D,
    width: f64,
    height: f64,
    rotation: &Mat3,
) -> GeometryResult<Vec3> {
    if width <= 0.0 || height <= 0.0 {
        return Err(GeometryError::InvalidInput(format!(
            "image size must be positive, got {}x{}",
            width, height
        )));
    }
    let a = normalize_image_point(point1, width, height);
    let b = normalize_image_point(point2, width, height);
    let d = Vec3::new(b.x - a.x, b.y - a.y, 0.0);
    if !d.iter().all(|v| v.is_finite()) {
        return Err(GeometryError::NonFiniteValue {
            context: "image_direction_to_3d",
        });
    }
    if d.norm() < 1e-12 {
        return Err(GeometryError::DegenerateSegment);
    }
    normalize(&(rotation.transpose() * d))
}
