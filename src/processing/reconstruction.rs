use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Fusion;
use crate::error::{GeometryError, GeometryResult};
use crate::geometry::{image_direction_to_3d, normal_to_angles, CArmGeometry, ProjectionAngles};
use crate::io::input::{Point2D, Vessel, VesselSet};
use crate::math::{cross, dot, normalize, triangulate_dlt, Vec3};

/// Cross products shorter than this mean the inputs are (anti)parallel.
const PARALLEL_EPS: f64 = 1e-6;

/// Vessel start/end points measured in one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewMeasurement {
    pub angles: ProjectionAngles,
    pub width: f64,
    pub height: f64,
    /// `[start, end]` per vessel, indexed by [`Vessel::index`].
    pub endpoints: [[Point2D; 2]; 3],
}

impl ViewMeasurement {
    /// Takes the first and last point of each segment, e.g. the anchored
    /// segments of a located bifurcation.
    pub fn from_segments(
        angles: ProjectionAngles,
        width: f64,
        height: f64,
        segments: &VesselSet,
    ) -> GeometryResult<Self> {
        let mut endpoints = [[Point2D::default(); 2]; 3];
        for (vessel, line) in segments.iter() {
            match (line.first(), line.last()) {
                (Some(a), Some(b)) if line.is_usable() => endpoints[vessel.index()] = [a, b],
                _ => {
                    return Err(GeometryError::InvalidInput(format!(
                        "{} segment needs at least 2 points, got {}",
                        vessel,
                        line.len()
                    )))
                }
            }
        }
        Ok(Self {
            angles,
            width,
            height,
            endpoints,
        })
    }

    /// Back-projected direction of `vessel`, orthogonal to this view's
    /// viewing direction.
    pub fn direction(&self, vessel: Vessel) -> GeometryResult<Vec3> {
        let [a, b] = self.endpoints[vessel.index()];
        image_direction_to_3d(&a, &b, self.width, self.height, &self.angles.rotation())
    }
}

/// Combines the single-view estimates of one vessel.
///
/// `Average` adds and renormalizes. `PlaneIntersection` intersects the two
/// planes each spanned by a view's image direction and viewing direction,
/// and orients the line to agree with the average.
pub fn fuse_directions(
    first: &Vec3,
    first_view: &Vec3,
    second: &Vec3,
    second_view: &Vec3,
    fusion: Fusion,
) -> GeometryResult<Vec3> {
    let average = normalize(&(first + second))?;
    match fusion {
        Fusion::Average => Ok(average),
        Fusion::PlaneIntersection => {
            let n1 = cross(first, first_view);
            let n2 = cross(second, second_view);
            let line = cross(&n1, &n2);
            if line.norm() < PARALLEL_EPS * n1.norm().max(1.0) * n2.norm().max(1.0) {
                // both views see the vessel inside the same plane
                return Err(GeometryError::ZeroMagnitude);
            }
            let line = normalize(&line)?;
            Ok(if dot(&line, &average) < 0.0 { -line } else { line })
        }
    }
}

/// 3D directions of main, branch1 and branch2 from two views.
pub fn reconstruct_vessel_directions(
    view1: &ViewMeasurement,
    view2: &ViewMeasurement,
    fusion: Fusion,
) -> GeometryResult<[Vec3; 3]> {
    let d1 = view1.angles.viewing_direction();
    let d2 = view2.angles.viewing_direction();
    let mut out = [Vec3::zeros(); 3];
    for vessel in Vessel::ALL {
        let a = view1.direction(vessel)?;
        let b = view2.direction(vessel)?;
        out[vessel.index()] = fuse_directions(&a, &d1, &b, &d2, fusion)?;
        debug!(
            %vessel,
            x = out[vessel.index()].x,
            y = out[vessel.index()].y,
            z = out[vessel.index()].z,
            "vessel direction"
        );
    }
    Ok(out)
}

/// Directions of the two branches only.
pub fn reconstruct_branch_directions(
    view1: &ViewMeasurement,
    view2: &ViewMeasurement,
    fusion: Fusion,
) -> GeometryResult<(Vec3, Vec3)> {
    let [_, b1, b2] = reconstruct_vessel_directions(view1, view2, fusion)?;
    Ok((b1, b2))
}

fn unit_cross(a: &Vec3, b: &Vec3) -> GeometryResult<Vec3> {
    let n = cross(a, b);
    if n.norm() < PARALLEL_EPS {
        return Err(GeometryError::ParallelVessels);
    }
    normalize(&n)
}

/// Bifurcation-plane normal referenced to the main vessel:
/// `(branch1 − main) × (branch2 − main)`.
pub fn bifurcation_plane_normal(
    main: &Vec3,
    branch1: &Vec3,
    branch2: &Vec3,
) -> GeometryResult<Vec3> {
    unit_cross(&(branch1 - main), &(branch2 - main))
}

/// Plane normal from two vessel directions directly.
pub fn plane_normal_from_pair(first: &Vec3, second: &Vec3) -> GeometryResult<Vec3> {
    unit_cross(first, second)
}

/// Viewing angles looking straight at the bifurcation plane.
pub fn recommend_from_plane_normal(normal: &Vec3) -> GeometryResult<ProjectionAngles> {
    normal_to_angles(normal)
}

/// 3D bifurcation point (patient mm) from its location in both views.
pub fn triangulate_bifurcation(
    carm: &CArmGeometry,
    view1: &ViewMeasurement,
    point1: &Point2D,
    view2: &ViewMeasurement,
    point2: &Point2D,
) -> GeometryResult<Vec3> {
    carm.validate()?;
    let p1 = carm.projection_matrix(&view1.angles, view1.width, view1.height);
    let p2 = carm.projection_matrix(&view2.angles, view2.width, view2.height);
    triangulate_dlt(&p1, point1, &p2, point2)
}

#[cfg(test)]
mod reconstruction_tests {
    use super::*;
    use crate::geometry::carm::project_point;
    use approx::assert_relative_eq;

    const SIZE: f64 = 512.0;

    /// Image endpoints an ideal parallel projection of `dir` would leave in
    /// a square image.
    fn observe(angles: ProjectionAngles, dirs: &[Vec3; 3]) -> ViewMeasurement {
        let r = angles.rotation();
        let center = Point2D::new(SIZE / 2.0, SIZE / 2.0);
        let endpoints = dirs.map(|d| {
            let c = r * d;
            [center, Point2D::new(center.x + 100.0 * c.x, center.y - 100.0 * c.y)]
        });
        ViewMeasurement {
            angles,
            width: SIZE,
            height: SIZE,
            endpoints,
        }
    }

    fn vessels() -> [Vec3; 3] {
        [
            Vec3::new(0.2, -0.9, 0.3).normalize(),
            Vec3::new(0.8, -0.3, 0.5).normalize(),
            Vec3::new(-0.6, -0.5, 0.6).normalize(),
        ]
    }

    #[test]
    fn test_plane_intersection_recovers_true_directions() {
        let truth = vessels();
        let v1 = observe(ProjectionAngles::new(30.0, 20.0).unwrap(), &truth);
        let v2 = observe(ProjectionAngles::new(-40.0, -10.0).unwrap(), &truth);

        let dirs = reconstruct_vessel_directions(&v1, &v2, Fusion::PlaneIntersection).unwrap();
        for (got, want) in dirs.iter().zip(truth.iter()) {
            assert_relative_eq!(got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_average_fusion_is_unit_and_close() {
        let truth = vessels();
        let v1 = observe(ProjectionAngles::new(20.0, 10.0).unwrap(), &truth);
        let v2 = observe(ProjectionAngles::new(-20.0, -10.0).unwrap(), &truth);

        let dirs = reconstruct_vessel_directions(&v1, &v2, Fusion::Average).unwrap();
        for (got, want) in dirs.iter().zip(truth.iter()) {
            assert_relative_eq!(got.norm(), 1.0, epsilon = 1e-12);
            assert!(dot(got, want) > 0.8);
        }
    }

    #[test]
    fn test_single_view_direction_is_orthogonal_to_view() {
        let truth = vessels();
        let angles = ProjectionAngles::new(25.0, -30.0).unwrap();
        let view = observe(angles, &truth);
        for vessel in Vessel::ALL {
            let d = view.direction(vessel).unwrap();
            assert_relative_eq!(dot(&d, &angles.viewing_direction()), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_branch_directions_match_full_reconstruction() {
        let truth = vessels();
        let v1 = observe(ProjectionAngles::new(30.0, 20.0).unwrap(), &truth);
        let v2 = observe(ProjectionAngles::new(-40.0, -10.0).unwrap(), &truth);
        let all = reconstruct_vessel_directions(&v1, &v2, Fusion::Average).unwrap();
        let (b1, b2) = reconstruct_branch_directions(&v1, &v2, Fusion::Average).unwrap();
        assert_eq!(b1, all[1]);
        assert_eq!(b2, all[2]);
    }

    #[test]
    fn test_plane_normals() {
        let main = Vec3::new(0.0, 1.0, 0.0);
        let b1 = Vec3::new(0.707, 0.707, 0.0);
        let b2 = Vec3::new(-0.707, 0.707, 0.0);
        let n = bifurcation_plane_normal(&main, &b1, &b2).unwrap();
        assert_relative_eq!(n.z.abs(), 1.0, epsilon = 1e-9);
        let n2 = plane_normal_from_pair(&b1, &b2).unwrap();
        assert_relative_eq!(n2.z.abs(), 1.0, epsilon = 1e-9);

        let angles = recommend_from_plane_normal(&n).unwrap();
        assert_relative_eq!(angles.rao_lao, 0.0, epsilon = 1e-9);
        assert_relative_eq!(angles.cranial_caudal, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_vessels_rejected() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(plane_normal_from_pair(&a, &(a * 2.0)), Err(GeometryError::ParallelVessels));
        assert_eq!(bifurcation_plane_normal(&a, &a, &a), Err(GeometryError::ParallelVessels));
    }

    #[test]
    fn test_identical_views_cannot_intersect_planes() {
        let truth = vessels();
        let angles = ProjectionAngles::new(10.0, 5.0).unwrap();
        let v = observe(angles, &truth);
        assert_eq!(
            reconstruct_vessel_directions(&v, &v, Fusion::PlaneIntersection),
            Err(GeometryError::ZeroMagnitude)
        );
    }

    #[test]
    fn test_triangulate_bifurcation_recovers_point() {
        let carm = CArmGeometry::default();
        let a1 = ProjectionAngles::new(30.0, 20.0).unwrap();
        let a2 = ProjectionAngles::new(-45.0, 0.0).unwrap();
        let truth = vessels();
        let v1 = observe(a1, &truth);
        let v2 = observe(a2, &truth);

        let x = Vec3::new(12.0, -30.0, 8.0);
        let p1 = project_point(&carm.projection_matrix(&a1, SIZE, SIZE), &x).unwrap();
        let p2 = project_point(&carm.projection_matrix(&a2, SIZE, SIZE), &x).unwrap();
        let got = triangulate_bifurcation(&carm, &v1, &p1, &v2, &p2).unwrap();
        assert_relative_eq!(got, x, epsilon = 1e-6);
    }

    #[test]
    fn test_from_segments_needs_two_points() {
        let good = crate::io::input::Centerline::from_points(&[
            Point2D::new(0.0, 0.0),
            Point2D::new(3.0, 4.0),
        ]);
        let short = crate::io::input::Centerline::from_points(&[Point2D::new(0.0, 0.0)]);
        let angles = ProjectionAngles::default();
        let set = VesselSet::new(good.clone(), good.clone(), good.clone());
        let view = ViewMeasurement::from_segments(angles, 64.0, 64.0, &set).unwrap();
        assert_eq!(view.endpoints[2], [Point2D::new(0.0, 0.0), Point2D::new(3.0, 4.0)]);

        let bad = VesselSet::new(good.clone(), short, good);
        assert!(ViewMeasurement::from_segments(angles, 64.0, 64.0, &bad).is_err());
    }
}
