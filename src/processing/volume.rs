//! CT volume as an additional centerline source.
//!
//! Voxel axes `(i, j, k)` are column, row and slice. They map onto the
//! patient frame as `X = i·sx`, `Z = -j·sy` (rows run posterior) and
//! `Y = k·sz` (slices run toward the head), offset by `origin`.

use tracing::{debug, warn};

use std::collections::{BTreeMap, VecDeque};

use crate::config::VolumeConfig;
use crate::error::{GeometryError, GeometryResult};
use crate::geometry::carm::project_point;
use crate::geometry::{CArmGeometry, ProjectionAngles};
use crate::io::input::{Centerline, Point2D};
use crate::math::{normalize, Vec3};

pub type Voxel = [usize; 3];

static NEIGHBOUR_OFFSETS: [[i64; 3]; 6] = [
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
];

#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub dims: [usize; 3],
    /// Voxel size in mm along `(i, j, k)`.
    pub spacing: [f64; 3],
    /// Patient position of voxel `(0, 0, 0)` in mm.
    pub origin: Vec3,
    pub data: Vec<f32>,
}

impl Volume {
    pub fn new(
        dims: [usize; 3],
        spacing: [f64; 3],
        origin: Vec3,
        data: Vec<f32>,
    ) -> GeometryResult<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if expected == 0 || data.len() != expected {
            return Err(GeometryError::InvalidInput(format!(
                "volume of {:?} voxels needs {} samples, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GeometryError::InvalidInput(format!(
                "voxel spacing must be positive, got {:?}",
                spacing
            )));
        }
        if !origin.iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFiniteValue {
                context: "volume origin",
            });
        }
        Ok(Self {
            dims,
            spacing,
            origin,
            data,
        })
    }

    fn index(&self, v: &Voxel) -> usize {
        v[0] + self.dims[0] * (v[1] + self.dims[1] * v[2])
    }

    pub fn contains(&self, v: &Voxel) -> bool {
        v[0] < self.dims[0] && v[1] < self.dims[1] && v[2] < self.dims[2]
    }

    pub fn get(&self, v: &Voxel) -> Option<f32> {
        if self.contains(v) {
            Some(self.data[self.index(v)])
        } else {
            None
        }
    }

    /// Patient coordinates (mm) of a possibly fractional voxel position.
    pub fn to_patient(&self, i: f64, j: f64, k: f64) -> Vec3 {
        self.origin
            + Vec3::new(
                i * self.spacing[0],
                k * self.spacing[2],
                -j * self.spacing[1],
            )
    }

    fn neighbours(&self, v: &Voxel) -> impl Iterator<Item = Voxel> + '_ {
        let v = *v;
        NEIGHBOUR_OFFSETS.iter().filter_map(move |o| {
            let n = [
                v[0] as i64 + o[0],
                v[1] as i64 + o[1],
                v[2] as i64 + o[2],
            ];
            if n.iter().any(|c| *c < 0) {
                return None;
            }
            let n = [n[0] as usize, n[1] as usize, n[2] as usize];
            self.contains(&n).then_some(n)
        })
    }
}

/// 6-connected flood fill from `seed` over voxels within
/// `[lower_threshold, upper_threshold]`. Stops once `max_voxels` have been
/// collected.
pub fn region_grow(
    volume: &Volume,
    seed: Voxel,
    config: &VolumeConfig,
) -> GeometryResult<Vec<Voxel>> {
    config.validate()?;
    let inside = |value: f32| value >= config.lower_threshold && value <= config.upper_threshold;

    match volume.get(&seed) {
        None => {
            return Err(GeometryError::InvalidInput(format!(
                "seed {:?} lies outside a volume of {:?}",
                seed, volume.dims
            )))
        }
        Some(value) if !inside(value) => {
            return Err(GeometryError::InvalidInput(format!(
                "seed intensity {} is outside [{}, {}]",
                value, config.lower_threshold, config.upper_threshold
            )))
        }
        Some(_) => {}
    }

    let mut visited = vec![false; volume.data.len()];
    let mut queue = VecDeque::from([seed]);
    visited[volume.index(&seed)] = true;
    let mut region = Vec::new();

    while let Some(v) = queue.pop_front() {
        region.push(v);
        if region.len() >= config.max_voxels {
            warn!(cap = config.max_voxels, "region growing stopped at the voxel cap");
            break;
        }
        for n in volume.neighbours(&v) {
            let idx = volume.index(&n);
            if !visited[idx] && inside(volume.data[idx]) {
                visited[idx] = true;
                queue.push_back(n);
            }
        }
    }
    debug!(voxels = region.len(), "region grown");
    Ok(region)
}

/// Centroid of the region in every slice it touches, ordered by slice, in
/// patient mm.
pub fn slice_centerline(volume: &Volume, region: &[Voxel]) -> GeometryResult<Vec<Vec3>> {
    let mut slices: BTreeMap<usize, (f64, f64, usize)> = BTreeMap::new();
    for v in region {
        let entry = slices.entry(v[2]).or_insert((0.0, 0.0, 0));
        entry.0 += v[0] as f64;
        entry.1 += v[1] as f64;
        entry.2 += 1;
    }
    if slices.len() < 2 {
        return Err(GeometryError::InvalidInput(format!(
            "region spans {} slice(s), a centerline needs at least 2",
            slices.len()
        )));
    }
    Ok(slices
        .into_iter()
        .map(|(k, (si, sj, n))| volume.to_patient(si / n as f64, sj / n as f64, k as f64))
        .collect())
}

/// Unit direction from the first to the last centerline point.
pub fn centerline_direction(points: &[Vec3]) -> GeometryResult<Vec3> {
    match (points.first(), points.last()) {
        (Some(a), Some(b)) if points.len() >= 2 => normalize(&(b - a)),
        _ => Err(GeometryError::InvalidInput(format!(
            "direction needs at least 2 points, got {}",
            points.len()
        ))),
    }
}

/// Projects a 3D centerline into the given view, yielding pixel coordinates
/// of a `width × height` image.
pub fn project_centerline(
    points: &[Vec3],
    carm: &CArmGeometry,
    angles: &ProjectionAngles,
    width: f64,
    height: f64,
) -> GeometryResult<Centerline> {
    carm.validate()?;
    let p = carm.projection_matrix(angles, width, height);
    let projected = points
        .iter()
        .map(|x| project_point(&p, x))
        .collect::<GeometryResult<Vec<Point2D>>>()?;
    Ok(Centerline::from_points(&projected))
}

/// Vessel segmented from a CT volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeVessel {
    pub voxel_count: usize,
    pub points_mm: Vec<Vec3>,
    pub direction: Vec3,
}

pub fn extract_vessel(
    volume: &Volume,
    seed: Voxel,
    config: &VolumeConfig,
) -> GeometryResult<VolumeVessel> {
    let region = region_grow(volume, seed, config)?;
    let points_mm = slice_centerline(volume, &region)?;
    let direction = centerline_direction(&points_mm)?;
    Ok(VolumeVessel {
        voxel_count: region.len(),
        points_mm,
        direction,
    })
}
