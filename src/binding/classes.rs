use pyo3::prelude::*;

use crate::entry::ProjectionPlan;
use crate::io::input::Centerline;
use crate::processing::bifurcation::BifurcationResult;
use crate::processing::optimizer::OptimalAngles;
use crate::processing::perspective::PerspectiveCorrection;

fn xy(line: &Centerline) -> Vec<(f64, f64)> {
    line.positions().map(|p| (p.x, p.y)).collect()
}

/// Python representation of a tracked centerline
///
/// Attributes:
///     points (list[tuple[float, float]]): Pixel coordinates in tracking order
///     intensities (list[float | None]): Intensity sampled at each point
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyCenterline {
    #[pyo3(get, set)]
    pub points: Vec<(f64, f64)>,
    #[pyo3(get, set)]
    pub intensities: Vec<Option<f64>>,
}

#[pymethods]
impl PyCenterline {
    #[new]
    #[pyo3(signature = (points, intensities = None))]
    fn new(points: Vec<(f64, f64)>, intensities: Option<Vec<Option<f64>>>) -> Self {
        let intensities = intensities.unwrap_or_else(|| vec![None; points.len()]);
        Self { points, intensities }
    }

    fn __len__(&self) -> usize {
        self.points.len()
    }

    fn __repr__(&self) -> String {
        format!("Centerline(n_points={})", self.points.len())
    }

    /// Polyline length in pixels.
    pub fn length(&self) -> f64 {
        Centerline::from(self).length()
    }
}

impl From<&Centerline> for PyCenterline {
    fn from(line: &Centerline) -> Self {
        Self {
            points: xy(line),
            intensities: line.points.iter().map(|p| p.intensity).collect(),
        }
    }
}

impl From<&PyCenterline> for Centerline {
    fn from(line: &PyCenterline) -> Self {
        let mut out = Centerline::from_points(
            &line
                .points
                .iter()
                .map(|&(x, y)| crate::io::input::Point2D::new(x, y))
                .collect::<Vec<_>>(),
        );
        for (p, i) in out.points.iter_mut().zip(line.intensities.iter()) {
            p.intensity = *i;
        }
        out
    }
}

/// Python representation of a located bifurcation
///
/// Attributes:
///     point (tuple[float, float]): Bifurcation point in pixels
///     method (str): "closest_approach", "intersection" or "centroid"
///     confidence (float): Score of the winning estimator in (0, 1]
///     main, branch1, branch2 (list[tuple[float, float]]): Short segments
///         starting at ``point`` and pointing along each vessel
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyBifurcationResult {
    #[pyo3(get)]
    pub point: (f64, f64),
    #[pyo3(get)]
    pub method: String,
    #[pyo3(get)]
    pub confidence: f64,
    #[pyo3(get)]
    pub main: Vec<(f64, f64)>,
    #[pyo3(get)]
    pub branch1: Vec<(f64, f64)>,
    #[pyo3(get)]
    pub branch2: Vec<(f64, f64)>,
}

#[pymethods]
impl PyBifurcationResult {
    fn __repr__(&self) -> String {
        format!(
            "Bifurcation(point=({:.2}, {:.2}), method={}, confidence={:.3})",
            self.point.0, self.point.1, self.method, self.confidence
        )
    }
}

impl From<&BifurcationResult> for PyBifurcationResult {
    fn from(r: &BifurcationResult) -> Self {
        Self {
            point: (r.point.x, r.point.y),
            method: r.method.to_string(),
            confidence: r.confidence,
            main: xy(r.adjusted_segments.main()),
            branch1: xy(r.adjusted_segments.branch1()),
            branch2: xy(r.adjusted_segments.branch2()),
        }
    }
}

/// Python representation of the recommended C-arm angles
///
/// Attributes:
///     rao_lao (float): Degrees, positive RAO, negative LAO
///     cranial_caudal (float): Degrees, positive cranial, negative caudal
///     score (float): Weighted visible vessel length (run-relative)
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyOptimalAngles {
    #[pyo3(get)]
    pub rao_lao: f64,
    #[pyo3(get)]
    pub cranial_caudal: f64,
    #[pyo3(get)]
    pub score: f64,
}

#[pymethods]
impl PyOptimalAngles {
    fn __repr__(&self) -> String {
        format!(
            "OptimalAngles(rao_lao={:.1}, cranial_caudal={:.1}, score={:.3})",
            self.rao_lao, self.cranial_caudal, self.score
        )
    }

    fn __str__(&self) -> String {
        OptimalAngles::from(self).to_string()
    }
}

impl From<&OptimalAngles> for PyOptimalAngles {
    fn from(a: &OptimalAngles) -> Self {
        Self {
            rao_lao: a.rao_lao,
            cranial_caudal: a.cranial_caudal,
            score: a.score,
        }
    }
}

impl From<&PyOptimalAngles> for OptimalAngles {
    fn from(a: &PyOptimalAngles) -> Self {
        Self {
            rao_lao: a.rao_lao,
            cranial_caudal: a.cranial_caudal,
            score: a.score,
        }
    }
}

#[pyclass]
#[derive(Debug, Clone)]
pub struct PyPerspectiveResult {
    /// Row-major 3×3 homography from the source to the corrected frame.
    #[pyo3(get)]
    pub homography: Vec<Vec<f64>>,
    /// Detected frame corners: top-left, top-right, bottom-left, bottom-right.
    #[pyo3(get)]
    pub corners: Vec<(f64, f64)>,
    #[pyo3(get)]
    pub used_fallback: bool,
}

#[pymethods]
impl PyPerspectiveResult {
    fn __repr__(&self) -> String {
        format!("PerspectiveResult(used_fallback={})", self.used_fallback)
    }
}

impl From<&PerspectiveCorrection> for PyPerspectiveResult {
    fn from(c: &PerspectiveCorrection) -> Self {
        Self {
            homography: (0..3)
                .map(|r| (0..3).map(|col| c.homography[(r, col)]).collect())
                .collect(),
            corners: c.corners.iter().map(|p| (p.x, p.y)).collect(),
            used_fallback: c.used_fallback,
        }
    }
}

/// Python representation of a two-view projection plan
///
/// Attributes:
///     optimal (PyOptimalAngles): Least-foreshortening view
///     plane_view (tuple[float, float] | None): View perpendicular to the
///         bifurcation plane
///     vessel_directions (list[tuple[float, float, float]]): Main, branch1
///         and branch2 directions in patient space
///     bifurcation_mm (tuple[float, float, float] | None): Triangulated
///         bifurcation point
#[pyclass]
#[derive(Debug, Clone)]
pub struct PyProjectionPlan {
    #[pyo3(get)]
    pub optimal: PyOptimalAngles,
    #[pyo3(get)]
    pub plane_view: Option<(f64, f64)>,
    #[pyo3(get)]
    pub vessel_directions: Vec<(f64, f64, f64)>,
    #[pyo3(get)]
    pub bifurcation_mm: Option<(f64, f64, f64)>,
}

#[pymethods]
impl PyProjectionPlan {
    fn __repr__(&self) -> String {
        format!("ProjectionPlan(optimal={})", self.optimal.__repr__())
    }
}

impl From<&ProjectionPlan> for PyProjectionPlan {
    fn from(p: &ProjectionPlan) -> Self {
        Self {
            optimal: PyOptimalAngles::from(&p.optimal),
            plane_view: p.plane_view.map(|a| (a.rao_lao, a.cranial_caudal)),
            vessel_directions: p.vessel_directions.iter().map(|d| (d[0], d[1], d[2])).collect(),
            bifurcation_mm: p.bifurcation_mm.map(|d| (d[0], d[1], d[2])),
        }
    }
}
