pub mod classes;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use serde::de::DeserializeOwned;

use crate::config::{AnalysisConfig, Fusion, Refinement};
use crate::entry::run_from_manifest;
use crate::error::GeometryError;
use crate::geometry::{self, ProjectionAngles};
use crate::io::input::{read_image, Centerline, IntensityField, Point2D, VesselSet};
use crate::io::output::save_image;
use crate::math::Vec3;
use crate::processing;
use crate::processing::reconstruction::{
    bifurcation_plane_normal, reconstruct_vessel_directions, recommend_from_plane_normal,
    ViewMeasurement,
};
use crate::processing::volume::{extract_vessel, Volume};
use classes::{
    PyBifurcationResult, PyCenterline, PyOptimalAngles, PyPerspectiveResult, PyProjectionPlan,
};

impl From<GeometryError> for PyErr {
    fn from(e: GeometryError) -> Self {
        PyValueError::new_err(e.to_string())
    }
}

fn runtime_err(e: anyhow::Error) -> PyErr {
    PyRuntimeError::new_err(format!("{:#}", e))
}

fn load_config(config_path: Option<&str>) -> PyResult<AnalysisConfig> {
    match config_path {
        Some(path) => AnalysisConfig::from_toml_file(path).map_err(runtime_err),
        None => Ok(AnalysisConfig::default()),
    }
}

/// Parses a snake_case option string such as "plane_intersection".
fn parse_choice<T: DeserializeOwned>(what: &str, value: &str) -> PyResult<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| PyValueError::new_err(format!("unknown {} '{}'", what, value)))
}

fn to_tuple(v: &Vec3) -> (f64, f64, f64) {
    (v.x, v.y, v.z)
}

/// Runs a complete two-view session described by a JSON manifest.
///
/// Both views are analysed in parallel, then the 3D vessel directions are
/// reconstructed and the least-foreshortening C-arm angles computed.
/// Corrected images, centerline CSVs and ``report.json`` are written to the
/// manifest's ``output_dir``.
///
/// Manifest format:
///
/// .. code-block:: json
///
///    {
///      "views": [
///        {"label": "lao", "image": "view1.png", "seeds": "view1.csv",
///         "rao_lao": -30.0, "cranial_caudal": 20.0},
///        {"label": "rao", "image": "view2.png", "seeds": "view2.csv",
///         "rao_lao": 30.0, "cranial_caudal": -15.0}
///      ],
///      "output_dir": "out",
///      "config": "analysis.toml"
///    }
///
/// Returns:
///
/// A ``PyProjectionPlan``.
///
/// Example:
///
/// .. code-block:: python
///
///    import bifurcars as bf
///    plan = bf.run_session("data/session.json")
///    print(plan.optimal)
#[pyfunction]
#[pyo3(name = "run_session", signature = (manifest_path))]
pub fn run_session_py(manifest_path: &str) -> PyResult<PyProjectionPlan> {
    let report = run_from_manifest(manifest_path).map_err(runtime_err)?;
    Ok(PyProjectionPlan::from(&report.plan))
}

/// Detects the fluoroscopy frame corners of an image and warps it onto the
/// full image rectangle.
///
/// Missing corners fall back to the image corners (``used_fallback`` is then
/// ``True``). When ``output_path`` is given the corrected image is saved
/// there.
#[pyfunction]
#[pyo3(
    name = "correct_perspective",
    signature = (image_path, output_path = None, config_path = None)
)]
pub fn correct_perspective_py(
    image_path: &str,
    output_path: Option<&str>,
    config_path: Option<&str>,
) -> PyResult<PyPerspectiveResult> {
    let config = load_config(config_path)?;
    let image = read_image(image_path).map_err(runtime_err)?;
    let correction = processing::correct_perspective(&image, &config.perspective)?;
    if let Some(path) = output_path {
        save_image(path, &correction.image).map_err(runtime_err)?;
    }
    Ok(PyPerspectiveResult::from(&correction))
}

/// Tracks one vessel centerline through ordered seed points.
///
/// Arguments:
///
/// - ``image_path`` – Angiogram (dark vessels on bright background)
/// - ``seeds`` – At least two ``(x, y)`` pixel positions along the vessel
/// - ``search_radius`` (default: config value, 5.0)
/// - ``config_path`` – Optional TOML with a ``[tracker]`` table
#[pyfunction]
#[pyo3(
    name = "extract_centerline",
    signature = (image_path, seeds, search_radius = None, config_path = None)
)]
pub fn extract_centerline_py(
    image_path: &str,
    seeds: Vec<(f64, f64)>,
    search_radius: Option<f64>,
    config_path: Option<&str>,
) -> PyResult<PyCenterline> {
    let mut config = load_config(config_path)?.tracker;
    if let Some(radius) = search_radius {
        config.search_radius = radius;
    }
    config.validate()?;

    let image = read_image(image_path).map_err(runtime_err)?;
    let field = IntensityField::from_rgba(&image, config.invert_intensity);
    let seeds: Vec<Point2D> = seeds.into_iter().map(|(x, y)| Point2D::new(x, y)).collect();
    let line = processing::extract_centerline(&field, &seeds, &config)?;
    Ok(PyCenterline::from(&line))
}

#[pyfunction]
#[pyo3(name = "locate_bifurcation", signature = (main, branch1, branch2, segment_length = 25.0))]
pub fn locate_bifurcation_py(
    main: PyRef<'_, PyCenterline>,
    branch1: PyRef<'_, PyCenterline>,
    branch2: PyRef<'_, PyCenterline>,
    segment_length: f64,
) -> PyResult<PyBifurcationResult> {
    let mut config = AnalysisConfig::default().locator;
    config.segment_length = segment_length;
    config.validate()?;
    let result = processing::locate_bifurcation(
        &Centerline::from(&*main),
        &Centerline::from(&*branch1),
        &Centerline::from(&*branch2),
        &config,
    )?;
    Ok(PyBifurcationResult::from(&result))
}

fn measurement(
    bifurcation: &PyBifurcationResult,
    angles: (f64, f64),
    size: (f64, f64),
) -> PyResult<ViewMeasurement> {
    let line = |pts: &[(f64, f64)]| {
        Centerline::from_points(&pts.iter().map(|&(x, y)| Point2D::new(x, y)).collect::<Vec<_>>())
    };
    let segments = VesselSet::new(
        line(&bifurcation.main),
        line(&bifurcation.branch1),
        line(&bifurcation.branch2),
    );
    Ok(ViewMeasurement::from_segments(
        ProjectionAngles::new(angles.0, angles.1)?,
        size.0,
        size.1,
        &segments,
    )?)
}

/// Reconstructs the 3D directions of main, branch1 and branch2 from the
/// bifurcations located in two views.
///
/// ``angles`` are ``(rao_lao, cranial_caudal)`` in degrees, ``size`` is the
/// ``(width, height)`` of the analysed image. ``fusion`` is ``"average"`` or
/// ``"plane_intersection"``.
#[pyfunction]
#[pyo3(
    name = "reconstruct_directions",
    signature = (view1, angles1, size1, view2, angles2, size2, fusion = "average")
)]
pub fn reconstruct_directions_py(
    view1: PyRef<'_, PyBifurcationResult>,
    angles1: (f64, f64),
    size1: (f64, f64),
    view2: PyRef<'_, PyBifurcationResult>,
    angles2: (f64, f64),
    size2: (f64, f64),
    fusion: &str,
) -> PyResult<Vec<(f64, f64, f64)>> {
    let fusion: Fusion = parse_choice("fusion", fusion)?;
    let m1 = measurement(&view1, angles1, size1)?;
    let m2 = measurement(&view2, angles2, size2)?;
    let dirs = reconstruct_vessel_directions(&m1, &m2, fusion)?;
    Ok(dirs.iter().map(to_tuple).collect())
}

/// Angles viewing perpendicular to the plane of a bifurcation.
#[pyfunction]
#[pyo3(name = "bifurcation_plane_view")]
pub fn bifurcation_plane_view_py(
    main: (f64, f64, f64),
    branch1: (f64, f64, f64),
    branch2: (f64, f64, f64),
) -> PyResult<(f64, f64)> {
    let v = |t: (f64, f64, f64)| Vec3::new(t.0, t.1, t.2);
    let normal = bifurcation_plane_normal(&v(main), &v(branch1), &v(branch2))?;
    let angles = recommend_from_plane_normal(&normal)?;
    Ok((angles.rao_lao, angles.cranial_caudal))
}

/// Least-foreshortening C-arm angles for three 3D vessel directions.
///
/// The main vessel (first entry) is weighted by ``main_weight``. The grid
/// covers RAO/LAO ±90° and cranial/caudal ±45°; ``refinement`` is
/// ``"hill_climb"`` or ``"gradient_ascent"``.
///
/// Example:
///
/// .. code-block:: python
///
///    best = bf.optimal_angles([(0, -1, 0), (0.7, 0.6, 0), (-0.7, 0.6, 0)])
///    best.rao_lao, best.cranial_caudal
#[pyfunction]
#[pyo3(
    name = "optimal_angles",
    signature = (directions, main_weight = 1.5, grid_step = 2.0, refinement = "hill_climb")
)]
pub fn optimal_angles_py(
    directions: Vec<(f64, f64, f64)>,
    main_weight: f64,
    grid_step: f64,
    refinement: &str,
) -> PyResult<PyOptimalAngles> {
    let mut config = AnalysisConfig::default().optimizer;
    config.main_weight = main_weight;
    config.grid_step = grid_step;
    config.refinement = parse_choice::<Refinement>("refinement", refinement)?;
    config.validate()?;

    let vessels: Vec<Vec3> = directions.iter().map(|d| Vec3::new(d.0, d.1, d.2)).collect();
    let best = processing::optimal_angles(&vessels, &config)?;
    Ok(PyOptimalAngles::from(&best))
}

/// Row-major rotation matrix ``R = R_cranial · R_raoLao``.
#[pyfunction]
#[pyo3(name = "angles_to_rotation")]
pub fn angles_to_rotation_py(rao_lao: f64, cranial_caudal: f64) -> [[f64; 3]; 3] {
    let r = geometry::angles_to_rotation(rao_lao, cranial_caudal);
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = r[(i, j)];
        }
    }
    out
}

#[pyfunction]
#[pyo3(name = "viewing_direction")]
pub fn viewing_direction_py(rao_lao: f64, cranial_caudal: f64) -> (f64, f64, f64) {
    to_tuple(&geometry::viewing_direction(rao_lao, cranial_caudal))
}

#[pyfunction]
#[pyo3(name = "normal_to_angles")]
pub fn normal_to_angles_py(normal: (f64, f64, f64)) -> PyResult<(f64, f64)> {
    let angles = geometry::normal_to_angles(&Vec3::new(normal.0, normal.1, normal.2))?;
    Ok((angles.rao_lao, angles.cranial_caudal))
}

/// Segments a vessel from a CT volume by region growing from ``seed`` and
/// returns its slice-wise centerline (mm) with the principal direction.
///
/// ``data`` is x-fastest, then y, then slice; ``dims``, ``spacing`` and
/// ``seed`` are ``(x, y, slice)``.
#[pyfunction]
#[pyo3(
    name = "vessel_from_volume",
    signature = (
        dims,
        spacing,
        origin,
        data,
        seed,
        lower_threshold = 200.0f32,
        upper_threshold = 1000.0f32,
    )
)]
pub fn vessel_from_volume_py(
    dims: (usize, usize, usize),
    spacing: (f64, f64, f64),
    origin: (f64, f64, f64),
    data: Vec<f32>,
    seed: (usize, usize, usize),
    lower_threshold: f32,
    upper_threshold: f32,
) -> PyResult<(Vec<(f64, f64, f64)>, (f64, f64, f64))> {
    let mut config = AnalysisConfig::default().volume;
    config.lower_threshold = lower_threshold;
    config.upper_threshold = upper_threshold;
    config.validate()?;

    let volume = Volume::new(
        [dims.0, dims.1, dims.2],
        [spacing.0, spacing.1, spacing.2],
        Vec3::new(origin.0, origin.1, origin.2),
        data,
    )?;
    let vessel = extract_vessel(&volume, [seed.0, seed.1, seed.2], &config)?;
    Ok((
        vessel.points_mm.iter().map(to_tuple).collect(),
        to_tuple(&vessel.direction),
    ))
}
