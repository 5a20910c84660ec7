pub mod config;
pub mod entry;
pub mod error;
pub mod geometry;
pub mod io;
pub mod math;
pub mod processing;

mod binding;
mod utils;

use binding::classes::{
    PyBifurcationResult, PyCenterline, PyOptimalAngles, PyPerspectiveResult, PyProjectionPlan,
};
use binding::*;
use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

/// This is the module importable from Python:
///
/// ```python
/// import bifurcars as bf
/// plan = bf.run_session("data/session.json")
/// plan.optimal.rao_lao, plan.optimal.cranial_caudal
/// ```
#[pymodule]
fn bifurcars(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    m.add_function(wrap_pyfunction!(run_session_py, m)?)?;
    m.add_function(wrap_pyfunction!(correct_perspective_py, m)?)?;
    m.add_function(wrap_pyfunction!(extract_centerline_py, m)?)?;
    m.add_function(wrap_pyfunction!(locate_bifurcation_py, m)?)?;
    m.add_function(wrap_pyfunction!(reconstruct_directions_py, m)?)?;
    m.add_function(wrap_pyfunction!(bifurcation_plane_view_py, m)?)?;
    m.add_function(wrap_pyfunction!(optimal_angles_py, m)?)?;
    m.add_function(wrap_pyfunction!(angles_to_rotation_py, m)?)?;
    m.add_function(wrap_pyfunction!(viewing_direction_py, m)?)?;
    m.add_function(wrap_pyfunction!(normal_to_angles_py, m)?)?;
    m.add_function(wrap_pyfunction!(vessel_from_volume_py, m)?)?;

    m.add_class::<PyCenterline>()?;
    m.add_class::<PyBifurcationResult>()?;
    m.add_class::<PyOptimalAngles>()?;
    m.add_class::<PyPerspectiveResult>()?;
    m.add_class::<PyProjectionPlan>()?;
    Ok(())
}
