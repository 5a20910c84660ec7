pub mod bifurcation;
pub mod centerline;
pub mod optimizer;
pub mod perspective;
pub mod reconstruction;
pub mod volume;

pub use bifurcation::{locate_bifurcation, BifurcationMethod, BifurcationResult};
pub use centerline::extract_centerline;
pub use optimizer::{foreshortening_report, optimal_angles, ForeshorteningReport, OptimalAngles};
pub use perspective::{correct_perspective, PerspectiveCorrection};
pub use reconstruction::{
    bifurcation_plane_normal, plane_normal_from_pair, recommend_from_plane_normal,
    reconstruct_branch_directions, reconstruct_vessel_directions, triangulate_bifurcation,
    ViewMeasurement,
};
