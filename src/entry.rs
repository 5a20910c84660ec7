use anyhow::{anyhow, Context, Result};
use crossbeam::thread;
use image::RgbaImage;
use serde::Serialize;
use tracing::{info, warn};

use std::path::Path;

use crate::config::AnalysisConfig;
use crate::error::GeometryResult;
use crate::geometry::ProjectionAngles;
use crate::io::input::{read_image, read_seed_points, IntensityField, SeedPoints, Vessel, VesselSet};
use crate::io::output::{save_image, write_centerlines_csv, write_json};
use crate::io::{SessionManifest, ViewInput};
use crate::math::{Mat3, Vec3};
use crate::processing::bifurcation::{locate_bifurcation, BifurcationResult};
use crate::processing::centerline::{extract_centerline, sample_intensities};
use crate::processing::optimizer::{
    foreshortening_report, optimal_angles, ForeshorteningReport, OptimalAngles,
};
use crate::processing::perspective::{correct_perspective, PerspectiveCorrection};
use crate::processing::reconstruction::{
    bifurcation_plane_normal, plane_normal_from_pair, recommend_from_plane_normal,
    reconstruct_vessel_directions, triangulate_bifurcation, ViewMeasurement,
};

/// Everything derived from one acquisition.
#[derive(Debug, Clone)]
pub struct ViewAnalysis {
    pub angles: ProjectionAngles,
    /// Image the centerlines were tracked on (corrected when possible).
    pub image: RgbaImage,
    pub homography: Option<Mat3>,
    pub centerlines: VesselSet,
    pub bifurcation: BifurcationResult,
}

impl ViewAnalysis {
    pub fn width(&self) -> f64 {
        self.image.width() as f64
    }

    pub fn height(&self) -> f64 {
        self.image.height() as f64
    }

    pub fn measurement(&self) -> Result<ViewMeasurement> {
        Ok(ViewMeasurement::from_segments(
            self.angles,
            self.width(),
            self.height(),
            &self.bifurcation.adjusted_segments,
        )?)
    }
}

/// Perspective correction, centerline tracking and bifurcation location for
/// one image. Seeds are expected in the corrected image's pixel frame.
///
/// A failed perspective correction is logged and the original image is used
/// unchanged.
pub fn analyze_view(
    image: &RgbaImage,
    angles: ProjectionAngles,
    seeds: &SeedPoints,
    config: &AnalysisConfig,
) -> Result<ViewAnalysis> {
    config.validate()?;
    let correction = config
        .perspective
        .enabled
        .then(|| correct_perspective(image, &config.perspective));
    analyze_corrected(image, correction, angles, seeds, config)
}

/// Everything after perspective correction. `None` means correction was
/// skipped.
fn analyze_corrected(
    image: &RgbaImage,
    correction: Option<GeometryResult<PerspectiveCorrection>>,
    angles: ProjectionAngles,
    seeds: &SeedPoints,
    config: &AnalysisConfig,
) -> Result<ViewAnalysis> {
    let (working, homography) = match correction {
        Some(Ok(c)) => (c.image, Some(c.homography)),
        Some(Err(e)) => {
            warn!(error = %e, "perspective correction failed, using the original image");
            (image.clone(), None)
        }
        None => (image.clone(), None),
    };

    let field = IntensityField::from_rgba(&working, config.tracker.invert_intensity);
    let track = |vessel: Vessel| {
        extract_centerline(&field, seeds.get(vessel), &config.tracker)
            .with_context(|| format!("tracking the {} centerline", vessel))
    };
    let centerlines = VesselSet::new(
        track(Vessel::Main)?,
        track(Vessel::Branch1)?,
        track(Vessel::Branch2)?,
    );

    let mut bifurcation = locate_bifurcation(
        centerlines.main(),
        centerlines.branch1(),
        centerlines.branch2(),
        &config.locator,
    )
    .context("locating the bifurcation")?;
    let segments = &bifurcation.adjusted_segments;
    let sampled = VesselSet::new(
        sample_intensities(segments.main(), &field),
        sample_intensities(segments.branch1(), &field),
        sample_intensities(segments.branch2(), &field),
    );
    bifurcation.adjusted_segments = sampled;

    Ok(ViewAnalysis {
        angles,
        image: working,
        homography,
        centerlines,
        bifurcation,
    })
}

/// Two-view result: 3D directions, bifurcation plane and recommended views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionPlan {
    /// Unit directions of main, branch1 and branch2 in patient space.
    pub vessel_directions: [[f64; 3]; 3],
    pub plane_normal: Option<[f64; 3]>,
    /// View looking straight at the bifurcation plane.
    pub plane_view: Option<ProjectionAngles>,
    pub optimal: OptimalAngles,
    pub optimal_report: ForeshorteningReport,
    /// Foreshortening of the two acquisitions, for comparison.
    pub acquired_reports: [ForeshorteningReport; 2],
    /// Bifurcation point in patient mm.
    pub bifurcation_mm: Option<[f64; 3]>,
}

fn to_array(v: &Vec3) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn plane_normal(directions: &[Vec3; 3]) -> Option<Vec3> {
    let [main, b1, b2] = directions;
    match bifurcation_plane_normal(main, b1, b2).or_else(|_| plane_normal_from_pair(b1, b2)) {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "no bifurcation plane");
            None
        }
    }
}

pub fn plan_projection(
    view1: &ViewAnalysis,
    view2: &ViewAnalysis,
    config: &AnalysisConfig,
) -> Result<ProjectionPlan> {
    let m1 = view1.measurement().context("first view")?;
    let m2 = view2.measurement().context("second view")?;

    let directions = reconstruct_vessel_directions(&m1, &m2, config.reconstruction.fusion)
        .context("reconstructing 3D vessel directions")?;
    let normal = plane_normal(&directions);
    let plane_view = normal.as_ref().and_then(|n| recommend_from_plane_normal(n).ok());

    let optimal =
        optimal_angles(&directions, &config.optimizer).context("optimizing the projection")?;
    let main_weight = config.optimizer.main_weight;
    let optimal_report = foreshortening_report(&directions, &optimal.angles(), main_weight)?;
    let acquired_reports = [
        foreshortening_report(&directions, &view1.angles, main_weight)?,
        foreshortening_report(&directions, &view2.angles, main_weight)?,
    ];

    let bifurcation_mm = match triangulate_bifurcation(
        &config.carm,
        &m1,
        &view1.bifurcation.point,
        &m2,
        &view2.bifurcation.point,
    ) {
        Ok(p) => Some(to_array(&p)),
        Err(e) => {
            warn!(error = %e, "bifurcation point could not be triangulated");
            None
        }
    };

    info!(
        optimal = %optimal,
        plane_view = ?plane_view.map(|a| a.to_string()),
        "projection planned"
    );

    Ok(ProjectionPlan {
        vessel_directions: directions.map(|d| to_array(&d)),
        plane_normal: normal.map(|n| to_array(&n)),
        plane_view,
        optimal,
        optimal_report,
        acquired_reports,
        bifurcation_mm,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewSummary {
    pub label: String,
    pub angles: ProjectionAngles,
    pub perspective_corrected: bool,
    pub bifurcation: BifurcationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub views: Vec<ViewSummary>,
    pub plan: ProjectionPlan,
}

fn load_and_analyze(view: &ViewInput, config: &AnalysisConfig) -> Result<ViewAnalysis> {
    let image = read_image(&view.image)?;
    let seeds = read_seed_points(&view.seeds)?;
    analyze_view(&image, view.angles()?, &seeds, config)
        .with_context(|| format!("analyzing view '{}'", view.label))
}

fn write_view_outputs(dir: &Path, index: usize, analysis: &ViewAnalysis) -> Result<()> {
    let stem = format!("view{}", index + 1);
    save_image(dir.join(format!("{}_corrected.png", stem)), &analysis.image)?;
    write_centerlines_csv(dir.join(format!("{}_centerlines.csv", stem)), &analysis.centerlines)?;
    write_centerlines_csv(
        dir.join(format!("{}_segments.csv", stem)),
        &analysis.bifurcation.adjusted_segments,
    )
}

/// Runs a whole session from a manifest: both views are analysed in
/// parallel, then combined. Per-view images and centerlines plus
/// `report.json` are written to the manifest's output directory.
pub fn run_from_manifest<P: AsRef<Path>>(manifest_path: P) -> Result<SessionReport> {
    let manifest = SessionManifest::from_file(manifest_path)?;
    let config = match &manifest.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };
    let (first, second) = (&manifest.views[0], &manifest.views[1]);

    let (view1, view2) = thread::scope(|s| -> Result<(ViewAnalysis, ViewAnalysis)> {
        let h1 = s.spawn(|_| load_and_analyze(first, &config));
        let h2 = s.spawn(|_| load_and_analyze(second, &config));

        let v1 = h1
            .join()
            .map_err(|_| anyhow!("analysis thread for view '{}' panicked", first.label))??;
        let v2 = h2
            .join()
            .map_err(|_| anyhow!("analysis thread for view '{}' panicked", second.label))??;
        Ok((v1, v2))
    })
    .map_err(|panic_payload| anyhow!("view analysis panicked: {:?}", panic_payload))??;

    let plan = plan_projection(&view1, &view2, &config)?;

    std::fs::create_dir_all(&manifest.output_dir)
        .with_context(|| format!("creating {}", manifest.output_dir.display()))?;
    for (i, analysis) in [&view1, &view2].into_iter().enumerate() {
        write_view_outputs(&manifest.output_dir, i, analysis)?;
    }

    let report = SessionReport {
        views: [(first, &view1), (second, &view2)]
            .into_iter()
            .map(|(input, analysis)| ViewSummary {
                label: input.label.clone(),
                angles: analysis.angles,
                perspective_corrected: analysis.homography.is_some(),
                bifurcation: analysis.bifurcation.clone(),
            })
            .collect(),
        plan,
    };
    write_json(manifest.output_dir.join("report.json"), &report)?;
    info!(dir = %manifest.output_dir.display(), "session written");
    Ok(report)
}
