use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use std::fmt;

use crate::config::{OptimizerConfig, Refinement};
use crate::error::{GeometryError, GeometryResult};
use crate::geometry::{viewing_direction, ProjectionAngles, CRANIAL_CAUDAL_LIMIT, RAO_LAO_LIMIT};
use crate::io::input::Vessel;
use crate::math::{dot, normalize, round1, Vec3};

/// Best viewing angles found for one set of vessel directions.
///
/// `score` is the weighted sum of visible fractions; it is only comparable
/// between angle pairs of the same run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimalAngles {
    pub rao_lao: f64,
    pub cranial_caudal: f64,
    pub score: f64,
}

impl OptimalAngles {
    pub fn angles(&self) -> ProjectionAngles {
        ProjectionAngles {
            rao_lao: self.rao_lao,
            cranial_caudal: self.cranial_caudal,
        }
    }
}

impl fmt::Display for OptimalAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (score {:.3})", self.angles(), self.score)
    }
}

/// Visible fraction of every vessel for one angle pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForeshorteningReport {
    pub angles: ProjectionAngles,
    /// `sin` of the angle between vessel and viewing direction, per
    /// [`Vessel::index`].
    pub visible_fraction: [f64; 3],
    pub weighted_score: f64,
}

impl ForeshorteningReport {
    pub fn fraction(&self, vessel: Vessel) -> f64 {
        self.visible_fraction[vessel.index()]
    }
}

/// Fraction of a vessel's true length visible along `view`:
/// `sqrt(1 - (v·d)²)` for unit vectors.
pub fn single_vessel_score(vessel: &Vec3, view: &Vec3) -> f64 {
    let c = dot(vessel, view);
    (1.0 - c * c).max(0.0).sqrt()
}

pub fn foreshortening_score(vessels: &[Vec3; 3], weights: &[f64; 3], view: &Vec3) -> f64 {
    vessels
        .iter()
        .zip(weights.iter())
        .map(|(v, w)| w * single_vessel_score(v, view))
        .sum()
}

fn weights(config: &OptimizerConfig) -> [f64; 3] {
    [config.main_weight, 1.0, 1.0]
}

fn unit_vessels(vessels: &[Vec3]) -> GeometryResult<[Vec3; 3]> {
    if vessels.len() != 3 {
        return Err(GeometryError::InvalidVesselCount { got: vessels.len() });
    }
    Ok([
        normalize(&vessels[0])?,
        normalize(&vessels[1])?,
        normalize(&vessels[2])?,
    ])
}

pub fn foreshortening_report(
    vessels: &[Vec3],
    angles: &ProjectionAngles,
    main_weight: f64,
) -> GeometryResult<ForeshorteningReport> {
    let units = unit_vessels(vessels)?;
    let view = angles.viewing_direction();
    let visible_fraction = units.map(|v| single_vessel_score(&v, &view));
    let weighted_score =
        main_weight * visible_fraction[0] + visible_fraction[1] + visible_fraction[2];
    Ok(ForeshorteningReport {
        angles: *angles,
        visible_fraction,
        weighted_score,
    })
}

fn clamp_angles(rao: f64, cranial: f64) -> (f64, f64) {
    (
        rao.clamp(-RAO_LAO_LIMIT, RAO_LAO_LIMIT),
        cranial.clamp(-CRANIAL_CAUDAL_LIMIT, CRANIAL_CAUDAL_LIMIT),
    )
}

/// Score at clamped angles, so refinement never leaves the valid range.
struct Objective {
    vessels: [Vec3; 3],
    weights: [f64; 3],
}

impl Objective {
    fn at(&self, rao: f64, cranial: f64) -> f64 {
        let (r, c) = clamp_angles(rao, cranial);
        foreshortening_score(&self.vessels, &self.weights, &viewing_direction(r, c))
    }
}

/// A scored grid cell; `index` orders cells the way a row-major scan
/// visits them.
#[derive(Debug, Clone, Copy)]
struct Cell {
    index: usize,
    rao: f64,
    cranial: f64,
    score: f64,
}

/// Higher score wins; equal scores keep the cell seen first.
fn better(a: Cell, b: Cell) -> Cell {
    if b.score > a.score || (b.score == a.score && b.index < a.index) {
        b
    } else {
        a
    }
}

fn axis(limit: f64, step: f64) -> Vec<f64> {
    let n = (2.0 * limit / step).floor() as usize;
    (0..=n).map(|i| (-limit + i as f64 * step).min(limit)).collect()
}

fn grid_search(objective: &Objective, config: &OptimizerConfig) -> Option<Cell> {
    let raos = axis(RAO_LAO_LIMIT, config.grid_step);
    let cranials = axis(CRANIAL_CAUDAL_LIMIT, config.grid_step);
    let cols = cranials.len();
    let total = raos.len() * cols;
    debug!(cells = total, step = config.grid_step, "angle grid search");

    let cell = |index: usize| {
        let rao = raos[index / cols];
        let cranial = cranials[index % cols];
        Cell {
            index,
            rao,
            cranial,
            score: objective.at(rao, cranial),
        }
    };

    if config.parallel {
        (0..total).into_par_iter().map(cell).reduce_with(better)
    } else {
        (0..total).map(cell).reduce(better)
    }
}

fn hill_climb(
    objective: &Objective,
    start: (f64, f64),
    config: &OptimizerConfig,
) -> (f64, f64, f64) {
    let (mut rao, mut cranial) = start;
    let mut best = objective.at(rao, cranial);
    let mut step = config.grid_step / 2.0;

    for _ in 0..config.max_iterations {
        if step < config.min_step {
            break;
        }
        let moves = [(step, 0.0), (-step, 0.0), (0.0, step), (0.0, -step)];
        let next = moves
            .iter()
            .map(|(dr, dc)| clamp_angles(rao + dr, cranial + dc))
            .map(|(r, c)| (r, c, objective.at(r, c)))
            .fold(None, |acc: Option<(f64, f64, f64)>, cand| match acc {
                Some(a) if a.2 >= cand.2 => Some(a),
                _ => Some(cand),
            });
        match next {
            Some((r, c, s)) if s > best => {
                rao = r;
                cranial = c;
                best = s;
            }
            _ => step /= 2.0,
        }
    }
    (rao, cranial, best)
}

fn gradient_ascent(
    objective: &Objective,
    start: (f64, f64),
    config: &OptimizerConfig,
) -> (f64, f64, f64) {
    let (mut rao, mut cranial) = start;
    let mut current = objective.at(rao, cranial);
    let mut rate = config.learning_rate;
    let h = config.gradient_delta;

    for _ in 0..config.max_iterations {
        let g_rao = (objective.at(rao + h, cranial) - objective.at(rao - h, cranial)) / (2.0 * h);
        let g_cra = (objective.at(rao, cranial + h) - objective.at(rao, cranial - h)) / (2.0 * h);
        if g_rao.hypot(g_cra) < 1e-12 {
            break;
        }
        let (r, c) = clamp_angles(rao + rate * g_rao, cranial + rate * g_cra);
        let score = objective.at(r, c);
        if score <= current {
            // overshot
            rate *= 0.5;
            continue;
        }
        let gain = score - current;
        rao = r;
        cranial = c;
        current = score;
        if gain < config.tolerance {
            break;
        }
    }
    (rao, cranial, current)
}

/// Searches the C-arm angle range for the view that shows the three vessels
/// (main, branch1, branch2) with the least foreshortening.
///
/// Coarse grid first, then local refinement clamped to the valid range.
/// Results are identical whether or not the grid runs in parallel.
pub fn optimal_angles(vessels: &[Vec3], config: &OptimizerConfig) -> GeometryResult<OptimalAngles> {
    config.validate()?;
    let objective = Objective {
        vessels: unit_vessels(vessels)?,
        weights: weights(config),
    };

    let coarse = grid_search(&objective, config).ok_or_else(|| {
        GeometryError::InvalidInput("angle grid is empty".to_string())
    })?;
    debug!(
        rao_lao = coarse.rao,
        cranial_caudal = coarse.cranial,
        score = coarse.score,
        "coarse optimum"
    );

    let start = (coarse.rao, coarse.cranial);
    let (rao, cranial, _) = match config.refinement {
        Refinement::HillClimb => hill_climb(&objective, start, config),
        Refinement::GradientAscent => gradient_ascent(&objective, start, config),
    };

    let (rao, cranial) = clamp_angles(round1(rao), round1(cranial));
    let score = objective.at(rao, cranial);
    if !score.is_finite() {
        return Err(GeometryError::NonFiniteValue {
            context: "optimal_angles score",
        });
    }
    let result = OptimalAngles {
        rao_lao: rao,
        cranial_caudal: cranial,
        score,
    };
    info!(%result, "optimal projection");
    Ok(result)
}
