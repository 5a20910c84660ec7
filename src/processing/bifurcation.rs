use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use std::fmt;

use crate::config::LocatorConfig;
use crate::error::{GeometryError, GeometryResult};
use crate::io::input::{Centerline, Point2D, Vessel, VesselSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BifurcationMethod {
    ClosestApproach,
    Intersection,
    Centroid,
}

impl fmt::Display for BifurcationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BifurcationMethod::ClosestApproach => "closest_approach",
            BifurcationMethod::Intersection => "intersection",
            BifurcationMethod::Centroid => "centroid",
        };
        write!(f, "{}", name)
    }
}

/// One estimator's proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub point: Point2D,
    pub method: BifurcationMethod,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifurcationResult {
    pub point: Point2D,
    pub method: BifurcationMethod,
    /// Score of the winning estimator, in `(0, 1]`.
    pub confidence: f64,
    /// Short segments starting exactly at `point`, one per vessel.
    pub adjusted_segments: VesselSet,
}

/// `1/(1+max) · 1/(1+total)`: rewards distances that are low and balanced.
pub fn distance_score(distances: &[f64]) -> f64 {
    let max = distances.iter().copied().fold(0.0, f64::max);
    let total: f64 = distances.iter().sum();
    1.0 / (1.0 + max) / (1.0 + total)
}

/// Closest point on segment `a → b` to `p`.
pub fn project_onto_segment(p: &Point2D, a: &Point2D, b: &Point2D) -> Point2D {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 < 1e-12 {
        return *a;
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    Point2D::new(a.x + t * dx, a.y + t * dy)
}

/// Closest point on the polyline and its distance to `p`.
pub fn closest_point_on_polyline(p: &Point2D, line: &Centerline) -> Option<(Point2D, f64)> {
    if line.len() == 1 {
        let q = line.points[0].point;
        return Some((q, p.distance_to(&q)));
    }
    line.points
        .windows(2)
        .map(|w| {
            let q = project_onto_segment(p, &w[0].point, &w[1].point);
            (q, p.distance_to(&q))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn closest_approach(lines: &[&Centerline; 3]) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for (i, line) in lines.iter().enumerate() {
        let others = [lines[(i + 1) % 3], lines[(i + 2) % 3]];
        for p in line.positions() {
            let (q1, d1) = closest_point_on_polyline(&p, others[0])?;
            let (q2, d2) = closest_point_on_polyline(&p, others[1])?;
            let score = distance_score(&[d1, d2]);
            if best.map_or(true, |b| score > b.score) {
                best = Some(Candidate {
                    point: Point2D::new((p.x + q1.x + q2.x) / 3.0, (p.y + q1.y + q2.y) / 3.0),
                    method: BifurcationMethod::ClosestApproach,
                    score,
                });
            }
        }
    }
    best
}

/// Infinite line through `a` and `b` as `(point, direction)`.
fn chord(line: &Centerline) -> Option<(Point2D, Point2D)> {
    let a = line.first()?;
    let b = line.last()?;
    let d = Point2D::new(b.x - a.x, b.y - a.y);
    if d.x.hypot(d.y) < 1e-9 {
        return None;
    }
    Some((a, d))
}

fn line_intersection(l1: &(Point2D, Point2D), l2: &(Point2D, Point2D)) -> Option<Point2D> {
    let (p, r) = l1;
    let (q, s) = l2;
    let det = r.x * s.y - r.y * s.x;
    if det.abs() < 1e-10 {
        return None;
    }
    let t = ((q.x - p.x) * s.y - (q.y - p.y) * s.x) / det;
    Some(Point2D::new(p.x + t * r.x, p.y + t * r.y))
}

fn distance_to_line(p: &Point2D, line: &(Point2D, Point2D)) -> f64 {
    let (a, d) = line;
    ((p.x - a.x) * d.y - (p.y - a.y) * d.x).abs() / d.x.hypot(d.y)
}

fn intersection(lines: &[&Centerline; 3]) -> Option<Candidate> {
    let chords: Vec<(Point2D, Point2D)> = lines.iter().filter_map(|l| chord(l)).collect();
    if chords.len() < 2 {
        return None;
    }
    let hits: Vec<Point2D> = (0..chords.len())
        .flat_map(|i| (i + 1..chords.len()).map(move |j| (i, j)))
        .filter_map(|(i, j)| line_intersection(&chords[i], &chords[j]))
        .collect();
    if hits.is_empty() {
        return None;
    }
    let n = hits.len() as f64;
    let point = Point2D::new(
        hits.iter().map(|p| p.x).sum::<f64>() / n,
        hits.iter().map(|p| p.y).sum::<f64>() / n,
    );
    let distances: Vec<f64> = chords.iter().map(|c| distance_to_line(&point, c)).collect();
    Some(Candidate {
        point,
        method: BifurcationMethod::Intersection,
        score: distance_score(&distances),
    })
}

fn centroid(lines: &[&Centerline; 3]) -> Option<Candidate> {
    let ends: Vec<[Point2D; 2]> = lines
        .iter()
        .map(|l| Some([l.first()?, l.last()?]))
        .collect::<Option<_>>()?;

    let mut best: Option<(f64, Point2D, [f64; 3])> = None;
    for combo in 0..8usize {
        let picked = [
            ends[0][combo & 1],
            ends[1][(combo >> 1) & 1],
            ends[2][(combo >> 2) & 1],
        ];
        let c = Point2D::new(
            picked.iter().map(|p| p.x).sum::<f64>() / 3.0,
            picked.iter().map(|p| p.y).sum::<f64>() / 3.0,
        );
        let d = picked.map(|p| p.distance_to(&c));
        let cost = d.iter().copied().fold(0.0, f64::max) + d.iter().sum::<f64>() / 3.0;
        if best.map_or(true, |(b, _, _)| cost < b) {
            best = Some((cost, c, d));
        }
    }
    best.map(|(_, point, d)| Candidate {
        point,
        method: BifurcationMethod::Centroid,
        score: distance_score(&d),
    })
}

/// Runs all three estimators; the strictly highest score wins, so equal
/// scores keep the earlier estimator.
pub fn best_candidate(
    main: &Centerline,
    branch1: &Centerline,
    branch2: &Centerline,
) -> Option<Candidate> {
    let lines = [main, branch1, branch2];
    [closest_approach(&lines), intersection(&lines), centroid(&lines)]
        .into_iter()
        .flatten()
        .inspect(|c| {
            debug!(method = %c.method, score = c.score, point = %c.point, "bifurcation candidate")
        })
        .fold(None, |best: Option<Candidate>, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        })
}

fn farthest_point(from: &Point2D, line: &Centerline) -> Option<Point2D> {
    line.positions()
        .max_by(|a, b| from.distance_to(a).total_cmp(&from.distance_to(b)))
}

/// Straight segment from `origin` toward `toward`, `length` px long at
/// `step` px spacing.
pub fn anchored_segment(
    origin: &Point2D,
    toward: &Point2D,
    length: f64,
    step: f64,
) -> GeometryResult<Centerline> {
    if !(step.is_finite() && step > 0.0) || !(length.is_finite() && length >= 0.0) {
        return Err(GeometryError::InvalidInput(format!(
            "segment needs a positive step and finite length, got step {} length {}",
            step, length
        )));
    }
    let dist = origin.distance_to(toward);
    if dist < 1e-9 {
        return Err(GeometryError::DegenerateSegment);
    }
    let ux = (toward.x - origin.x) / dist;
    let uy = (toward.y - origin.y) / dist;
    let n = (length / step).floor() as usize;
    let points: Vec<Point2D> = (0..=n)
        .map(|k| {
            let t = k as f64 * step;
            Point2D::new(origin.x + t * ux, origin.y + t * uy)
        })
        .collect();
    Ok(Centerline::from_points(&points))
}

/// Finds where the three vessels meet and re-derives short segments
/// pointing outward from there.
pub fn locate_bifurcation(
    main: &Centerline,
    branch1: &Centerline,
    branch2: &Centerline,
    config: &LocatorConfig,
) -> GeometryResult<BifurcationResult> {
    config.validate()?;
    for (vessel, line) in Vessel::ALL.iter().zip([main, branch1, branch2]) {
        if line.is_empty() {
            return Err(GeometryError::InvalidInput(format!("{} centerline is empty", vessel)));
        }
        if line.positions().any(|p| !p.is_finite()) {
            return Err(GeometryError::NonFiniteValue {
                context: "centerline points",
            });
        }
    }

    let winner = best_candidate(main, branch1, branch2).ok_or(GeometryError::BifurcationNotFound)?;
    info!(
        method = %winner.method,
        confidence = winner.score,
        point = %winner.point,
        "bifurcation located"
    );

    let segment = |line: &Centerline| -> GeometryResult<Centerline> {
        let far = farthest_point(&winner.point, line).ok_or(GeometryError::BifurcationNotFound)?;
        anchored_segment(&winner.point, &far, config.segment_length, config.segment_step)
    };

    Ok(BifurcationResult {
        point: winner.point,
        method: winner.method,
        confidence: winner.score,
        adjusted_segments: VesselSet::new(segment(main)?, segment(branch1)?, segment(branch2)?),
    })
}

#[cfg(test)]
mod bifurcation_tests {
    use super::*;
    use crate::utils::test_utils::{radiating_centerlines, straight_centerline};
    use approx::assert_relative_eq;

    #[test]
    fn test_crossing_lines_meet_near_fifty_fifty() {
        let main = straight_centerline(Point2D::new(10.0, 50.0), Point2D::new(90.0, 50.0), 81);
        let b1 = straight_centerline(Point2D::new(20.0, 20.0), Point2D::new(80.0, 80.0), 61);
        let b2 = straight_centerline(Point2D::new(50.0, 10.0), Point2D::new(50.0, 90.0), 81);

        let result = locate_bifurcation(&main, &b1, &b2, &LocatorConfig::default()).unwrap();
        assert!(result.point.distance_to(&Point2D::new(50.0, 50.0)) < 3.0);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_radiating_branches_with_gap_prefer_intersection() {
        let center = Point2D::new(60.0, 60.0);
        let [m, b1, b2] = radiating_centerlines(center, [90.0, 210.0, 330.0], 8.0, 40.0);

        let result = locate_bifurcation(&m, &b1, &b2, &LocatorConfig::default()).unwrap();
        assert_eq!(result.method, BifurcationMethod::Intersection);
        assert!(result.point.distance_to(&center) < 1e-6);
        assert_relative_eq!(result.confidence, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adjusted_segments_start_at_point_and_point_outward() {
        let center = Point2D::new(60.0, 60.0);
        let [m, b1, b2] = radiating_centerlines(center, [90.0, 200.0, 340.0], 5.0, 40.0);
        let config = LocatorConfig::default();
        let result = locate_bifurcation(&m, &b1, &b2, &config).unwrap();

        for (vessel, seg) in result.adjusted_segments.iter() {
            assert_eq!(seg.len(), 26, "{}", vessel);
            assert_eq!(seg.first(), Some(result.point));
            assert_relative_eq!(seg.length(), config.segment_length, epsilon = 1e-9);
        }
        // main runs downward in the image (90°)
        let main_end = result.adjusted_segments.main().last().unwrap();
        assert!(main_end.y > result.point.y + 20.0);
    }

    #[test]
    fn test_parallel_chords_fall_back_to_other_estimators() {
        let main = straight_centerline(Point2D::new(0.0, 0.0), Point2D::new(40.0, 0.0), 41);
        let b1 = straight_centerline(Point2D::new(0.0, 10.0), Point2D::new(40.0, 10.0), 41);
        let b2 = straight_centerline(Point2D::new(0.0, 20.0), Point2D::new(40.0, 20.0), 41);

        let result = locate_bifurcation(&main, &b1, &b2, &LocatorConfig::default()).unwrap();
        assert_ne!(result.method, BifurcationMethod::Intersection);
        assert!(result.point.y > 0.0 && result.point.y < 20.0);
    }

    #[test]
    fn test_single_point_lines_at_same_location_are_degenerate() {
        let p = Centerline::from_points(&[Point2D::new(5.0, 5.0)]);
        let err = locate_bifurcation(&p, &p, &p, &LocatorConfig::default()).unwrap_err();
        assert_eq!(err, GeometryError::DegenerateSegment);
    }

    #[test]
    fn test_empty_centerline_rejected() {
        let line = straight_centerline(Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0), 5);
        let empty = Centerline::default();
        assert!(matches!(
            locate_bifurcation(&line, &empty, &line, &LocatorConfig::default()),
            Err(GeometryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_distance_score() {
        assert_relative_eq!(distance_score(&[0.0, 0.0]), 1.0);
        assert_relative_eq!(distance_score(&[1.0, 1.0]), 0.5 / 3.0);
        // balanced beats unbalanced at equal total
        assert!(distance_score(&[1.0, 1.0]) > distance_score(&[2.0, 0.0]));
    }

    #[test]
    fn test_project_onto_segment_clamps() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);
        assert_eq!(project_onto_segment(&Point2D::new(5.0, 3.0), &a, &b), Point2D::new(5.0, 0.0));
        assert_eq!(project_onto_segment(&Point2D::new(-4.0, 3.0), &a, &b), a);
        assert_eq!(project_onto_segment(&Point2D::new(14.0, -3.0), &a, &b), b);
    }

    #[test]
    fn test_zero_segment_step_rejected() {
        let main = straight_centerline(Point2D::new(10.0, 50.0), Point2D::new(90.0, 50.0), 81);
        let b1 = straight_centerline(Point2D::new(20.0, 20.0), Point2D::new(80.0, 80.0), 61);
        let b2 = straight_centerline(Point2D::new(50.0, 10.0), Point2D::new(50.0, 90.0), 81);
        let config = LocatorConfig {
            segment_length: 25.0,
            segment_step: 0.0,
        };
        assert!(matches!(
            locate_bifurcation(&main, &b1, &b2, &config),
            Err(GeometryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_anchored_segment_needs_positive_step() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);
        for step in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                anchored_segment(&a, &b, 25.0, step),
                Err(GeometryError::InvalidInput(_))
            ));
        }
        let seg = anchored_segment(&a, &b, 4.0, 2.0).unwrap();
        assert_eq!(seg.len(), 3);
        assert_eq!(seg.last(), Some(Point2D::new(4.0, 0.0)));
    }
}
