use tracing::debug;

use crate::config::TrackerConfig;
use crate::error::{GeometryError, GeometryResult};
use crate::io::input::{Centerline, CenterlinePoint, IntensityField, Point2D};

/// Tracks a vessel through `seeds` (in order) over `field`, where vessels
/// are bright.
///
/// Between consecutive seeds the cursor moves in unit steps. At each step the
/// intensity-weighted centroid around the predicted cursor position is
/// blended with the straight seed-to-seed path (`path_weight` vs.
/// `1 - path_weight`), then kept `edge_margin` pixels inside the image. The
/// raw track is smoothed with a symmetric moving average.
pub fn extract_centerline(
    field: &IntensityField,
    seeds: &[Point2D],
    config: &TrackerConfig,
) -> GeometryResult<Centerline> {
    config.validate()?;
    if seeds.len() < 2 {
        return Err(GeometryError::InsufficientSeedPoints { got: seeds.len() });
    }
    if seeds.iter().any(|p| !p.is_finite()) {
        return Err(GeometryError::NonFiniteValue {
            context: "seed points",
        });
    }
    let margin = config.edge_margin;
    if (field.width as f64) < 2.0 * margin + 1.0 || (field.height as f64) < 2.0 * margin + 1.0 {
        return Err(GeometryError::InvalidInput(format!(
            "intensity field {}x{} is too small for an edge margin of {}",
            field.width, field.height, margin
        )));
    }

    let clamp = |p: Point2D| clamp_to_field(p, field, margin);
    let mut raw = vec![clamp(seeds[0])];

    for pair in seeds.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let dist = a.distance_to(&b);
        if dist < 1e-9 {
            continue;
        }
        let steps = (dist.min(config.segment_cap) / config.step_size).floor() as usize;
        if steps == 0 {
            raw.push(clamp(b));
            continue;
        }

        let mut cursor = clamp(a);
        let mut prev_target = a;
        for i in 1..=steps {
            let target = a.lerp(&b, i as f64 / steps as f64);
            let predicted = Point2D::new(
                cursor.x + (target.x - prev_target.x),
                cursor.y + (target.y - prev_target.y),
            );
            let center = local_center(field, &predicted, config.search_radius);
            cursor = clamp(blend(&target, &center, config.path_weight));
            prev_target = target;
            raw.push(cursor);
        }
    }

    let smoothed = moving_average(&raw, config.smoothing_window);
    debug!(
        seeds = seeds.len(),
        points = smoothed.len(),
        "centerline extracted"
    );

    Ok(sample_intensities(&Centerline::from_points(&smoothed), field))
}

fn blend(path: &Point2D, center: &Point2D, path_weight: f64) -> Point2D {
    Point2D::new(
        path_weight * path.x + (1.0 - path_weight) * center.x,
        path_weight * path.y + (1.0 - path_weight) * center.y,
    )
}

fn clamp_to_field(p: Point2D, field: &IntensityField, margin: f64) -> Point2D {
    let max_x = field.width as f64 - 1.0 - margin;
    let max_y = field.height as f64 - 1.0 - margin;
    Point2D::new(p.x.clamp(margin, max_x), p.y.clamp(margin, max_y))
}

/// Intensity-weighted centroid of the pixels within `radius` of `around`,
/// weighted by `intensity · exp(-d²/r²)`. Returns `around` itself when no
/// pixel carries weight.
pub fn local_center(field: &IntensityField, around: &Point2D, radius: f64) -> Point2D {
    let r2 = radius * radius;
    let x_min = (around.x - radius).floor() as i64;
    let x_max = (around.x + radius).ceil() as i64;
    let y_min = (around.y - radius).floor() as i64;
    let y_max = (around.y + radius).ceil() as i64;

    let mut sum_w = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for py in y_min..=y_max {
        for px in x_min..=x_max {
            let dx = px as f64 - around.x;
            let dy = py as f64 - around.y;
            let d2 = dx * dx + dy * dy;
            if d2 > r2 {
                continue;
            }
            let intensity = match field.get_checked(px, py) {
                Some(v) if v > 0.0 => v,
                _ => continue,
            };
            let w = intensity * (-d2 / r2).exp();
            sum_w += w;
            sum_x += w * px as f64;
            sum_y += w * py as f64;
        }
    }

    if sum_w <= 1e-12 {
        return *around;
    }
    Point2D::new(sum_x / sum_w, sum_y / sum_w)
}

/// Symmetric moving average; windows shrink at the ends instead of
/// wrapping.
pub fn moving_average(points: &[Point2D], window: usize) -> Vec<Point2D> {
    let half = window / 2;
    let n = points.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(n - 1);
            let span = &points[lo..=hi];
            let count = span.len() as f64;
            Point2D::new(
                span.iter().map(|p| p.x).sum::<f64>() / count,
                span.iter().map(|p| p.y).sum::<f64>() / count,
            )
        })
        .collect()
}

/// Cumulative arc length at every point, starting at 0.
pub fn cumulative_arc_length(centerline: &Centerline) -> Vec<f64> {
    let mut cum = Vec::with_capacity(centerline.len());
    let mut total = 0.0;
    let mut prev: Option<Point2D> = None;
    for p in centerline.positions() {
        if let Some(q) = prev {
            total += q.distance_to(&p);
        }
        cum.push(total);
        prev = Some(p);
    }
    cum
}

/// Point at arc length `s` along the polyline (clamped to its ends).
pub fn point_at_arc_length(centerline: &Centerline, cum: &[f64], s: f64) -> Option<Point2D> {
    let first = centerline.first()?;
    let total = *cum.last()?;
    if s <= 0.0 {
        return Some(first);
    }
    if s >= total {
        return centerline.last();
    }
    let search = cum.binary_search_by(|v| v.partial_cmp(&s).unwrap_or(std::cmp::Ordering::Less));
    let idx = match search {
        Ok(i) => return Some(centerline.points[i].point),
        Err(pos) => pos - 1,
    };
    let p0 = centerline.points[idx].point;
    let p1 = centerline.points[idx + 1].point;
    let seg = cum[idx + 1] - cum[idx];
    let t = if seg < 1e-12 { 0.0 } else { (s - cum[idx]) / seg };
    Some(p0.lerp(&p1, t))
}

/// Resamples the centerline at a fixed arc-length spacing. The last point
/// is always kept.
pub fn resample_centerline(centerline: &Centerline, spacing: f64) -> GeometryResult<Centerline> {
    if !centerline.is_usable() {
        return Err(GeometryError::InsufficientSeedPoints {
            got: centerline.len(),
        });
    }
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(GeometryError::InvalidInput(format!(
            "resampling spacing must be positive, got {}",
            spacing
        )));
    }
    let cum = cumulative_arc_length(centerline);
    let total = cum[cum.len() - 1];
    let n = (total / spacing).floor() as usize;

    let mut points: Vec<Point2D> = (0..=n)
        .filter_map(|k| point_at_arc_length(centerline, &cum, k as f64 * spacing))
        .collect();
    if let (Some(last), Some(end)) = (points.last(), centerline.last()) {
        if last.distance_to(&end) > 1e-6 {
            points.push(end);
        }
    }
    Ok(Centerline::from_points(&points))
}

/// Attaches bilinear intensity samples to every point.
pub fn sample_intensities(centerline: &Centerline, field: &IntensityField) -> Centerline {
    Centerline {
        points: centerline
            .points
            .iter()
            .map(|p| CenterlinePoint {
                point: p.point,
                intensity: Some(field.sample_bilinear(p.point.x, p.point.y)),
            })
            .collect(),
    }
}

#[cfg(test)]
mod centerline_tests {
    use super::*;
    use crate::utils::test_utils::{add_noise, vessel_field};
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_vessel_along_top_edge_stays_near_row_zero() {
        let field = vessel_field(
            200,
            50,
            &[Point2D::new(0.0, 0.0), Point2D::new(199.0, 0.0)],
            1.5,
            255.0,
        );
        let config = TrackerConfig::default();
        let cl = extract_centerline(
            &field,
            &[Point2D::new(0.0, 0.0), Point2D::new(100.0, 0.0)],
            &config,
        )
        .unwrap();
        assert!(cl.len() > 90);
        for p in cl.positions() {
            assert!(p.y.abs() <= config.search_radius, "y = {}", p.y);
            assert!(p.y >= config.edge_margin - 1e-9);
        }
    }

    #[test]
    fn test_tracker_pulls_toward_vessel() {
        let path = [Point2D::new(0.0, 25.0), Point2D::new(199.0, 25.0)];
        let mut field = vessel_field(200, 50, &path, 1.5, 200.0);
        add_noise(&mut field, 5.0, 42);

        // seeds sit 3 px below the ridge
        let cl = extract_centerline(
            &field,
            &[Point2D::new(20.0, 28.0), Point2D::new(180.0, 28.0)],
            &TrackerConfig::default(),
        )
        .unwrap();
        let interior: Vec<Point2D> = cl.positions().skip(5).take(cl.len() - 10).collect();
        assert!(!interior.is_empty());
        for p in interior.iter() {
            assert!(p.y < 27.6 && p.y > 25.0, "y = {}", p.y);
        }
        // ends land on the seed columns
        assert!((cl.first().unwrap().x - 20.0).abs() < 1.0);
        assert!((cl.last().unwrap().x - 180.0).abs() < 1.0);
    }

    #[test]
    fn test_pure_path_weight_follows_seeds() {
        let field = IntensityField::zeros(100, 100);
        let config = TrackerConfig {
            path_weight: 1.0,
            smoothing_window: 1,
            ..TrackerConfig::default()
        };
        let cl = extract_centerline(
            &field,
            &[Point2D::new(10.0, 10.0), Point2D::new(40.0, 50.0)],
            &config,
        )
        .unwrap();
        // 50 px apart -> 50 unit steps plus the start point
        assert_eq!(cl.len(), 51);
        assert_relative_eq!(cl.last().unwrap().x, 40.0, epsilon = 1e-9);
        assert_relative_eq!(cl.last().unwrap().y, 50.0, epsilon = 1e-9);
        for p in cl.positions() {
            // on the straight line 4x - 3y = 10
            assert_relative_eq!(4.0 * p.x - 3.0 * p.y, 10.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_segment_cap_limits_steps() {
        let field = IntensityField::zeros(300, 20);
        let config = TrackerConfig {
            segment_cap: 20.0,
            smoothing_window: 1,
            ..TrackerConfig::default()
        };
        let cl = extract_centerline(
            &field,
            &[Point2D::new(5.0, 10.0), Point2D::new(205.0, 10.0)],
            &config,
        )
        .unwrap();
        assert_eq!(cl.len(), 21);
        assert_relative_eq!(cl.last().unwrap().x, 205.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_seeds_return_single_point() {
        let field = IntensityField::zeros(50, 50);
        let p = Point2D::new(20.0, 20.0);
        let cl = extract_centerline(&field, &[p, p], &TrackerConfig::default()).unwrap();
        assert_eq!(cl.len(), 1);
        assert_eq!(cl.first(), Some(p));
    }

    #[test]
    fn test_insufficient_seeds() {
        let field = IntensityField::zeros(50, 50);
        assert_eq!(
            extract_centerline(&field, &[Point2D::new(1.0, 1.0)], &TrackerConfig::default()),
            Err(GeometryError::InsufficientSeedPoints { got: 1 })
        );
    }

    #[test]
    fn test_cursor_respects_edge_margin() {
        let field = IntensityField::zeros(60, 60);
        let cl = extract_centerline(
            &field,
            &[Point2D::new(-10.0, 30.0), Point2D::new(80.0, 30.0)],
            &TrackerConfig::default(),
        )
        .unwrap();
        for p in cl.positions() {
            assert!(p.x >= 2.0 && p.x <= 57.0);
        }
    }

    #[test]
    fn test_local_center_prefers_bright_pixels() {
        let mut field = IntensityField::zeros(20, 20);
        field.set(12, 10, 100.0);
        let c = local_center(&field, &Point2D::new(10.0, 10.0), 5.0);
        assert_relative_eq!(c.x, 12.0);
        assert_relative_eq!(c.y, 10.0);

        // empty neighbourhood keeps the query point
        let empty = IntensityField::zeros(20, 20);
        let q = Point2D::new(4.5, 7.25);
        assert_eq!(local_center(&empty, &q, 5.0), q);
    }

    #[test]
    fn test_moving_average_shrinks_at_edges() {
        let pts: Vec<Point2D> = [0.0, 3.0, 6.0, 30.0]
            .iter()
            .map(|&x| Point2D::new(x, 0.0))
            .collect();
        let out = moving_average(&pts, 3);
        assert_relative_eq!(out[0].x, 1.5);
        assert_relative_eq!(out[1].x, 3.0);
        assert_relative_eq!(out[2].x, 13.0);
        assert_relative_eq!(out[3].x, 18.0);
    }

    #[test]
    fn test_resample_keeps_endpoints_and_spacing() {
        let cl = Centerline::from_points(&[
            Point2D::new(0.0, 0.0),
            Point2D::new(10.0, 0.0),
            Point2D::new(10.0, 5.5),
        ]);
        let out = resample_centerline(&cl, 2.0).unwrap();
        assert_eq!(out.first(), Some(Point2D::new(0.0, 0.0)));
        assert_eq!(out.last(), Some(Point2D::new(10.0, 5.5)));
        // 15.5 px -> samples at 0,2,...,14 plus the end
        assert_eq!(out.len(), 9);
        assert_relative_eq!(out.points[6].point.y, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_step_size_rejected() {
        let field = IntensityField::zeros(100, 100);
        let config = TrackerConfig {
            step_size: 0.0,
            ..TrackerConfig::default()
        };
        let result = extract_centerline(
            &field,
            &[Point2D::new(10.0, 10.0), Point2D::new(90.0, 90.0)],
            &config,
        );
        assert!(matches!(result, Err(GeometryError::InvalidInput(_))));
    }

    #[test]
    fn test_sample_intensities_match_bilinear_field() {
        let field = vessel_field(
            40,
            30,
            &[Point2D::new(0.0, 12.0), Point2D::new(39.0, 17.0)],
            2.0,
            180.0,
        );
        let cl = Centerline::from_points(&[
            Point2D::new(3.25, 12.5),
            Point2D::new(17.0, 14.75),
            Point2D::new(38.6, 16.1),
        ]);
        let sampled = sample_intensities(&cl, &field);
        assert_eq!(sampled.len(), 3);
        for (p, q) in cl.points.iter().zip(sampled.points.iter()) {
            assert_eq!(p.point, q.point);
            let want = field.sample_bilinear(p.point.x, p.point.y);
            assert_relative_eq!(q.intensity.unwrap(), want, epsilon = 1e-12);
        }
        // integer column: interpolation runs between rows 14 and 15 only
        let expected = 0.25 * field.get(17, 14) + 0.75 * field.get(17, 15);
        assert_relative_eq!(sampled.points[1].intensity.unwrap(), expected, epsilon = 1e-12);
    }
}
