use image::{Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io::input::{Centerline, IntensityField, Point2D};

/// Black image with a white axis-aligned rectangle, corners inclusive.
pub fn filled_rectangle_image(
    width: u32,
    height: u32,
    top_left: (u32, u32),
    bottom_right: (u32, u32),
) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let inside =
            x >= top_left.0 && x <= bottom_right.0 && y >= top_left.1 && y <= bottom_right.1;
        if inside {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Black image with a white convex quadrilateral given as
/// top-left, top-right, bottom-left, bottom-right.
pub fn quad_image(width: u32, height: u32, corners: &[Point2D; 4]) -> RgbaImage {
    // walk the outline in order
    let outline = [corners[0], corners[1], corners[3], corners[2]];
    RgbaImage::from_fn(width, height, |x, y| {
        let p = Point2D::new(x as f64, y as f64);
        let inside = (0..4).all(|i| {
            let a = outline[i];
            let b = outline[(i + 1) % 4];
            (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x) >= 0.0
        });
        if inside {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

fn distance_to_segment(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 < 1e-12 {
        return p.distance_to(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    p.distance_to(&Point2D::new(a.x + t * dx, a.y + t * dy))
}

/// Bright ridge with a Gaussian cross-section along every segment of
/// `path` (already inverted: vessel bright, background zero).
pub fn vessel_field(
    width: usize,
    height: usize,
    path: &[Point2D],
    sigma: f64,
    peak: f64,
) -> IntensityField {
    let mut field = IntensityField::zeros(width, height);
    for y in 0..height {
        for x in 0..width {
            let p = Point2D::new(x as f64, y as f64);
            let d = path
                .windows(2)
                .map(|w| distance_to_segment(&p, &w[0], &w[1]))
                .fold(f64::INFINITY, f64::min);
            field.set(x, y, peak * (-(d * d) / (2.0 * sigma * sigma)).exp());
        }
    }
    field
}

/// Adds uniform noise in `[0, amplitude)` with a fixed seed.
pub fn add_noise(field: &mut IntensityField, amplitude: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for v in field.data.iter_mut() {
        *v += rng.random_range(0.0..amplitude);
    }
}

/// Evenly spaced centerline from `from` to `to` with `n` points.
pub fn straight_centerline(from: Point2D, to: Point2D, n: usize) -> Centerline {
    let points: Vec<Point2D> = (0..n)
        .map(|i| from.lerp(&to, i as f64 / (n - 1) as f64))
        .collect();
    Centerline::from_points(&points)
}

/// Three centerlines radiating from `center` in the given directions
/// (degrees, image coordinates), starting `gap` pixels away from it.
pub fn radiating_centerlines(
    center: Point2D,
    angles_deg: [f64; 3],
    gap: f64,
    length: f64,
) -> [Centerline; 3] {
    angles_deg.map(|a| {
        let (s, c) = a.to_radians().sin_cos();
        let start = Point2D::new(center.x + gap * c, center.y + gap * s);
        let end = Point2D::new(center.x + (gap + length) * c, center.y + (gap + length) * s);
        straight_centerline(start, end, (length as usize).max(2))
    })
}

/// Dark vessels on a white background, one straight segment from `center`
/// to each of `ends`, the way an angiogram shows contrast-filled vessels.
pub fn branching_image(
    width: u32,
    height: u32,
    center: Point2D,
    ends: &[Point2D; 3],
    sigma: f64,
) -> RgbaImage {
    let fields: Vec<IntensityField> = ends
        .iter()
        .map(|end| vessel_field(width as usize, height as usize, &[center, *end], sigma, 200.0))
        .collect();
    RgbaImage::from_fn(width, height, |x, y| {
        let v = fields
            .iter()
            .map(|f| f.get(x as usize, y as usize))
            .fold(0.0, f64::max);
        let level = (240.0 - v).clamp(0.0, 255.0) as u8;
        Rgba([level, level, level, 255])
    })
}
