//! Perspective correction of a photographed angiogram.
//!
//! Pipeline per image:
//! 1. luma conversion
//! 2. Harris corner candidates (`det(M) - k·trace(M)²` over a fixed window)
//! 3. one corner per image quadrant, falling back to the literal image
//!    corners when detection is inconclusive
//! 4. homography from the four corners to the full output frame, solved as
//!    an 8-unknown least-squares problem through the normal equations
//! 5. backward-mapped resampling; samples falling outside the source stay
//!    transparent black
use image::RgbaImage;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{Interpolation, PerspectiveConfig};
use crate::error::{GeometryError, GeometryResult};
use crate::io::input::{IntensityField, Point2D};
use crate::math::{invert3x3, solve_least_squares, Mat3, Vec3, SINGULAR_DET_EPS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerCandidate {
    pub point: Point2D,
    pub response: f64,
}

/// Frame corners in the order top-left, top-right, bottom-left,
/// bottom-right.
pub type FrameCorners = [Point2D; 4];

#[derive(Debug, Clone)]
pub struct PerspectiveCorrection {
    pub image: RgbaImage,
    pub homography: Mat3,
    pub corners: FrameCorners,
    /// At least one corner came from the image border instead of detection.
    pub used_fallback: bool,
}

pub fn grayscale(image: &RgbaImage) -> IntensityField {
    IntensityField::from_rgba(image, false)
}

/// Central-difference gradients; border pixels get zero.
pub fn gradients(gray: &IntensityField) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = (gray.width, gray.height);
    let mut gx = vec![0.0; w * h];
    let mut gy = vec![0.0; w * h];
    if w < 3 || h < 3 {
        return (gx, gy);
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            gx[idx] = (gray.get(x + 1, y) - gray.get(x - 1, y)) * 0.5;
            gy[idx] = (gray.get(x, y + 1) - gray.get(x, y - 1)) * 0.5;
        }
    }
    (gx, gy)
}

/// Harris response for every pixel whose window lies fully inside the
/// gradient support; all other pixels get `f64::NEG_INFINITY`.
pub fn harris_response(gray: &IntensityField, config: &PerspectiveConfig) -> Vec<f64> {
    let (w, h) = (gray.width, gray.height);
    let r = config.window_radius;
    let mut response = vec![f64::NEG_INFINITY; w * h];
    if w < 2 * r + 3 || h < 2 * r + 3 {
        return response;
    }
    let (gx, gy) = gradients(gray);

    for y in (r + 1)..(h - r - 1) {
        for x in (r + 1)..(w - r - 1) {
            let mut sxx = 0.0;
            let mut syy = 0.0;
            let mut sxy = 0.0;
            for wy in (y - r)..=(y + r) {
                for wx in (x - r)..=(x + r) {
                    let idx = wy * w + wx;
                    sxx += gx[idx] * gx[idx];
                    syy += gy[idx] * gy[idx];
                    sxy += gx[idx] * gy[idx];
                }
            }
            let det = sxx * syy - sxy * sxy;
            let trace = sxx + syy;
            response[y * w + x] = det - config.harris_k * trace * trace;
        }
    }
    response
}

/// Strongest Harris responses above the threshold, best first.
///
/// A candidate closer than `min_corner_distance` to an already accepted,
/// stronger one is skipped.
pub fn detect_corners(gray: &IntensityField, config: &PerspectiveConfig) -> Vec<CornerCandidate> {
    let response = harris_response(gray, config);
    let w = gray.width;

    let mut candidates: Vec<CornerCandidate> = response
        .iter()
        .enumerate()
        .filter(|(_, r)| **r > config.response_threshold)
        .map(|(idx, &r)| CornerCandidate {
            point: Point2D::new((idx % w) as f64, (idx / w) as f64),
            response: r,
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut accepted: Vec<CornerCandidate> = Vec::with_capacity(config.max_corners);
    for candidate in candidates {
        if accepted.len() >= config.max_corners {
            break;
        }
        let too_close = accepted
            .iter()
            .any(|a| a.point.distance_to(&candidate.point) < config.min_corner_distance);
        if !too_close {
            accepted.push(candidate);
        }
    }
    debug!(corners = accepted.len(), "harris corner detection");
    accepted
}

/// Literal image corners in [`FrameCorners`] order.
pub fn image_corners(width: f64, height: f64) -> FrameCorners {
    [
        Point2D::new(0.0, 0.0),
        Point2D::new(width - 1.0, 0.0),
        Point2D::new(0.0, height - 1.0),
        Point2D::new(width - 1.0, height - 1.0),
    ]
}

/// Picks the most extreme candidate in each quadrant around the image
/// center. Fewer than 4 candidates, or an empty quadrant, falls back to the
/// corresponding image corner. Returns whether any fallback was used.
pub fn assign_corners(
    candidates: &[CornerCandidate],
    width: f64,
    height: f64,
) -> (FrameCorners, bool) {
    let fallback = image_corners(width, height);
    if candidates.len() < 4 {
        return (fallback, true);
    }
    let cx = width / 2.0;
    let cy = height / 2.0;

    let pick = |in_quadrant: &dyn Fn(&Point2D) -> bool, key: &dyn Fn(&Point2D) -> f64| {
        candidates
            .iter()
            .map(|c| c.point)
            .filter(|p| in_quadrant(p))
            .fold(None, |best: Option<Point2D>, p| match best {
                Some(b) if key(&b) >= key(&p) => Some(b),
                _ => Some(p),
            })
    };

    let picks = [
        pick(&|p| p.x < cx && p.y < cy, &|p| -(p.x + p.y)),
        pick(&|p| p.x >= cx && p.y < cy, &|p| p.x - p.y),
        pick(&|p| p.x < cx && p.y >= cy, &|p| p.y - p.x),
        pick(&|p| p.x >= cx && p.y >= cy, &|p| p.x + p.y),
    ];

    let mut used_fallback = false;
    let mut corners = fallback;
    for (slot, pick) in corners.iter_mut().zip(picks.iter()) {
        match pick {
            Some(p) => *slot = *p,
            None => used_fallback = true,
        }
    }
    (corners, used_fallback)
}

/// Similarity transform moving the centroid to the origin and the mean
/// distance to √2.
fn normalization_transform(points: &[Point2D; 4]) -> Option<Mat3> {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let my = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if !mean_dist.is_finite() || mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Mat3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0))
}

fn failed(reason: impl Into<String>) -> GeometryError {
    GeometryError::PerspectiveCorrectionFailed {
        reason: reason.into(),
    }
}

/// Homography `H` with `dst ~ H·src` from four correspondences.
pub fn estimate_homography(src: &[Point2D; 4], dst: &[Point2D; 4]) -> GeometryResult<Mat3> {
    let t_src = normalization_transform(src).ok_or_else(|| failed("degenerate source corners"))?;
    let t_dst =
        normalization_transform(dst).ok_or_else(|| failed("degenerate destination corners"))?;

    let mut a = DMatrix::<f64>::zeros(8, 8);
    let mut b = DVector::<f64>::zeros(8);
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let sn = t_src * Vec3::new(s.x, s.y, 1.0);
        let dn = t_dst * Vec3::new(d.x, d.y, 1.0);
        let (x, y) = (sn.x, sn.y);
        let (u, v) = (dn.x, dn.y);

        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let h = solve_least_squares(&a, &b).map_err(|e| failed(e.to_string()))?;
    let hn = Mat3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let t_dst_inv = invert3x3(&t_dst).map_err(|e| failed(e.to_string()))?;
    let mut hm = t_dst_inv * hn * t_src;

    let scale = hm[(2, 2)];
    if scale.abs() > 1e-12 {
        hm /= scale;
    }
    if hm.iter().any(|v| !v.is_finite()) {
        return Err(failed("non-finite homography"));
    }
    let det = hm.determinant();
    if det.abs() < SINGULAR_DET_EPS {
        return Err(failed(format!("singular homography (det = {:e})", det)));
    }
    Ok(hm)
}

pub fn apply_homography(h: &Mat3, p: &Point2D) -> Option<Point2D> {
    let v = h * Vec3::new(p.x, p.y, 1.0);
    if !v.z.is_finite() || v.z.abs() < 1e-12 {
        return None;
    }
    let out = Point2D::new(v.x / v.z, v.y / v.z);
    out.is_finite().then_some(out)
}

fn sample_nearest(image: &RgbaImage, p: &Point2D) -> Option<[u8; 4]> {
    let (w, h) = image.dimensions();
    let x = p.x.round();
    let y = p.y.round();
    if x < 0.0 || y < 0.0 || x >= w as f64 || y >= h as f64 {
        return None;
    }
    Some(image.get_pixel(x as u32, y as u32).0)
}

fn sample_bilinear(image: &RgbaImage, p: &Point2D) -> Option<[u8; 4]> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    if p.x < 0.0 || p.y < 0.0 || p.x > max_x || p.y > max_y {
        return None;
    }
    let x0 = p.x.floor() as u32;
    let y0 = p.y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = p.x - x0 as f64;
    let fy = p.y - y0 as f64;

    let c00 = image.get_pixel(x0, y0).0;
    let c10 = image.get_pixel(x1, y0).0;
    let c01 = image.get_pixel(x0, y1).0;
    let c11 = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for ch in 0..4 {
        let top = c00[ch] as f64 * (1.0 - fx) + c10[ch] as f64 * fx;
        let bottom = c01[ch] as f64 * (1.0 - fx) + c11[ch] as f64 * fx;
        out[ch] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

/// Resamples `image` into a `width × height` frame through `homography`
/// (source → destination) by mapping each destination pixel backward.
pub fn warp_image(
    image: &RgbaImage,
    homography: &Mat3,
    width: u32,
    height: u32,
    interpolation: Interpolation,
) -> GeometryResult<RgbaImage> {
    let inverse = invert3x3(homography).map_err(|e| failed(e.to_string()))?;
    let mut out = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return Ok(out);
    }
    let row_len = width as usize * 4;

    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(v, row)| {
            for u in 0..width as usize {
                let dst = Point2D::new(u as f64, v as f64);
                let sample = apply_homography(&inverse, &dst).and_then(|src| match interpolation {
                    Interpolation::Nearest => sample_nearest(image, &src),
                    Interpolation::Bilinear => sample_bilinear(image, &src),
                });
                if let Some(px) = sample {
                    row[u * 4..u * 4 + 4].copy_from_slice(&px);
                }
            }
        });
    Ok(out)
}

/// Full correction pipeline for one image.
///
/// On `PerspectiveCorrectionFailed` the caller decides whether to continue
/// with the unmodified image.
pub fn correct_perspective(
    image: &RgbaImage,
    config: &PerspectiveConfig,
) -> GeometryResult<PerspectiveCorrection> {
    let (w, h) = image.dimensions();
    if w < 2 || h < 2 {
        return Err(failed(format!("image too small ({}x{})", w, h)));
    }
    let gray = grayscale(image);
    let candidates = detect_corners(&gray, config);
    let (corners, used_fallback) = assign_corners(&candidates, w as f64, h as f64);
    if used_fallback {
        warn!(
            candidates = candidates.len(),
            "frame corners incomplete, using image corners where missing"
        );
    }

    let target = image_corners(w as f64, h as f64);
    let homography = estimate_homography(&corners, &target)?;
    let corrected = warp_image(image, &homography, w, h, config.interpolation)?;
    debug!(?corners, used_fallback, "perspective corrected");

    Ok(PerspectiveCorrection {
        image: corrected,
        homography,
        corners,
        used_fallback,
    })
}
