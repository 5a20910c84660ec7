use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::Path;

use crate::error::{GeometryError, GeometryResult};

/// Pixel or normalized image-plane coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Point2D, t: f64) -> Point2D {
        Point2D {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterlinePoint {
    pub point: Point2D,
    pub intensity: Option<f64>,
}

impl From<Point2D> for CenterlinePoint {
    fn from(point: Point2D) -> Self {
        Self {
            point,
            intensity: None,
        }
    }
}

/// Ordered points tracing a vessel's medial axis in image coordinates.
///
/// The order follows the seed points the line was tracked along, which is
/// not necessarily proximal to distal. At least 2 points are needed for the
/// line to carry a direction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Centerline {
    pub points: Vec<CenterlinePoint>,
}

impl Centerline {
    pub fn from_points(points: &[Point2D]) -> Self {
        Self {
            points: points.iter().copied().map(CenterlinePoint::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_usable(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn positions(&self) -> impl Iterator<Item = Point2D> + '_ {
        self.points.iter().map(|p| p.point)
    }

    pub fn first(&self) -> Option<Point2D> {
        self.points.first().map(|p| p.point)
    }

    pub fn last(&self) -> Option<Point2D> {
        self.points.last().map(|p| p.point)
    }

    /// Polyline length in pixels.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].point.distance_to(&w[1].point))
            .sum()
    }
}

/// The three vessels meeting at a bifurcation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vessel {
    Main,
    Branch1,
    Branch2,
}

impl Vessel {
    pub const ALL: [Vessel; 3] = [Vessel::Main, Vessel::Branch1, Vessel::Branch2];

    pub fn index(self) -> usize {
        match self {
            Vessel::Main => 0,
            Vessel::Branch1 => 1,
            Vessel::Branch2 => 2,
        }
    }

    pub fn parse(name: &str) -> Option<Vessel> {
        match name.trim().to_lowercase().as_str() {
            "main" | "mv" | "main_vessel" => Some(Vessel::Main),
            "branch1" | "b1" | "side1" => Some(Vessel::Branch1),
            "branch2" | "b2" | "side2" => Some(Vessel::Branch2),
            _ => None,
        }
    }
}

impl fmt::Display for Vessel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Vessel::Main => "main",
                Vessel::Branch1 => "branch1",
                Vessel::Branch2 => "branch2",
            }
        )
    }
}

/// Exactly three centerlines, indexed by [`Vessel`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VesselSet {
    pub lines: [Centerline; 3],
}

impl VesselSet {
    pub fn new(main: Centerline, branch1: Centerline, branch2: Centerline) -> Self {
        Self {
            lines: [main, branch1, branch2],
        }
    }

    pub fn get(&self, vessel: Vessel) -> &Centerline {
        &self.lines[vessel.index()]
    }

    pub fn main(&self) -> &Centerline {
        self.get(Vessel::Main)
    }

    pub fn branch1(&self) -> &Centerline {
        self.get(Vessel::Branch1)
    }

    pub fn branch2(&self) -> &Centerline {
        self.get(Vessel::Branch2)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Vessel, &Centerline)> {
        Vessel::ALL.into_iter().zip(self.lines.iter())
    }
}

/// Seed points for the three vessels of one acquisition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeedPoints {
    pub seeds: [Vec<Point2D>; 3],
}

impl SeedPoints {
    pub fn get(&self, vessel: Vessel) -> &[Point2D] {
        &self.seeds[vessel.index()]
    }
}

/// Dense scalar field (row-major) sampled by the centerline tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityField {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl IntensityField {
    pub fn new(width: usize, height: usize, data: Vec<f64>) -> GeometryResult<Self> {
        if data.len() != width * height {
            return Err(GeometryError::InvalidInput(format!(
                "intensity buffer has {} samples, expected {}x{}",
                data.len(),
                width,
                height
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFiniteValue {
                context: "intensity field",
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Luma of every pixel, optionally inverted (`255 - luma`) so that dark
    /// contrast-filled vessels become bright ridges.
    pub fn from_rgba(image: &RgbaImage, invert: bool) -> Self {
        let (w, h) = image.dimensions();
        let data = image
            .pixels()
            .map(|px| {
                let luma = luma(px.0);
                if invert {
                    255.0 - luma
                } else {
                    luma
                }
            })
            .collect();
        Self {
            width: w as usize,
            height: h as usize,
            data,
        }
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        self.data[y * self.width + x] = value;
    }

    /// Sample at integer coordinates, `None` outside the field.
    pub fn get_checked(&self, x: i64, y: i64) -> Option<f64> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(self.get(x as usize, y as usize))
    }

    /// Bilinear sample with border clamping.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// ITU-R BT.601 luma.
pub fn luma(rgba: [u8; 4]) -> f64 {
    0.299 * rgba[0] as f64 + 0.587 * rgba[1] as f64 + 0.114 * rgba[2] as f64
}

#[derive(Debug, Deserialize)]
struct SeedRecord {
    vessel: String,
    x: f64,
    y: f64,
}

/// Reads seed points from a CSV with a `vessel,x,y` header.
///
/// Rows keep their file order within each vessel.
pub fn read_seed_points<P: AsRef<Path>>(path: P) -> Result<SeedPoints> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening seed file {}", path.display()))?;

    let mut seeds = SeedPoints::default();
    for (row, result) in rdr.deserialize::<SeedRecord>().enumerate() {
        let record =
            result.with_context(|| format!("parsing row {} of {}", row + 1, path.display()))?;
        let vessel = Vessel::parse(&record.vessel).ok_or_else(|| {
            anyhow!(
                "unknown vessel '{}' in row {} of {}",
                record.vessel,
                row + 1,
                path.display()
            )
        })?;
        let point = Point2D::new(record.x, record.y);
        if !point.is_finite() {
            return Err(anyhow!("non-finite seed point in row {}", row + 1));
        }
        seeds.seeds[vessel.index()].push(point);
    }
    Ok(seeds)
}

pub fn read_image<P: AsRef<Path>>(path: P) -> Result<RgbaImage> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("decoding image {}", path.display()))?;
    Ok(img.to_rgba8())
}

#[cfg(test)]
mod input_tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;
    use std::io::Write;

    #[test]
    fn test_centerline_length_and_endpoints() {
        let cl = Centerline::from_points(&[
            Point2D::new(0.0, 0.0),
            Point2D::new(3.0, 4.0),
            Point2D::new(3.0, 10.0),
        ]);
        assert!(cl.is_usable());
        assert_relative_eq!(cl.length(), 11.0);
        assert_eq!(cl.first(), Some(Point2D::new(0.0, 0.0)));
        assert_eq!(cl.last(), Some(Point2D::new(3.0, 10.0)));
    }

    #[test]
    fn test_intensity_field_rejects_wrong_length() {
        assert!(matches!(
            IntensityField::new(4, 4, vec![0.0; 15]),
            Err(GeometryError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bilinear_sampling_interpolates() {
        let field = IntensityField::new(2, 2, vec![0.0, 10.0, 20.0, 30.0]).unwrap();
        assert_relative_eq!(field.sample_bilinear(0.5, 0.5), 15.0);
        assert_relative_eq!(field.sample_bilinear(1.0, 0.0), 10.0);
        // clamped outside
        assert_relative_eq!(field.sample_bilinear(-3.0, 5.0), 20.0);
    }

    #[test]
    fn test_from_rgba_inverts_luma() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let field = IntensityField::from_rgba(&img, true);
        assert_relative_eq!(field.get(0, 0), 255.0, epsilon = 1e-9);
        assert_relative_eq!(field.get(1, 0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_read_seed_points_groups_by_vessel() {
        let dir = std::env::temp_dir().join("bifurcars_seed_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seeds.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "vessel,x,y").unwrap();
        writeln!(file, "main,10,20").unwrap();
        writeln!(file, "branch1, 30, 40").unwrap();
        writeln!(file, "main,11,25").unwrap();
        writeln!(file, "b2,5,5").unwrap();
        drop(file);

        let seeds = read_seed_points(&path).unwrap();
        assert_eq!(
            seeds.get(Vessel::Main),
            &[Point2D::new(10.0, 20.0), Point2D::new(11.0, 25.0)]
        );
        assert_eq!(seeds.get(Vessel::Branch1), &[Point2D::new(30.0, 40.0)]);
        assert_eq!(seeds.get(Vessel::Branch2), &[Point2D::new(5.0, 5.0)]);
    }

    #[test]
    fn test_read_seed_points_unknown_vessel() {
        let dir = std::env::temp_dir().join("bifurcars_seed_test_bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("seeds.csv");
        std::fs::write(&path, "vessel,x,y\nleft_main,1,2\n").unwrap();
        assert!(read_seed_points(&path).is_err());
    }
}
