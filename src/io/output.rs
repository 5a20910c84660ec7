use anyhow::{Context, Result};
use csv::WriterBuilder;
use image::RgbaImage;
use serde::Serialize;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::io::input::VesselSet;

#[derive(Debug, Serialize)]
struct CenterlineRow {
    vessel: String,
    index: usize,
    x: f64,
    y: f64,
    intensity: Option<f64>,
}

/// Writes all three centerlines to one CSV with a
/// `vessel,index,x,y,intensity` header. Missing intensities stay empty.
pub fn write_centerlines_csv<P: AsRef<Path>>(path: P, lines: &VesselSet) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    for (vessel, line) in lines.iter() {
        for (index, p) in line.points.iter().enumerate() {
            wtr.serialize(CenterlineRow {
                vessel: vessel.to_string(),
                index,
                x: p.point.x,
                y: p.point.y,
                intensity: p.intensity,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("writing {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

pub fn save_image<P: AsRef<Path>>(path: P, image: &RgbaImage) -> Result<()> {
    let path = path.as_ref();
    image
        .save(path)
        .with_context(|| format!("saving image {}", path.display()))
}
