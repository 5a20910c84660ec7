use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::error::{GeometryError, GeometryResult};
use crate::geometry::CArmGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerspectiveConfig {
    /// When false, views are analysed without perspective correction.
    pub enabled: bool,
    pub harris_k: f64,
    /// Half-size of the structure-tensor window (1 → 3×3).
    pub window_radius: usize,
    pub response_threshold: f64,
    pub max_corners: usize,
    /// Weaker responses closer than this to an accepted corner are dropped.
    pub min_corner_distance: f64,
    pub interpolation: Interpolation,
}

impl Default for PerspectiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            harris_k: 0.04,
            window_radius: 1,
            response_threshold: 1e6,
            max_corners: 4,
            min_corner_distance: 10.0,
            interpolation: Interpolation::Nearest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub search_radius: f64,
    pub step_size: f64,
    /// Weight of the straight seed-to-seed path when advancing the cursor;
    /// the local intensity centroid gets `1 - path_weight`.
    pub path_weight: f64,
    pub edge_margin: f64,
    pub smoothing_window: usize,
    pub segment_cap: f64,
    pub invert_intensity: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            search_radius: 5.0,
            step_size: 1.0,
            path_weight: 0.7,
            edge_margin: 2.0,
            smoothing_window: 3,
            segment_cap: 500.0,
            invert_intensity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Length of the re-derived segments in pixels (~0.5 cm).
    pub segment_length: f64,
    pub segment_step: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            segment_length: 25.0,
            segment_step: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refinement {
    HillClimb,
    GradientAscent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub main_weight: f64,
    pub grid_step: f64,
    pub refinement: Refinement,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub min_step: f64,
    pub gradient_delta: f64,
    /// Degrees moved per unit of score gradient (score per degree).
    pub learning_rate: f64,
    pub parallel: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            main_weight: 1.5,
            grid_step: 2.0,
            refinement: Refinement::HillClimb,
            max_iterations: 50,
            tolerance: 0.001,
            min_step: 0.05,
            gradient_delta: 0.1,
            learning_rate: 500.0,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fusion {
    Average,
    PlaneIntersection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub fusion: Fusion,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            fusion: Fusion::Average,
        }
    }
}

/// Region growing over a CT volume. Thresholds are in the volume's own
/// intensity units (HU for CT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub lower_threshold: f32,
    pub upper_threshold: f32,
    pub max_voxels: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            lower_threshold: 200.0,
            upper_threshold: 1000.0,
            max_voxels: 500_000,
        }
    }
}

/// All tunables of one analysis session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub perspective: PerspectiveConfig,
    pub tracker: TrackerConfig,
    pub locator: LocatorConfig,
    pub optimizer: OptimizerConfig,
    pub reconstruction: ReconstructionConfig,
    pub volume: VolumeConfig,
    pub carm: CArmGeometry,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text).context("parsing analysis config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> GeometryResult<()> {
        self.perspective.validate()?;
        self.tracker.validate()?;
        self.locator.validate()?;
        self.optimizer.validate()?;
        self.volume.validate()?;
        self.carm.validate()
    }
}

fn invalid(msg: &str) -> GeometryError {
    GeometryError::InvalidInput(msg.to_string())
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl PerspectiveConfig {
    pub fn validate(&self) -> GeometryResult<()> {
        if !self.harris_k.is_finite() || self.harris_k <= 0.0 || self.harris_k >= 0.25 {
            return Err(invalid("harris_k must be in (0, 0.25)"));
        }
        if self.window_radius == 0 {
            return Err(invalid("window_radius must be at least 1"));
        }
        if !self.response_threshold.is_finite() || self.min_corner_distance < 0.0 {
            return Err(invalid("corner thresholds must be finite and non-negative"));
        }
        if self.max_corners < 4 {
            return Err(invalid("max_corners must be at least 4"));
        }
        Ok(())
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> GeometryResult<()> {
        if !positive(self.search_radius) || !positive(self.step_size) {
            return Err(invalid("search_radius and step_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.path_weight) {
            return Err(invalid("path_weight must be in [0, 1]"));
        }
        if !self.edge_margin.is_finite() || self.edge_margin < 0.0 {
            return Err(invalid("edge_margin must be non-negative"));
        }
        if self.smoothing_window == 0 || self.smoothing_window % 2 == 0 {
            return Err(invalid("smoothing_window must be odd"));
        }
        if self.segment_cap.is_nan() || self.segment_cap <= 0.0 {
            return Err(invalid("segment_cap must be positive"));
        }
        Ok(())
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> GeometryResult<()> {
        if !positive(self.segment_length) || !positive(self.segment_step) {
            return Err(invalid("segment_length and segment_step must be positive"));
        }
        Ok(())
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> GeometryResult<()> {
        if !positive(self.main_weight) {
            return Err(invalid("main_weight must be positive"));
        }
        if !positive(self.grid_step) || self.grid_step > 45.0 {
            return Err(invalid("grid_step must be in (0, 45]"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be at least 1"));
        }
        if !positive(self.tolerance)
            || !positive(self.min_step)
            || !positive(self.gradient_delta)
            || !positive(self.learning_rate)
        {
            return Err(invalid("refinement constants must be positive"));
        }
        Ok(())
    }
}

impl VolumeConfig {
    pub fn validate(&self) -> GeometryResult<()> {
        if !self.lower_threshold.is_finite()
            || !self.upper_threshold.is_finite()
            || self.lower_threshold > self.upper_threshold
        {
            return Err(invalid("volume thresholds must satisfy lower <= upper"));
        }
        if self.max_voxels == 0 {
            return Err(invalid("max_voxels must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [tracker]
            search_radius = 7.0

            [optimizer]
            refinement = "gradient_ascent"
            grid_step = 1.0
        "#;
        let config = AnalysisConfig::from_toml_str(text).unwrap();
        assert_eq!(config.tracker.search_radius, 7.0);
        assert_eq!(config.tracker.path_weight, 0.7);
        assert_eq!(config.optimizer.refinement, Refinement::GradientAscent);
        assert_eq!(config.optimizer.grid_step, 1.0);
        assert_eq!(config.locator, LocatorConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AnalysisConfig::from_toml_str("[tracker]\npath_weight = 1.5\n").is_err());
        assert!(AnalysisConfig::from_toml_str("[tracker]\nsmoothing_window = 4\n").is_err());
        assert!(AnalysisConfig::from_toml_str("[optimizer]\ngrid_step = 0.0\n").is_err());
        let carm = "[carm]\nsource_to_isocenter_mm = 2000.0\n";
        assert!(AnalysisConfig::from_toml_str(carm).is_err());
        let volume = "[volume]\nlower_threshold = 900.0\nupper_threshold = 100.0\n";
        assert!(AnalysisConfig::from_toml_str(volume).is_err());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }
}
