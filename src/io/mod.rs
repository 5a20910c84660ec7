pub mod input;
pub mod output;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::GeometryResult;
use crate::geometry::ProjectionAngles;

/// One acquisition as listed in a session manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInput {
    #[serde(default)]
    pub label: String,
    pub image: PathBuf,
    /// CSV with `vessel,x,y` rows in the (corrected) image's pixel frame.
    pub seeds: PathBuf,
    pub rao_lao: f64,
    pub cranial_caudal: f64,
}

impl ViewInput {
    pub fn angles(&self) -> GeometryResult<ProjectionAngles> {
        ProjectionAngles::new(self.rao_lao, self.cranial_caudal)
    }
}

/// Inputs of one two-view session.
///
/// ```json
/// {
///   "views": [
///     {"label": "lao", "image": "view1.png", "seeds": "view1.csv",
///      "rao_lao": -30.0, "cranial_caudal": 20.0},
///     {"label": "rao", "image": "view2.png", "seeds": "view2.csv",
///      "rao_lao": 30.0, "cranial_caudal": -15.0}
///   ],
///   "output_dir": "out",
///   "config": "analysis.toml"
/// }
/// ```
///
/// Relative paths are resolved against the manifest's directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub views: Vec<ViewInput>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub config: Option<PathBuf>,
}

impl SessionManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening manifest {}", path.display()))?;
        let mut manifest: SessionManifest = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        if manifest.views.len() != 2 {
            bail!(
                "manifest {} lists {} views, exactly 2 are required",
                path.display(),
                manifest.views.len()
            );
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
        for view in manifest.views.iter_mut() {
            view.image = resolve(&view.image);
            view.seeds = resolve(&view.seeds);
            view.angles()
                .with_context(|| format!("view '{}' in {}", view.label, path.display()))?;
        }
        manifest.output_dir = resolve(&manifest.output_dir);
        manifest.config = manifest.config.as_deref().map(resolve);
        Ok(manifest)
    }
}
