//! Camera poses, projections and lights of a photogrammetry project.
//!
//! A [`ViewSet`] is produced once by a loader and never mutated afterwards; everything
//! downstream holds it through an `Arc`.
//!
//! The reference loader reads it from JSON:
//!
//! ```json
//! {
//!   "name": "statue",
//!   "projections": [{ "vertical_fov_degrees": 40.0, "aspect": 1.5 }],
//!   "lights": [{ "position": [0.0, 0.0, 0.0], "intensity": [1.0, 1.0, 1.0] }],
//!   "cameras": [
//!     { "name": "IMG_0001", "position": [0.0, 0.0, 5.0], "target": [0.0, 0.0, 0.0],
//!       "image": "IMG_0001.jpg", "light": 0 }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use cgmath::{EuclideanSpace, MetricSpace, Point3};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ViewSetError {
    #[error("cannot read view set {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed view set")]
    Parse(#[from] serde_json::Error),
    #[error("invalid view set: {0}")]
    Invalid(String),
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    #[serde(default)]
    pub name: String,
    pub position: [f32; 3],
    pub target: [f32; 3],
    #[serde(default = "default_up")]
    pub up: [f32; 3],
    /// Index into [`ViewSet::projections`].
    #[serde(default)]
    pub projection: usize,
    /// Photograph taken from this pose, relative to the view set's directory.
    #[serde(default)]
    pub image: Option<PathBuf>,
    /// Index into [`ViewSet::lights`] for the light active in this photograph.
    #[serde(default)]
    pub light: Option<usize>,
}

impl CameraPose {
    pub fn position(&self) -> Point3<f32> {
        self.position.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub vertical_fov_degrees: f32,
    pub aspect: f32,
}

impl Default for ProjectionRecord {
    fn default() -> Self {
        Self {
            vertical_fov_degrees: 45.0,
            aspect: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightRecord {
    pub position: [f32; 3],
    #[serde(default = "unit_intensity")]
    pub intensity: [f32; 3],
}

fn unit_intensity() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewSet {
    #[serde(default)]
    pub name: String,
    pub cameras: Vec<CameraPose>,
    #[serde(default)]
    pub projections: Vec<ProjectionRecord>,
    #[serde(default)]
    pub lights: Vec<LightRecord>,
    #[serde(skip)]
    root: PathBuf,
}

impl ViewSet {
    pub fn new(name: impl Into<String>, cameras: Vec<CameraPose>) -> Self {
        Self {
            name: name.into(),
            cameras,
            projections: vec![ProjectionRecord::default()],
            lights: Vec::new(),
            root: PathBuf::new(),
        }
    }

    /// Parse and validate a view set. Image paths resolve against `root`.
    pub fn from_json_str(json: &str, root: impl Into<PathBuf>) -> Result<Self, ViewSetError> {
        let mut view_set: ViewSet = serde_json::from_str(json)?;
        view_set.root = root.into();
        if view_set.projections.is_empty() {
            view_set.projections.push(ProjectionRecord::default());
        }
        view_set.validate()?;
        Ok(view_set)
    }

    pub fn from_file(path: &Path) -> Result<Self, ViewSetError> {
        let json = std::fs::read_to_string(path).map_err(|source| ViewSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json_str(&json, root)
    }

    pub fn to_json_pretty(&self) -> Result<String, ViewSetError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ViewSetError> {
        if self.cameras.is_empty() {
            return Err(ViewSetError::Invalid("no cameras".into()));
        }
        for (index, camera) in self.cameras.iter().enumerate() {
            let finite = camera
                .position
                .iter()
                .chain(camera.target.iter())
                .chain(camera.up.iter())
                .all(|v| v.is_finite());
            if !finite {
                return Err(ViewSetError::Invalid(format!(
                    "camera {} has non-finite coordinates",
                    index
                )));
            }
            if camera.position == camera.target {
                return Err(ViewSetError::Invalid(format!(
                    "camera {} looks at its own position",
                    index
                )));
            }
            if camera.projection >= self.projections.len() {
                return Err(ViewSetError::Invalid(format!(
                    "camera {} references missing projection {}",
                    index, camera.projection
                )));
            }
            if let Some(light) = camera.light {
                if light >= self.lights.len() {
                    return Err(ViewSetError::Invalid(format!(
                        "camera {} references missing light {}",
                        index, light
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the photograph of `camera`, if it has one.
    pub fn image_path(&self, camera: usize) -> Option<PathBuf> {
        let image = self.cameras.get(camera)?.image.as_ref()?;
        Some(self.root.join(image))
    }

    pub fn centroid(&self) -> Point3<f32> {
        if self.cameras.is_empty() {
            return Point3::origin();
        }
        Point3::centroid(
            &self
                .cameras
                .iter()
                .map(CameraPose::position)
                .collect::<Vec<_>>(),
        )
    }

    /// Radius of the sphere around [`centroid`](Self::centroid) enclosing every camera
    /// and light. Used as the model's bounding size.
    pub fn bounding_radius(&self) -> f32 {
        let center = self.centroid();
        self.cameras
            .iter()
            .map(CameraPose::position)
            .chain(self.lights.iter().map(|light| Point3::from(light.position)))
            .map(|point| point.distance(center))
            .fold(0.0, f32::max)
    }
}
