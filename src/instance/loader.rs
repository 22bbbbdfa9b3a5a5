use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::progress::{Cancelled, ProgressMonitor};
use crate::view_set::{ViewSet, ViewSetError};

use super::Instance;

/// Where a project comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Camera file of the project.
    pub view_set: PathBuf,
    /// Directory of the photographs. Defaults to the directory of the camera file.
    pub image_directory: Option<PathBuf>,
}

impl SourceDescriptor {
    pub fn new(view_set: impl Into<PathBuf>) -> Self {
        Self {
            view_set: view_set.into(),
            image_directory: None,
        }
    }

    pub fn with_image_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.image_directory = Some(directory.into());
        self
    }

    pub fn image_directory(&self) -> Option<&Path> {
        self.image_directory
            .as_deref()
            .or_else(|| self.view_set.parent())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Decode photographs into preview thumbnails while loading.
    pub generate_previews: bool,
    /// Longest edge of a preview thumbnail in pixels.
    pub thumbnail_size: u32,
    /// Only load the first `n` cameras.
    pub max_cameras: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            generate_previews: true,
            thumbnail_size: 96,
            max_cameras: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("loading stopped by user")]
    Cancelled(#[from] Cancelled),
    #[error("cannot read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    ViewSet(#[from] ViewSetError),
    #[error("cannot decode image {path:?}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid project source: {0}")]
    InvalidSource(String),
    #[error("loader panicked: {0}")]
    Panicked(String),
    #[error("GPU initialization failed: {0:#}")]
    Initialize(anyhow::Error),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Opens a project on a background thread.
///
/// Nothing in here may touch the GPU. Implementations poll
/// [`ProgressMonitor::allow_user_cancellation`] between expensive steps and return
/// [`LoadError::Cancelled`] when asked to stop.
pub trait ProjectLoader: Send + Sync + 'static {
    type Builder: InstanceBuilder;

    /// Parse and validate the source. The view set must be available afterwards.
    fn open(
        &self,
        source: &SourceDescriptor,
        options: &LoadOptions,
        monitor: &dyn ProgressMonitor,
    ) -> Result<Self::Builder, LoadError>;
}

/// A project whose metadata is known but whose resources are not built yet.
pub trait InstanceBuilder: Send + 'static {
    type Instance: Instance;

    fn view_set(&self) -> Arc<ViewSet>;

    /// Decode preview images. Runs as the first stage of a load.
    fn generate_previews(&mut self, monitor: &dyn ProgressMonitor) -> Result<(), LoadError>;

    /// Produce the not yet initialized instance. Stage indices start at zero.
    fn build(self, monitor: &dyn ProgressMonitor) -> Result<Self::Instance, LoadError>;
}
