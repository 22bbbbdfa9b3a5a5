//! Exporting the loaded project.
//!
//! Exports are only reachable through [`ExportRequest`], a queued operation, so they
//! always run on the render thread against an active instance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::instance::Instance;
use crate::preview::PreviewInstance;
use crate::progress::ProgressMonitor;
use crate::request::{ObservableRequest, RequestError};

/// Name of the view set file inside an export directory.
pub const MANIFEST_FILE: &str = "view_set.json";
const THUMBNAIL_DIRECTORY: &str = "thumbnails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    pub include_thumbnails: bool,
    /// Replace an existing export in the output directory.
    pub overwrite: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            include_thumbnails: true,
            overwrite: false,
        }
    }
}

/// Writes an instance somewhere.
pub trait Exporter<I: Instance>: Send + Sync + 'static {
    fn save_export(
        &self,
        instance: &I,
        output: &Path,
        settings: &ExportSettings,
        monitor: &dyn ProgressMonitor,
    ) -> Result<(), RequestError>;
}

/// Queued export of the active instance.
pub struct ExportRequest<E> {
    exporter: Arc<E>,
    output: PathBuf,
    settings: ExportSettings,
}

impl<E> ExportRequest<E> {
    pub fn new(exporter: Arc<E>, output: impl Into<PathBuf>, settings: ExportSettings) -> Self {
        Self {
            exporter,
            output: output.into(),
            settings,
        }
    }
}

impl<I, E> ObservableRequest<I> for ExportRequest<E>
where
    I: Instance,
    E: Exporter<I>,
{
    fn execute(
        self: Box<Self>,
        _gpu: &I::Gpu,
        instance: &Arc<I>,
        monitor: &dyn ProgressMonitor,
    ) -> Result<(), RequestError> {
        monitor.set_process_name("Exporting project");
        log::info!("Exporting to {:?}", self.output);
        self.exporter
            .save_export(instance, &self.output, &self.settings, monitor)
    }
}

/// Writes the view set as JSON and every preview thumbnail as PNG.
///
/// An export that is cancelled or fails removes the files it already wrote.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryExporter;

impl DirectoryExporter {
    fn write_thumbnails(
        &self,
        instance: &PreviewInstance,
        directory: &Path,
        monitor: &dyn ProgressMonitor,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), RequestError> {
        fs::create_dir_all(directory)
            .with_context(|| format!("Cannot create {:?}", directory))?;
        let cameras = &instance.view_set().cameras;
        monitor.set_max_progress(cameras.len() as f64);
        for index in 0..cameras.len() {
            monitor.allow_user_cancellation()?;
            if let Some(thumbnail) = instance.thumbnail(index) {
                let path = directory.join(format!("{:04}.png", index));
                thumbnail
                    .save_with_format(&path, image::ImageFormat::Png)
                    .with_context(|| format!("Cannot write {:?}", path))?;
                written.push(path);
            }
            monitor.set_progress((index + 1) as f64, &cameras[index].name);
        }
        Ok(())
    }
}

impl DirectoryExporter {
    fn write_all(
        &self,
        instance: &PreviewInstance,
        output: &Path,
        settings: &ExportSettings,
        monitor: &dyn ProgressMonitor,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), RequestError> {
        monitor.set_stage_count(2);
        monitor.set_stage(0, "Writing view set");
        let manifest = output.join(MANIFEST_FILE);
        let json = instance
            .view_set()
            .to_json_pretty()
            .context("Cannot serialize the view set")?;
        fs::write(&manifest, json).with_context(|| format!("Cannot write {:?}", manifest))?;
        written.push(manifest);

        monitor.set_stage(1, "Writing thumbnails");
        if settings.include_thumbnails {
            self.write_thumbnails(instance, &output.join(THUMBNAIL_DIRECTORY), monitor, written)?;
        }
        Ok(())
    }
}

impl Exporter<PreviewInstance> for DirectoryExporter {
    fn save_export(
        &self,
        instance: &PreviewInstance,
        output: &Path,
        settings: &ExportSettings,
        monitor: &dyn ProgressMonitor,
    ) -> Result<(), RequestError> {
        let manifest = output.join(MANIFEST_FILE);
        if manifest.exists() && !settings.overwrite {
            return Err(anyhow::anyhow!("{:?} already exists", manifest).into());
        }
        fs::create_dir_all(output).with_context(|| format!("Cannot create {:?}", output))?;

        let mut written = Vec::new();
        let result = self.write_all(instance, output, settings, monitor, &mut written);
        if result.is_err() {
            for path in &written {
                if let Err(error) = fs::remove_file(path) {
                    log::warn!("Cannot remove partial export {:?}: {}", path, error);
                }
            }
        }
        result
    }
}
