//! Preview rendering of a project before its materials are fitted.
//!
//! [`PreviewLoader`] reads a JSON view set, [`PreviewBuilder`] decodes every photograph
//! into a thumbnail on the loading thread and packs them into an atlas, and
//! [`PreviewInstance`] draws each thumbnail where its camera projects to. Lights and
//! cameras without a photograph are drawn as solid markers.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use cgmath::Point3;
use image::RgbaImage;

use crate::context::Gpu;
use crate::framebuffer::GpuFramebuffer;
use crate::instance::{Instance, InstanceBuilder, LoadError, LoadOptions, ProjectLoader, SourceDescriptor};
use crate::progress::ProgressMonitor;
use crate::texture::Texture;
use crate::view_set::ViewSet;
use crate::viewport::{CameraViewport, Framebuffer, PixelRect};

const CAMERA_MARKER_COLOUR: [u8; 4] = [235, 180, 40, 255];
const LIGHT_MARKER_COLOUR: [u8; 4] = [255, 255, 255, 255];

#[derive(Debug, Clone, Copy)]
pub struct PreviewLoader {
    marker_size: u32,
}

impl Default for PreviewLoader {
    fn default() -> Self {
        Self { marker_size: 6 }
    }
}

impl PreviewLoader {
    pub fn new(marker_size: u32) -> Self {
        Self {
            marker_size: marker_size.max(1),
        }
    }
}

impl ProjectLoader for PreviewLoader {
    type Builder = PreviewBuilder;

    fn open(
        &self,
        source: &SourceDescriptor,
        options: &LoadOptions,
        monitor: &dyn ProgressMonitor,
    ) -> Result<PreviewBuilder, LoadError> {
        if options.thumbnail_size == 0 {
            return Err(LoadError::InvalidSource(
                "thumbnail size must be positive".into(),
            ));
        }
        let json = std::fs::read_to_string(&source.view_set).map_err(|error| LoadError::Io {
            path: source.view_set.clone(),
            source: error,
        })?;
        monitor.allow_user_cancellation()?;

        let root = source
            .image_directory()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut view_set = ViewSet::from_json_str(&json, root)?;
        if let Some(max) = options.max_cameras {
            view_set.cameras.truncate(max.max(1));
        }
        log::info!(
            "Opened view set {:?} with {} cameras and {} lights",
            view_set.name,
            view_set.cameras.len(),
            view_set.lights.len()
        );

        let cameras = view_set.cameras.len();
        Ok(PreviewBuilder {
            view_set: Arc::new(view_set),
            options: options.clone(),
            marker_size: self.marker_size,
            thumbnails: vec![None; cameras],
        })
    }
}

pub struct PreviewBuilder {
    view_set: Arc<ViewSet>,
    options: LoadOptions,
    marker_size: u32,
    thumbnails: Vec<Option<RgbaImage>>,
}

impl InstanceBuilder for PreviewBuilder {
    type Instance = PreviewInstance;

    fn view_set(&self) -> Arc<ViewSet> {
        Arc::clone(&self.view_set)
    }

    fn generate_previews(&mut self, monitor: &dyn ProgressMonitor) -> Result<(), LoadError> {
        if !self.options.generate_previews {
            return Ok(());
        }
        let size = self.options.thumbnail_size;
        monitor.set_max_progress(self.view_set.cameras.len() as f64);
        for (index, camera) in self.view_set.cameras.iter().enumerate() {
            monitor.allow_user_cancellation()?;
            if let Some(path) = self.view_set.image_path(index) {
                let photo = image::open(&path).map_err(|source| LoadError::Image {
                    path: path.clone(),
                    source,
                })?;
                self.thumbnails[index] = Some(photo.thumbnail(size, size).to_rgba8());
            }
            monitor.set_progress((index + 1) as f64, &camera.name);
        }
        Ok(())
    }

    fn build(self, monitor: &dyn ProgressMonitor) -> Result<PreviewInstance, LoadError> {
        monitor.set_stage_count(1);
        monitor.set_stage(0, "Packing preview atlas");
        monitor.allow_user_cancellation()?;
        let (atlas, regions) = pack_atlas(&self.thumbnails, monitor)?;
        Ok(PreviewInstance {
            view_set: self.view_set,
            thumbnails: self.thumbnails,
            atlas,
            regions,
            marker_size: self.marker_size,
            resources: None,
        })
    }
}

/// Lay thumbnails out on a square grid. Returns the atlas and each camera's region.
fn pack_atlas(
    thumbnails: &[Option<RgbaImage>],
    monitor: &dyn ProgressMonitor,
) -> Result<(RgbaImage, Vec<Option<PixelRect>>), LoadError> {
    let mut regions = vec![None; thumbnails.len()];
    let count = thumbnails.iter().flatten().count() as u32;
    if count == 0 {
        return Ok((RgbaImage::new(1, 1), regions));
    }
    let cell = thumbnails
        .iter()
        .flatten()
        .map(|thumbnail| thumbnail.width().max(thumbnail.height()))
        .max()
        .unwrap_or(1);
    let columns = (count as f64).sqrt().ceil() as u32;
    let rows = count.div_ceil(columns);
    let mut atlas = RgbaImage::new(columns * cell, rows * cell);

    monitor.set_max_progress(count as f64);
    let placed = thumbnails
        .iter()
        .enumerate()
        .filter_map(|(index, thumbnail)| thumbnail.as_ref().map(|t| (index, t)));
    for (slot, (index, thumbnail)) in placed.enumerate() {
        monitor.allow_user_cancellation()?;
        let slot = slot as u32;
        let x = (slot % columns) * cell;
        let y = (slot / columns) * cell;
        image::imageops::replace(&mut atlas, thumbnail, x as i64, y as i64);
        regions[index] = Some(PixelRect::new(x, y, thumbnail.width(), thumbnail.height()));
        monitor.set_progress((slot + 1) as f64, "");
    }
    Ok((atlas, regions))
}

struct PreviewResources {
    atlas: Texture,
    camera_marker: Texture,
    light_marker: Texture,
}

enum SpriteSource {
    Atlas(PixelRect),
    CameraMarker,
    LightMarker,
}

struct Sprite {
    center: Point3<f32>,
    source: SpriteSource,
}

/// Thumbnails and markers drawn at their projected positions.
pub struct PreviewInstance {
    view_set: Arc<ViewSet>,
    thumbnails: Vec<Option<RgbaImage>>,
    atlas: RgbaImage,
    regions: Vec<Option<PixelRect>>,
    marker_size: u32,
    resources: Option<PreviewResources>,
}

impl PreviewInstance {
    /// Preview thumbnail of `camera`, if its photograph was decoded.
    pub fn thumbnail(&self, camera: usize) -> Option<&RgbaImage> {
        self.thumbnails.get(camera)?.as_ref()
    }

    pub fn atlas(&self) -> &RgbaImage {
        &self.atlas
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    fn sprites(&self, viewport: &CameraViewport) -> Vec<Sprite> {
        let cameras = self.view_set.cameras.iter().enumerate().map(|(index, camera)| {
            let source = match self.regions.get(index).copied().flatten() {
                Some(region) => SpriteSource::Atlas(region),
                None => SpriteSource::CameraMarker,
            };
            (camera.position(), source)
        });
        let lights = self
            .view_set
            .lights
            .iter()
            .map(|light| (Point3::from(light.position), SpriteSource::LightMarker));

        let mut sprites: Vec<Sprite> = cameras
            .chain(lights)
            .filter_map(|(position, source)| {
                let center = viewport.project(position)?;
                (-1.0..=1.0)
                    .contains(&center.z)
                    .then_some(Sprite { center, source })
            })
            .collect();
        // Back to front, so nearer sprites overwrite farther ones.
        sprites.sort_by(|a, b| {
            b.center
                .z
                .partial_cmp(&a.center.z)
                .unwrap_or(Ordering::Equal)
        });
        sprites
    }
}

/// Clip a `width` x `height` sprite centred at (`x`, `y`) to `bounds`.
///
/// Returns the visible destination rectangle and the offset of its top-left corner
/// inside the sprite.
fn clip_sprite(x: f32, y: f32, width: u32, height: u32, bounds: PixelRect) -> Option<(PixelRect, u32, u32)> {
    let left = (x - width as f32 * 0.5).round() as i64;
    let top = (y - height as f32 * 0.5).round() as i64;
    let right = (left + width as i64).min(bounds.right() as i64);
    let bottom = (top + height as i64).min(bounds.bottom() as i64);
    let clipped_left = left.max(bounds.x as i64);
    let clipped_top = top.max(bounds.y as i64);
    if right <= clipped_left || bottom <= clipped_top {
        return None;
    }
    Some((
        PixelRect::new(
            clipped_left as u32,
            clipped_top as u32,
            (right - clipped_left) as u32,
            (bottom - clipped_top) as u32,
        ),
        (clipped_left - left) as u32,
        (clipped_top - top) as u32,
    ))
}

impl Instance for PreviewInstance {
    type Gpu = Gpu;
    type Target = GpuFramebuffer;

    fn initialize(&mut self, gpu: &Gpu) -> anyhow::Result<()> {
        let max = gpu.max_texture_dimension();
        if self.atlas.width() > max || self.atlas.height() > max {
            anyhow::bail!(
                "Preview atlas of {}x{} exceeds the {} pixel texture limit",
                self.atlas.width(),
                self.atlas.height(),
                max
            );
        }
        let marker = [self.marker_size, self.marker_size];
        self.resources = Some(PreviewResources {
            atlas: Texture::from_rgba(&gpu.device, &gpu.queue, &self.atlas, "Preview Atlas"),
            camera_marker: Texture::solid(
                &gpu.device,
                &gpu.queue,
                marker,
                CAMERA_MARKER_COLOUR,
                "Camera Marker",
            ),
            light_marker: Texture::solid(
                &gpu.device,
                &gpu.queue,
                marker,
                LIGHT_MARKER_COLOUR,
                "Light Marker",
            ),
        });
        Ok(())
    }

    fn draw(
        &self,
        _gpu: &Gpu,
        target: &mut GpuFramebuffer,
        viewport: &CameraViewport,
    ) -> anyhow::Result<()> {
        let resources = self
            .resources
            .as_ref()
            .context("Preview drawn before initialization")?;
        let (width, height) = target.size();
        let Some(bounds) = viewport.rect().intersect(&PixelRect::sized(width, height)) else {
            return Ok(());
        };

        for sprite in self.sprites(viewport) {
            let (texture, region) = match sprite.source {
                SpriteSource::Atlas(region) => (&resources.atlas, region),
                SpriteSource::CameraMarker => (&resources.camera_marker, resources.camera_marker.bounds()),
                SpriteSource::LightMarker => (&resources.light_marker, resources.light_marker.bounds()),
            };
            if let Some((destination, dx, dy)) =
                clip_sprite(sprite.center.x, sprite.center.y, region.width, region.height, bounds)
            {
                target.copy_region(texture, (region.x + dx, region.y + dy), destination);
            }
        }
        Ok(())
    }

    fn close(self, _gpu: &Gpu) -> anyhow::Result<()> {
        if let Some(resources) = self.resources {
            resources.atlas.texture.destroy();
            resources.camera_marker.texture.destroy();
            resources.light_marker.texture.destroy();
        }
        log::debug!("Closed preview of {:?}", self.view_set.name);
        Ok(())
    }

    fn view_set(&self) -> &Arc<ViewSet> {
        &self.view_set
    }

    fn is_processed(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_inside_bounds_is_unclipped() {
        let bounds = PixelRect::sized(100, 100);
        let (rect, dx, dy) = clip_sprite(50.0, 50.0, 10, 10, bounds).unwrap();
        assert_eq!(rect, PixelRect::new(45, 45, 10, 10));
        assert_eq!((dx, dy), (0, 0));
    }

    #[test]
    fn sprite_crossing_a_tile_edge_is_split() {
        let left = PixelRect::new(0, 0, 50, 100);
        let right = PixelRect::new(50, 0, 50, 100);
        let (a, ax, _) = clip_sprite(50.0, 50.0, 10, 10, left).unwrap();
        let (b, bx, _) = clip_sprite(50.0, 50.0, 10, 10, right).unwrap();
        assert_eq!(a, PixelRect::new(45, 45, 5, 10));
        assert_eq!(ax, 0);
        assert_eq!(b, PixelRect::new(50, 45, 5, 10));
        assert_eq!(bx, 5);
    }

    #[test]
    fn sprite_outside_bounds_is_dropped() {
        assert!(clip_sprite(-20.0, 50.0, 10, 10, PixelRect::sized(100, 100)).is_none());
    }
}
