//! Camera viewports and tiled (subdivided) drawing.
//!
//! GPU drivers kill command submissions that run past a watchdog timeout. A large
//! model drawn into a large viewport can exceed that in a single submission, so a frame
//! is drawn as a grid of tiles instead: each tile gets its own cropped projection,
//! is drawn, and is flushed before the next one starts.
//!
//! The crop of a tile maps the tile's part of the clip volume onto the whole clip cube.
//! Because the tiles partition the clip volume, the tiled image is identical to the
//! image drawn in one go.

use cgmath::{Matrix4, Point3, SquareMatrix, Vector3, Vector4};
use serde::Deserialize;

/// Pixel rectangle with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering `width` x `height` pixels.
    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| PixelRect::new(x, y, right - x, bottom - y))
    }
}

/// Upper bound for the size of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

impl TileSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Effectively disables subdivision.
    pub fn unbounded() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }
}

impl Default for TileSize {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

/// Immutable view of the scene through a pixel rectangle.
///
/// `viewport_projection` is always `crop * full_projection`. It is computed once at
/// construction; a different crop means a new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraViewport {
    view: Matrix4<f32>,
    full_projection: Matrix4<f32>,
    crop: Matrix4<f32>,
    viewport_projection: Matrix4<f32>,
    rect: PixelRect,
}

impl CameraViewport {
    pub fn new(view: Matrix4<f32>, full_projection: Matrix4<f32>, rect: PixelRect) -> Self {
        Self::with_crop(view, full_projection, Matrix4::identity(), rect)
    }

    pub fn with_crop(
        view: Matrix4<f32>,
        full_projection: Matrix4<f32>,
        crop: Matrix4<f32>,
        rect: PixelRect,
    ) -> Self {
        Self {
            view,
            full_projection,
            crop,
            viewport_projection: crop * full_projection,
            rect,
        }
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn full_projection(&self) -> Matrix4<f32> {
        self.full_projection
    }

    pub fn crop(&self) -> Matrix4<f32> {
        self.crop
    }

    pub fn viewport_projection(&self) -> Matrix4<f32> {
        self.viewport_projection
    }

    pub fn rect(&self) -> PixelRect {
        self.rect
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.viewport_projection * self.view
    }

    /// Project a world-space point to framebuffer pixel coordinates.
    ///
    /// `z` of the result is the normalized device depth. Points behind the camera
    /// yield `None`.
    pub fn project(&self, point: Point3<f32>) -> Option<Point3<f32>> {
        let clip = self.view_projection() * Vector4::new(point.x, point.y, point.z, 1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Point3::new(
            self.rect.x as f32 + (ndc.x + 1.0) * 0.5 * self.rect.width as f32,
            self.rect.y as f32 + (1.0 - ndc.y) * 0.5 * self.rect.height as f32,
            ndc.z,
        ))
    }

    /// Viewport restricted to `tile`, a sub-rectangle of [`rect`](Self::rect).
    ///
    /// The returned crop rescales the tile's part of clip space to the full clip cube,
    /// on top of any crop this viewport already carries.
    pub fn tile(&self, tile: PixelRect) -> CameraViewport {
        if tile == self.rect {
            return *self;
        }
        let full_width = self.rect.width as f32;
        let full_height = self.rect.height as f32;
        let width = tile.width as f32;
        let height = tile.height as f32;
        let local_x = tile.x.saturating_sub(self.rect.x) as f32;
        let local_y = tile.y.saturating_sub(self.rect.y) as f32;

        // Tile centre in the clip space of this viewport; pixel rows grow downwards.
        let center_x = 2.0 * (local_x + width * 0.5) / full_width - 1.0;
        let center_y = 1.0 - 2.0 * (local_y + height * 0.5) / full_height;

        let crop = Matrix4::from_nonuniform_scale(full_width / width, full_height / height, 1.0)
            * Matrix4::from_translation(Vector3::new(-center_x, -center_y, 0.0))
            * self.crop;
        CameraViewport::with_crop(self.view, self.full_projection, crop, tile)
    }

    /// Tiles covering this viewport, row by row.
    pub fn tiles(&self, size: TileSize) -> Tiles {
        Tiles::new(*self, size)
    }
}

/// Iterator over the tiles of a viewport. Derived from the current rectangle every time.
#[derive(Debug, Clone)]
pub struct Tiles {
    viewport: CameraViewport,
    size: TileSize,
    x: u32,
    y: u32,
}

impl Tiles {
    fn new(viewport: CameraViewport, size: TileSize) -> Self {
        Self {
            viewport,
            size: TileSize::new(size.width.max(1), size.height.max(1)),
            x: 0,
            y: 0,
        }
    }

    /// Number of tiles needed for `rect`.
    pub fn count_for(rect: PixelRect, size: TileSize) -> usize {
        if rect.is_empty() {
            return 0;
        }
        let columns = rect.width.div_ceil(size.width.max(1));
        let rows = rect.height.div_ceil(size.height.max(1));
        columns as usize * rows as usize
    }
}

impl Iterator for Tiles {
    type Item = CameraViewport;

    fn next(&mut self) -> Option<Self::Item> {
        let rect = self.viewport.rect();
        if rect.is_empty() || self.y >= rect.height {
            return None;
        }
        let width = self.size.width.min(rect.width - self.x);
        let height = self.size.height.min(rect.height - self.y);
        let tile = PixelRect::new(rect.x + self.x, rect.y + self.y, width, height);

        self.x = self.x.saturating_add(self.size.width);
        if self.x >= rect.width {
            self.x = 0;
            self.y = self.y.saturating_add(self.size.height);
        }
        Some(self.viewport.tile(tile))
    }
}

/// Draw target whose queued work can be submitted explicitly.
pub trait Framebuffer {
    /// Size in pixels.
    fn size(&self) -> (u32, u32);

    /// Submit everything recorded so far as one unit of GPU work.
    fn flush(&mut self) -> anyhow::Result<()>;
}

/// Draw `viewport` into `framebuffer` as a grid of tiles no larger than `tile`.
///
/// `draw` is invoked once per tile with the tile's cropped viewport and the
/// framebuffer is flushed after each tile. Returns the number of tiles drawn.
pub fn draw_in_subdivisions<F, D>(
    framebuffer: &mut F,
    tile: TileSize,
    viewport: &CameraViewport,
    mut draw: D,
) -> anyhow::Result<usize>
where
    F: Framebuffer + ?Sized,
    D: FnMut(&mut F, &CameraViewport) -> anyhow::Result<()>,
{
    let (width, height) = framebuffer.size();
    let rect = viewport.rect();
    if rect.right() > width || rect.bottom() > height {
        log::debug!(
            "Viewport {:?} extends past the {}x{} framebuffer",
            rect,
            width,
            height
        );
    }

    let mut drawn = 0;
    for tile_viewport in viewport.tiles(tile) {
        draw(framebuffer, &tile_viewport)?;
        framebuffer.flush()?;
        drawn += 1;
    }
    Ok(drawn)
}
