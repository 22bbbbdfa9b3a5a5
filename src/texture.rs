//! GPU textures used by the viewer.
//!
//! Everything the viewer draws is composed with texture-to-texture copies, so all
//! textures here share one colour format and allow copies in both directions.

use crate::viewport::PixelRect;

/// A GPU texture with its default view.
#[derive(Clone, Debug)]
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl Texture {
    /// Colour format of every texture created here.
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    fn create(device: &wgpu::Device, size: wgpu::Extent3d, usage: wgpu::TextureUsages, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// Offscreen colour target that tiles are drawn into and that is blitted to the
    /// surface afterwards.
    pub fn create_render_target(device: &wgpu::Device, size: [u32; 2], label: &str) -> Self {
        let size = wgpu::Extent3d {
            width: size[0].max(1),
            height: size[1].max(1),
            depth_or_array_layers: 1,
        };
        Self::create(
            device,
            size,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            label,
        )
    }

    /// Upload an RGBA image.
    pub fn from_rgba(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &image::RgbaImage,
        label: &str,
    ) -> Self {
        let (width, height) = image.dimensions();
        Self::from_pixels(device, queue, [width, height], image.as_raw(), label)
    }

    /// A `size` texture filled with `colour`.
    pub fn solid(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: [u32; 2],
        colour: [u8; 4],
        label: &str,
    ) -> Self {
        let size = [size[0].max(1), size[1].max(1)];
        let pixels = vec![colour; size[0] as usize * size[1] as usize];
        Self::from_pixels(device, queue, size, bytemuck::cast_slice(&pixels), label)
    }

    fn from_pixels(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: [u32; 2],
        rgba: &[u8],
        label: &str,
    ) -> Self {
        let extent = wgpu::Extent3d {
            width: size[0],
            height: size[1],
            depth_or_array_layers: 1,
        };
        let texture = Self::create(
            device,
            extent,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            label,
        );

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size[0]),
                rows_per_image: Some(size[1]),
            },
            extent,
        );
        texture
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::sized(self.width(), self.height())
    }
}
