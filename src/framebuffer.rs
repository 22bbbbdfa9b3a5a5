use std::iter;

use crate::context::Gpu;
use crate::texture::Texture;
use crate::viewport::{Framebuffer, PixelRect};

/// Offscreen wgpu framebuffer.
///
/// Work is recorded into a lazily created command encoder and submitted to the queue
/// on [`flush`](Framebuffer::flush), so every tile of a subdivided draw becomes its
/// own queue submission.
pub struct GpuFramebuffer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: Texture,
    encoder: Option<wgpu::CommandEncoder>,
    submissions: usize,
}

impl GpuFramebuffer {
    pub fn new(gpu: &Gpu, width: u32, height: u32) -> Self {
        Self {
            device: gpu.device.clone(),
            queue: gpu.queue.clone(),
            target: Texture::create_render_target(&gpu.device, [width, height], "Offscreen Target"),
            encoder: None,
            submissions: 0,
        }
    }

    /// Recreate the target if its size changed. Unsubmitted work is discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == self.size() {
            return;
        }
        if self.encoder.take().is_some() {
            log::debug!("Discarding unsubmitted work on resize");
        }
        self.target =
            Texture::create_render_target(&self.device, [width, height], "Offscreen Target");
    }

    pub fn texture(&self) -> &Texture {
        &self.target
    }

    /// Number of queue submissions made so far.
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tile Encoder"),
            })
        })
    }

    /// Record a clear of the whole target.
    pub fn clear(&mut self, colour: wgpu::Color) {
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Tile Encoder"),
            })
        });
        let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(colour),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });
    }

    /// Record a copy of `source_origin` in `source` to `destination` in the target.
    ///
    /// The caller clips `destination` to the target; the source region has the same size.
    pub fn copy_region(&mut self, source: &Texture, source_origin: (u32, u32), destination: PixelRect) {
        if destination.is_empty() {
            return;
        }
        let target = self.target.texture.clone();
        self.encoder().copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: source_origin.0,
                    y: source_origin.1,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: destination.x,
                    y: destination.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: destination.width,
                height: destination.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl Framebuffer for GpuFramebuffer {
    fn size(&self) -> (u32, u32) {
        (self.target.width(), self.target.height())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(iter::once(encoder.finish()));
            self.submissions += 1;
        }
        Ok(())
    }
}
