//! Offscreen wgpu path for the shader-domain effects.
//!
//! A [`FragmentPass`] draws one full-screen triangle through a WGSL fragment
//! program that reads the source frame (and optionally a glyph atlas) with
//! `textureLoad`, so the GPU output matches the CPU reference texel for texel.
//!
//! Bindings shared by every program:
//!   - `@binding(0)` source frame, `Rgba8Unorm`
//!   - `@binding(1)` per-effect uniform struct
//!   - `@binding(2)` glyph atlas, `R8Unorm` (only when the pass uses one)

use std::num::NonZeroU32;
use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use wgpu::util::DeviceExt;

use crate::frame::FrameBuffer;
use crate::glyph_atlas::GlyphAtlas;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Device and queue shared by every pass.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl GpuContext {
    /// Blocking adapter and device request. Fails with "no suitable GPU
    /// adapter found" on machines without one.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glitchlab-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Ok(Self {
            device,
            queue,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn check_validation(&self, what: &str) -> Result<()> {
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("{what}: {error}");
        }
        Ok(())
    }
}

pub struct FragmentPass {
    label: String,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_size: usize,
    uses_atlas: bool,
    atlas_view: Option<wgpu::TextureView>,
}

impl FragmentPass {
    pub fn new(
        gpu: &GpuContext,
        label: &str,
        wgsl_source: &str,
        uniform_size: usize,
        uses_atlas: bool,
    ) -> Result<Self> {
        if uniform_size == 0 || uniform_size % 16 != 0 {
            bail!("{label}: uniform block of {uniform_size} bytes is not a 16-byte multiple");
        }
        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(wgsl_source.into()),
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let mut layout_entries = vec![
            texture_entry(0),
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(uniform_size as u64),
                },
                count: None,
            },
        ];
        if uses_atlas {
            layout_entries.push(texture_entry(2));
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label}-bgl")),
            entries: &layout_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label}-layout")),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{label}-pipeline")),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label}-uniforms")),
            size: uniform_size as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        gpu.check_validation(&format!("failed to build {label} pipeline"))?;

        Ok(Self {
            label: label.to_owned(),
            pipeline,
            bind_group_layout,
            uniform_buffer,
            uniform_size,
            uses_atlas,
            atlas_view: None,
        })
    }

    /// Replace the atlas texture bound at `@binding(2)`.
    pub fn upload_atlas(&mut self, gpu: &GpuContext, atlas: &GlyphAtlas) -> Result<()> {
        if !self.uses_atlas {
            bail!("{} pass has no atlas binding", self.label);
        }
        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(&format!("{}-atlas", self.label)),
                size: wgpu::Extent3d {
                    width: atlas.width(),
                    height: atlas.height(),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            atlas.as_bytes(),
        );
        self.atlas_view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        Ok(())
    }

    /// Render `source` through the program and read the result back.
    pub fn run(&self, gpu: &GpuContext, source: &FrameBuffer, uniforms: &[u8]) -> Result<FrameBuffer> {
        if uniforms.len() != self.uniform_size {
            bail!(
                "{}: expected {} uniform bytes, got {}",
                self.label,
                self.uniform_size,
                uniforms.len()
            );
        }
        if source.is_empty() {
            return Ok(source.clone());
        }
        let atlas_view = match (self.uses_atlas, &self.atlas_view) {
            (true, None) => bail!("{} pass has no atlas uploaded", self.label),
            (_, view) => view.as_ref(),
        };

        let device = &gpu.device;
        let width = source.width();
        let height = source.height();
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        gpu.queue.write_buffer(&self.uniform_buffer, 0, uniforms);

        let input = device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(&format!("{}-input", self.label)),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            source.as_bytes(),
        );
        let input_view = input.create_view(&wgpu::TextureViewDescriptor::default());

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{}-target", self.label)),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}-readback", self.label)),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&input_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: self.uniform_buffer.as_entire_binding(),
            },
        ];
        if let Some(view) = atlas_view {
            entries.push(wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}-bg", self.label)),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{}-encoder", self.label)),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&format!("{}-pass", self.label)),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1); // full-screen triangle
        }

        let padded = NonZeroU32::new(padded_bytes_per_row)
            .ok_or_else(|| anyhow!("invalid padded row size {padded_bytes_per_row}"))?;
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded.get()),
                    rows_per_image: Some(height),
                },
            },
            extent,
        );
        gpu.queue.submit(Some(encoder.finish()));
        gpu.check_validation(&format!("{} pass failed", self.label))?;

        let slice = readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = slice.get_mapped_range();
        let row = unpadded_bytes_per_row as usize;
        let mut pixels = Vec::with_capacity(row * height as usize);
        for chunk in mapped.chunks(padded_bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&chunk[..row]);
        }
        drop(mapped);
        readback.unmap();

        FrameBuffer::from_rgba(width, height, pixels)
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::align_to;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(align_to(4, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
        assert_eq!(align_to(256, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
        assert_eq!(align_to(260, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 512);
    }
}
