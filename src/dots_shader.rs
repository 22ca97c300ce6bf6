//! Dot screen effect: WGSL program plus the CPU reference it must match.

use std::sync::Arc;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, FrameBuffer, OPAQUE_BLACK};
use crate::gpu::{FragmentPass, GpuContext};
use crate::schema::{DotShape, DotsParams, EffectKind, EffectParams};

pub const DOTS_WGSL: &str = include_str!("../shaders/dots.wgsl");

const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Matches `DotsUniforms` in dots.wgsl. 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DotsUniforms {
    pub resolution: [f32; 2],
    pub grid_size: f32,
    pub dot_scale: f32,
    pub threshold: f32,
    pub shape: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl DotsUniforms {
    pub fn new(params: &DotsParams, width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            grid_size: params.grid_size,
            dot_scale: params.dot_scale,
            threshold: params.threshold,
            shape: params.shape.shader_index(),
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Whether integer offset `(dx, dy)` from a cell center lies inside a dot.
pub fn shape_covers(shape: DotShape, dx: i64, dy: i64, radius: f32) -> bool {
    let (dx, dy) = (dx.abs() as f32, dy.abs() as f32);
    let metric = match shape {
        DotShape::Circle => (dx * dx + dy * dy).sqrt(),
        DotShape::Square => dx.max(dy),
        DotShape::Diamond => dx + dy,
    };
    metric <= radius
}

pub fn render_cpu(source: &FrameBuffer, params: &DotsParams) -> FrameBuffer {
    let grid = (params.grid_size as u32).max(1);
    let mut out = FrameBuffer::new(source.width(), source.height());
    if source.is_empty() {
        return out;
    }
    let max_x = source.width() - 1;
    let max_y = source.height() - 1;

    for y in 0..source.height() {
        let center_y = y / grid * grid + grid / 2;
        for x in 0..source.width() {
            let center_x = x / grid * grid + grid / 2;
            let [r, g, b, _] = source.pixel(center_x.min(max_x), center_y.min(max_y));
            let brightness = luma(r, g, b);
            if brightness < params.threshold {
                continue;
            }
            let radius = brightness * (grid as f32 / 2.0) * params.dot_scale;
            let dx = i64::from(x) - i64::from(center_x);
            let dy = i64::from(y) - i64::from(center_y);
            let color = if shape_covers(params.shape, dx, dy, radius) {
                WHITE
            } else {
                OPAQUE_BLACK
            };
            out.set_pixel(x, y, color);
        }
    }
    out
}

pub struct DotsEffect {
    params: DotsParams,
    gpu: Option<(Arc<GpuContext>, FragmentPass)>,
}

impl DotsEffect {
    pub fn new(params: DotsParams) -> Self {
        Self {
            params: params.sanitized(),
            gpu: None,
        }
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.is_some()
    }
}

impl Effect for DotsEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Dots
    }

    fn params(&self) -> EffectParams {
        EffectParams::Dots(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::Dots(p) = params else {
            return Err(params_mismatch(EffectKind::Dots, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        if let Some((gpu, pass)) = &self.gpu {
            let uniforms = DotsUniforms::new(&self.params, source.width(), source.height());
            match pass.run(gpu, source, bytemuck::bytes_of(&uniforms)) {
                Ok(out) => return Ok(out),
                Err(error) => {
                    warn!(error = %format!("{error:#}"), "dots GPU pass failed, using CPU");
                    self.gpu = None;
                }
            }
        }
        Ok(render_cpu(source, &self.params))
    }

    fn attach_gpu(&mut self, gpu: Arc<GpuContext>) -> Result<()> {
        let pass = FragmentPass::new(
            &gpu,
            "dots",
            DOTS_WGSL,
            std::mem::size_of::<DotsUniforms>(),
            false,
        )?;
        self.gpu = Some((gpu, pass));
        Ok(())
    }
}
