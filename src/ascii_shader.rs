//! ASCII art effect: WGSL program plus the CPU reference it must match.

use std::sync::Arc;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, FrameBuffer};
use crate::glyph_atlas::GlyphAtlas;
use crate::gpu::{FragmentPass, GpuContext};
use crate::schema::{AsciiCharSet, AsciiColorMode, AsciiParams, EffectKind, EffectParams};

pub const ASCII_WGSL: &str = include_str!("../shaders/ascii.wgsl");

/// Atlas glyph resolution; cells of any size sample it with nearest scaling,
/// so the atlas does not depend on `cell_size`.
pub const ATLAS_CELL: u32 = 32;

/// Matches `AsciiUniforms` in ascii.wgsl. 48 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AsciiUniforms {
    pub resolution: [f32; 2],
    pub cell_size: f32,
    pub contrast: f32,
    pub mono_color: [f32; 4],
    pub char_count: u32,
    pub atlas_cell: u32,
    pub invert: u32,
    pub color_mode: u32,
}

impl AsciiUniforms {
    pub fn new(params: &AsciiParams, width: u32, height: u32, char_count: u32) -> Self {
        let [r, g, b] = params.mono_color;
        Self {
            resolution: [width as f32, height as f32],
            cell_size: params.cell_size,
            contrast: params.contrast,
            mono_color: [
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
                1.0,
            ],
            char_count,
            atlas_cell: ATLAS_CELL,
            invert: u32::from(params.invert),
            color_mode: match params.color_mode {
                AsciiColorMode::Mono => 0,
                AsciiColorMode::Original => 1,
            },
        }
    }
}

/// Ramp index for a brightness in `[0, 1]`.
pub fn glyph_index(brightness: f32, char_count: u32) -> u32 {
    let n = char_count as f32;
    ((brightness * (n - 1e-4)).floor() as u32).min(char_count.saturating_sub(1))
}

pub fn render_cpu(source: &FrameBuffer, params: &AsciiParams, atlas: &GlyphAtlas) -> FrameBuffer {
    let cell = (params.cell_size as u32).max(1);
    let atlas_cell = atlas.cell_size();
    let mut out = FrameBuffer::new(source.width(), source.height());
    if source.is_empty() {
        return out;
    }
    let max_x = source.width() - 1;
    let max_y = source.height() - 1;

    for y in 0..source.height() {
        let origin_y = y / cell * cell;
        for x in 0..source.width() {
            let origin_x = x / cell * cell;
            let center = source.pixel((origin_x + cell / 2).min(max_x), (origin_y + cell / 2).min(max_y));
            let [r, g, b, _] = center;

            let mut brightness = ((luma(r, g, b) - 0.5) * params.contrast + 0.5).clamp(0.0, 1.0);
            if params.invert {
                brightness = 1.0 - brightness;
            }
            let glyph = glyph_index(brightness, atlas.glyph_count());
            let alpha = f32::from(atlas.alpha(
                glyph,
                (x - origin_x) * atlas_cell / cell,
                (y - origin_y) * atlas_cell / cell,
            )) / 255.0;

            let color = match params.color_mode {
                AsciiColorMode::Mono => params.mono_color,
                AsciiColorMode::Original => [r, g, b],
            };
            let channel = |c: u8| (f32::from(c) * alpha).round() as u8;
            out.set_pixel(x, y, [channel(color[0]), channel(color[1]), channel(color[2]), 255]);
        }
    }
    out
}

struct GpuBackend {
    gpu: Arc<GpuContext>,
    pass: FragmentPass,
}

pub struct AsciiEffect {
    params: AsciiParams,
    font: Option<Vec<u8>>,
    atlas: GlyphAtlas,
    atlas_generation: u64,
    gpu: Option<GpuBackend>,
}

impl AsciiEffect {
    pub fn new(params: AsciiParams) -> Result<Self> {
        Self::build(params, None)
    }

    /// Glyphs rasterized from a font instead of the built-in bitmaps.
    pub fn with_font(params: AsciiParams, font_bytes: Vec<u8>) -> Result<Self> {
        Self::build(params, Some(font_bytes))
    }

    fn build(params: AsciiParams, font: Option<Vec<u8>>) -> Result<Self> {
        let params = params.sanitized();
        let atlas = build_atlas(params.char_set, font.as_deref())?;
        Ok(Self {
            params,
            font,
            atlas,
            atlas_generation: 1,
            gpu: None,
        })
    }

    pub fn atlas(&self) -> &GlyphAtlas {
        &self.atlas
    }

    /// Bumped every time the atlas is rebuilt.
    pub fn atlas_generation(&self) -> u64 {
        self.atlas_generation
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn uniforms(&self, width: u32, height: u32) -> AsciiUniforms {
        AsciiUniforms::new(&self.params, width, height, self.atlas.glyph_count())
    }
}

fn build_atlas(char_set: AsciiCharSet, font: Option<&[u8]>) -> Result<GlyphAtlas> {
    match font {
        Some(bytes) => GlyphAtlas::from_font(bytes, char_set.ramp(), ATLAS_CELL),
        None => GlyphAtlas::procedural(char_set, ATLAS_CELL),
    }
}

impl Effect for AsciiEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Ascii
    }

    fn params(&self) -> EffectParams {
        EffectParams::Ascii(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::Ascii(p) = params else {
            return Err(params_mismatch(EffectKind::Ascii, params));
        };
        let next = p.clone().sanitized();
        if next.char_set != self.params.char_set {
            let atlas = build_atlas(next.char_set, self.font.as_deref())?;
            if let Some(backend) = &mut self.gpu {
                backend.pass.upload_atlas(&backend.gpu, &atlas)?;
            }
            self.atlas = atlas;
            self.atlas_generation += 1;
            debug!(char_set = ?next.char_set, generation = self.atlas_generation, "ascii atlas rebuilt");
        }
        self.params = next;
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        if let Some(backend) = &self.gpu {
            let uniforms = self.uniforms(source.width(), source.height());
            match backend.pass.run(&backend.gpu, source, bytemuck::bytes_of(&uniforms)) {
                Ok(out) => return Ok(out),
                Err(error) => {
                    warn!(error = %format!("{error:#}"), "ascii GPU pass failed, using CPU");
                    self.gpu = None;
                }
            }
        }
        Ok(render_cpu(source, &self.params, &self.atlas))
    }

    fn attach_gpu(&mut self, gpu: Arc<GpuContext>) -> Result<()> {
        let mut pass = FragmentPass::new(
            &gpu,
            "ascii",
            ASCII_WGSL,
            std::mem::size_of::<AsciiUniforms>(),
            true,
        )?;
        pass.upload_atlas(&gpu, &self.atlas)?;
        self.gpu = Some(GpuBackend { gpu, pass });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AsciiParams {
        AsciiParams {
            cell_size: 10.0,
            ..AsciiParams::default()
        }
    }

    #[test]
    fn uniforms_match_the_wgsl_layout() {
        assert_eq!(std::mem::size_of::<AsciiUniforms>(), 48);
        assert_eq!(std::mem::size_of::<AsciiUniforms>() % 16, 0);
        assert!(ASCII_WGSL.contains("struct AsciiUniforms"));
        assert!(ASCII_WGSL.contains("fn vs_main"));
        assert!(ASCII_WGSL.contains("fn fs_main"));
    }

    #[test]
    fn brightness_maps_onto_the_ramp() {
        assert_eq!(glyph_index(0.0, 10), 0);
        assert_eq!(glyph_index(0.5, 10), 4);
        assert_eq!(glyph_index(1.0, 10), 9);
        assert_eq!(glyph_index(1.0, 5), 4);
    }

    #[test]
    fn black_renders_blank_and_invert_fills_cells() {
        let source = FrameBuffer::new(20, 20);
        let effect = AsciiEffect::new(params()).expect("effect");
        let blank = render_cpu(&source, &params(), effect.atlas());
        assert_eq!(blank, FrameBuffer::new(20, 20));

        let inverted = AsciiParams {
            invert: true,
            ..params()
        };
        let filled = render_cpu(&source, &inverted, effect.atlas());
        let lit: Vec<&[u8]> = filled
            .as_bytes()
            .chunks_exact(4)
            .filter(|px| px[..3] != [0, 0, 0])
            .collect();
        assert!(!lit.is_empty());
        assert!(lit.iter().all(|px| px[..3] == [0, 255, 70]));
    }

    #[test]
    fn original_color_mode_tints_glyphs_with_the_source() {
        let source = FrameBuffer::filled(20, 20, [255, 200, 0, 255]);
        let params = AsciiParams {
            color_mode: AsciiColorMode::Original,
            ..params()
        };
        let effect = AsciiEffect::new(params.clone()).expect("effect");
        let out = render_cpu(&source, &params, effect.atlas());
        assert!(out
            .as_bytes()
            .chunks_exact(4)
            .any(|px| px[..3] == [255, 200, 0]));
        assert!(out.as_bytes().chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn atlas_rebuilds_only_when_the_char_set_changes() {
        let mut effect = AsciiEffect::new(params()).expect("effect");
        assert_eq!(effect.atlas_generation(), 1);

        let mut patch = crate::schema::ParamPatch::new();
        patch.insert("contrast".into(), 2.0.into());
        patch.insert("cell_size".into(), 16.into());
        effect.patch_params(&patch).expect("patch");
        assert_eq!(effect.atlas_generation(), 1);

        let mut patch = crate::schema::ParamPatch::new();
        patch.insert("char_set".into(), "blocks".into());
        effect.patch_params(&patch).expect("patch");
        assert_eq!(effect.atlas_generation(), 2);
        assert_eq!(effect.atlas().glyph_count(), 5);

        effect.patch_params(&patch).expect("same set again");
        assert_eq!(effect.atlas_generation(), 2);

        let EffectParams::Ascii(current) = effect.params() else {
            panic!("ascii effect reported other parameters");
        };
        assert_eq!(current.contrast, 2.0);
        assert_eq!(current.cell_size, 16.0);
    }
}
