//! Halftone screen: value -> dot radius on rotated per-channel lattices.

use anyhow::{Context, Result};
use tiny_skia::{BlendMode, Color, FillRule, Paint, PathBuilder, Transform};

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, FrameBuffer};
use crate::schema::{EffectKind, EffectParams, HalftoneMode, HalftoneParams};

/// One ink (or light, for RGB) separated from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ink {
    Luma,
    Red,
    Green,
    Blue,
    Cyan,
    Magenta,
    Yellow,
    Key,
}

impl Ink {
    /// Channel value in `[0, 1]` for a source pixel.
    pub fn value(self, [r, g, b, _]: [u8; 4]) -> f32 {
        let unit = |c: u8| f32::from(c) / 255.0;
        match self {
            Self::Luma => luma(r, g, b),
            Self::Red => unit(r),
            Self::Green => unit(g),
            Self::Blue => unit(b),
            Self::Cyan => 1.0 - unit(r),
            Self::Magenta => 1.0 - unit(g),
            Self::Yellow => 1.0 - unit(b),
            Self::Key => 1.0 - unit(r.max(g).max(b)),
        }
    }

    fn color(self) -> [u8; 3] {
        match self {
            Self::Luma => [255, 255, 255],
            Self::Red => [255, 0, 0],
            Self::Green => [0, 255, 0],
            Self::Blue => [0, 0, 255],
            Self::Cyan => [0, 255, 255],
            Self::Magenta => [255, 0, 255],
            Self::Yellow => [255, 255, 0],
            Self::Key => [0, 0, 0],
        }
    }
}

/// Separations and screen angles (degrees) for a mode.
pub fn separations(mode: HalftoneMode, mono_angle: f32) -> Vec<(Ink, f32)> {
    match mode {
        HalftoneMode::Mono => vec![(Ink::Luma, mono_angle)],
        HalftoneMode::Rgb => vec![(Ink::Red, 15.0), (Ink::Green, 75.0), (Ink::Blue, 45.0)],
        HalftoneMode::Cmyk => vec![
            (Ink::Cyan, 15.0),
            (Ink::Magenta, 75.0),
            (Ink::Yellow, 0.0),
            (Ink::Key, 45.0),
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalftoneDot {
    pub ink: Ink,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Every dot that will be painted, in paint order. Dots of radius `<= 0.5`
/// are dropped here.
pub fn plan_dots(source: &FrameBuffer, params: &HalftoneParams) -> Vec<HalftoneDot> {
    let params = params.clone().sanitized();
    let width = source.width() as f32;
    let height = source.height() as f32;
    let pitch = params.dot_size;
    let max_radius = pitch / 2.0;
    let gamma = 1.0 / params.contrast;

    let cx = width / 2.0;
    let cy = height / 2.0;
    let half_diagonal = (width * width + height * height).sqrt() / 2.0;
    let reach = (half_diagonal / pitch).ceil() as i32 + 1;

    let mut dots = Vec::new();
    for (ink, angle) in separations(params.mode, params.angle) {
        let (sin, cos) = angle.to_radians().sin_cos();
        for gy in -reach..=reach {
            for gx in -reach..=reach {
                let lx = gx as f32 * pitch;
                let ly = gy as f32 * pitch;
                let x = cx + lx * cos - ly * sin;
                let y = cy + lx * sin + ly * cos;
                if x < 0.0 || y < 0.0 || x >= width || y >= height {
                    continue;
                }
                let Some(pixel) = source.get(x.floor() as i64, y.floor() as i64) else {
                    continue;
                };
                let radius = ink.value(pixel).powf(gamma) * max_radius;
                if radius <= 0.5 {
                    continue;
                }
                dots.push(HalftoneDot { ink, x, y, radius });
            }
        }
    }
    dots
}

pub fn render(source: &FrameBuffer, params: &HalftoneParams) -> Result<FrameBuffer> {
    if source.is_empty() {
        return Ok(source.clone());
    }

    let dots = plan_dots(source, params);
    let (background, blend_mode) = match params.mode {
        HalftoneMode::Mono => (Color::BLACK, BlendMode::SourceOver),
        HalftoneMode::Rgb => (Color::BLACK, BlendMode::Screen),
        HalftoneMode::Cmyk => (Color::WHITE, BlendMode::Multiply),
    };

    let mut pixmap = FrameBuffer::new(source.width(), source.height())
        .to_pixmap()
        .context("halftone canvas")?;
    pixmap.fill(background);

    let mut paint = Paint {
        blend_mode,
        anti_alias: true,
        ..Paint::default()
    };
    for dot in dots {
        let Some(path) = PathBuilder::from_circle(dot.x, dot.y, dot.radius) else {
            continue;
        };
        let [r, g, b] = dot.ink.color();
        paint.set_color_rgba8(r, g, b, 255);
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }

    Ok(FrameBuffer::from_pixmap(&pixmap))
}

pub struct HalftoneEffect {
    params: HalftoneParams,
}

impl HalftoneEffect {
    pub fn new(params: HalftoneParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for HalftoneEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Halftone
    }

    fn params(&self) -> EffectParams {
        EffectParams::Halftone(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        match params {
            EffectParams::Halftone(p) => {
                self.params = p.clone().sanitized();
                Ok(())
            }
            other => Err(params_mismatch(EffectKind::Halftone, other)),
        }
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        render(source, &self.params)
    }
}
