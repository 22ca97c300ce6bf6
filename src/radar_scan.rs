//! Sweeping scan line with a fading phosphor trail.

use std::f32::consts::TAU;

use anyhow::{Context, Result};
use tiny_skia::{FillRule, Paint, PathBuilder, Stroke, Transform};

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, FrameBuffer};
use crate::schema::{EffectKind, EffectParams, RadarScanParams, ScanMode};

const LINE_BOOST: f32 = 1.5;
const INDICATOR_WIDTH: f32 = 2.0;
const CENTER_DOT_RADIUS: f32 = 3.0;

/// Advance a `[0, 1)` sweep phase; one full sweep takes `2000 / speed` ms.
pub fn advance_phase(phase: f32, speed: f32, delta_ms: f32) -> f32 {
    let next = (phase + speed * delta_ms / 2000.0).rem_euclid(1.0);
    if next.is_finite() && next < 1.0 {
        next
    } else {
        0.0
    }
}

/// Brightness of a position `behind` units behind the sweep, on a loop of
/// length `extent`. Returns the alpha and whether it lies on the line itself.
pub fn trail_alpha(behind: f32, extent: f32, line_width: f32, trail_length: f32) -> (f32, bool) {
    let ahead = extent - behind;
    if behind <= line_width || ahead <= line_width {
        return (1.0, true);
    }
    let excess = behind - line_width;
    if trail_length > 0.0 && excess < trail_length {
        let fade = 1.0 - excess / trail_length;
        (fade * fade, false)
    } else {
        (0.0, false)
    }
}

fn shade(pixel: [u8; 4], alpha: f32, on_line: bool) -> [u8; 4] {
    if alpha <= 0.0 {
        return [0, 0, 0, 255];
    }
    let [r, g, b, _] = pixel;
    let boost = if on_line { LINE_BOOST } else { 1.0 };
    let weight = alpha * luma(r, g, b) * boost;
    let channel = |c: u8| (f32::from(c) * weight).round().clamp(0.0, 255.0) as u8;
    [channel(r), channel(g), channel(b), 255]
}

pub fn render(source: &FrameBuffer, params: &RadarScanParams, phase: f32) -> Result<FrameBuffer> {
    if source.is_empty() {
        return Ok(source.clone());
    }
    let width = source.width();
    let height = source.height();
    let mut out = FrameBuffer::new(width, height);

    match params.mode {
        ScanMode::Horizontal | ScanMode::Vertical => {
            let horizontal = params.mode == ScanMode::Horizontal;
            let extent = (if horizontal { width } else { height }) as f32;
            let sweep = phase * extent;
            for y in 0..height {
                for x in 0..width {
                    let pos = (if horizontal { x } else { y }) as f32;
                    let behind = (sweep - pos).rem_euclid(extent);
                    let (alpha, on_line) =
                        trail_alpha(behind, extent, params.line_width, params.trail_length);
                    out.set_pixel(x, y, shade(source.pixel(x, y), alpha, on_line));
                }
            }
        }
        ScanMode::Radial => {
            let cx = width as f32 / 2.0;
            let cy = height as f32 / 2.0;
            let sweep = phase * 360.0;
            for y in 0..height {
                for x in 0..width {
                    let angle = (y as f32 - cy).atan2(x as f32 - cx).to_degrees();
                    let behind = (sweep - angle).rem_euclid(360.0);
                    let (alpha, on_line) =
                        trail_alpha(behind, 360.0, params.line_width, params.trail_length);
                    out.set_pixel(x, y, shade(source.pixel(x, y), alpha, on_line));
                }
            }
        }
    }

    draw_indicator(&out, params, phase)
}

fn draw_indicator(frame: &FrameBuffer, params: &RadarScanParams, phase: f32) -> Result<FrameBuffer> {
    let mut pixmap = frame.to_pixmap().context("radar indicator canvas")?;
    let width = frame.width() as f32;
    let height = frame.height() as f32;
    let [r, g, b] = params.color;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, 255);
    let stroke = Stroke {
        width: INDICATOR_WIDTH,
        ..Stroke::default()
    };

    let mut pb = PathBuilder::new();
    match params.mode {
        ScanMode::Horizontal => {
            let x = phase * width;
            pb.move_to(x, 0.0);
            pb.line_to(x, height);
        }
        ScanMode::Vertical => {
            let y = phase * height;
            pb.move_to(0.0, y);
            pb.line_to(width, y);
        }
        ScanMode::Radial => {
            let (cx, cy) = (width / 2.0, height / 2.0);
            let reach = (cx * cx + cy * cy).sqrt();
            let (sin, cos) = (phase * TAU).sin_cos();
            pb.move_to(cx, cy);
            pb.line_to(cx + reach * cos, cy + reach * sin);
        }
    }
    if let Some(path) = pb.finish() {
        pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }
    if params.mode == ScanMode::Radial {
        if let Some(dot) = PathBuilder::from_circle(width / 2.0, height / 2.0, CENTER_DOT_RADIUS) {
            pixmap.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }
    Ok(FrameBuffer::from_pixmap(&pixmap))
}

pub struct RadarScanEffect {
    params: RadarScanParams,
    phase: f32,
}

impl RadarScanEffect {
    pub fn new(params: RadarScanParams) -> Self {
        Self {
            params: params.sanitized(),
            phase: 0.0,
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    pub fn advance(&mut self, delta_ms: f32) {
        self.phase = advance_phase(self.phase, self.params.speed, delta_ms);
    }
}

impl Effect for RadarScanEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::RadarScan
    }

    fn params(&self) -> EffectParams {
        EffectParams::RadarScan(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::RadarScan(p) = params else {
            return Err(params_mismatch(EffectKind::RadarScan, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        self.advance(ctx.delta_ms);
        render(source, &self.params, self.phase)
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_full_sweep_returns_to_zero() {
        let mut effect = RadarScanEffect::new(RadarScanParams {
            speed: 1.0,
            ..RadarScanParams::default()
        });
        effect.advance(2000.0);
        assert_eq!(effect.phase(), 0.0);
        effect.advance(1000.0);
        assert!((effect.phase() - 0.5).abs() < 1e-6);
        effect.reset();
        assert_eq!(effect.phase(), 0.0);
    }

    #[test]
    fn phase_stays_below_one_for_tiny_negative_wraps() {
        let phase = advance_phase(0.0, -1.0, 1e-6);
        assert!((0.0..1.0).contains(&phase), "{phase}");
    }

    #[test]
    fn trail_fades_quadratically() {
        assert_eq!(trail_alpha(2.0, 100.0, 4.0, 10.0), (1.0, true));
        assert_eq!(trail_alpha(99.0, 100.0, 4.0, 10.0), (1.0, true));
        let (alpha, on_line) = trail_alpha(9.0, 100.0, 4.0, 10.0);
        assert!(!on_line);
        assert!((alpha - 0.25).abs() < 1e-6);
        assert_eq!(trail_alpha(50.0, 100.0, 4.0, 10.0), (0.0, false));
    }

    #[test]
    fn zero_trail_leaves_only_the_line() {
        assert_eq!(trail_alpha(5.0, 100.0, 4.0, 0.0), (0.0, false));
    }

    #[test]
    fn horizontal_sweep_lights_columns_behind_the_line() {
        let source = FrameBuffer::filled(100, 10, [255, 255, 255, 255]);
        let params = RadarScanParams {
            mode: ScanMode::Horizontal,
            line_width: 2.0,
            trail_length: 20.0,
            color: [0, 0, 0],
            ..RadarScanParams::default()
        };
        let out = render(&source, &params, 0.5).expect("render");

        assert_eq!(out.pixel(38, 5), [64, 64, 64, 255]);
        assert_eq!(out.pixel(10, 5), [0, 0, 0, 255]);
        assert_eq!(out.pixel(60, 5), [0, 0, 0, 255]);
        assert!(out.as_bytes().chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn indicator_uses_the_configured_color() {
        let source = FrameBuffer::new(40, 40);
        let params = RadarScanParams {
            mode: ScanMode::Vertical,
            color: [255, 0, 0],
            ..RadarScanParams::default()
        };
        let out = render(&source, &params, 0.25).expect("render");
        assert_eq!(out.pixel(20, 10), [255, 0, 0, 255]);
    }

    #[test]
    fn radial_trail_follows_the_line_and_fades_out() {
        // Line points straight down at phase 0.25; angles grow clockwise.
        let source = FrameBuffer::filled(64, 64, [255, 255, 255, 255]);
        let params = RadarScanParams {
            mode: ScanMode::Radial,
            line_width: 2.0,
            trail_length: 40.0,
            color: [0, 0, 0],
            ..RadarScanParams::default()
        };
        let out = render(&source, &params, 0.25).expect("render");

        // About 20 degrees behind: (1 - 18.2 / 40)^2 of full white.
        assert_eq!(out.pixel(32 + 7, 32 + 19), [76, 76, 76, 255]);
        // About 20 degrees ahead of the line.
        assert_eq!(out.pixel(32 - 7, 32 + 19), [0, 0, 0, 255]);
        // About 60 degrees behind, past the end of the trail.
        assert_eq!(out.pixel(32 + 17, 32 + 10), [0, 0, 0, 255]);
    }

    #[test]
    fn radial_mode_draws_a_center_dot() {
        let source = FrameBuffer::new(32, 32);
        let params = RadarScanParams {
            mode: ScanMode::Radial,
            color: [0, 0, 255],
            ..RadarScanParams::default()
        };
        let out = render(&source, &params, 0.0).expect("render");
        assert_eq!(out.pixel(16, 16), [0, 0, 255, 255]);
    }
}
