//! Hexagonal mosaic over a rotated lattice.
//!
//! Lattice rows are `1.5 * r` apart with a horizontal pitch of `sqrt(3) * r`;
//! odd rows shift right by half a pitch. Each cell is painted as a flat-top
//! hexagon whose apothem is slightly larger than `r`, so neighbouring cells
//! always overlap and the canvas is covered without seams.

use anyhow::{Context, Result};
use tiny_skia::{Color, FillRule, Paint, Path, PathBuilder, Stroke, Transform};

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, unit_to_u8, FrameBuffer};
use crate::schema::{EffectKind, EffectParams, HexFillMode, HexMosaicParams};

const SQRT_3: f32 = 1.732_050_8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexCell {
    pub x: f32,
    pub y: f32,
    pub color: [u8; 4],
}

/// Fill color for the cell centered at `(x, y)`.
pub fn cell_color(
    source: &FrameBuffer,
    x: f32,
    y: f32,
    radius: f32,
    angle_degrees: f32,
    mode: HexFillMode,
) -> [u8; 4] {
    let center = source.sample_clamped(x.floor() as i64, y.floor() as i64);
    match mode {
        HexFillMode::Center => center,
        HexFillMode::Original => {
            let gray = unit_to_u8(luma(center[0], center[1], center[2]));
            [gray, gray, gray, center[3]]
        }
        HexFillMode::Average => {
            let mut sum = [0_u32; 4];
            let mut count = 0_u32;
            let mut accumulate = |px: [u8; 4]| {
                for (acc, c) in sum.iter_mut().zip(px) {
                    *acc += u32::from(c);
                }
                count += 1;
            };
            accumulate(center);
            for corner in 0..6 {
                let theta = (angle_degrees + corner as f32 * 60.0).to_radians();
                let sx = x + radius * 0.5 * theta.cos();
                let sy = y + radius * 0.5 * theta.sin();
                if let Some(px) = source.get(sx.floor() as i64, sy.floor() as i64) {
                    accumulate(px);
                }
            }
            let avg = |i: usize| ((sum[i] + count / 2) / count) as u8;
            [avg(0), avg(1), avg(2), avg(3)]
        }
    }
}

/// Lattice cells whose hexagon can touch the canvas, with their colors.
pub fn plan_cells(source: &FrameBuffer, params: &HexMosaicParams) -> Vec<HexCell> {
    let params = params.clone().sanitized();
    let width = source.width() as f32;
    let height = source.height() as f32;
    let r = params.hex_size;
    let pitch_x = SQRT_3 * r;
    let pitch_y = 1.5 * r;

    let cx = width / 2.0;
    let cy = height / 2.0;
    let half_diagonal = (width * width + height * height).sqrt() / 2.0;
    let cols = (half_diagonal / pitch_x).ceil() as i32 + 2;
    let rows = (half_diagonal / pitch_y).ceil() as i32 + 2;
    let (sin, cos) = params.angle.to_radians().sin_cos();
    let reach = r * 2.0 / SQRT_3;

    let mut cells = Vec::new();
    for row in -rows..=rows {
        let shift = if row.rem_euclid(2) == 1 { pitch_x / 2.0 } else { 0.0 };
        for col in -cols..=cols {
            let lx = col as f32 * pitch_x + shift;
            let ly = row as f32 * pitch_y;
            let x = cx + lx * cos - ly * sin;
            let y = cy + lx * sin + ly * cos;
            if x < -reach || y < -reach || x > width + reach || y > height + reach {
                continue;
            }
            cells.push(HexCell {
                x,
                y,
                color: cell_color(source, x, y, r, params.angle, params.fill_mode),
            });
        }
    }
    cells
}

fn hexagon(x: f32, y: f32, circumradius: f32, angle_degrees: f32) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for corner in 0..6 {
        let theta = (angle_degrees + corner as f32 * 60.0).to_radians();
        let px = x + circumradius * theta.cos();
        let py = y + circumradius * theta.sin();
        if corner == 0 {
            pb.move_to(px, py);
        } else {
            pb.line_to(px, py);
        }
    }
    pb.close();
    pb.finish()
}

pub fn render(source: &FrameBuffer, params: &HexMosaicParams) -> Result<FrameBuffer> {
    if source.is_empty() {
        return Ok(source.clone());
    }
    let params = params.clone().sanitized();
    let cells = plan_cells(source, &params);
    let circumradius = params.hex_size * 2.0 / SQRT_3 + 0.5;

    let mut pixmap = FrameBuffer::new(source.width(), source.height())
        .to_pixmap()
        .context("hex mosaic canvas")?;
    pixmap.fill(Color::BLACK);

    let mut fill = Paint {
        anti_alias: false,
        ..Paint::default()
    };
    let mut edge = Paint::default();
    edge.set_color(Color::from_rgba(1.0, 1.0, 1.0, params.edge_opacity).unwrap_or(Color::WHITE));
    let stroke = Stroke {
        width: params.edge_width,
        ..Stroke::default()
    };

    for cell in cells {
        let Some(path) = hexagon(cell.x, cell.y, circumradius, params.angle) else {
            continue;
        };
        let [r, g, b, a] = cell.color;
        fill.set_color_rgba8(r, g, b, a);
        pixmap.fill_path(&path, &fill, FillRule::Winding, Transform::identity(), None);
        if params.show_edges && params.edge_opacity > 0.0 {
            pixmap.stroke_path(&path, &edge, &stroke, Transform::identity(), None);
        }
    }

    Ok(FrameBuffer::from_pixmap(&pixmap))
}

pub struct HexMosaicEffect {
    params: HexMosaicParams,
}

impl HexMosaicEffect {
    pub fn new(params: HexMosaicParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for HexMosaicEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::HexMosaic
    }

    fn params(&self) -> EffectParams {
        EffectParams::HexMosaic(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::HexMosaic(p) = params else {
            return Err(params_mismatch(EffectKind::HexMosaic, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        render(source, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(fill_mode: HexFillMode, angle: f32) -> HexMosaicParams {
        HexMosaicParams {
            hex_size: 6.0,
            angle,
            fill_mode,
            ..HexMosaicParams::default()
        }
    }

    fn split_frame() -> FrameBuffer {
        let mut frame = FrameBuffer::new(40, 20);
        for y in 0..20 {
            for x in 0..40 {
                let color = if x < 20 { [255, 0, 0, 255] } else { [0, 0, 255, 255] };
                frame.set_pixel(x, y, color);
            }
        }
        frame
    }

    #[test]
    fn uniform_input_is_fully_covered_at_any_rotation() {
        let source = FrameBuffer::filled(50, 37, [30, 160, 90, 255]);
        for angle in [0.0, 17.0, 90.0, 233.0] {
            let out = render(&source, &params(HexFillMode::Center, angle)).expect("render");
            assert_eq!(out, source, "seam at angle {angle}");
        }
    }

    #[test]
    fn original_mode_reduces_to_gray() {
        let source = FrameBuffer::filled(10, 10, [255, 0, 0, 255]);
        let color = cell_color(&source, 5.0, 5.0, 4.0, 0.0, HexFillMode::Original);
        assert_eq!(color, [76, 76, 76, 255]);
    }

    #[test]
    fn average_mode_blends_across_a_boundary() {
        let source = split_frame();
        let at_boundary = cell_color(&source, 20.0, 10.0, 8.0, 0.0, HexFillMode::Average);
        assert!(at_boundary[0] > 0 && at_boundary[2] > 0, "{at_boundary:?}");

        let inside = cell_color(&source, 5.0, 10.0, 4.0, 0.0, HexFillMode::Average);
        assert_eq!(inside, [255, 0, 0, 255]);
    }

    #[test]
    fn average_ignores_samples_outside_the_canvas() {
        let source = FrameBuffer::filled(8, 8, [100, 100, 100, 255]);
        let corner = cell_color(&source, 0.0, 0.0, 12.0, 0.0, HexFillMode::Average);
        assert_eq!(corner, [100, 100, 100, 255]);
    }

    #[test]
    fn odd_rows_are_offset_by_half_a_pitch() {
        let source = FrameBuffer::filled(60, 60, [0, 0, 0, 255]);
        let cells = plan_cells(&source, &params(HexFillMode::Center, 0.0));
        let row_y = 30.0 + 1.5 * 6.0;
        let pitch = SQRT_3 * 6.0;
        let odd_row: Vec<f32> = cells
            .iter()
            .filter(|c| (c.y - row_y).abs() < 1e-3)
            .map(|c| c.x)
            .collect();
        assert!(!odd_row.is_empty());
        for x in odd_row {
            let phase = (x - 30.0 - pitch / 2.0).rem_euclid(pitch);
            assert!(phase < 1e-2 || pitch - phase < 1e-2, "x {x}");
        }
    }

    #[test]
    fn edges_draw_translucent_white_lines() {
        let source = FrameBuffer::filled(40, 40, [0, 0, 0, 255]);
        let out = render(
            &source,
            &HexMosaicParams {
                show_edges: true,
                edge_opacity: 1.0,
                ..params(HexFillMode::Center, 0.0)
            },
        )
        .expect("render");
        assert!(out.as_bytes().chunks_exact(4).any(|px| px[0] > 128));
    }
}
