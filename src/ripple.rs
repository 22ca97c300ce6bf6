//! Concentric ripples radiating from the brightest regions of the frame.
//!
//! Peaks are found on a coarse grid (one candidate per 64 px cell, scanned at
//! an 8 px stride), then every output pixel is pulled back along the sum of
//! the damped waves from each peak.

use anyhow::Result;

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::{luma, FrameBuffer};
use crate::schema::{EffectKind, EffectParams, RippleParams};

pub const PEAK_CELL: u32 = 64;
pub const PEAK_STRIDE: u32 = 8;

/// Angular speed of the wave front, in radians per unit of ripple time.
const WAVE_SPEED: f32 = 5.0;

/// Ripple time after which every wave repeats.
const WAVE_PERIOD: f64 = std::f64::consts::TAU / WAVE_SPEED as f64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: f32,
    pub y: f32,
    /// Luma in `[0, 1]`.
    pub brightness: f32,
}

/// Brightest candidates, brightest first, at most `max_peaks`.
pub fn find_peaks(source: &FrameBuffer, params: &RippleParams) -> Vec<Peak> {
    let mut peaks = Vec::new();
    for cell_y in (0..source.height()).step_by(PEAK_CELL as usize) {
        for cell_x in (0..source.width()).step_by(PEAK_CELL as usize) {
            let mut best: Option<Peak> = None;
            let y_end = (cell_y + PEAK_CELL).min(source.height());
            let x_end = (cell_x + PEAK_CELL).min(source.width());
            for y in (cell_y..y_end).step_by(PEAK_STRIDE as usize) {
                for x in (cell_x..x_end).step_by(PEAK_STRIDE as usize) {
                    let [r, g, b, _] = source.pixel(x, y);
                    let brightness = luma(r, g, b);
                    if best.map_or(true, |peak| brightness > peak.brightness) {
                        best = Some(Peak {
                            x: x as f32,
                            y: y as f32,
                            brightness,
                        });
                    }
                }
            }
            if let Some(peak) = best.filter(|peak| peak.brightness > params.threshold) {
                peaks.push(peak);
            }
        }
    }
    peaks.sort_by(|a, b| b.brightness.total_cmp(&a.brightness));
    peaks.truncate(params.max_peaks as usize);
    peaks
}

/// Summed displacement at `(x, y)` for the given peaks and ripple time.
pub fn displacement(x: f32, y: f32, peaks: &[Peak], params: &RippleParams, time: f32) -> (f32, f32) {
    let mut total = (0.0, 0.0);
    for peak in peaks {
        let dx = x - peak.x;
        let dy = y - peak.y;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist < 1e-6 {
            continue;
        }
        let wave = (dist * params.frequency - time * WAVE_SPEED).sin()
            * params.amplitude
            * (-dist * params.decay).exp()
            * peak.brightness;
        total.0 += dx / dist * wave;
        total.1 += dy / dist * wave;
    }
    total
}

pub fn displace(
    source: &FrameBuffer,
    peaks: &[Peak],
    params: &RippleParams,
    time: f32,
) -> FrameBuffer {
    if peaks.is_empty() || params.amplitude == 0.0 {
        return source.clone();
    }
    let mut out = FrameBuffer::new(source.width(), source.height());
    for y in 0..source.height() {
        for x in 0..source.width() {
            let (tx, ty) = displacement(x as f32, y as f32, peaks, params, time);
            let sx = (x as f32 - tx).round() as i64;
            let sy = (y as f32 - ty).round() as i64;
            out.set_pixel(x, y, source.sample_or_black(sx, sy));
        }
    }
    out
}

pub struct RippleEffect {
    params: RippleParams,
    time: f64,
}

impl RippleEffect {
    pub fn new(params: RippleParams) -> Self {
        Self {
            params: params.sanitized(),
            time: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time within the current wave period, small enough for `f32` math.
    pub fn wave_time(&self) -> f32 {
        self.time.rem_euclid(WAVE_PERIOD) as f32
    }

    pub fn advance(&mut self, delta_ms: f32) {
        self.time += f64::from(self.params.speed) * f64::from(delta_ms) / 1000.0;
    }
}

impl Effect for RippleEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Ripple
    }

    fn params(&self) -> EffectParams {
        EffectParams::Ripple(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::Ripple(p) = params else {
            return Err(params_mismatch(EffectKind::Ripple, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        self.advance(ctx.delta_ms);
        let peaks = find_peaks(source, &self.params);
        Ok(displace(source, &peaks, &self.params, self.wave_time()))
    }

    fn reset(&mut self) {
        self.time = 0.0;
    }
}
