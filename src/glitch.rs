//! Glitch family: the effects the chaos orchestrator drives.
//!
//! Randomized effects draw from a `fastrand::Rng` seeded from the frame index
//! (and the user seed where there is one), so a given frame always renders
//! the same way.

use anyhow::Result;
use fastrand::Rng;

use crate::effect::{params_mismatch, Effect, FrameContext};
use crate::frame::FrameBuffer;
use crate::schema::{
    BlockDisplaceParams, ChromaticAberrationParams, EffectKind, EffectParams,
    FeedbackLoopParams, NoiseParams, RgbSplitParams, StaticDisplaceParams, VhsTrackingParams,
};

const FRAME_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

fn frame_rng(seed: u64, frame_index: u64) -> Rng {
    Rng::with_seed(seed ^ frame_index.wrapping_add(1).wrapping_mul(FRAME_SEED_MIX))
}

fn shift_row(source: &FrameBuffer, out: &mut FrameBuffer, y: u32, x_range: std::ops::Range<u32>, shift: i64) {
    let width = i64::from(source.width());
    for x in x_range {
        let sx = (i64::from(x) - shift).rem_euclid(width);
        out.set_pixel(x, y, source.pixel(sx as u32, y));
    }
}

fn add_grain(pixel: [u8; 4], grain: [f32; 3]) -> [u8; 4] {
    let channel = |c: u8, n: f32| (f32::from(c) + n).round().clamp(0.0, 255.0) as u8;
    [
        channel(pixel[0], grain[0]),
        channel(pixel[1], grain[1]),
        channel(pixel[2], grain[2]),
        pixel[3],
    ]
}

// ---------------------------------------------------------------------------
// rgb_split
// ---------------------------------------------------------------------------

/// Red moves along `(amount, angle)`, blue the opposite way.
pub fn rgb_split(source: &FrameBuffer, params: &RgbSplitParams) -> FrameBuffer {
    let (sin, cos) = params.angle.to_radians().sin_cos();
    let vx = params.amount * cos;
    let vy = params.amount * sin;
    if vx.round() == 0.0 && vy.round() == 0.0 {
        return source.clone();
    }
    let mut out = source.clone();
    for y in 0..source.height() {
        for x in 0..source.width() {
            let (fx, fy) = (x as f32, y as f32);
            let red = source.sample_clamped((fx - vx).round() as i64, (fy - vy).round() as i64);
            let blue = source.sample_clamped((fx + vx).round() as i64, (fy + vy).round() as i64);
            let [_, g, _, a] = source.pixel(x, y);
            out.set_pixel(x, y, [red[0], g, blue[2], a]);
        }
    }
    out
}

pub struct RgbSplitEffect {
    params: RgbSplitParams,
}

impl RgbSplitEffect {
    pub fn new(params: RgbSplitParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for RgbSplitEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::RgbSplit
    }

    fn params(&self) -> EffectParams {
        EffectParams::RgbSplit(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::RgbSplit(p) = params else {
            return Err(params_mismatch(EffectKind::RgbSplit, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        Ok(rgb_split(source, &self.params))
    }
}

// ---------------------------------------------------------------------------
// block_displace
// ---------------------------------------------------------------------------

pub fn block_displace(source: &FrameBuffer, params: &BlockDisplaceParams, frame_index: u64) -> FrameBuffer {
    let max_shift = (params.intensity * source.width() as f32 / 4.0) as i64;
    if params.intensity <= 0.0 || max_shift == 0 || source.is_empty() {
        return source.clone();
    }
    let mut rng = frame_rng(u64::from(params.seed), frame_index);
    let block = params.block_size.max(1);
    let mut out = source.clone();
    for by in (0..source.height()).step_by(block as usize) {
        for bx in (0..source.width()).step_by(block as usize) {
            if rng.f32() >= params.intensity {
                continue;
            }
            let shift = rng.i64(-max_shift..=max_shift);
            let x_end = (bx + block).min(source.width());
            for y in by..(by + block).min(source.height()) {
                shift_row(source, &mut out, y, bx..x_end, shift);
            }
        }
    }
    out
}

pub struct BlockDisplaceEffect {
    params: BlockDisplaceParams,
}

impl BlockDisplaceEffect {
    pub fn new(params: BlockDisplaceParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for BlockDisplaceEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::BlockDisplace
    }

    fn params(&self) -> EffectParams {
        EffectParams::BlockDisplace(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::BlockDisplace(p) = params else {
            return Err(params_mismatch(EffectKind::BlockDisplace, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        Ok(block_displace(source, &self.params, ctx.frame_index))
    }
}

// ---------------------------------------------------------------------------
// feedback_loop
// ---------------------------------------------------------------------------

/// Previous output pulled back through zoom and rotation about the center,
/// then scaled by `decay`. Pixels that map outside the frame are black.
pub fn feedback_sample(previous: &FrameBuffer, params: &FeedbackLoopParams, x: u32, y: u32) -> [f32; 3] {
    let cx = previous.width() as f32 / 2.0;
    let cy = previous.height() as f32 / 2.0;
    let (sin, cos) = (-params.rotation).to_radians().sin_cos();
    let dx = (x as f32 + 0.5 - cx) / params.zoom;
    let dy = (y as f32 + 0.5 - cy) / params.zoom;
    let sx = cx + dx * cos - dy * sin;
    let sy = cy + dx * sin + dy * cos;
    let [r, g, b, _] = previous.sample_or_black(sx.floor() as i64, sy.floor() as i64);
    [
        f32::from(r) * params.decay,
        f32::from(g) * params.decay,
        f32::from(b) * params.decay,
    ]
}

pub struct FeedbackLoopEffect {
    params: FeedbackLoopParams,
    previous: Option<FrameBuffer>,
}

impl FeedbackLoopEffect {
    pub fn new(params: FeedbackLoopParams) -> Self {
        Self {
            params: params.sanitized(),
            previous: None,
        }
    }

    pub fn has_history(&self) -> bool {
        self.previous.is_some()
    }
}

impl Effect for FeedbackLoopEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::FeedbackLoop
    }

    fn params(&self) -> EffectParams {
        EffectParams::FeedbackLoop(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::FeedbackLoop(p) = params else {
            return Err(params_mismatch(EffectKind::FeedbackLoop, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        let out = match self.previous.as_ref().filter(|prev| prev.same_size(source)) {
            None => source.clone(),
            Some(previous) => {
                let mut out = source.clone();
                for y in 0..source.height() {
                    for x in 0..source.width() {
                        let [r, g, b, a] = source.pixel(x, y);
                        let echo = feedback_sample(previous, &self.params, x, y);
                        let combine =
                            |c: u8, e: f32| f32::from(c).max(e).round().clamp(0.0, 255.0) as u8;
                        out.set_pixel(x, y, [combine(r, echo[0]), combine(g, echo[1]), combine(b, echo[2]), a]);
                    }
                }
                out
            }
        };
        self.previous = Some(out.clone());
        Ok(out)
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}

// ---------------------------------------------------------------------------
// chromatic_aberration
// ---------------------------------------------------------------------------

pub fn chromatic_aberration(source: &FrameBuffer, params: &ChromaticAberrationParams) -> FrameBuffer {
    if params.strength <= 0.0 || source.is_empty() {
        return source.clone();
    }
    let cx = source.width() as f32 / 2.0;
    let cy = source.height() as f32 / 2.0;
    let max_radius = (cx * cx + cy * cy).sqrt().max(1.0);
    let mut out = source.clone();
    for y in 0..source.height() {
        for x in 0..source.width() {
            let dx = x as f32 + 0.5 - cx;
            let dy = y as f32 + 0.5 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist < 1e-6 {
                continue;
            }
            let offset = params.strength * dist / max_radius;
            let ox = dx / dist * offset;
            let oy = dy / dist * offset;
            let (fx, fy) = (x as f32, y as f32);
            let red = source.sample_clamped((fx + ox).round() as i64, (fy + oy).round() as i64);
            let blue = source.sample_clamped((fx - ox).round() as i64, (fy - oy).round() as i64);
            let [_, g, _, a] = source.pixel(x, y);
            out.set_pixel(x, y, [red[0], g, blue[2], a]);
        }
    }
    out
}

pub struct ChromaticAberrationEffect {
    params: ChromaticAberrationParams,
}

impl ChromaticAberrationEffect {
    pub fn new(params: ChromaticAberrationParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for ChromaticAberrationEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::ChromaticAberration
    }

    fn params(&self) -> EffectParams {
        EffectParams::ChromaticAberration(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::ChromaticAberration(p) = params else {
            return Err(params_mismatch(EffectKind::ChromaticAberration, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, _ctx: &FrameContext) -> Result<FrameBuffer> {
        Ok(chromatic_aberration(source, &self.params))
    }
}

// ---------------------------------------------------------------------------
// vhs_tracking
// ---------------------------------------------------------------------------

/// Fraction of the frame height covered by the tracking band.
pub const VHS_BAND_FRACTION: f32 = 0.12;

pub fn vhs_tracking(
    source: &FrameBuffer,
    params: &VhsTrackingParams,
    band_phase: f32,
    frame_index: u64,
) -> FrameBuffer {
    if source.is_empty() || (params.intensity <= 0.0 && params.noise <= 0.0) {
        return source.clone();
    }
    let height = source.height() as f32;
    let band_height = (height * VHS_BAND_FRACTION).max(1.0);
    let band_top = band_phase * height;
    let max_shift = params.intensity * source.width() as f32 * 0.1;
    let grain = params.noise * 96.0;

    let mut rng = frame_rng(0x5648_5300, frame_index);
    let mut out = source.clone();
    for y in 0..source.height() {
        // Band wraps from the bottom edge back to the top.
        let into_band = (y as f32 - band_top).rem_euclid(height);
        if into_band >= band_height {
            continue;
        }
        let shift = ((rng.f32() * 2.0 - 1.0) * max_shift).round() as i64;
        shift_row(source, &mut out, y, 0..source.width(), shift);
        if grain > 0.0 {
            for x in 0..source.width() {
                let n = (rng.f32() * 2.0 - 1.0) * grain;
                out.set_pixel(x, y, add_grain(out.pixel(x, y), [n, n, n]));
            }
        }
    }
    out
}

pub struct VhsTrackingEffect {
    params: VhsTrackingParams,
    band_phase: f32,
}

impl VhsTrackingEffect {
    pub fn new(params: VhsTrackingParams) -> Self {
        Self {
            params: params.sanitized(),
            band_phase: 0.0,
        }
    }

    pub fn band_phase(&self) -> f32 {
        self.band_phase
    }
}

impl Effect for VhsTrackingEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::VhsTracking
    }

    fn params(&self) -> EffectParams {
        EffectParams::VhsTracking(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::VhsTracking(p) = params else {
            return Err(params_mismatch(EffectKind::VhsTracking, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        let next = (self.band_phase + self.params.speed * ctx.delta_ms / 4000.0).rem_euclid(1.0);
        self.band_phase = if next < 1.0 { next } else { 0.0 };
        Ok(vhs_tracking(source, &self.params, self.band_phase, ctx.frame_index))
    }

    fn reset(&mut self) {
        self.band_phase = 0.0;
    }
}

// ---------------------------------------------------------------------------
// noise
// ---------------------------------------------------------------------------

pub fn noise(source: &FrameBuffer, params: &NoiseParams, frame_index: u64) -> FrameBuffer {
    if params.intensity <= 0.0 {
        return source.clone();
    }
    let amplitude = params.intensity * 255.0;
    let mut rng = frame_rng(0x4E4F_4953, frame_index);
    let mut out = source.clone();
    for y in 0..source.height() {
        for x in 0..source.width() {
            let mut sample = || (rng.f32() * 2.0 - 1.0) * amplitude;
            let grain = if params.monochrome {
                let n = sample();
                [n, n, n]
            } else {
                [sample(), sample(), sample()]
            };
            out.set_pixel(x, y, add_grain(source.pixel(x, y), grain));
        }
    }
    out
}

pub struct NoiseEffect {
    params: NoiseParams,
}

impl NoiseEffect {
    pub fn new(params: NoiseParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for NoiseEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Noise
    }

    fn params(&self) -> EffectParams {
        EffectParams::Noise(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::Noise(p) = params else {
            return Err(params_mismatch(EffectKind::Noise, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        Ok(noise(source, &self.params, ctx.frame_index))
    }
}

// ---------------------------------------------------------------------------
// static_displace
// ---------------------------------------------------------------------------

pub fn static_displace(source: &FrameBuffer, params: &StaticDisplaceParams, frame_index: u64) -> FrameBuffer {
    if params.intensity <= 0.0 || source.is_empty() {
        return source.clone();
    }
    let max_shift = ((params.intensity * source.width() as f32 / 8.0) as i64).max(1);
    let band = params.line_height.max(1);
    let mut rng = frame_rng(0x5354_4154, frame_index);
    let mut out = source.clone();
    for top in (0..source.height()).step_by(band as usize) {
        if rng.f32() >= params.intensity * 0.5 {
            continue;
        }
        let shift = rng.i64(-max_shift..=max_shift);
        for y in top..(top + band).min(source.height()) {
            shift_row(source, &mut out, y, 0..source.width(), shift);
        }
    }
    out
}

pub struct StaticDisplaceEffect {
    params: StaticDisplaceParams,
}

impl StaticDisplaceEffect {
    pub fn new(params: StaticDisplaceParams) -> Self {
        Self {
            params: params.sanitized(),
        }
    }
}

impl Effect for StaticDisplaceEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::StaticDisplace
    }

    fn params(&self) -> EffectParams {
        EffectParams::StaticDisplace(self.params.clone())
    }

    fn update_params(&mut self, params: &EffectParams) -> Result<()> {
        let EffectParams::StaticDisplace(p) = params else {
            return Err(params_mismatch(EffectKind::StaticDisplace, params));
        };
        self.params = p.clone().sanitized();
        Ok(())
    }

    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer> {
        Ok(static_displace(source, &self.params, ctx.frame_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::new(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, [(x * 7) as u8, (y * 5) as u8, ((x + y) * 3) as u8, 255]);
            }
        }
        frame
    }

    #[test]
    fn rgb_split_moves_red_and_blue_in_opposite_directions() {
        let mut source = FrameBuffer::new(20, 3);
        source.set_pixel(10, 1, [255, 255, 255, 255]);
        let out = rgb_split(
            &source,
            &RgbSplitParams {
                amount: 3.0,
                angle: 0.0,
            },
        );
        assert_eq!(out.pixel(13, 1), [255, 0, 0, 255]);
        assert_eq!(out.pixel(7, 1), [0, 0, 255, 255]);
        assert_eq!(out.pixel(10, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn zero_amount_split_is_identity() {
        let source = gradient(16, 16);
        let params = RgbSplitParams {
            amount: 0.0,
            angle: 90.0,
        };
        assert_eq!(rgb_split(&source, &params), source);
    }

    #[test]
    fn block_displace_is_deterministic_per_frame() {
        let source = gradient(64, 64);
        let params = BlockDisplaceParams {
            intensity: 1.0,
            block_size: 16,
            seed: 7,
        };
        let a = block_displace(&source, &params, 3);
        let b = block_displace(&source, &params, 3);
        assert_eq!(a, b);
        assert_ne!(a, source);

        let still = BlockDisplaceParams {
            intensity: 0.0,
            ..params
        };
        assert_eq!(block_displace(&source, &still, 3), source);
    }

    #[test]
    fn feedback_first_frame_passes_through_then_echoes() {
        let mut effect = FeedbackLoopEffect::new(FeedbackLoopParams {
            decay: 0.5,
            zoom: 1.0,
            rotation: 0.0,
        });
        let ctx = FrameContext::new(0, 16.0);
        let white = FrameBuffer::filled(8, 8, [255, 255, 255, 255]);
        let first = effect.apply(&white, &ctx).expect("first");
        assert_eq!(first, white);

        let black = FrameBuffer::new(8, 8);
        let second = effect.apply(&black, &ctx).expect("second");
        assert_eq!(second.pixel(4, 4), [128, 128, 128, 255]);

        effect.reset();
        assert!(!effect.has_history());
        assert_eq!(effect.apply(&black, &ctx).expect("after reset"), black);
    }

    #[test]
    fn feedback_history_restarts_on_resize() {
        let mut effect = FeedbackLoopEffect::new(FeedbackLoopParams::default());
        let ctx = FrameContext::new(0, 16.0);
        effect
            .apply(&FrameBuffer::filled(8, 8, [255, 255, 255, 255]), &ctx)
            .expect("first");
        let small = FrameBuffer::new(4, 4);
        assert_eq!(effect.apply(&small, &ctx).expect("resized"), small);
    }

    #[test]
    fn chromatic_aberration_grows_toward_the_edges() {
        let source = gradient(41, 41);
        let out = chromatic_aberration(&source, &ChromaticAberrationParams { strength: 10.0 });
        assert_eq!(out.pixel(20, 20), source.pixel(20, 20));
        assert_ne!(out.pixel(5, 20)[0], source.pixel(5, 20)[0]);
        assert_eq!(out.pixel(5, 20)[1], source.pixel(5, 20)[1]);
    }

    #[test]
    fn vhs_band_advances_and_resets() {
        let mut effect = VhsTrackingEffect::new(VhsTrackingParams {
            speed: 1.0,
            ..VhsTrackingParams::default()
        });
        let source = gradient(32, 32);
        effect
            .apply(&source, &FrameContext::new(0, 1000.0))
            .expect("apply");
        assert!((effect.band_phase() - 0.25).abs() < 1e-6);
        effect.reset();
        assert_eq!(effect.band_phase(), 0.0);
    }

    #[test]
    fn vhs_only_touches_rows_inside_the_band() {
        let source = gradient(32, 100);
        let params = VhsTrackingParams {
            intensity: 1.0,
            speed: 1.0,
            noise: 0.5,
        };
        let out = vhs_tracking(&source, &params, 0.5, 9);
        for y in (0..50).chain(62..100) {
            for x in 0..32 {
                assert_eq!(out.pixel(x, y), source.pixel(x, y), "row {y}");
            }
        }
    }

    #[test]
    fn noise_changes_per_frame_and_keeps_alpha() {
        let source = FrameBuffer::filled(16, 16, [128, 128, 128, 200]);
        let params = NoiseParams {
            intensity: 0.5,
            monochrome: true,
        };
        let a = noise(&source, &params, 1);
        let b = noise(&source, &params, 2);
        assert_ne!(a, b);
        assert_eq!(a, noise(&source, &params, 1));
        for px in a.as_bytes().chunks_exact(4) {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 200);
        }
    }

    #[test]
    fn static_displace_shifts_whole_bands() {
        let source = gradient(64, 64);
        let params = StaticDisplaceParams {
            intensity: 1.0,
            line_height: 4,
        };
        let out = static_displace(&source, &params, 5);
        for top in (0..64).step_by(4) {
            let shifted: Vec<bool> = (top..top + 4)
                .map(|y| (0..64).any(|x| out.pixel(x, y) != source.pixel(x, y)))
                .collect();
            assert!(shifted.iter().all(|&s| s == shifted[0]), "band at {top}");
        }
        let calm = StaticDisplaceParams {
            intensity: 0.0,
            ..params
        };
        assert_eq!(static_displace(&source, &calm, 5), source);
    }
}
