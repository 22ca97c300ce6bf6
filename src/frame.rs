//! Flat RGBA8 frame buffers shared by every effect.
//!
//! Pixels are row-major, straight (non-premultiplied) alpha. Conversions to
//! `tiny_skia::Pixmap` (premultiplied) and `image::RgbaImage` live here so
//! effects never have to care about the storage details of either backend.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tiny_skia::{ColorU8, Pixmap};

pub const LUMA_R: f32 = 0.299;
pub const LUMA_G: f32 = 0.587;
pub const LUMA_B: f32 = 0.114;

pub const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// Luma of an 8-bit RGB triple, normalized to `[0, 1]`.
#[inline(always)]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    (LUMA_R * f32::from(r) + LUMA_G * f32::from(g) + LUMA_B * f32::from(b)) / 255.0
}

#[inline(always)]
pub fn unit_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Opaque black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, OPAQUE_BLACK)
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| anyhow!("frame dimensions {width}x{height} overflowed usize"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGBA buffer length mismatch: expected {expected} bytes, got {} bytes",
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }

    pub fn same_size(&self, other: &FrameBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline(always)]
    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize * self.width as usize) + x as usize) << 2
    }

    /// Pixel at `(x, y)`. Callers must stay in bounds.
    #[inline(always)]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    #[inline(always)]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.index(x, y);
        self.pixels[i..i + 4].copy_from_slice(&rgba);
    }

    /// Signed lookup; `None` outside the frame.
    #[inline(always)]
    pub fn get(&self, x: i64, y: i64) -> Option<[u8; 4]> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        Some(self.pixel(x as u32, y as u32))
    }

    #[inline(always)]
    pub fn sample_or_black(&self, x: i64, y: i64) -> [u8; 4] {
        self.get(x, y).unwrap_or(OPAQUE_BLACK)
    }

    #[inline(always)]
    pub fn sample_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let max_x = i64::from(self.width.saturating_sub(1));
        let max_y = i64::from(self.height.saturating_sub(1));
        self.pixel(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)
    }

    /// Luma at a float position (truncated to the containing pixel); `None`
    /// outside the frame.
    pub fn luma_at(&self, x: f32, y: f32) -> Option<f32> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        self.get(x.floor() as i64, y.floor() as i64)
            .map(|[r, g, b, _]| luma(r, g, b))
    }

    pub fn to_pixmap(&self) -> Result<Pixmap> {
        let mut pixmap = Pixmap::new(self.width, self.height).ok_or_else(|| {
            anyhow!(
                "failed to allocate pixmap {}x{}",
                self.width,
                self.height
            )
        })?;
        for (dst, src) in pixmap
            .pixels_mut()
            .iter_mut()
            .zip(self.pixels.chunks_exact(4))
        {
            *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
        }
        Ok(pixmap)
    }

    pub fn from_pixmap(pixmap: &Pixmap) -> Self {
        let mut pixels = Vec::with_capacity(pixmap.pixels().len() * 4);
        for px in pixmap.pixels() {
            let color = px.demultiply();
            pixels.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            pixels,
        }
    }

    pub fn from_image(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }

    pub fn to_image(&self) -> Result<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;
        Ok(Self::from_image(decoded.to_rgba8()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_image()?
            .save(path)
            .with_context(|| format!("failed to write image {}", path.display()))
    }

    /// Synthetic source used when no input image is given: a diagonal
    /// gradient under three color bars with a bright spot in each bar.
    pub fn test_card(width: u32, height: u32) -> Self {
        let mut frame = Self::new(width, height);
        let bars = [[230, 40, 40], [40, 210, 60], [50, 80, 240]];
        let span = (width + height).max(1) as f32;
        for y in 0..height {
            for x in 0..width {
                let base = unit_to_u8((x + y) as f32 / span);
                let bar = bars[(x as usize * bars.len() / width.max(1) as usize).min(bars.len() - 1)];
                let rgba = if y < height / 3 {
                    [bar[0], bar[1], bar[2], 255]
                } else {
                    [base, base, base, 255]
                };
                frame.set_pixel(x, y, rgba);
            }
        }
        let radius = i64::from((width.min(height) / 24).max(1));
        for (index, _) in bars.iter().enumerate() {
            let cx = i64::from(width) * (2 * index as i64 + 1) / 6;
            let cy = i64::from(height / 6);
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let (x, y) = (cx + dx, cy + dy);
                    if dx * dx + dy * dy <= radius * radius && frame.get(x, y).is_some() {
                        frame.set_pixel(x as u32, y as u32, [255, 255, 255, 255]);
                    }
                }
            }
        }
        frame
    }

    /// Linear blend from `self` (mix 0) toward `effect` (mix 1).
    ///
    /// `mix <= 0` returns an exact copy of `self`.
    pub fn mixed_with(&self, effect: &FrameBuffer, mix: f32) -> FrameBuffer {
        if mix <= 0.0 || !self.same_size(effect) {
            return self.clone();
        }
        if mix >= 1.0 {
            return effect.clone();
        }
        let pixels = self
            .pixels
            .iter()
            .zip(effect.pixels.iter())
            .map(|(&a, &b)| {
                let a = f32::from(a);
                (a + (f32::from(b) - a) * mix).round().clamp(0.0, 255.0) as u8
            })
            .collect();
        FrameBuffer {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}
