//! Glyph coverage atlases for the ASCII shader.
//!
//! An atlas is a single-channel strip: one square cell per ramp character,
//! left to right from darkest to brightest. Procedural atlases are built from
//! embedded bitmaps and need no font; [`GlyphAtlas::from_font`] rasterizes a
//! TTF/OTF through `fontdue` instead.

use anyhow::{anyhow, bail, Result};
use fontdue::{Font, FontSettings};

use crate::schema::AsciiCharSet;

/// Bitmap size of the embedded standard glyphs.
const BITMAP_SIZE: u32 = 8;

/// 8x8 bitmaps for `" .:-=+*#%@"`, most significant bit leftmost.
/// On-pixel counts strictly increase along the ramp.
const STANDARD_GLYPHS: [[u8; 8]; 10] = [
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00],
    [0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00],
    [0x00, 0x00, 0x00, 0x7E, 0x7E, 0x00, 0x00, 0x00],
    [0x00, 0x7E, 0x7E, 0x00, 0x00, 0x7E, 0x7E, 0x00],
    [0x18, 0x18, 0x18, 0xFF, 0xFF, 0x18, 0x18, 0x18],
    [0x99, 0x5A, 0x3C, 0xFF, 0xFF, 0x3C, 0x5A, 0x99],
    [0x66, 0xFF, 0xFF, 0x66, 0x66, 0xFF, 0xFF, 0x66],
    [0xF7, 0xF7, 0x7E, 0xFC, 0x3F, 0x7E, 0xEF, 0xEF],
    [0x7E, 0xFF, 0xFF, 0xDF, 0xDF, 0xFF, 0xFF, 0x7E],
];

const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// Braille dot positions `(column, row)` in the order the ramp lights them.
const BRAILLE_ORDER: [(u32, u32); 8] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 3),
    (1, 3),
    (1, 2),
    (1, 1),
    (1, 0),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphAtlas {
    cell: u32,
    glyph_count: u32,
    alpha: Vec<u8>,
}

impl GlyphAtlas {
    fn blank(cell: u32, glyph_count: usize) -> Result<Self> {
        if cell == 0 {
            bail!("glyph cell size must be at least 1 px");
        }
        if glyph_count == 0 {
            bail!("glyph ramp is empty");
        }
        let glyph_count =
            u32::try_from(glyph_count).map_err(|_| anyhow!("glyph ramp is too long"))?;
        let len = (cell as usize)
            .checked_mul(cell as usize)
            .and_then(|n| n.checked_mul(glyph_count as usize))
            .ok_or_else(|| anyhow!("glyph atlas {cell}px x {glyph_count} overflowed usize"))?;
        Ok(Self {
            cell,
            glyph_count,
            alpha: vec![0; len],
        })
    }

    /// Built-in atlas for a character set at `cell` px per glyph.
    pub fn procedural(char_set: AsciiCharSet, cell: u32) -> Result<Self> {
        let mut atlas = Self::blank(cell, char_set.char_count())?;
        for glyph in 0..atlas.glyph_count {
            for y in 0..cell {
                for x in 0..cell {
                    let on = match char_set {
                        AsciiCharSet::Standard => standard_on(glyph, x, y, cell),
                        AsciiCharSet::Blocks => shade_on(glyph, atlas.glyph_count, x, y),
                        AsciiCharSet::Braille => braille_on(glyph, x, y, cell),
                    };
                    if on {
                        atlas.set(glyph, x, y, 255);
                    }
                }
            }
        }
        Ok(atlas)
    }

    /// Rasterize every character of `ramp` from a font, centered in its cell.
    pub fn from_font(font_bytes: &[u8], ramp: &str, cell: u32) -> Result<Self> {
        let font = Font::from_bytes(font_bytes, FontSettings::default())
            .map_err(|error| anyhow!("failed to parse glyph atlas font: {error}"))?;
        let chars: Vec<char> = ramp.chars().collect();
        let mut atlas = Self::blank(cell, chars.len())?;
        let px = cell as f32 * 0.9;

        for (glyph, &ch) in chars.iter().enumerate() {
            if is_blank(ch) {
                continue;
            }
            if font.lookup_glyph_index(ch) == 0 {
                bail!(
                    "glyph atlas font has no glyph for U+{:04X} ({})",
                    ch as u32,
                    ch.escape_default()
                );
            }
            let (metrics, bitmap) = font.rasterize(ch, px);
            let off_x = (cell as i64 - metrics.width as i64) / 2;
            let off_y = (cell as i64 - metrics.height as i64) / 2;
            for (i, &coverage) in bitmap.iter().enumerate() {
                let x = off_x + (i % metrics.width.max(1)) as i64;
                let y = off_y + (i / metrics.width.max(1)) as i64;
                if (0..i64::from(cell)).contains(&x) && (0..i64::from(cell)).contains(&y) {
                    atlas.set(glyph as u32, x as u32, y as u32, coverage);
                }
            }
        }
        Ok(atlas)
    }

    pub fn cell_size(&self) -> u32 {
        self.cell
    }

    pub fn glyph_count(&self) -> u32 {
        self.glyph_count
    }

    pub fn width(&self) -> u32 {
        self.cell * self.glyph_count
    }

    pub fn height(&self) -> u32 {
        self.cell
    }

    /// Row-major R8 texels, `width() * height()` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.alpha
    }

    /// Coverage of `glyph` at cell-local `(x, y)`; zero outside the atlas.
    pub fn alpha(&self, glyph: u32, x: u32, y: u32) -> u8 {
        if glyph >= self.glyph_count || x >= self.cell || y >= self.cell {
            return 0;
        }
        self.alpha[self.index(glyph, x, y)]
    }

    /// Mean coverage of one glyph in `[0, 1]`.
    pub fn coverage(&self, glyph: u32) -> f32 {
        let mut sum = 0_u64;
        for y in 0..self.cell {
            for x in 0..self.cell {
                sum += u64::from(self.alpha(glyph, x, y));
            }
        }
        sum as f32 / (255.0 * (self.cell * self.cell) as f32)
    }

    fn index(&self, glyph: u32, x: u32, y: u32) -> usize {
        y as usize * self.width() as usize + (glyph * self.cell + x) as usize
    }

    fn set(&mut self, glyph: u32, x: u32, y: u32, value: u8) {
        let index = self.index(glyph, x, y);
        self.alpha[index] = value;
    }
}

fn is_blank(ch: char) -> bool {
    ch.is_whitespace() || ch == '\u{2800}'
}

fn standard_on(glyph: u32, x: u32, y: u32, cell: u32) -> bool {
    let Some(rows) = STANDARD_GLYPHS.get(glyph as usize) else {
        return false;
    };
    let bx = x * BITMAP_SIZE / cell;
    let by = y * BITMAP_SIZE / cell;
    (rows[by as usize] >> (7 - bx)) & 1 == 1
}

fn shade_on(glyph: u32, glyph_count: u32, x: u32, y: u32) -> bool {
    let steps = glyph_count.saturating_sub(1).max(1);
    let threshold = glyph * 16 / steps;
    u32::from(BAYER_4X4[(y % 4) as usize][(x % 4) as usize]) < threshold
}

fn braille_on(glyph: u32, x: u32, y: u32, cell: u32) -> bool {
    let size = cell as f32;
    let radius = (size * 0.1).max(0.5);
    let px = x as f32 + 0.5;
    let py = y as f32 + 0.5;
    BRAILLE_ORDER
        .iter()
        .take(glyph as usize)
        .any(|&(column, row)| {
            let cx = size * (0.25 + 0.5 * column as f32);
            let cy = size * (0.125 + 0.25 * row as f32);
            let (dx, dy) = (px - cx, py - cy);
            dx * dx + dy * dy <= radius * radius
        })
}
