//! Typed parameter sets for every effect kind.
//!
//! Each kind has its own struct with full defaults; [`EffectParams`] is the
//! tagged union stored in the parameter store. Values coming from anywhere
//! (config files, patches, the chaos engine) pass through `sanitized()` which
//! clamps numbers into their domain and wraps angles into `[0, 360)`.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-name -> value overlay used by partial parameter updates.
pub type ParamPatch = Map<String, Value>;

pub type Rgb = [u8; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Halftone,
    HexMosaic,
    Ripple,
    RadarScan,
    Ascii,
    Dots,
    RgbSplit,
    BlockDisplace,
    FeedbackLoop,
    ChromaticAberration,
    VhsTracking,
    Noise,
    StaticDisplace,
}

impl EffectKind {
    pub const fn all() -> [Self; 13] {
        [
            Self::Halftone,
            Self::HexMosaic,
            Self::Ripple,
            Self::RadarScan,
            Self::Ascii,
            Self::Dots,
            Self::RgbSplit,
            Self::BlockDisplace,
            Self::FeedbackLoop,
            Self::ChromaticAberration,
            Self::VhsTracking,
            Self::Noise,
            Self::StaticDisplace,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Halftone => "halftone",
            Self::HexMosaic => "hex_mosaic",
            Self::Ripple => "ripple",
            Self::RadarScan => "radar_scan",
            Self::Ascii => "ascii",
            Self::Dots => "dots",
            Self::RgbSplit => "rgb_split",
            Self::BlockDisplace => "block_displace",
            Self::FeedbackLoop => "feedback_loop",
            Self::ChromaticAberration => "chromatic_aberration",
            Self::VhsTracking => "vhs_tracking",
            Self::Noise => "noise",
            Self::StaticDisplace => "static_displace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.as_str() == s)
    }

    /// Kinds rendered by a fragment program rather than a pixel loop.
    pub fn is_shader(self) -> bool {
        matches!(self, Self::Ascii | Self::Dots)
    }

    pub fn default_params(self) -> EffectParams {
        match self {
            Self::Halftone => EffectParams::Halftone(HalftoneParams::default()),
            Self::HexMosaic => EffectParams::HexMosaic(HexMosaicParams::default()),
            Self::Ripple => EffectParams::Ripple(RippleParams::default()),
            Self::RadarScan => EffectParams::RadarScan(RadarScanParams::default()),
            Self::Ascii => EffectParams::Ascii(AsciiParams::default()),
            Self::Dots => EffectParams::Dots(DotsParams::default()),
            Self::RgbSplit => EffectParams::RgbSplit(RgbSplitParams::default()),
            Self::BlockDisplace => EffectParams::BlockDisplace(BlockDisplaceParams::default()),
            Self::FeedbackLoop => EffectParams::FeedbackLoop(FeedbackLoopParams::default()),
            Self::ChromaticAberration => {
                EffectParams::ChromaticAberration(ChromaticAberrationParams::default())
            }
            Self::VhsTracking => EffectParams::VhsTracking(VhsTrackingParams::default()),
            Self::Noise => EffectParams::Noise(NoiseParams::default()),
            Self::StaticDisplace => EffectParams::StaticDisplace(StaticDisplaceParams::default()),
        }
    }
}

impl Display for EffectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Clamp into `[min, max]`; NaN falls back to `fallback`, infinities clamp.
pub fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

/// Wrap an angle in degrees into `[0, 360)`. Non-finite angles become 0.
pub fn wrap_degrees(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

// ---------------------------------------------------------------------------
// Pixel-domain effect parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalftoneMode {
    #[default]
    Mono,
    Rgb,
    Cmyk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HalftoneParams {
    pub mode: HalftoneMode,
    pub dot_size: f32,
    pub angle: f32,
    pub contrast: f32,
}

impl Default for HalftoneParams {
    fn default() -> Self {
        Self {
            mode: HalftoneMode::Mono,
            dot_size: 8.0,
            angle: 45.0,
            contrast: 1.0,
        }
    }
}

impl HalftoneParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            mode: self.mode,
            dot_size: clamp_or(self.dot_size, 2.0, 64.0, d.dot_size),
            angle: wrap_degrees(self.angle),
            contrast: clamp_or(self.contrast, 0.1, 5.0, d.contrast),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HexFillMode {
    #[default]
    Center,
    Average,
    Original,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HexMosaicParams {
    pub hex_size: f32,
    pub angle: f32,
    pub fill_mode: HexFillMode,
    pub show_edges: bool,
    pub edge_opacity: f32,
    pub edge_width: f32,
}

impl Default for HexMosaicParams {
    fn default() -> Self {
        Self {
            hex_size: 12.0,
            angle: 0.0,
            fill_mode: HexFillMode::Center,
            show_edges: false,
            edge_opacity: 0.3,
            edge_width: 1.0,
        }
    }
}

impl HexMosaicParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            hex_size: clamp_or(self.hex_size, 3.0, 128.0, d.hex_size),
            angle: wrap_degrees(self.angle),
            fill_mode: self.fill_mode,
            show_edges: self.show_edges,
            edge_opacity: clamp_or(self.edge_opacity, 0.0, 1.0, d.edge_opacity),
            edge_width: clamp_or(self.edge_width, 0.5, 6.0, d.edge_width),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RippleParams {
    pub amplitude: f32,
    pub frequency: f32,
    pub decay: f32,
    pub speed: f32,
    pub max_peaks: u32,
    pub threshold: f32,
}

impl Default for RippleParams {
    fn default() -> Self {
        Self {
            amplitude: 12.0,
            frequency: 0.08,
            decay: 0.01,
            speed: 1.0,
            max_peaks: 5,
            threshold: 0.6,
        }
    }
}

impl RippleParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            amplitude: clamp_or(self.amplitude, 0.0, 100.0, d.amplitude),
            frequency: clamp_or(self.frequency, 0.001, 1.0, d.frequency),
            decay: clamp_or(self.decay, 0.0, 0.2, d.decay),
            speed: clamp_or(self.speed, 0.0, 10.0, d.speed),
            max_peaks: self.max_peaks.clamp(1, 16),
            threshold: clamp_or(self.threshold, 0.0, 1.0, d.threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Horizontal,
    Vertical,
    Radial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RadarScanParams {
    pub mode: ScanMode,
    pub speed: f32,
    pub line_width: f32,
    pub trail_length: f32,
    pub color: Rgb,
}

impl Default for RadarScanParams {
    fn default() -> Self {
        Self {
            mode: ScanMode::Horizontal,
            speed: 1.0,
            line_width: 4.0,
            trail_length: 120.0,
            color: [0, 255, 120],
        }
    }
}

impl RadarScanParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            mode: self.mode,
            speed: clamp_or(self.speed, 0.0, 10.0, d.speed),
            line_width: clamp_or(self.line_width, 0.0, 512.0, d.line_width),
            trail_length: clamp_or(self.trail_length, 0.0, 4096.0, d.trail_length),
            color: self.color,
        }
    }
}

// ---------------------------------------------------------------------------
// Shader-domain effect parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsciiCharSet {
    #[default]
    Standard,
    Blocks,
    Braille,
}

impl AsciiCharSet {
    /// Glyph ramp ordered dark -> light.
    pub fn ramp(self) -> &'static str {
        match self {
            Self::Standard => " .:-=+*#%@",
            Self::Blocks => " ░▒▓█",
            Self::Braille => "⠀⠁⠃⠇⡇⣇⣧⣷⣿",
        }
    }

    pub fn char_count(self) -> usize {
        self.ramp().chars().count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsciiColorMode {
    #[default]
    Mono,
    Original,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AsciiParams {
    pub cell_size: f32,
    pub char_set: AsciiCharSet,
    pub contrast: f32,
    pub invert: bool,
    pub color_mode: AsciiColorMode,
    pub mono_color: Rgb,
}

impl Default for AsciiParams {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            char_set: AsciiCharSet::Standard,
            contrast: 1.0,
            invert: false,
            color_mode: AsciiColorMode::Mono,
            mono_color: [0, 255, 70],
        }
    }
}

impl AsciiParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            cell_size: clamp_or(self.cell_size, 4.0, 64.0, d.cell_size).round(),
            char_set: self.char_set,
            contrast: clamp_or(self.contrast, 0.1, 5.0, d.contrast),
            invert: self.invert,
            color_mode: self.color_mode,
            mono_color: self.mono_color,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DotShape {
    #[default]
    Circle,
    Square,
    Diamond,
}

impl DotShape {
    /// Index passed to the dots shader.
    pub fn shader_index(self) -> u32 {
        match self {
            Self::Circle => 0,
            Self::Square => 1,
            Self::Diamond => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DotsParams {
    pub grid_size: f32,
    pub dot_scale: f32,
    pub shape: DotShape,
    pub threshold: f32,
}

impl Default for DotsParams {
    fn default() -> Self {
        Self {
            grid_size: 10.0,
            dot_scale: 1.0,
            shape: DotShape::Circle,
            threshold: 0.1,
        }
    }
}

impl DotsParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            grid_size: clamp_or(self.grid_size, 3.0, 64.0, d.grid_size).round(),
            dot_scale: clamp_or(self.dot_scale, 0.1, 2.0, d.dot_scale),
            shape: self.shape,
            threshold: clamp_or(self.threshold, 0.0, 1.0, d.threshold),
        }
    }
}

// ---------------------------------------------------------------------------
// Glitch family parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RgbSplitParams {
    pub amount: f32,
    pub angle: f32,
}

impl Default for RgbSplitParams {
    fn default() -> Self {
        Self {
            amount: 8.0,
            angle: 0.0,
        }
    }
}

impl RgbSplitParams {
    pub fn sanitized(self) -> Self {
        Self {
            amount: clamp_or(self.amount, 0.0, 100.0, Self::default().amount),
            angle: wrap_degrees(self.angle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockDisplaceParams {
    pub intensity: f32,
    pub block_size: u32,
    pub seed: u32,
}

impl Default for BlockDisplaceParams {
    fn default() -> Self {
        Self {
            intensity: 0.3,
            block_size: 32,
            seed: 0,
        }
    }
}

impl BlockDisplaceParams {
    pub fn sanitized(self) -> Self {
        Self {
            intensity: clamp_or(self.intensity, 0.0, 1.0, Self::default().intensity),
            block_size: self.block_size.clamp(4, 256),
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedbackLoopParams {
    pub decay: f32,
    pub zoom: f32,
    pub rotation: f32,
}

impl Default for FeedbackLoopParams {
    fn default() -> Self {
        Self {
            decay: 0.85,
            zoom: 1.02,
            rotation: 0.0,
        }
    }
}

impl FeedbackLoopParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            decay: clamp_or(self.decay, 0.0, 0.99, d.decay),
            zoom: clamp_or(self.zoom, 0.5, 2.0, d.zoom),
            rotation: clamp_or(self.rotation, -45.0, 45.0, d.rotation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChromaticAberrationParams {
    pub strength: f32,
}

impl Default for ChromaticAberrationParams {
    fn default() -> Self {
        Self { strength: 6.0 }
    }
}

impl ChromaticAberrationParams {
    pub fn sanitized(self) -> Self {
        Self {
            strength: clamp_or(self.strength, 0.0, 50.0, Self::default().strength),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VhsTrackingParams {
    pub intensity: f32,
    pub speed: f32,
    pub noise: f32,
}

impl Default for VhsTrackingParams {
    fn default() -> Self {
        Self {
            intensity: 0.4,
            speed: 1.0,
            noise: 0.2,
        }
    }
}

impl VhsTrackingParams {
    pub fn sanitized(self) -> Self {
        let d = Self::default();
        Self {
            intensity: clamp_or(self.intensity, 0.0, 1.0, d.intensity),
            speed: clamp_or(self.speed, 0.0, 10.0, d.speed),
            noise: clamp_or(self.noise, 0.0, 1.0, d.noise),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoiseParams {
    pub intensity: f32,
    pub monochrome: bool,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            intensity: 0.2,
            monochrome: true,
        }
    }
}

impl NoiseParams {
    pub fn sanitized(self) -> Self {
        Self {
            intensity: clamp_or(self.intensity, 0.0, 1.0, Self::default().intensity),
            monochrome: self.monochrome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticDisplaceParams {
    pub intensity: f32,
    pub line_height: u32,
}

impl Default for StaticDisplaceParams {
    fn default() -> Self {
        Self {
            intensity: 0.3,
            line_height: 2,
        }
    }
}

impl StaticDisplaceParams {
    pub fn sanitized(self) -> Self {
        Self {
            intensity: clamp_or(self.intensity, 0.0, 1.0, Self::default().intensity),
            line_height: self.line_height.clamp(1, 32),
        }
    }
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectParams {
    Halftone(HalftoneParams),
    HexMosaic(HexMosaicParams),
    Ripple(RippleParams),
    RadarScan(RadarScanParams),
    Ascii(AsciiParams),
    Dots(DotsParams),
    RgbSplit(RgbSplitParams),
    BlockDisplace(BlockDisplaceParams),
    FeedbackLoop(FeedbackLoopParams),
    ChromaticAberration(ChromaticAberrationParams),
    VhsTracking(VhsTrackingParams),
    Noise(NoiseParams),
    StaticDisplace(StaticDisplaceParams),
}

/// Why a partial update could not be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    UnknownField { kind: EffectKind, field: String },
    InvalidValue { kind: EffectKind, message: String },
}

impl Display for PatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { kind, field } => {
                write!(f, "{kind} has no parameter named '{field}'")
            }
            Self::InvalidValue { kind, message } => {
                write!(f, "invalid {kind} parameter value: {message}")
            }
        }
    }
}

impl std::error::Error for PatchError {}

impl EffectParams {
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Halftone(_) => EffectKind::Halftone,
            Self::HexMosaic(_) => EffectKind::HexMosaic,
            Self::Ripple(_) => EffectKind::Ripple,
            Self::RadarScan(_) => EffectKind::RadarScan,
            Self::Ascii(_) => EffectKind::Ascii,
            Self::Dots(_) => EffectKind::Dots,
            Self::RgbSplit(_) => EffectKind::RgbSplit,
            Self::BlockDisplace(_) => EffectKind::BlockDisplace,
            Self::FeedbackLoop(_) => EffectKind::FeedbackLoop,
            Self::ChromaticAberration(_) => EffectKind::ChromaticAberration,
            Self::VhsTracking(_) => EffectKind::VhsTracking,
            Self::Noise(_) => EffectKind::Noise,
            Self::StaticDisplace(_) => EffectKind::StaticDisplace,
        }
    }

    pub fn sanitized(self) -> Self {
        match self {
            Self::Halftone(p) => Self::Halftone(p.sanitized()),
            Self::HexMosaic(p) => Self::HexMosaic(p.sanitized()),
            Self::Ripple(p) => Self::Ripple(p.sanitized()),
            Self::RadarScan(p) => Self::RadarScan(p.sanitized()),
            Self::Ascii(p) => Self::Ascii(p.sanitized()),
            Self::Dots(p) => Self::Dots(p.sanitized()),
            Self::RgbSplit(p) => Self::RgbSplit(p.sanitized()),
            Self::BlockDisplace(p) => Self::BlockDisplace(p.sanitized()),
            Self::FeedbackLoop(p) => Self::FeedbackLoop(p.sanitized()),
            Self::ChromaticAberration(p) => Self::ChromaticAberration(p.sanitized()),
            Self::VhsTracking(p) => Self::VhsTracking(p.sanitized()),
            Self::Noise(p) => Self::Noise(p.sanitized()),
            Self::StaticDisplace(p) => Self::StaticDisplace(p.sanitized()),
        }
    }

    /// Overlay `patch` onto these parameters, leaving unset fields alone.
    ///
    /// Unknown fields and values of the wrong type are rejected and leave
    /// `self` untouched; out-of-range numbers are clamped.
    pub fn merge_patch(&mut self, patch: &ParamPatch) -> Result<(), PatchError> {
        let kind = self.kind();
        let invalid = |message: String| PatchError::InvalidValue { kind, message };

        let mut value = serde_json::to_value(&*self).map_err(|error| invalid(error.to_string()))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| invalid("parameters did not serialize to an object".to_owned()))?;

        for (field, field_value) in patch {
            if field == "kind" || !object.contains_key(field) {
                return Err(PatchError::UnknownField {
                    kind,
                    field: field.clone(),
                });
            }
            object.insert(field.clone(), field_value.clone());
        }

        let merged: EffectParams =
            serde_json::from_value(value).map_err(|error| invalid(error.to_string()))?;
        *self = merged.sanitized();
        Ok(())
    }
}
