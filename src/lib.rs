//! Glitchlab: a real-time effect chain over RGBA frames, with a chaos engine
//! that drives the glitch family's parameters while it is active.

pub mod ascii_shader;
pub mod chaos;
pub mod config;
pub mod dots_shader;
pub mod effect;
pub mod frame;
pub mod glitch;
pub mod glyph_atlas;
pub mod gpu;
pub mod halftone;
pub mod hex_mosaic;
pub mod logging;
pub mod radar_scan;
pub mod ripple;
pub mod schema;
pub mod store;

pub use chaos::{ChaosConfig, ChaosDriver, ChaosEngine};
pub use effect::{Effect, EffectChain, FrameContext};
pub use frame::FrameBuffer;
pub use schema::{EffectKind, EffectParams, ParamPatch};
pub use store::{ParameterStore, Snapshot};
