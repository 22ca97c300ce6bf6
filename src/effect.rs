//! Effect capability trait and the per-frame effect chain.
//!
//! Runtime effect objects own only their animation state and derived
//! resources (phase accumulators, glyph atlases, feedback buffers). The
//! parameter store stays the source of truth: every frame the chain reads each
//! instance, pushes its parameters into the matching runtime object, renders,
//! and blends the result by the instance's `mix`.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::ascii_shader::AsciiEffect;
use crate::dots_shader::DotsEffect;
use crate::frame::FrameBuffer;
use crate::glitch::{
    BlockDisplaceEffect, ChromaticAberrationEffect, FeedbackLoopEffect, NoiseEffect,
    RgbSplitEffect, StaticDisplaceEffect, VhsTrackingEffect,
};
use crate::gpu::GpuContext;
use crate::halftone::HalftoneEffect;
use crate::hex_mosaic::HexMosaicEffect;
use crate::radar_scan::RadarScanEffect;
use crate::ripple::RippleEffect;
use crate::schema::{EffectKind, EffectParams, ParamPatch};
use crate::store::ParameterStore;

/// Timing for one render tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub frame_index: u64,
    pub delta_ms: f32,
}

impl FrameContext {
    pub fn new(frame_index: u64, delta_ms: f32) -> Self {
        Self {
            frame_index,
            delta_ms: if delta_ms.is_finite() {
                delta_ms.max(0.0)
            } else {
                0.0
            },
        }
    }
}

pub trait Effect {
    fn kind(&self) -> EffectKind;

    /// Current parameters as seen by this effect.
    fn params(&self) -> EffectParams;

    /// Replace parameters. Derived resources are rebuilt only when a field
    /// they depend on changed.
    fn update_params(&mut self, params: &EffectParams) -> Result<()>;

    /// Render `source` into a new frame of the same size at full strength.
    fn apply(&mut self, source: &FrameBuffer, ctx: &FrameContext) -> Result<FrameBuffer>;

    /// Zero any animation state.
    fn reset(&mut self) {}

    /// Render through a GPU program from now on. Effects without one keep
    /// rendering on the CPU.
    fn attach_gpu(&mut self, _gpu: Arc<GpuContext>) -> Result<()> {
        Ok(())
    }

    /// Merge a partial update over the current parameters.
    fn patch_params(&mut self, patch: &ParamPatch) -> Result<()> {
        let mut params = self.params();
        params.merge_patch(patch)?;
        self.update_params(&params)
    }
}

pub(crate) fn params_mismatch(expected: EffectKind, got: &EffectParams) -> anyhow::Error {
    anyhow!(
        "{expected} effect cannot take {} parameters",
        got.kind()
    )
}

/// Construct the runtime object for `params`.
pub fn build_effect(params: &EffectParams) -> Result<Box<dyn Effect>> {
    let params = params.clone().sanitized();
    Ok(match params {
        EffectParams::Halftone(p) => Box::new(HalftoneEffect::new(p)),
        EffectParams::HexMosaic(p) => Box::new(HexMosaicEffect::new(p)),
        EffectParams::Ripple(p) => Box::new(RippleEffect::new(p)),
        EffectParams::RadarScan(p) => Box::new(RadarScanEffect::new(p)),
        EffectParams::Ascii(p) => Box::new(AsciiEffect::new(p)?),
        EffectParams::Dots(p) => Box::new(DotsEffect::new(p)),
        EffectParams::RgbSplit(p) => Box::new(RgbSplitEffect::new(p)),
        EffectParams::BlockDisplace(p) => Box::new(BlockDisplaceEffect::new(p)),
        EffectParams::FeedbackLoop(p) => Box::new(FeedbackLoopEffect::new(p)),
        EffectParams::ChromaticAberration(p) => Box::new(ChromaticAberrationEffect::new(p)),
        EffectParams::VhsTracking(p) => Box::new(VhsTrackingEffect::new(p)),
        EffectParams::Noise(p) => Box::new(NoiseEffect::new(p)),
        EffectParams::StaticDisplace(p) => Box::new(StaticDisplaceEffect::new(p)),
    })
}

enum SlotState {
    Empty,
    Ready(Box<dyn Effect>),
    /// Construction failed for these parameters; retried once they change.
    Failed(EffectParams),
}

struct ChainSlot {
    id: String,
    state: SlotState,
    active: bool,
}

impl ChainSlot {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            state: SlotState::Empty,
            active: false,
        }
    }

    /// Runtime effect ready to render `params`, reset if it sat out the
    /// previous frame.
    fn activate(
        &mut self,
        params: &EffectParams,
        gpu: Option<&Arc<GpuContext>>,
    ) -> Option<&mut dyn Effect> {
        let needs_build = match &self.state {
            SlotState::Empty => true,
            SlotState::Ready(effect) => effect.kind() != params.kind(),
            SlotState::Failed(failed) => failed != params,
        };
        if needs_build {
            self.active = false;
            self.state = match build_effect(params) {
                Ok(mut effect) => {
                    if let Some(gpu) = gpu.filter(|_| params.kind().is_shader()) {
                        if let Err(error) = effect.attach_gpu(Arc::clone(gpu)) {
                            warn!(id = %self.id, error = %format!("{error:#}"), "GPU unavailable for effect, using CPU");
                        }
                    }
                    SlotState::Ready(effect)
                }
                Err(error) => {
                    warn!(id = %self.id, error = %format!("{error:#}"), "effect construction failed");
                    SlotState::Failed(params.clone())
                }
            };
        }

        let was_active = self.active;
        match &mut self.state {
            SlotState::Ready(effect) => {
                if !was_active {
                    effect.reset();
                }
                self.active = true;
                Some(effect.as_mut())
            }
            SlotState::Empty | SlotState::Failed(_) => {
                self.active = false;
                None
            }
        }
    }
}

/// Runs enabled store instances over a frame, in store order.
#[derive(Default)]
pub struct EffectChain {
    slots: Vec<ChainSlot>,
    gpu: Option<Arc<GpuContext>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shader-domain effects built after this call render on `gpu`.
    pub fn with_gpu(mut self, gpu: Arc<GpuContext>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    /// Reset animation state of every runtime effect.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if let SlotState::Ready(effect) = &mut slot.state {
                effect.reset();
            }
            slot.active = false;
        }
    }

    /// Use `effect` as the runtime object for `id` instead of building one
    /// from the store. It is replaced if the instance changes kind.
    pub fn install(&mut self, id: &str, effect: Box<dyn Effect>) {
        let index = self.slot_index(id);
        let slot = &mut self.slots[index];
        slot.state = SlotState::Ready(effect);
        slot.active = false;
    }

    /// Runtime effect for `id`, if it has been constructed.
    pub fn effect(&self, id: &str) -> Option<&dyn Effect> {
        self.slots
            .iter()
            .find(|slot| slot.id == id)
            .and_then(|slot| match &slot.state {
                SlotState::Ready(effect) => Some(effect.as_ref()),
                SlotState::Empty | SlotState::Failed(_) => None,
            })
    }

    /// Render one frame. Never fails: an effect that errors is skipped for
    /// this frame and its input passes through.
    pub fn render(
        &mut self,
        store: &ParameterStore,
        source: &FrameBuffer,
        ctx: &FrameContext,
    ) -> FrameBuffer {
        // Runtime state of removed instances goes with them.
        self.slots.retain(|slot| store.get(&slot.id).is_some());

        let mut current = source.clone();
        for instance in store.instances() {
            let id = instance.id.as_str();
            let slot_index = self.slot_index(id);
            let slot = &mut self.slots[slot_index];

            if instance.is_inert() {
                slot.active = false;
                continue;
            }
            let Some(effect) = slot.activate(&instance.params, self.gpu.as_ref()) else {
                continue;
            };

            let rendered = effect
                .update_params(&instance.params)
                .and_then(|_| effect.apply(&current, ctx))
                .and_then(|out| {
                    if out.same_size(&current) {
                        Ok(out)
                    } else {
                        Err(anyhow!(
                            "produced {}x{} for a {}x{} input",
                            out.width(),
                            out.height(),
                            current.width(),
                            current.height()
                        ))
                    }
                });
            match rendered {
                Ok(out) => current = current.mixed_with(&out, instance.mix),
                Err(error) => {
                    warn!(id = %id, error = %format!("{error:#}"), "effect skipped this frame")
                }
            }
        }
        current
    }

    fn slot_index(&mut self, id: &str) -> usize {
        match self.slots.iter().position(|slot| slot.id == id) {
            Some(index) => index,
            None => {
                self.slots.push(ChainSlot::new(id));
                self.slots.len() - 1
            }
        }
    }
}
