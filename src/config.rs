//! Scene configuration: what to render, through which chain, with or without
//! chaos. Loaded from YAML.
//!
//! ```yaml
//! resolution: { width: 320, height: 180 }
//! frames: 24
//! delta_ms: 33.3
//! chain:
//!   - kind: rgb_split
//!     enabled: true
//!     params: { amount: 20 }
//!   - id: scan
//!     kind: radar_scan
//!     enabled: true
//!     mix: 0.5
//! chaos:
//!   enabled: true
//!   seed: 7
//!   start_frame: 4
//!   stop_frame: 20
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::chaos::ChaosConfig;
use crate::effect::FrameContext;
use crate::schema::{EffectKind, ParamPatch};
use crate::store::{EffectInstance, ParameterStore};

const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
        }
    }
}

/// One effect instance in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainEntry {
    /// Defaults to the kind name.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: EffectKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mix")]
    pub mix: f32,
    /// Partial parameters over the kind's defaults.
    #[serde(default)]
    pub params: ParamPatch,
}

impl ChainEntry {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(self.kind.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_mix() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChaosSettings {
    pub enabled: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub seed: Option<u64>,
    /// Frame at which chaos activates.
    pub start_frame: u64,
    /// Frame at which chaos deactivates; runs to the end when unset.
    pub stop_frame: Option<u64>,
}

impl Default for ChaosSettings {
    fn default() -> Self {
        let engine = ChaosConfig::default();
        Self {
            enabled: false,
            min_delay_ms: engine.min_delay_ms,
            max_delay_ms: engine.max_delay_ms,
            seed: engine.seed,
            start_frame: 0,
            stop_frame: None,
        }
    }
}

impl ChaosSettings {
    pub fn engine_config(&self) -> ChaosConfig {
        ChaosConfig {
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engine_config().validate()?;
        if let Some(stop) = self.stop_frame {
            if stop <= self.start_frame {
                bail!(
                    "chaos stop_frame ({stop}) must come after start_frame ({})",
                    self.start_frame
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneConfig {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default = "default_delta_ms")]
    pub delta_ms: f32,
    /// Empty means every kind, disabled, in canonical order.
    #[serde(default)]
    pub chain: Vec<ChainEntry>,
    #[serde(default)]
    pub chaos: ChaosSettings,
}

fn default_frames() -> u64 {
    1
}

fn default_delta_ms() -> f32 {
    1000.0 / 30.0
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            frames: default_frames(),
            delta_ms: default_delta_ms(),
            chain: Vec::new(),
            chaos: ChaosSettings::default(),
        }
    }
}

impl SceneConfig {
    pub fn validate(&self) -> Result<()> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            bail!("resolution {width}x{height} must be within 1..={MAX_DIMENSION} on both axes");
        }
        if self.frames == 0 {
            bail!("frames must be at least 1");
        }
        if !self.delta_ms.is_finite() || self.delta_ms <= 0.0 {
            bail!("delta_ms must be a positive number, got {}", self.delta_ms);
        }

        let mut seen_ids = HashSet::with_capacity(self.chain.len());
        for entry in &self.chain {
            if entry.id().trim().is_empty() {
                bail!("chain entry of kind '{}' has an empty id", entry.kind);
            }
            if !seen_ids.insert(entry.id()) {
                bail!("duplicate chain id '{}'", entry.id());
            }
            if !entry.mix.is_finite() || !(0.0..=1.0).contains(&entry.mix) {
                bail!("chain entry '{}' mix must be within 0..=1", entry.id());
            }
        }

        self.chaos.validate().context("invalid chaos block")?;
        Ok(())
    }

    /// Store holding the chain's instances in order.
    pub fn build_store(&self) -> Result<ParameterStore> {
        if self.chain.is_empty() {
            return Ok(ParameterStore::with_defaults());
        }
        let mut store = ParameterStore::new();
        for entry in &self.chain {
            let mut instance = EffectInstance::new(entry.id(), entry.kind);
            instance.enabled = entry.enabled;
            instance.mix = entry.mix;
            instance
                .params
                .merge_patch(&entry.params)
                .with_context(|| format!("failed validating chain entry '{}'", entry.id()))?;
            store.register(instance)?;
        }
        Ok(store)
    }

    /// Host-clock time at the start of `frame`.
    pub fn frame_time_ms(&self, frame: u64) -> u64 {
        (frame as f64 * f64::from(self.delta_ms)).round() as u64
    }

    pub fn frame_context(&self, frame: u64) -> FrameContext {
        FrameContext::new(frame, self.delta_ms)
    }
}

/// Parse and validate scene YAML. `origin` names the source in errors.
pub fn parse_scene(contents: &str, origin: &str) -> Result<SceneConfig> {
    let scene: SceneConfig = serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!("failed to parse yaml in {origin} at {location}: {error}")
    })?;
    scene
        .validate()
        .with_context(|| format!("invalid scene {origin}"))?;
    Ok(scene)
}

pub fn load_scene(path: &Path) -> Result<SceneConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read scene {}", path.display()))?;
    parse_scene(&contents, &path.display().to_string())
}
