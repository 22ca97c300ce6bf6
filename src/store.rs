//! Parameter store and snapshot protocol.
//!
//! The store is an explicit object owned by the session; the render loop
//! reads it every frame, while user controls and the chaos engine write it.
//! A [`Snapshot`] is a fully detached copy of every instance's state and is
//! the only way presets are saved or restored.

use std::fmt::{Display, Formatter};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::schema::{clamp_or, EffectKind, EffectParams, ParamPatch, PatchError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectInstance {
    pub id: String,
    pub enabled: bool,
    pub mix: f32,
    pub params: EffectParams,
}

impl EffectInstance {
    /// Disabled instance with the kind's full default parameter set.
    pub fn new(id: impl Into<String>, kind: EffectKind) -> Self {
        Self {
            id: id.into(),
            enabled: false,
            mix: 1.0,
            params: kind.default_params(),
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    /// True when rendering this instance cannot change a frame.
    pub fn is_inert(&self) -> bool {
        !self.enabled || self.mix <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownEffect(String),
    DuplicateEffect(String),
    Patch { id: String, source: PatchError },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEffect(id) => write!(f, "unknown effect id '{id}'"),
            Self::DuplicateEffect(id) => write!(f, "effect id '{id}' is already registered"),
            Self::Patch { id, source } => write!(f, "effect '{id}': {source}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Immutable, detached copy of every instance's enabled flag, mix and
/// parameters, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    effects: Vec<EffectInstance>,
}

impl Snapshot {
    pub fn effects(&self) -> &[EffectInstance] {
        &self.effects
    }

    pub fn get(&self, id: &str) -> Option<&EffectInstance> {
        self.effects.iter().find(|instance| instance.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize snapshot")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let snapshot: Snapshot =
            serde_json::from_str(raw).context("failed to parse snapshot json")?;
        Ok(snapshot.sanitized())
    }

    fn sanitized(self) -> Self {
        Self {
            effects: self
                .effects
                .into_iter()
                .map(|instance| EffectInstance {
                    mix: clamp_or(instance.mix, 0.0, 1.0, 1.0),
                    params: instance.params.sanitized(),
                    ..instance
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    instances: Vec<EffectInstance>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One disabled instance per effect kind, id = kind name.
    pub fn with_defaults() -> Self {
        Self {
            instances: EffectKind::all()
                .into_iter()
                .map(|kind| EffectInstance::new(kind.as_str(), kind))
                .collect(),
        }
    }

    pub fn register(&mut self, instance: EffectInstance) -> Result<(), StoreError> {
        if self.position(&instance.id).is_some() {
            return Err(StoreError::DuplicateEffect(instance.id));
        }
        self.instances.push(EffectInstance {
            mix: clamp_or(instance.mix, 0.0, 1.0, 1.0),
            params: instance.params.sanitized(),
            ..instance
        });
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<EffectInstance> {
        self.position(id).map(|index| self.instances.remove(index))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in chain order.
    pub fn instances(&self) -> &[EffectInstance] {
        &self.instances
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|instance| instance.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&EffectInstance> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|instance| instance.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut EffectInstance, StoreError> {
        let result = self
            .instances
            .iter_mut()
            .find(|instance| instance.id == id)
            .ok_or_else(|| StoreError::UnknownEffect(id.to_owned()));
        if let Err(error) = &result {
            warn!(%error, "rejected parameter store write");
        }
        result
    }

    /// Merge `patch` into the instance's parameters. Fields not named in the
    /// patch keep their values.
    pub fn set(&mut self, id: &str, patch: &ParamPatch) -> Result<(), StoreError> {
        let instance = self.get_mut(id)?;
        instance
            .params
            .merge_patch(patch)
            .map_err(|source| StoreError::Patch {
                id: id.to_owned(),
                source,
            })
            .inspect_err(|error| warn!(%error, "rejected parameter patch"))
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), StoreError> {
        self.get_mut(id)?.enabled = enabled;
        Ok(())
    }

    pub fn set_mix(&mut self, id: &str, mix: f32) -> Result<(), StoreError> {
        self.get_mut(id)?.mix = clamp_or(mix, 0.0, 1.0, 1.0);
        Ok(())
    }

    /// Typed in-process mutation; the result is sanitized afterwards.
    pub fn update<F>(&mut self, id: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut EffectParams),
    {
        let instance = self.get_mut(id)?;
        let kind = instance.kind();
        let mut params = instance.params.clone();
        mutate(&mut params);
        if params.kind() != kind {
            return Err(StoreError::Patch {
                id: id.to_owned(),
                source: PatchError::InvalidValue {
                    kind,
                    message: format!("cannot change kind to {}", params.kind()),
                },
            });
        }
        instance.params = params.sanitized();
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            effects: self.instances.clone(),
        }
    }

    /// Overwrite every instance named in `snapshot` with its recorded state.
    ///
    /// Returns the number of instances restored. Snapshot entries whose id is
    /// not registered are skipped and reported.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> usize {
        let mut restored = 0;
        for recorded in &snapshot.effects {
            match self.position(&recorded.id) {
                Some(index) => {
                    self.instances[index] = recorded.clone();
                    restored += 1;
                }
                None => warn!(id = %recorded.id, "snapshot names an unregistered effect"),
            }
        }
        restored
    }
}

/// `id.field=value` override, as accepted by `--set` on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamOverride {
    pub id: String,
    pub field: String,
    pub value: Value,
}

impl ParamOverride {
    pub fn parse(raw: &str) -> Result<Self> {
        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{raw}' must look like id.field=value"))?;
        let (id, field) = path
            .trim()
            .split_once('.')
            .ok_or_else(|| anyhow!("override '{raw}' must name an effect and a field"))?;
        if id.is_empty() || field.is_empty() {
            bail!("override '{raw}' has an empty effect id or field");
        }

        let value = value.trim();
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_owned()));

        Ok(Self {
            id: id.to_owned(),
            field: field.to_owned(),
            value,
        })
    }

    /// Apply to `store`. `enabled` and `mix` address the instance itself;
    /// every other field is a parameter.
    pub fn apply(&self, store: &mut ParameterStore) -> Result<()> {
        match self.field.as_str() {
            "enabled" => {
                let enabled = self
                    .value
                    .as_bool()
                    .ok_or_else(|| anyhow!("override {}.enabled expects true or false", self.id))?;
                store.set_enabled(&self.id, enabled)?;
            }
            "mix" => {
                let mix = self
                    .value
                    .as_f64()
                    .ok_or_else(|| anyhow!("override {}.mix expects a number", self.id))?;
                store.set_mix(&self.id, mix as f32)?;
            }
            field => {
                let mut patch = ParamPatch::new();
                patch.insert(field.to_owned(), self.value.clone());
                store.set(&self.id, &patch)?;
            }
        }
        Ok(())
    }
}
