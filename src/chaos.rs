//! Chaos mode: force the glitch family on and keep re-randomizing it.
//!
//! [`ChaosEngine`] is a two-state machine (idle / active) driven by the host
//! clock through [`ChaosEngine::poll`]. Activation snapshots the store and
//! deactivation restores that snapshot exactly. There is never more than one
//! pending tick, and none while idle.
//!
//! [`ChaosDriver`] runs an engine on its own thread against a shared store.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use fastrand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schema::{EffectKind, EffectParams};
use crate::store::{ParameterStore, Snapshot};

/// Kinds chaos mode takes over.
pub const CHAOS_KINDS: [EffectKind; 7] = [
    EffectKind::RgbSplit,
    EffectKind::BlockDisplace,
    EffectKind::FeedbackLoop,
    EffectKind::ChromaticAberration,
    EffectKind::VhsTracking,
    EffectKind::Noise,
    EffectKind::StaticDisplace,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChaosConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 500,
            seed: None,
        }
    }
}

impl ChaosConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_delay_ms == 0 {
            bail!("chaos min_delay_ms must be at least 1");
        }
        if self.min_delay_ms > self.max_delay_ms {
            bail!(
                "chaos min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms,
                self.max_delay_ms
            );
        }
        Ok(())
    }
}

/// Handle of the one pending re-randomization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub id: u64,
    pub due_ms: u64,
}

pub struct ChaosEngine {
    config: ChaosConfig,
    rng: Rng,
    snapshot: Option<Snapshot>,
    pending: Option<ScheduledTick>,
    next_tick_id: u64,
    ticks_fired: u64,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Rng::with_seed(seed),
            None => Rng::new(),
        };
        let min_delay_ms = config.min_delay_ms.max(1);
        Self {
            config: ChaosConfig {
                min_delay_ms,
                max_delay_ms: config.max_delay_ms.max(min_delay_ms),
                seed: config.seed,
            },
            rng,
            snapshot: None,
            pending: None,
            next_tick_id: 0,
            ticks_fired: 0,
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn pending(&self) -> Option<ScheduledTick> {
        self.pending
    }

    pub fn pending_ticks(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    pub fn ticks_fired(&self) -> u64 {
        self.ticks_fired
    }

    /// Snapshot the store, force the glitch family on, schedule the first
    /// tick. No-op while already active.
    pub fn activate(&mut self, store: &mut ParameterStore, now_ms: u64) {
        if self.is_active() {
            return;
        }
        self.snapshot = Some(store.snapshot());
        for id in chaos_ids(store) {
            let forced = store
                .set_enabled(&id, true)
                .and_then(|_| store.set_mix(&id, 1.0))
                .and_then(|_| store.update(&id, force_params));
            if let Err(error) = forced {
                warn!(%error, "chaos could not force effect");
            }
        }
        self.schedule(now_ms);
        info!(due_ms = ?self.pending.map(|tick| tick.due_ms), "chaos activated");
    }

    /// Fire the pending tick if it is due at `now_ms`. At most one tick
    /// fires per call; the next one is scheduled a fresh delay after the
    /// later of its due time and `now_ms`. Returns how many fired.
    pub fn poll(&mut self, store: &mut ParameterStore, now_ms: u64) -> usize {
        let Some(tick) = self.pending.filter(|tick| tick.due_ms <= now_ms) else {
            return 0;
        };
        self.tick(store);
        self.schedule(tick.due_ms.max(now_ms));
        1
    }

    /// Cancel the pending tick and restore the activation snapshot.
    /// Returns false when already idle.
    pub fn deactivate(&mut self, store: &mut ParameterStore) -> bool {
        self.pending = None;
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };
        let restored = store.apply_snapshot(&snapshot);
        info!(restored, ticks = self.ticks_fired, "chaos deactivated");
        true
    }

    /// One re-randomization of every chaos-controlled instance. Idle engines
    /// hold no snapshot to restore, so they leave the store alone.
    fn tick(&mut self, store: &mut ParameterStore) {
        if !self.is_active() {
            return;
        }
        self.ticks_fired += 1;
        for id in chaos_ids(store) {
            let rng = &mut self.rng;
            if let Err(error) = store.update(&id, |params| randomize(params, rng)) {
                warn!(%error, "chaos tick could not update effect");
            }
        }
        debug!(tick = self.ticks_fired, "chaos tick");
    }

    fn schedule(&mut self, from_ms: u64) {
        let delay = self
            .rng
            .u64(self.config.min_delay_ms..=self.config.max_delay_ms);
        self.next_tick_id += 1;
        self.pending = Some(ScheduledTick {
            id: self.next_tick_id,
            due_ms: from_ms.saturating_add(delay),
        });
    }
}

fn chaos_ids(store: &ParameterStore) -> Vec<String> {
    store
        .instances()
        .iter()
        .filter(|instance| CHAOS_KINDS.contains(&instance.kind()))
        .map(|instance| instance.id.clone())
        .collect()
}

fn force_params(params: &mut EffectParams) {
    match params {
        EffectParams::RgbSplit(p) => p.amount = 40.0,
        EffectParams::BlockDisplace(p) => {
            p.intensity = 0.8;
            p.block_size = 48;
        }
        EffectParams::FeedbackLoop(p) => {
            p.decay = 0.9;
            p.zoom = 1.05;
            p.rotation = 2.0;
        }
        EffectParams::ChromaticAberration(p) => p.strength = 25.0,
        EffectParams::VhsTracking(p) => p.intensity = 0.8,
        EffectParams::Noise(p) => p.intensity = 0.5,
        EffectParams::StaticDisplace(p) => p.intensity = 0.7,
        _ => {}
    }
}

fn uniform(rng: &mut Rng, min: f32, max: f32) -> f32 {
    min + rng.f32() * (max - min)
}

fn randomize(params: &mut EffectParams, rng: &mut Rng) {
    match params {
        EffectParams::RgbSplit(p) => {
            p.amount = uniform(rng, 10.0, 80.0);
            p.angle = uniform(rng, 0.0, 360.0);
        }
        EffectParams::BlockDisplace(p) => {
            p.intensity = uniform(rng, 0.3, 1.0);
            p.block_size = rng.u32(8..=96);
            p.seed = rng.u32(..);
        }
        EffectParams::FeedbackLoop(p) => {
            p.decay = uniform(rng, 0.7, 0.95);
            p.zoom = uniform(rng, 0.95, 1.1);
            p.rotation = uniform(rng, -5.0, 5.0);
        }
        EffectParams::Noise(p) => p.intensity = uniform(rng, 0.2, 0.8),
        _ => {}
    }
}

/// Chaos engine on a worker thread, sharing the store through a mutex.
pub struct ChaosDriver {
    store: Arc<Mutex<ParameterStore>>,
    cancel: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<ChaosEngine>>,
}

impl ChaosDriver {
    /// Activate chaos on `store` and start ticking in the background.
    pub fn start(store: Arc<Mutex<ParameterStore>>, config: ChaosConfig) -> Result<Self> {
        config.validate()?;
        let mut engine = ChaosEngine::new(config);
        {
            let mut guard = store
                .lock()
                .map_err(|_| anyhow!("parameter store lock poisoned"))?;
            engine.activate(&mut guard, 0);
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let shared = Arc::clone(&store);
        let worker = std::thread::Builder::new()
            .name("glitchlab-chaos".to_owned())
            .spawn(move || {
                let started = Instant::now();
                loop {
                    let now_ms = started.elapsed().as_millis() as u64;
                    let wait_ms = engine
                        .pending()
                        .map_or(0, |tick| tick.due_ms.saturating_sub(now_ms));
                    match cancelled.recv_timeout(Duration::from_millis(wait_ms)) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    let Ok(mut guard) = shared.lock() else {
                        warn!("parameter store lock poisoned, chaos worker exiting");
                        break;
                    };
                    engine.poll(&mut guard, started.elapsed().as_millis() as u64);
                }
                engine
            })
            .map_err(|error| anyhow!("failed to spawn chaos worker: {error}"))?;

        Ok(Self {
            store,
            cancel: Some(cancel),
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Cancel, join the worker, then restore the snapshot under the lock, so
    /// no tick can land after restoration. Returns the number of ticks fired.
    pub fn stop(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let mut engine = worker
            .join()
            .map_err(|_| anyhow!("chaos worker panicked"))?;
        let mut guard = self
            .store
            .lock()
            .map_err(|_| anyhow!("parameter store lock poisoned"))?;
        engine.deactivate(&mut guard);
        Ok(engine.ticks_fired())
    }
}

impl Drop for ChaosDriver {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(error = %format!("{error:#}"), "chaos driver shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> ChaosEngine {
        ChaosEngine::new(ChaosConfig {
            seed: Some(seed),
            ..ChaosConfig::default()
        })
    }

    fn params_of(store: &ParameterStore, id: &str) -> EffectParams {
        store.get(id).expect("registered").params.clone()
    }

    #[test]
    fn activation_forces_the_glitch_family_on() {
        let mut store = ParameterStore::with_defaults();
        let mut engine = seeded(1);
        engine.activate(&mut store, 1_000);

        assert!(engine.is_active());
        assert_eq!(engine.pending_ticks(), 1);
        let due = engine.pending().expect("pending").due_ms;
        assert!((1_100..=1_500).contains(&due), "due {due}");

        for kind in CHAOS_KINDS {
            let instance = store.get(kind.as_str()).expect("registered");
            assert!(instance.enabled, "{kind} not enabled");
            assert_eq!(instance.mix, 1.0);
        }
        let EffectParams::BlockDisplace(block) = params_of(&store, "block_displace") else {
            panic!("wrong kind");
        };
        assert_eq!((block.intensity, block.block_size), (0.8, 48));
        assert!(!store.get("halftone").expect("registered").enabled);
    }

    #[test]
    fn second_activation_keeps_the_first_snapshot() {
        let mut store = ParameterStore::with_defaults();
        let before = store.clone();
        let mut engine = seeded(2);
        engine.activate(&mut store, 0);
        let first_tick = engine.pending();
        engine.activate(&mut store, 50);
        assert_eq!(engine.pending(), first_tick);

        engine.deactivate(&mut store);
        assert_eq!(store, before);
    }

    #[test]
    fn poll_fires_only_due_ticks_and_keeps_one_pending() {
        let mut store = ParameterStore::with_defaults();
        let mut engine = seeded(3);
        engine.activate(&mut store, 0);
        let due = engine.pending().expect("pending").due_ms;

        assert_eq!(engine.poll(&mut store, due - 1), 0);
        assert_eq!(engine.poll(&mut store, due), 1);
        assert_eq!(engine.pending_ticks(), 1);
        assert!(engine.pending().expect("pending").due_ms > due);

        // A long stall fires once, then waits a fresh delay from now.
        let now = due + 10_000;
        assert_eq!(engine.poll(&mut store, now), 1);
        assert_eq!(engine.pending_ticks(), 1);
        let next = engine.pending().expect("pending").due_ms;
        assert!((now + 100..=now + 500).contains(&next), "next {next}");
    }

    #[test]
    fn an_hour_long_clock_jump_fires_a_single_tick() {
        let mut store = ParameterStore::with_defaults();
        let mut engine = seeded(6);
        engine.activate(&mut store, 0);

        assert_eq!(engine.poll(&mut store, 3_600_000), 1);
        assert_eq!(engine.ticks_fired(), 1);
        assert!(engine.pending().expect("pending").due_ms > 3_600_000);
        assert_eq!(engine.poll(&mut store, 3_600_000), 0);
    }

    #[test]
    fn polling_at_the_end_of_the_clock_terminates() {
        let mut store = ParameterStore::with_defaults();
        let mut engine = seeded(7);
        engine.activate(&mut store, u64::MAX - 1_000);

        assert_eq!(engine.poll(&mut store, u64::MAX), 1);
        assert_eq!(engine.pending().expect("pending").due_ms, u64::MAX);
        assert_eq!(engine.poll(&mut store, u64::MAX), 1);
        assert_eq!(engine.ticks_fired(), 2);
        assert_eq!(engine.pending_ticks(), 1);
    }

    #[test]
    fn idle_engine_never_touches_the_store() {
        let mut store = ParameterStore::with_defaults();
        store.set_enabled("rgb_split", true).expect("enable");
        let before = store.clone();
        let mut engine = seeded(8);

        engine.tick(&mut store);
        assert_eq!(store, before);
        assert_eq!(engine.ticks_fired(), 0);
        assert_eq!(engine.poll(&mut store, 60_000), 0);
        assert_eq!(store, before);

        engine.activate(&mut store, 0);
        engine.poll(&mut store, 1_000);
        engine.deactivate(&mut store);
        let ticks = engine.ticks_fired();
        engine.tick(&mut store);
        assert_eq!(store, before);
        assert_eq!(engine.ticks_fired(), ticks);
    }

    #[test]
    fn ticks_stay_inside_their_ranges() {
        let mut store = ParameterStore::with_defaults();
        let mut engine = seeded(4);
        engine.activate(&mut store, 0);
        for _ in 0..50 {
            engine.tick(&mut store);
            let EffectParams::RgbSplit(rgb) = params_of(&store, "rgb_split") else {
                panic!("wrong kind");
            };
            assert!((10.0..=80.0).contains(&rgb.amount));
            assert!((0.0..360.0).contains(&rgb.angle));
            let EffectParams::BlockDisplace(block) = params_of(&store, "block_displace") else {
                panic!("wrong kind");
            };
            assert!((8..=96).contains(&block.block_size));
            assert!((0.3..=1.0).contains(&block.intensity));
            let EffectParams::FeedbackLoop(feedback) = params_of(&store, "feedback_loop") else {
                panic!("wrong kind");
            };
            assert!((0.7..=0.95).contains(&feedback.decay));
            assert!((0.95..=1.1).contains(&feedback.zoom));
            assert!((-5.0..=5.0).contains(&feedback.rotation));
            let EffectParams::Noise(noise) = params_of(&store, "noise") else {
                panic!("wrong kind");
            };
            assert!((0.2..=0.8).contains(&noise.intensity));
        }
    }

    #[test]
    fn deactivation_restores_exactly_and_is_idempotent() {
        let mut store = ParameterStore::with_defaults();
        store.set_enabled("noise", true).expect("enable");
        let before = store.clone();

        let mut engine = seeded(5);
        engine.activate(&mut store, 0);
        engine.poll(&mut store, 5_000);
        assert_ne!(store, before);

        assert!(engine.deactivate(&mut store));
        assert_eq!(store, before);
        assert_eq!(engine.pending_ticks(), 0);
        assert!(!engine.is_active());
        assert!(!engine.deactivate(&mut store));
        assert_eq!(engine.poll(&mut store, 100_000), 0);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = ParameterStore::with_defaults();
        let mut b = ParameterStore::with_defaults();
        let mut engine_a = seeded(42);
        let mut engine_b = seeded(42);
        engine_a.activate(&mut a, 0);
        engine_b.activate(&mut b, 0);
        engine_a.poll(&mut a, 3_000);
        engine_b.poll(&mut b, 3_000);
        assert_eq!(a, b);
    }

    #[test]
    fn config_rejects_inverted_delays() {
        let config = ChaosConfig {
            min_delay_ms: 600,
            max_delay_ms: 500,
            seed: None,
        };
        assert!(config.validate().is_err());
        assert!(ChaosConfig::default().validate().is_ok());
    }
}
