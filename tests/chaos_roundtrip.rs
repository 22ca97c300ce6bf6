use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use glitchlab::chaos::{ChaosConfig, ChaosDriver, ChaosEngine, CHAOS_KINDS};
use glitchlab::effect::{EffectChain, FrameContext};
use glitchlab::frame::FrameBuffer;
use glitchlab::store::{ParamOverride, ParameterStore};

fn customized_store() -> ParameterStore {
    let mut store = ParameterStore::with_defaults();
    for raw in [
        "rgb_split.enabled=true",
        "rgb_split.amount=3",
        "rgb_split.mix=0.4",
        "noise.intensity=0.05",
        "halftone.enabled=true",
    ] {
        ParamOverride::parse(raw)
            .and_then(|over| over.apply(&mut store))
            .expect("override applies");
    }
    store
}

#[test]
fn activate_tick_deactivate_restores_the_exact_snapshot() {
    let mut store = customized_store();
    let before = store.snapshot();
    let mut engine = ChaosEngine::new(ChaosConfig {
        seed: Some(99),
        ..ChaosConfig::default()
    });

    engine.activate(&mut store, 0);
    let mut fired = 0;
    for now_ms in (0..=20_000).step_by(16) {
        fired += engine.poll(&mut store, now_ms);
    }
    assert!(fired >= 40, "only {fired} ticks in 20 s");
    assert_ne!(store.snapshot(), before);

    engine.deactivate(&mut store);
    assert_eq!(store.snapshot(), before);
    assert_eq!(engine.pending_ticks(), 0);
}

#[test]
fn rendering_under_chaos_then_restoring_matches_the_original_output() {
    let source = FrameBuffer::test_card(40, 24);
    let mut store = customized_store();
    store.set_enabled("halftone", false).expect("disable");
    let mut chain = EffectChain::new();
    let ctx = |frame: u64| FrameContext::new(frame, 33.0);
    let calm = chain.render(&store, &source, &ctx(0));

    let mut engine = ChaosEngine::new(ChaosConfig {
        seed: Some(5),
        ..ChaosConfig::default()
    });
    engine.activate(&mut store, 0);
    for kind in CHAOS_KINDS {
        assert!(store.get(kind.as_str()).expect("instance").enabled);
    }
    for frame in 1..30 {
        engine.poll(&mut store, frame * 33);
        let out = chain.render(&store, &source, &ctx(frame));
        assert_eq!((out.width(), out.height()), (40, 24));
    }
    engine.deactivate(&mut store);

    // Chaos-only effects sat out or were reset, so the calm chain is back.
    assert_eq!(chain.render(&store, &source, &ctx(0)), calm);
}

#[test]
fn driver_stop_restores_and_leaves_no_late_ticks() {
    let store = Arc::new(Mutex::new(customized_store()));
    let before = store.lock().expect("lock").snapshot();

    let driver = ChaosDriver::start(
        Arc::clone(&store),
        ChaosConfig {
            min_delay_ms: 1,
            max_delay_ms: 5,
            seed: Some(1),
        },
    )
    .expect("driver starts");
    assert!(driver.is_running());
    thread::sleep(Duration::from_millis(60));
    assert_ne!(store.lock().expect("lock").snapshot(), before);

    let ticks = driver.stop().expect("driver stops");
    assert!(ticks > 0);
    assert_eq!(store.lock().expect("lock").snapshot(), before);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(store.lock().expect("lock").snapshot(), before);
}

#[test]
fn dropping_a_driver_also_restores() {
    let store = Arc::new(Mutex::new(ParameterStore::with_defaults()));
    let before = store.lock().expect("lock").clone();
    {
        let _driver =
            ChaosDriver::start(Arc::clone(&store), ChaosConfig::default()).expect("driver starts");
        assert!(store.lock().expect("lock").get("noise").expect("noise").enabled);
    }
    assert_eq!(*store.lock().expect("lock"), before);
}

#[test]
fn driver_rejects_an_invalid_config() {
    let store = Arc::new(Mutex::new(ParameterStore::with_defaults()));
    let result = ChaosDriver::start(
        Arc::clone(&store),
        ChaosConfig {
            min_delay_ms: 10,
            max_delay_ms: 1,
            seed: None,
        },
    );
    assert!(result.is_err());
    assert_eq!(*store.lock().expect("lock"), ParameterStore::with_defaults());
}
