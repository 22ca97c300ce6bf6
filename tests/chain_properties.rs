use glitchlab::effect::{EffectChain, FrameContext};
use glitchlab::frame::FrameBuffer;
use glitchlab::schema::{EffectKind, EffectParams, ParamPatch};
use glitchlab::store::ParameterStore;
use serde_json::json;

fn ctx(frame_index: u64) -> FrameContext {
    FrameContext::new(frame_index, 1000.0 / 30.0)
}

fn patch(value: serde_json::Value) -> ParamPatch {
    value.as_object().cloned().expect("patch must be an object")
}

#[test]
fn every_kind_at_zero_mix_leaves_the_frame_untouched() {
    let source = FrameBuffer::test_card(64, 40);
    let mut store = ParameterStore::with_defaults();
    for kind in EffectKind::all() {
        store.set_enabled(kind.as_str(), true).expect("enable");
        store.set_mix(kind.as_str(), 0.0).expect("mix");
    }
    let mut chain = EffectChain::new();
    for frame in 0..3 {
        assert_eq!(chain.render(&store, &source, &ctx(frame)), source);
    }
}

#[test]
fn every_kind_alone_keeps_the_frame_size() {
    let source = FrameBuffer::test_card(50, 30);
    for kind in EffectKind::all() {
        let mut store = ParameterStore::with_defaults();
        store.set_enabled(kind.as_str(), true).expect("enable");
        let mut chain = EffectChain::new();
        for frame in 0..2 {
            let out = chain.render(&store, &source, &ctx(frame));
            assert_eq!((out.width(), out.height()), (50, 30), "{kind}");
        }
        assert!(chain.effect(kind.as_str()).is_some(), "{kind} never built");
    }
}

#[test]
fn full_chain_survives_a_degenerate_frame() {
    let source = FrameBuffer::new(0, 0);
    let mut store = ParameterStore::with_defaults();
    for kind in EffectKind::all() {
        store.set_enabled(kind.as_str(), true).expect("enable");
    }
    let mut chain = EffectChain::new();
    let out = chain.render(&store, &source, &ctx(0));
    assert!(out.is_empty());
}

#[test]
fn ripple_leaves_a_black_frame_black() {
    let source = FrameBuffer::new(40, 40);
    let mut store = ParameterStore::with_defaults();
    store.set_enabled("ripple", true).expect("enable");
    let mut chain = EffectChain::new();
    for frame in 0..5 {
        assert_eq!(chain.render(&store, &source, &ctx(frame)), source);
    }
}

#[test]
fn parameter_writes_reach_the_next_frame() {
    let source = FrameBuffer::test_card(32, 32);
    let mut store = ParameterStore::with_defaults();
    store.set_enabled("rgb_split", true).expect("enable");
    store
        .set("rgb_split", &patch(json!({ "amount": 0 })))
        .expect("patch");

    let mut chain = EffectChain::new();
    assert_eq!(chain.render(&store, &source, &ctx(0)), source);

    store
        .set("rgb_split", &patch(json!({ "amount": 6 })))
        .expect("patch");
    assert_ne!(chain.render(&store, &source, &ctx(1)), source);
    let Some(effect) = chain.effect("rgb_split") else {
        panic!("rgb_split runtime missing");
    };
    let EffectParams::RgbSplit(params) = effect.params() else {
        panic!("wrong kind");
    };
    assert_eq!(params.amount, 6.0);
}

#[test]
fn restoring_a_snapshot_restores_the_rendered_output() {
    let source = FrameBuffer::test_card(48, 32);
    let mut store = ParameterStore::with_defaults();
    store.set_enabled("halftone", true).expect("enable");
    let saved = store.snapshot();
    let mut chain = EffectChain::new();
    let before = chain.render(&store, &source, &ctx(0));

    store
        .set("halftone", &patch(json!({ "dot_size": 3, "mode": "cmyk" })))
        .expect("patch");
    store.set_enabled("chromatic_aberration", true).expect("enable");
    assert_ne!(chain.render(&store, &source, &ctx(1)), before);

    store.apply_snapshot(&saved);
    assert_eq!(store.snapshot(), saved);
    assert_eq!(chain.render(&store, &source, &ctx(2)), before);
}

#[test]
fn shader_effects_render_on_the_cpu_without_a_gpu() {
    let source = FrameBuffer::filled(40, 40, [255, 255, 255, 255]);
    let mut store = ParameterStore::with_defaults();
    store.set_enabled("dots", true).expect("enable");
    let mut chain = EffectChain::new();
    let out = chain.render(&store, &source, &ctx(0));
    // grid 10: cell centers are lit, cell corners are not.
    assert_eq!(out.pixel(5, 5), [255, 255, 255, 255]);
    assert_eq!(out.pixel(0, 0), [0, 0, 0, 255]);
}
