use std::fs;
use std::path::PathBuf;

use glitchlab::config::{load_scene, parse_scene};
use glitchlab::effect::EffectChain;
use glitchlab::frame::FrameBuffer;
use glitchlab::schema::{EffectKind, EffectParams, HalftoneMode};
use tempfile::tempdir;

fn bundled_scenes() -> Vec<PathBuf> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenes");
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .expect("scenes dir should exist")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    paths.sort();
    paths
}

#[test]
fn bundled_scenes_load_build_and_render_one_frame() {
    let scenes = bundled_scenes();
    assert!(!scenes.is_empty());
    for path in scenes {
        let scene = load_scene(&path).unwrap_or_else(|error| panic!("{}: {error:#}", path.display()));
        let store = scene
            .build_store()
            .unwrap_or_else(|error| panic!("{}: {error:#}", path.display()));
        assert_eq!(store.len(), scene.chain.len(), "{}", path.display());

        // Small source keeps the render cheap; size is the scene's business only
        // for generated test cards.
        let source = FrameBuffer::test_card(48, 32);
        let mut chain = EffectChain::new();
        let out = chain.render(&store, &source, &scene.frame_context(0));
        assert_eq!((out.width(), out.height()), (48, 32));
    }
}

#[test]
fn print_shop_scene_carries_its_parameters() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenes/print_shop.yaml");
    let store = load_scene(&path)
        .and_then(|scene| scene.build_store())
        .expect("print shop scene");
    let ids: Vec<&str> = store.ids().collect();
    assert_eq!(ids, ["hex_mosaic", "halftone"]);

    let halftone = store.get("halftone").expect("halftone");
    assert_eq!(halftone.kind(), EffectKind::Halftone);
    assert!((halftone.mix - 0.6).abs() < 1e-6);
    let EffectParams::Halftone(params) = &halftone.params else {
        panic!("halftone entry built {:?}", halftone.kind());
    };
    assert_eq!(params.mode, HalftoneMode::Cmyk);
    assert_eq!(params.dot_size, 6.0);
    assert_eq!(params.angle, 45.0, "unset fields keep their defaults");
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("absent.yaml");
    let error = load_scene(&path).expect_err("must fail");
    assert!(error.to_string().contains("absent.yaml"));
}

#[test]
fn scene_files_round_trip_through_disk() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("scene.yaml");
    fs::write(
        &path,
        "frames: 3\nchain:\n  - kind: dots\n    params: { shape: diamond }\n",
    )
    .expect("write scene");

    let from_disk = load_scene(&path).expect("load");
    let inline = parse_scene(
        "frames: 3\nchain:\n  - kind: dots\n    params: { shape: diamond }\n",
        "inline",
    )
    .expect("parse");
    assert_eq!(from_disk, inline);
    assert_eq!(from_disk.frames, 3);
}

#[test]
fn wrong_parameter_types_are_reported_per_entry() {
    let scene = parse_scene(
        "chain:\n  - id: grain\n    kind: noise\n    params: { monochrome: \"often\" }\n",
        "inline",
    )
    .expect("structure is valid");
    let error = scene.build_store().expect_err("wrong type");
    let message = format!("{error:#}");
    assert!(message.contains("'grain'"), "{message}");
    assert!(message.contains("noise"), "{message}");
}
