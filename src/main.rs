use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use glitchlab::ascii_shader::AsciiEffect;
use glitchlab::chaos::ChaosEngine;
use glitchlab::config::{load_scene, SceneConfig};
use glitchlab::effect::EffectChain;
use glitchlab::frame::FrameBuffer;
use glitchlab::glyph_atlas::GlyphAtlas;
use glitchlab::gpu::GpuContext;
use glitchlab::logging;
use glitchlab::schema::{AsciiCharSet, EffectParams};
use glitchlab::store::{ParamOverride, ParameterStore};

#[derive(Debug, Parser)]
#[command(name = "glitchlab")]
#[command(about = "Real-time video effect chain with a chaos mode")]
struct Cli {
    /// Log at debug level unless GLITCHLAB_LOG says otherwise.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scene over a source image and write the last frame.
    Render {
        #[arg(long)]
        scene: Option<PathBuf>,
        /// Source image; a generated test card at the scene resolution otherwise.
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Also write every frame as frame_NNNNN.png here.
        #[arg(long)]
        frames_dir: Option<PathBuf>,
        #[arg(long = "set", value_name = "ID.FIELD=VALUE")]
        set: Vec<String>,
        /// Enable chaos mode regardless of the scene.
        #[arg(long)]
        chaos: bool,
        #[arg(long)]
        seed: Option<u64>,
        /// Render shader effects on the GPU when an adapter is available.
        #[arg(long)]
        gpu: bool,
        /// Rasterize ASCII glyphs from this font instead of the built-in set.
        #[arg(long)]
        ascii_font: Option<PathBuf>,
    },
    /// Write a glyph atlas as a PNG strip.
    Atlas {
        #[arg(long, default_value = "standard", value_parser = parse_char_set)]
        char_set: AsciiCharSet,
        #[arg(long, default_value_t = 32)]
        cell: u32,
        #[arg(long)]
        font: Option<PathBuf>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },
    /// Print the parameter snapshot a scene starts from, as JSON.
    Snapshot {
        #[arg(long)]
        scene: Option<PathBuf>,
        #[arg(long = "set", value_name = "ID.FIELD=VALUE")]
        set: Vec<String>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Validate a scene file.
    Check { scene: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Render {
            scene,
            input,
            output,
            frames_dir,
            set,
            chaos,
            seed,
            gpu,
            ascii_font,
        } => run_render(RenderArgs {
            scene,
            input,
            output,
            frames_dir,
            set,
            chaos,
            seed,
            gpu,
            ascii_font,
        }),
        Commands::Atlas {
            char_set,
            cell,
            font,
            output,
        } => run_atlas(char_set, cell, font.as_deref(), &output),
        Commands::Snapshot { scene, set, output } => {
            run_snapshot(scene.as_deref(), &set, output.as_deref())
        }
        Commands::Check { scene } => run_check(&scene),
    }
}

fn parse_char_set(raw: &str) -> Result<AsciiCharSet, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned()))
        .map_err(|_| format!("unknown char set '{raw}' (expected standard, blocks or braille)"))
}

fn scene_or_default(path: Option<&Path>) -> Result<SceneConfig> {
    match path {
        Some(path) => load_scene(path),
        None => Ok(SceneConfig::default()),
    }
}

fn store_with_overrides(scene: &SceneConfig, overrides: &[String]) -> Result<ParameterStore> {
    let mut store = scene.build_store()?;
    for raw in overrides {
        ParamOverride::parse(raw)?
            .apply(&mut store)
            .with_context(|| format!("failed applying --set {raw}"))?;
    }
    Ok(store)
}

struct RenderArgs {
    scene: Option<PathBuf>,
    input: Option<PathBuf>,
    output: PathBuf,
    frames_dir: Option<PathBuf>,
    set: Vec<String>,
    chaos: bool,
    seed: Option<u64>,
    gpu: bool,
    ascii_font: Option<PathBuf>,
}

fn run_render(args: RenderArgs) -> Result<()> {
    let mut scene = scene_or_default(args.scene.as_deref())?;
    scene.chaos.enabled |= args.chaos;
    if args.seed.is_some() {
        scene.chaos.seed = args.seed;
    }
    scene.validate()?;
    let mut store = store_with_overrides(&scene, &args.set)?;

    let source = match &args.input {
        Some(path) => FrameBuffer::load(path)?,
        None => FrameBuffer::test_card(scene.resolution.width, scene.resolution.height),
    };

    let mut chain = EffectChain::new();
    if args.gpu {
        match GpuContext::new() {
            Ok(gpu) => {
                info!(adapter = gpu.adapter_name(), "shader effects on GPU");
                chain = chain.with_gpu(Arc::new(gpu));
            }
            Err(error) => warn!(error = %format!("{error:#}"), "GPU unavailable, rendering on CPU"),
        }
    }
    if let Some(font_path) = &args.ascii_font {
        let font = fs::read(font_path)
            .with_context(|| format!("failed to read font {}", font_path.display()))?;
        for instance in store.instances() {
            if let EffectParams::Ascii(params) = &instance.params {
                let effect = AsciiEffect::with_font(params.clone(), font.clone())
                    .with_context(|| format!("failed building ascii effect '{}'", instance.id))?;
                chain.install(&instance.id, Box::new(effect));
            }
        }
    }
    if let Some(dir) = &args.frames_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create frames dir {}", dir.display()))?;
    }

    let mut chaos = scene
        .chaos
        .enabled
        .then(|| ChaosEngine::new(scene.chaos.engine_config()));
    let mut last = source.clone();
    for frame in 0..scene.frames {
        let now_ms = scene.frame_time_ms(frame);
        if let Some(engine) = chaos.as_mut() {
            if frame == scene.chaos.start_frame {
                engine.activate(&mut store, now_ms);
            }
            if scene.chaos.stop_frame == Some(frame) {
                engine.deactivate(&mut store);
            } else {
                engine.poll(&mut store, now_ms);
            }
        }

        last = chain.render(&store, &source, &scene.frame_context(frame));
        if let Some(dir) = &args.frames_dir {
            last.save(&dir.join(format!("frame_{frame:05}.png")))?;
        }
        if frame % 30 == 0 {
            info!(frame = frame + 1, total = scene.frames, "rendered frame");
        }
    }
    if let Some(engine) = chaos.as_mut() {
        engine.deactivate(&mut store);
    }

    last.save(&args.output)?;
    println!("Wrote {}", args.output.display());
    Ok(())
}

fn run_atlas(char_set: AsciiCharSet, cell: u32, font: Option<&Path>, output: &Path) -> Result<()> {
    let atlas = match font {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
            GlyphAtlas::from_font(&bytes, char_set.ramp(), cell)?
        }
        None => GlyphAtlas::procedural(char_set, cell)?,
    };

    let pixels = atlas
        .as_bytes()
        .iter()
        .flat_map(|&alpha| [alpha, alpha, alpha, 255])
        .collect();
    FrameBuffer::from_rgba(atlas.width(), atlas.height(), pixels)?.save(output)?;
    println!(
        "Wrote {} ({} glyphs, {}px cells)",
        output.display(),
        atlas.glyph_count(),
        atlas.cell_size()
    );
    Ok(())
}

fn run_snapshot(scene: Option<&Path>, overrides: &[String], output: Option<&Path>) -> Result<()> {
    let scene = scene_or_default(scene)?;
    let store = store_with_overrides(&scene, overrides)?;
    let json = store.snapshot().to_json()?;
    match output {
        Some(path) => {
            fs::write(path, &json)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_check(scene_path: &Path) -> Result<()> {
    let scene = load_scene(scene_path)?;
    let store = scene.build_store()?;
    let enabled = store
        .instances()
        .iter()
        .filter(|instance| instance.enabled)
        .count();

    println!(
        "OK: {} ({}x{}, {} frames, {:.2} ms/frame)",
        scene_path.display(),
        scene.resolution.width,
        scene.resolution.height,
        scene.frames,
        scene.delta_ms
    );
    println!("Effects: {} ({} enabled)", store.len(), enabled);
    if scene.chaos.enabled {
        println!(
            "Chaos: frames {}..{} every {}-{} ms",
            scene.chaos.start_frame,
            scene
                .chaos
                .stop_frame
                .map_or_else(|| "end".to_owned(), |stop| stop.to_string()),
            scene.chaos.min_delay_ms,
            scene.chaos.max_delay_ms
        );
    }
    Ok(())
}
