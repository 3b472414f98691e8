use anyhow::{Context, Result};
use sceneconfig::SceneConfig;
use serde::Serialize;
use shading::gpu::Command;
use shading::{FrameReport, Projection, RecordingBackend};
use tracing_subscriber::EnvFilter;

use crate::build::{build_scene, LoadedScene};
use crate::cli::{parse_viewport_size, Cli};

/// One frame's report with the commands it recorded.
#[derive(Serialize)]
struct FrameLog {
    #[serde(flatten)]
    report: FrameReport,
    commands: Vec<Command>,
}

#[derive(Serialize)]
struct RunLog {
    /// Commands recorded while building the scene, before the first frame.
    setup_commands: usize,
    frames: Vec<FrameLog>,
}

pub fn run(args: Cli) -> Result<()> {
    initialise_tracing();

    let config = SceneConfig::load(&args.scene)
        .with_context(|| format!("failed to load scene {}", args.scene.display()))?;
    tracing::info!(scene = %args.scene.display(), "loaded scene description");

    let mut gpu = RecordingBackend::with_texture_units(args.texture_units);
    let mut loaded = build_scene(&config, &mut gpu)?;

    if let Some(size) = args.size.as_deref() {
        let (width, height) = parse_viewport_size(size)?;
        let projection = Projection {
            width: width as f32,
            height: height as f32,
            ..*loaded.scene.projection()
        };
        loaded.scene.set_projection(projection)?;
        tracing::debug!(width, height, "viewport overridden");
    }

    if args.graph {
        print_graphs(&loaded);
        return loaded.release(&mut gpu);
    }

    // The log is drained every frame so long runs keep a bounded backlog.
    let setup_commands = gpu.take_commands().len();
    let mut frames = Vec::with_capacity(args.frames as usize);
    let mut recorded = 0;
    for frame in 0..args.frames {
        loaded.paint_overlay();
        let report = loaded
            .scene
            .frame(&mut gpu)
            .with_context(|| format!("frame {frame} failed"))?;
        if report.lights_truncated > 0 {
            tracing::warn!(frame, dropped = report.lights_truncated, "lights exceeded slot limit");
        }
        let commands = gpu.take_commands();
        recorded += commands.len();
        frames.push(FrameLog {
            report,
            commands: if args.json { commands } else { Vec::new() },
        });
    }

    if args.json {
        let log = RunLog {
            setup_commands,
            frames,
        };
        println!("{}", serde_json::to_string_pretty(&log)?);
    } else {
        print_summary(&frames, recorded, &gpu);
    }
    loaded.release(&mut gpu)
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_graphs(loaded: &LoadedScene) {
    for (name, material) in &loaded.materials {
        println!("%% material {name} ({:?})", material.kind);
        print!("{}", material.graph);
    }
}

fn print_summary(frames: &[FrameLog], recorded: usize, gpu: &RecordingBackend) {
    for FrameLog { report, .. } in frames {
        println!(
            "frame {}: models={} faces={} shapes={} binds={} updates={} failed={} truncated={}",
            report.frame,
            report.models,
            report.faces,
            report.shapes,
            report.surface_binds,
            report.flush.executed,
            report.flush.failed,
            report.lights_truncated
        );
    }
    println!(
        "commands={} draws={} textures={} programs={} buffers={}",
        recorded,
        gpu.draw_calls(),
        gpu.live_textures(),
        gpu.live_programs(),
        gpu.live_buffers()
    );
}
