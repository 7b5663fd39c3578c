//! guide_replay - replay scripted detections through the guidance engine.
//!
//! Reads a JSON script of per-frame detections, serves them from scripted
//! backends registered under the configured backend ids, and prints the
//! guidance for each frame as one JSON object per line. Time is simulated, so
//! cooldowns and timed steps follow the script's `advance_ms` values instead
//! of the wall clock.
//!
//! Script format:
//!
//! ```json
//! {
//!   "width": 640,
//!   "height": 480,
//!   "frames": [
//!     {"detections": [["hole_empty", [10, 20, 60, 70], 0.9]], "advance_ms": 100},
//!     {"detections": [], "task_id": "bench-2", "image": "frame_0002.png"}
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assembly_guide::detect::{BackendRegistry, ClassifierSelector, Scene, ScriptedBackend};
use assembly_guide::task::ManualClock;
use assembly_guide::{Frame, GuideConfig, GuidanceEngine, RawDetection, SessionHeader, TaskState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay scripted detections through the assembly guide")]
struct Args {
    /// Path to the replay script (JSON).
    script: PathBuf,

    /// State to start in, overriding the configuration.
    #[arg(long)]
    initial_state: Option<TaskState>,

    /// Simulated time between frames that do not set `advance_ms`.
    #[arg(long, default_value = "100")]
    frame_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
    frames: Vec<ScriptFrame>,
}

#[derive(Debug, Deserialize)]
struct ScriptFrame {
    #[serde(default)]
    detections: Vec<RawDetection>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    advance_ms: Option<u64>,
    /// Optional image, relative to the script, for steps that look at pixels.
    #[serde(default)]
    image: Option<PathBuf>,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = GuideConfig::load()?;
    if let Some(state) = args.initial_state {
        config.task.initial_state = state;
    }
    let script = load_script(&args.script)?;
    let script_dir = args.script.parent().unwrap_or(Path::new("."));

    let scene = Scene::new();
    let mut registry = BackendRegistry::new();
    for entry in &config.backends {
        registry.register(
            ScriptedBackend::with_scene(&entry.id, scene.clone()),
            entry.labels.as_slice(),
        )?;
    }
    let mut settings = config.selector_settings();
    settings.settle_delay = Duration::ZERO;
    let selector = Arc::new(ClassifierSelector::new(
        registry,
        config.class_groups.clone(),
        settings,
    ));

    let clock = Arc::new(ManualClock::new());
    let mut engine = GuidanceEngine::with_clock(
        selector.clone(),
        config.task.clone(),
        config.stability.clone(),
        clock.clone(),
    )?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (idx, step) in script.frames.into_iter().enumerate() {
        clock.advance(Duration::from_millis(
            step.advance_ms.unwrap_or(args.frame_interval_ms),
        ));
        scene.set(step.detections);

        let frame = match &step.image {
            Some(image) => {
                let path = script_dir.join(image);
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("frame {}: failed to read {}", idx, path.display()))?;
                Frame::decode(&bytes)?
            }
            // Fresh id per frame; detections are cached per frame id.
            None => Frame::filled(script.width, script.height, [128, 128, 128])?,
        };
        let header = SessionHeader {
            task_id: step.task_id,
        };
        let guidance = engine.process_frame(&frame, Some(&header))?;
        serde_json::to_writer(&mut out, &guidance)?;
        writeln!(out)?;
    }
    out.flush()?;

    log::info!("replay finished in state {}", engine.state());
    selector.release()?;
    Ok(())
}

fn load_script(path: &Path) -> Result<Script> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read replay script {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse replay script {}", path.display()))
}
