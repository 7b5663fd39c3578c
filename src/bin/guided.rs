//! guided - run the assembly guide over a directory of camera frames.
//!
//! Frames are read in file name order, sent through the configured detection
//! backends and the resulting guidance is printed as one JSON object per line.
//! Ctrl-C stops after the current frame.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assembly_guide::{Frame, GuideConfig, GuidanceEngine, SessionHeader};

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the assembly guide over a directory of frames")]
struct Args {
    /// Directory holding JPEG or PNG frames.
    #[arg(long, env = "GUIDE_FRAMES_DIR")]
    frames: PathBuf,

    /// Task identifier sent with every frame.
    #[arg(long, env = "GUIDE_TASK_ID")]
    task_id: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst))
        .context("failed to set Ctrl-C handler")?;

    let config = GuideConfig::load()?;
    let selector = Arc::new(config.build_selector()?);
    log::info!("backends: {}", selector.registry().list().join(", "));
    let mut engine =
        GuidanceEngine::new(selector.clone(), config.task.clone(), config.stability.clone())?;

    let frames = list_frames(&args.frames)?;
    log::info!("{} frames in {}", frames.len(), args.frames.display());
    let header = SessionHeader {
        task_id: args.task_id.clone(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let limit = args.limit.unwrap_or(usize::MAX);
    let mut processed = 0usize;
    for path in frames.iter().take(limit) {
        if stop.load(Ordering::SeqCst) {
            log::info!("stop requested");
            break;
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("skipping {}: {:#}", path.display(), err);
                continue;
            }
        };
        let guidance = engine.process_frame(&frame, Some(&header))?;
        serde_json::to_writer(&mut out, &guidance)?;
        writeln!(out)?;
        processed += 1;
    }
    out.flush()?;

    log::info!("processed {} frames, final state {}", processed, engine.state());
    selector.release()?;
    Ok(())
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }
    let mut frames = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}
