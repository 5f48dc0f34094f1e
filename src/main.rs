use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod args;
mod audio;
mod clip;
mod compositor;
mod concat;
mod config;
mod error;
mod imagegen;
mod pipeline;
mod probe;
mod secondary;
mod subtitle;
mod tool;
mod tts;
mod utils;

use args::{Args, AssembleArgs, Command, SubtitlesArgs};
use config::{RawConfig, Settings};
use pipeline::{ImageSource, NarrationSource, Pipeline, RunContext, write_subtitles_only};
use probe::{DurationResolver, Prober};
use secondary::{list_recordings, select_segments};
use tool::{Cancellation, Tool};

const CONFIG_FILE: &str = "CONFIG.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let cancel = Cancellation::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current step");
                cancel.cancel();
            }
        });
    }

    match &args.command {
        Command::Assemble(assemble) => run_assemble(&args, assemble, cancel).await,
        Command::Subtitles(subs) => run_subtitles(&args, subs, cancel).await,
        Command::Probe { path } => {
            let settings = diagnostic_settings(&args)?;
            let prober = Prober::new(Tool::new(&settings.ffprobe, cancel));
            let path = absolute(path)?;
            let duration = prober.duration(&path)?;
            println!("{}: {:.3}s", path.display(), duration);
            match prober.dimensions(&path) {
                Ok((w, h)) => println!("{}x{}", w, h),
                Err(e) => info!("No video stream: {}", e),
            }
            Ok(())
        }
        Command::PlanSecondary { dir, duration } => {
            let settings = diagnostic_settings(&args)?;
            let prober = Prober::new(Tool::new(&settings.ffprobe, cancel));
            let resolver = DurationResolver::new(&prober, settings.on_probe_failure);
            let recordings = list_recordings(&absolute(dir)?)?;
            let plan = select_segments(
                &recordings,
                *duration,
                settings.min_segment_seconds,
                |asset| asset.duration(&resolver),
            )?;
            for segment in &plan.segments {
                match segment.outpoint {
                    Some(out) => println!(
                        "{}  {:.3}s (cut at {:.3}s)",
                        segment.path.display(),
                        segment.duration,
                        out
                    ),
                    None => println!("{}  {:.3}s", segment.path.display(), segment.duration),
                }
            }
            println!("total {:.3}s for {:.3}s", plan.total(), duration);
            Ok(())
        }
    }
}

async fn run_assemble(args: &Args, assemble: &AssembleArgs, cancel: Cancellation) -> anyhow::Result<()> {
    info!("Starting video assembly");
    let text_file = absolute(&assemble.text)?;
    if !text_file.is_file() {
        bail!("Narration text not found: {}", text_file.display());
    }

    let mut raw = load_raw(args, &text_file)?;
    for (key, value) in assemble.config_overrides()? {
        raw.set(key, &value);
    }
    let settings = Settings::from_raw(&raw).context("invalid configuration")?;

    let images = match (&assemble.images, &settings.image_endpoint) {
        (Some(dir), _) => ImageSource::Directory {
            dir: absolute(dir)?,
            filter: settings.image_filter.clone(),
        },
        (None, Some(endpoint)) => ImageSource::Http {
            endpoint: endpoint.clone(),
            model: settings.image_model.clone(),
            size: settings.image_size.clone(),
        },
        (None, None) => bail!("either --images or image_endpoint must be given"),
    };

    let narration = match (&assemble.audio_dir, &settings.piper_model) {
        (Some(dir), _) => NarrationSource::AudioDir(absolute(dir)?),
        (None, Some(model)) => NarrationSource::Piper {
            model: absolute(model)?,
        },
        (None, None) => bail!("either --audio-dir or piper_model must be given"),
    };

    let prompts_file = assemble.prompts.as_deref().map(absolute).transpose()?;

    let ctx = RunContext {
        text_file,
        images,
        prompts_file,
        narration,
        secondary_dir: settings.minigame_dir.clone(),
        settings,
        cancel,
    };
    let target = ctx.output_path();
    info!("Final video will be written to {}", target.display());

    let run = tokio::task::spawn_blocking(move || Pipeline::new(ctx).run())
        .await
        .context("pipeline task panicked")?;

    match run {
        Ok(run) => {
            if let Some(plan) = &run.secondary {
                info!(
                    "Stacked {} minigame segment(s), {:.2}s",
                    plan.segments.len(),
                    plan.total()
                );
            }
            info!(
                "Final video created: {} ({} clips, {} cues)",
                run.output.as_deref().unwrap_or(target.as_path()).display(),
                run.clips.len(),
                run.cues.len()
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            warn!("Run cancelled; nothing was published");
            Err(e.into())
        }
        Err(e) => {
            error!("Video assembly failed: {}", e);
            Err(e.into())
        }
    }
}

async fn run_subtitles(args: &Args, subs: &SubtitlesArgs, cancel: Cancellation) -> anyhow::Result<()> {
    let text_file = absolute(&subs.text)?;
    let mut raw = load_raw(args, &text_file)?;
    if let Some(policy) = &subs.on_probe_failure {
        raw.set("on_probe_failure", policy);
    }
    let settings = Settings::from_raw(&raw).context("invalid configuration")?;
    let audio_dir = absolute(&subs.audio_dir)?;
    let out = absolute(&subs.out)?;

    let cues = tokio::task::spawn_blocking({
        let out = out.clone();
        move || write_subtitles_only(&text_file, &audio_dir, &out, &settings, cancel)
    })
    .await
    .context("subtitle task panicked")??;
    info!("Wrote {} cues to {}", cues.len(), out.display());
    Ok(())
}

/// Reads the config file and applies `--set` overrides.
fn load_raw(args: &Args, text_file: &Path) -> anyhow::Result<RawConfig> {
    let mut raw = match &args.config {
        Some(path) => RawConfig::load(&absolute(path)?, true)?,
        None => {
            let dir = text_file.parent().unwrap_or(Path::new("."));
            RawConfig::load(&dir.join(CONFIG_FILE), false)?
        }
    };
    for (key, value) in args.parsed_overrides()? {
        raw.set(&key, &value);
    }
    Ok(raw)
}

/// Settings for the read-only commands. Probe errors are reported, not papered over.
fn diagnostic_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut raw = match &args.config {
        Some(path) => RawConfig::load(&absolute(path)?, true)?,
        None => RawConfig::load(&absolute(Path::new(CONFIG_FILE))?, false)?,
    };
    for (key, value) in args.parsed_overrides()? {
        raw.set(&key, &value);
    }
    if raw.get("on_probe_failure").is_none() {
        raw.set("on_probe_failure", "fail");
    }
    Ok(Settings::from_raw(&raw)?)
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_next_to_text_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("processed.txt");
        std::fs::write(&text, "One. Two.").unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "zoom_factor=1.5\non_probe_failure=fail\n",
        )
        .unwrap();
        let args = Args::parse_from(["reelsmith", "--set", "fps=24", "probe", "x.mp4"]);
        let settings = Settings::from_raw(&load_raw(&args, &text).unwrap()).unwrap();
        assert_eq!(settings.zoom_factor, 1.5);
        assert_eq!(settings.fps, 24);
        assert_eq!(settings.output_dir, dir.path().join("Output"));
    }

    #[test]
    fn relative_flag_paths_follow_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let news = dir.path().join("news");
        std::fs::create_dir_all(&news).unwrap();
        let text = news.join("processed.txt");
        std::fs::write(&text, "One. Two.").unwrap();
        std::fs::write(news.join(CONFIG_FILE), "on_probe_failure=fail\n").unwrap();

        let args = Args::parse_from([
            "reelsmith",
            "assemble",
            "--text",
            text.to_str().unwrap(),
            "--piper-model",
            "voices/amy.onnx",
            "--out-dir",
            "renders",
            "--minigame-dir",
            "recordings",
        ]);
        let Command::Assemble(assemble) = &args.command else {
            panic!("expected assemble");
        };
        let mut raw = load_raw(&args, &text).unwrap();
        for (key, value) in assemble.config_overrides().unwrap() {
            raw.set(key, &value);
        }
        let settings = Settings::from_raw(&raw).unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(settings.piper_model, Some(cwd.join("voices/amy.onnx")));
        assert_eq!(settings.output_dir, cwd.join("renders"));
        assert_eq!(settings.minigame_dir, Some(cwd.join("recordings")));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let args = Args::parse_from([
            "reelsmith",
            "--config",
            missing.to_str().unwrap(),
            "probe",
            "x.mp4",
        ]);
        assert!(load_raw(&args, &dir.path().join("t.txt")).is_err());
    }
}
