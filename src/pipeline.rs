use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::audio::collect_fragments;
use crate::clip::{Clip, ClipSpec, ClipSynthesizer};
use crate::compositor::{Compositor, publish};
use crate::concat::{ConcatEntry, Concatenator};
use crate::config::{EncoderChoice, Settings};
use crate::error::{Error, Result, Stage};
use crate::imagegen::{DirectoryImages, HttpImages, read_prompts, render_images};
use crate::probe::{DurationResolver, MediaAsset, MediaKind, Prober};
use crate::secondary::{SecondaryPlan, list_recordings, require_nonempty, select_segments};
use crate::subtitle::{SubtitleCue, build_cues, write_srt};
use crate::tool::{Cancellation, Tool, detect_encoder};
use crate::tts::Narrator;
use crate::utils::split_sentences;

#[derive(Debug, Clone)]
pub enum ImageSource {
    Directory { dir: PathBuf, filter: Option<String> },
    Http { endpoint: String, model: String, size: String },
}

#[derive(Debug, Clone)]
pub enum NarrationSource {
    AudioDir(PathBuf),
    Piper { model: PathBuf },
}

/// Everything a run needs, resolved up front. Nothing is read from the
/// process working directory after this is built.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub text_file: PathBuf,
    pub images: ImageSource,
    pub prompts_file: Option<PathBuf>,
    pub narration: NarrationSource,
    pub secondary_dir: Option<PathBuf>,
    pub settings: Settings,
    pub cancel: Cancellation,
}

impl RunContext {
    pub fn output_path(&self) -> PathBuf {
        self.settings.output_dir.join(&self.settings.output_name)
    }
}

/// State threaded through the stages of one run.
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub sentences: Vec<String>,
    pub audio: Vec<MediaAsset>,
    pub cues: Vec<SubtitleCue>,
    pub images: Vec<MediaAsset>,
    pub clips: Vec<Clip>,
    pub secondary: Option<SecondaryPlan>,
    pub output: Option<PathBuf>,
}

struct Workspace {
    _root: Option<TempDir>,
    root: PathBuf,
}

impl Workspace {
    fn create(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("reelsmith-").tempdir()?;
        let root = dir.path().to_path_buf();
        if keep {
            let kept = dir.keep();
            info!("Keeping working files in {}", kept.display());
            Ok(Self { _root: None, root })
        } else {
            Ok(Self {
                _root: Some(dir),
                root,
            })
        }
    }

    /// Per-stage scratch directory.
    fn stage_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

pub struct Pipeline {
    ctx: RunContext,
    ffmpeg: Tool,
    piper: Tool,
    prober: Prober,
    encoder: String,
}

impl Pipeline {
    pub fn new(ctx: RunContext) -> Self {
        let ffmpeg = Tool::new(&ctx.settings.ffmpeg, ctx.cancel.clone());
        let piper = Tool::new(&ctx.settings.piper, ctx.cancel.clone());
        let prober = Prober::new(Tool::new(&ctx.settings.ffprobe, ctx.cancel.clone()));
        let encoder = match &ctx.settings.encoder {
            EncoderChoice::Named(name) => name.clone(),
            EncoderChoice::Auto => detect_encoder(&ffmpeg),
        };
        Self {
            ctx,
            ffmpeg,
            piper,
            prober,
            encoder,
        }
    }

    fn stage<T>(&self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if self.ctx.cancel.is_cancelled() {
            warn!("Stop requested; not starting {} stage", stage);
            return Err(Error::Cancelled);
        }
        info!("Stage {} starting", stage);
        f().map_err(|e| e.in_stage(stage))
    }

    /// Runs every stage in order and publishes exactly one video, or nothing.
    pub fn run(&self) -> Result<PipelineRun> {
        let settings = &self.ctx.settings;
        let workspace = Workspace::create(settings.keep_temp)?;
        let resolver = DurationResolver::new(&self.prober, settings.on_probe_failure);
        let concat = Concatenator::new(&self.ffmpeg, &self.prober, &self.encoder);
        let compositor = Compositor::new(&self.ffmpeg, &self.prober, &self.encoder);
        let mut run = PipelineRun::default();

        if let (Some(voice), None) = (&settings.voice, settings.speaker()) {
            warn!("Voice '{}' is not a Piper speaker id; using the model's default", voice);
        }

        self.stage(Stage::Narration, || {
            let text = fs::read_to_string(&self.ctx.text_file)?;
            run.sentences = split_sentences(&text);
            if run.sentences.is_empty() {
                return Err(Error::Narration(format!(
                    "no sentences in {}",
                    self.ctx.text_file.display()
                )));
            }
            info!("Split narration into {} sentences", run.sentences.len());
            run.audio = match &self.ctx.narration {
                NarrationSource::AudioDir(dir) => collect_fragments(dir)?,
                NarrationSource::Piper { model } => Narrator::new(&self.piper, model)
                    .with_speaker(settings.speaker())
                    .narrate(&run.sentences, &workspace.stage_dir("narration")?)?,
            };
            Ok(())
        })?;

        let durations = self.stage(Stage::Probe, || {
            run.audio
                .iter()
                .map(|a| a.duration(&resolver))
                .collect::<Result<Vec<f64>>>()
        })?;

        let srt_path = self.stage(Stage::Subtitles, || {
            run.cues = build_cues(&run.sentences, &durations);
            run.audio.truncate(run.cues.len());
            let path = workspace.stage_dir("subs")?.join("subtitles.srt");
            write_srt(&path, &run.cues, settings.subtitle_wrap)?;
            info!("Generated SRT subtitles: {} ({} cues)", path.display(), run.cues.len());
            Ok(path)
        })?;
        let audio_total: f64 = durations[..run.cues.len()].iter().sum();
        info!("Total audio duration: {:.3} seconds", audio_total);

        self.stage(Stage::Images, || {
            let out_dir = workspace.stage_dir("images")?;
            run.images = match &self.ctx.images {
                ImageSource::Directory { dir, filter } => {
                    let mut provider = DirectoryImages::open(dir, filter.as_deref())?;
                    if provider.is_empty() {
                        return Err(Error::ImageProvider(format!(
                            "no image files found in {}",
                            dir.display()
                        )));
                    }
                    let prompts = match &self.ctx.prompts_file {
                        Some(p) => read_prompts(p)?,
                        None => vec![String::new(); provider.len()],
                    };
                    render_images(&mut provider, &prompts, &out_dir)?
                }
                ImageSource::Http {
                    endpoint,
                    model,
                    size,
                } => {
                    let prompts_file = self.ctx.prompts_file.as_ref().ok_or_else(|| {
                        Error::config("prompts", "an image endpoint needs a prompts file")
                    })?;
                    let mut provider = HttpImages::new(endpoint, model, size)?;
                    render_images(&mut provider, &read_prompts(prompts_file)?, &out_dir)?
                }
            };
            Ok(())
        })?;

        self.stage(Stage::Clips, || {
            let per_clip = audio_total / run.images.len() as f64;
            let spec = ClipSpec::new(
                settings.fps,
                settings.zoom_factor,
                settings.clip_resolution(),
                self.encoder.clone(),
            );
            let synth = ClipSynthesizer::new(
                &self.ffmpeg,
                spec,
                workspace.stage_dir("clips")?,
                settings.skip_failed_clips,
                settings.clip_workers,
                self.ctx.cancel.clone(),
            );
            run.clips = synth.synthesize_all(&run.images, &vec![per_clip; run.images.len()])?;
            for clip in &run.clips {
                debug!(
                    "Clip {} from {} ({:.3}s)",
                    clip.index,
                    clip.source.display(),
                    clip.duration
                );
            }
            if run.clips.len() < run.images.len() {
                warn!(
                    "{} of {} clips were skipped",
                    run.images.len() - run.clips.len(),
                    run.images.len()
                );
            }
            Ok(())
        })?;

        let silent_video = self.stage(Stage::ConcatVideo, || {
            let entries: Vec<ConcatEntry> =
                run.clips.iter().map(|c| ConcatEntry::whole(&c.path)).collect();
            concat.concat(&entries, MediaKind::Video, &workspace.stage_dir("video")?, "video_concat")
        })?;
        let video_total: f64 = run.clips.iter().map(|c| c.duration).sum();

        let narration = self.stage(Stage::ConcatAudio, || {
            let entries: Vec<ConcatEntry> =
                run.audio.iter().map(|a| ConcatEntry::whole(&a.path)).collect();
            concat.concat(&entries, MediaKind::Audio, &workspace.stage_dir("audio")?, "audio_combined")
        })?;

        let with_audio = self.stage(Stage::Mux, || {
            let out = workspace.stage_dir("mux")?.join("video_with_audio.mp4");
            compositor.mux(&silent_video, video_total, &narration, audio_total, &out)
        })?;

        let subtitled = self.stage(Stage::BurnSubtitles, || {
            let out = workspace.stage_dir("subs")?.join("video_with_subs.mp4");
            compositor.burn_subtitles(&with_audio, &srt_path, &out)
        })?;

        let mut finished = subtitled.clone();
        if settings.add_minigame {
            let (secondary, primary_duration) = self.stage(Stage::Secondary, || {
                let secondary_dir = self.ctx.secondary_dir.as_ref().ok_or_else(|| {
                    Error::config(
                        "minigame_dir",
                        "add_minigame is set but no recordings directory was given",
                    )
                })?;
                let primary_duration = self.prober.duration(&subtitled)?;
                info!("Main video duration: {:.2}s", primary_duration);
                let recordings = list_recordings(secondary_dir)?;
                info!("Found {} minigame recordings", recordings.len());
                let plan = select_segments(
                    &recordings,
                    primary_duration,
                    settings.min_segment_seconds,
                    |asset| asset.duration(&resolver),
                )?;
                require_nonempty(&plan, secondary_dir)?;
                let joined = concat.concat(
                    &plan.entries(),
                    MediaKind::Video,
                    &workspace.stage_dir("secondary")?,
                    "minigame_concat",
                )?;
                run.secondary = Some(plan);
                Ok((joined, primary_duration))
            })?;
            finished = self.stage(Stage::Stack, || {
                let out = workspace.stage_dir("final")?.join("final_combined.mp4");
                compositor.stack(
                    &subtitled,
                    &secondary,
                    settings.secondary_position,
                    primary_duration,
                    &out,
                )
            })?;
        } else {
            info!("Using video with subtitles as final output (no minigame added)");
        }

        let published = self.stage(Stage::Publish, || {
            publish(&finished, &settings.output_dir, &settings.output_name)
        })?;
        run.output = Some(published);
        Ok(run)
    }
}

/// Reads sentences and fragments and writes only the SRT file.
pub fn write_subtitles_only(
    text_file: &Path,
    audio_dir: &Path,
    out: &Path,
    settings: &Settings,
    cancel: Cancellation,
) -> Result<Vec<SubtitleCue>> {
    let prober = Prober::new(Tool::new(&settings.ffprobe, cancel));
    let resolver = DurationResolver::new(&prober, settings.on_probe_failure);
    let sentences = split_sentences(&fs::read_to_string(text_file)?);
    let fragments = collect_fragments(audio_dir)?;
    let durations = fragments
        .iter()
        .map(|a| a.duration(&resolver))
        .collect::<Result<Vec<f64>>>()?;
    let cues = build_cues(&sentences, &durations);
    write_srt(out, &cues, settings.subtitle_wrap)?;
    Ok(cues)
}
