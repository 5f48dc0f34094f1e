//! Still image to zooming video clip.
//!
//! The crop window shrinks linearly from the full frame to `1 / zoom` of it over
//! the clip's frames, centred on every frame, and is scaled back up to the output
//! resolution with bilinear filtering.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::probe::{MediaAsset, even_up};
use crate::tool::{Cancellation, Tool, ffmpeg_base};
use crate::utils::sequence_name;

#[derive(Debug, Clone)]
pub struct ClipSpec {
    pub fps: u32,
    pub zoom: f64,
    pub width: u32,
    pub height: u32,
    pub encoder: String,
}

impl ClipSpec {
    pub fn new(fps: u32, zoom: f64, (width, height): (u32, u32), encoder: impl Into<String>) -> Self {
        Self {
            fps,
            zoom,
            width: even_up(width),
            height: even_up(height),
            encoder: encoder.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clip {
    pub index: usize,
    pub source: PathBuf,
    pub duration: f64,
    pub path: PathBuf,
}

pub fn frame_count(duration: f64, fps: u32) -> u32 {
    ((duration * fps as f64).round() as u32).max(1)
}

/// Filter graph for one clip of `frames` frames.
pub fn zoom_filter(spec: &ClipSpec, frames: u32) -> String {
    let (w, h) = (spec.width, spec.height);
    let step = spec.zoom - 1.0;
    let span = frames.saturating_sub(1).max(1);
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase:flags=bilinear,crop={w}:{h},\
         zoompan=z='1+{step:.6}*on/{span}':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d={frames}:s={w}x{h}:fps={fps},\
         format=yuv420p",
        fps = spec.fps,
    )
}

pub fn clip_args(image: &Path, out: &Path, duration: f64, spec: &ClipSpec) -> Vec<OsString> {
    let frames = frame_count(duration, spec.fps);
    let mut args = ffmpeg_base();
    args.extend(
        [
            "-sws_flags".to_string(),
            "bilinear".to_string(),
            "-i".to_string(),
        ]
        .map(OsString::from),
    );
    args.push(image.as_os_str().to_os_string());
    args.extend(
        [
            "-vf".to_string(),
            zoom_filter(spec, frames),
            "-frames:v".to_string(),
            frames.to_string(),
            "-r".to_string(),
            spec.fps.to_string(),
            "-c:v".to_string(),
            spec.encoder.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-t".to_string(),
            format!("{:.3}", duration),
        ]
        .map(OsString::from),
    );
    args.push(out.as_os_str().to_os_string());
    args
}

pub struct ClipSynthesizer<'a> {
    ffmpeg: &'a Tool,
    spec: ClipSpec,
    out_dir: PathBuf,
    skip_failed: bool,
    workers: usize,
    cancel: Cancellation,
}

impl<'a> ClipSynthesizer<'a> {
    pub fn new(
        ffmpeg: &'a Tool,
        spec: ClipSpec,
        out_dir: impl Into<PathBuf>,
        skip_failed: bool,
        workers: usize,
        cancel: Cancellation,
    ) -> Self {
        Self {
            ffmpeg,
            spec,
            out_dir: out_dir.into(),
            skip_failed,
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn synthesize_one(&self, index: usize, count: usize, image: &MediaAsset, duration: f64) -> Result<Clip> {
        if !image.path.is_file() {
            return Err(Error::synthesis(&image.path, "image not found"));
        }
        let path = self.out_dir.join(sequence_name("clip", index, count, "mp4"));
        let args = clip_args(&image.path, &path, duration, &self.spec);
        self.ffmpeg
            .run(&args)
            .map_err(|f| Error::from_tool(f, |msg| Error::synthesis(&image.path, msg)))?;
        info!(
            "Created clip {}/{} ({:.2}s): {}",
            index + 1,
            count,
            duration,
            path.display()
        );
        Ok(Clip {
            index,
            source: image.path.clone(),
            duration,
            path,
        })
    }

    /// One clip per image, in image order. Sequential unless more than one worker is configured.
    pub fn synthesize_all(&self, images: &[MediaAsset], durations: &[f64]) -> Result<Vec<Clip>> {
        let count = images.len().min(durations.len());
        info!(
            "Synthesizing {} clips at {}x{} {}fps, zoom {:.2}",
            count, self.spec.width, self.spec.height, self.spec.fps, self.spec.zoom
        );

        let mut results: Vec<(usize, Result<Clip>)> = Vec::with_capacity(count);
        if self.workers == 1 {
            for i in 0..count {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let result = self.synthesize_one(i, count, &images[i], durations[i]);
                let failed = result.is_err();
                results.push((i, result));
                if failed && !self.skip_failed {
                    break;
                }
            }
        } else {
            let indices: Vec<usize> = (0..count).collect();
            for batch in indices.chunks(self.workers) {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let batch_results: Vec<(usize, Result<Clip>)> = thread::scope(|s| {
                    let handles: Vec<_> = batch
                        .iter()
                        .map(|&i| {
                            s.spawn(move || (i, self.synthesize_one(i, count, &images[i], durations[i])))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .zip(batch)
                        .map(|(h, &i)| {
                            h.join().unwrap_or_else(|_| {
                                (i, Err(Error::synthesis(&images[i].path, "worker panicked")))
                            })
                        })
                        .collect()
                });
                let failed = batch_results.iter().any(|(_, r)| r.is_err());
                results.extend(batch_results);
                if failed && !self.skip_failed {
                    break;
                }
            }
        }

        let mut clips = Vec::with_capacity(count);
        for (i, result) in results {
            match result {
                Ok(clip) => clips.push(clip),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if self.skip_failed => {
                    warn!("Skipping clip {}: {}", i + 1, e);
                }
                Err(e) => {
                    error!("Clip {} failed: {}", i + 1, e);
                    return Err(e);
                }
            }
        }

        if clips.is_empty() {
            return Err(Error::synthesis(&self.out_dir, "no clips were created"));
        }
        Ok(clips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MediaKind;

    fn spec() -> ClipSpec {
        ClipSpec::new(60, 1.5, (1279, 959), "libx264")
    }

    #[test]
    fn odd_resolution_is_rounded_up() {
        let s = spec();
        assert_eq!((s.width, s.height), (1280, 960));
    }

    #[test]
    fn frame_count_stays_within_one_frame() {
        for (duration, fps) in [(2.0, 60), (3.3333, 30), (0.01, 60), (7.49, 24)] {
            let frames = frame_count(duration, fps);
            let encoded = frames as f64 / fps as f64;
            assert!(
                (encoded - duration).abs() <= 1.0 / fps as f64,
                "{duration}s at {fps}fps gave {frames} frames"
            );
        }
        assert_eq!(frame_count(0.0, 30), 1);
    }

    #[test]
    fn filter_zooms_linearly_to_factor() {
        let filter = zoom_filter(&spec(), 121);
        assert!(filter.contains("z='1+0.500000*on/120'"));
        assert!(filter.contains("x='iw/2-(iw/zoom/2)'"));
        assert!(filter.contains("d=121:s=1280x960:fps=60"));
        assert!(filter.starts_with("scale=1280:960:force_original_aspect_ratio=increase:flags=bilinear,crop=1280:960,"));
    }

    #[test]
    fn single_frame_clip_has_no_zero_division() {
        assert!(zoom_filter(&spec(), 1).contains("*on/1'"));
    }

    #[test]
    fn args_bound_duration_and_pixel_format() {
        let args: Vec<String> = clip_args(Path::new("/img/a b.png"), Path::new("/tmp/clip_000.mp4"), 2.5, &spec())
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-i") + 1], "/img/a b.png");
        assert_eq!(args[pos("-t") + 1], "2.500");
        assert_eq!(args[pos("-frames:v") + 1], "150");
        assert_eq!(args[pos("-pix_fmt") + 1], "yuv420p");
        assert_eq!(args.last().unwrap(), "/tmp/clip_000.mp4");
    }

    #[test]
    fn missing_images_are_skipped_until_none_remain() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = Tool::new("ffmpeg", Cancellation::new());
        let synth = ClipSynthesizer::new(&ffmpeg, spec(), dir.path(), true, 1, Cancellation::new());
        let images = vec![
            MediaAsset::new("/nonexistent/a.png", MediaKind::Image),
            MediaAsset::new("/nonexistent/b.png", MediaKind::Image),
        ];
        let err = synth.synthesize_all(&images, &[1.0, 1.0]).unwrap_err();
        assert!(err.to_string().contains("no clips were created"));
    }

    #[test]
    fn strict_policy_reports_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = Tool::new("ffmpeg", Cancellation::new());
        let synth = ClipSynthesizer::new(&ffmpeg, spec(), dir.path(), false, 2, Cancellation::new());
        let images = vec![MediaAsset::new("/nonexistent/a.png", MediaKind::Image)];
        let err = synth.synthesize_all(&images, &[1.0]).unwrap_err();
        assert!(err.to_string().contains("image not found"));
    }
}
