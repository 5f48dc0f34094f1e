use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::SecondaryPosition;
use crate::error::{Error, Result};
use crate::probe::{Prober, even_dimensions};
use crate::tool::{Tool, ffmpeg_base, filter_graph_path};

const SUBTITLE_STYLE: &str =
    "Fontsize=18,PrimaryColour=&H00FFFFFF&,OutlineColour=&H000000&,Outline=2,Shadow=0,Alignment=2,MarginV=40";
const AUDIO_BITRATE: &str = "192k";
/// Video shorter than its audio by more than this gets its last frame held.
const PAD_TOLERANCE: f64 = 0.05;

pub fn subtitle_filter(srt: &Path, (width, height): (u32, u32)) -> String {
    format!(
        "subtitles={}:force_style='{}',scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        filter_graph_path(srt),
        SUBTITLE_STYLE,
        w = width,
        h = height,
    )
}

/// Scales both inputs to `width` (keeping heights even) and stacks them.
pub fn stack_filter(width: u32, position: SecondaryPosition) -> String {
    let (upper, lower) = match position {
        SecondaryPosition::Bottom => ("0:v", "1:v"),
        SecondaryPosition::Top => ("1:v", "0:v"),
    };
    format!(
        "[{upper}]scale={width}:-2,setsar=1[upper];[{lower}]scale={width}:-2,setsar=1[lower];[upper][lower]vstack=inputs=2[v]"
    )
}

pub fn mux_args(video: &Path, audio: &Path, out: &Path, pad: Option<f64>, encoder: &str) -> Vec<OsString> {
    let mut args = ffmpeg_base();
    args.push("-i".into());
    args.push(video.as_os_str().to_os_string());
    args.push("-i".into());
    args.push(audio.as_os_str().to_os_string());
    args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));
    match pad {
        Some(seconds) => {
            args.push("-vf".into());
            args.push(format!("tpad=stop_mode=clone:stop_duration={:.3}", seconds).into());
            args.extend(["-c:v", encoder, "-pix_fmt", "yuv420p"].map(OsString::from));
        }
        None => {
            args.extend(["-c:v", "copy", "-shortest"].map(OsString::from));
        }
    }
    args.extend(["-c:a", "aac", "-b:a", AUDIO_BITRATE].map(OsString::from));
    args.push(out.as_os_str().to_os_string());
    args
}

pub struct Compositor<'a> {
    ffmpeg: &'a Tool,
    prober: &'a Prober,
    encoder: &'a str,
}

impl<'a> Compositor<'a> {
    pub fn new(ffmpeg: &'a Tool, prober: &'a Prober, encoder: &'a str) -> Self {
        Self {
            ffmpeg,
            prober,
            encoder,
        }
    }

    fn run(&self, args: &[OsString]) -> Result<()> {
        self.ffmpeg
            .run(args)
            .map(|_| ())
            .map_err(|f| Error::from_tool(f, Error::Composition))
    }

    /// Video stream copied, audio re-encoded to AAC. Holds the last frame when
    /// the video runs short of the audio.
    pub fn mux(&self, video: &Path, video_duration: f64, audio: &Path, audio_duration: f64, out: &Path) -> Result<PathBuf> {
        let gap = audio_duration - video_duration;
        let pad = if gap > PAD_TOLERANCE {
            warn!(
                "Video ({:.2}s) is shorter than audio ({:.2}s); holding last frame for {:.2}s",
                video_duration, audio_duration, gap
            );
            Some(gap)
        } else {
            None
        };
        self.run(&mux_args(video, audio, out, pad, self.encoder))?;
        info!("Added audio to video: {}", out.display());
        Ok(out.to_path_buf())
    }

    /// Burns `srt` into `input`, letterboxed to the input's even-corrected size.
    pub fn burn_subtitles(&self, input: &Path, srt: &Path, out: &Path) -> Result<PathBuf> {
        let probed = self.prober.dimensions(input)?;
        let dims = even_dimensions(probed);
        if dims != probed {
            info!(
                "Rounding {}x{} up to {}x{}",
                probed.0, probed.1, dims.0, dims.1
            );
        }
        let mut args = ffmpeg_base();
        args.push("-i".into());
        args.push(input.as_os_str().to_os_string());
        args.push("-vf".into());
        args.push(subtitle_filter(srt, dims).into());
        args.extend(["-c:v", self.encoder, "-pix_fmt", "yuv420p", "-c:a", "copy"].map(OsString::from));
        args.push(out.as_os_str().to_os_string());
        self.run(&args)?;
        info!("Burned subtitles into video: {}", out.display());
        Ok(out.to_path_buf())
    }

    /// Stacks `primary` and `secondary` vertically, cut to `duration` seconds.
    pub fn stack(
        &self,
        primary: &Path,
        secondary: &Path,
        position: SecondaryPosition,
        duration: f64,
        out: &Path,
    ) -> Result<PathBuf> {
        let (width, _) = even_dimensions(self.prober.dimensions(primary)?);
        let mut args = ffmpeg_base();
        args.push("-i".into());
        args.push(primary.as_os_str().to_os_string());
        args.push("-i".into());
        args.push(secondary.as_os_str().to_os_string());
        args.push("-filter_complex".into());
        args.push(stack_filter(width, position).into());
        args.extend(
            [
                "-map",
                "[v]",
                "-map",
                "0:a?",
                "-c:v",
                self.encoder,
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                AUDIO_BITRATE,
                "-t",
            ]
            .map(OsString::from),
        );
        args.push(format!("{:.3}", duration).into());
        args.push(out.as_os_str().to_os_string());
        self.run(&args)?;
        info!("Stacked videos vertically into: {}", out.display());
        Ok(out.to_path_buf())
    }
}

/// Moves `finished` to `output_dir/name`, replacing any earlier file there.
///
/// The file is staged under a hidden sibling name first so the canonical path
/// only ever holds a complete video.
pub fn publish(finished: &Path, output_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let target = output_dir.join(name);
    let staging = output_dir.join(format!(".{}.partial", name));

    let staged = fs::rename(finished, &staging).or_else(|_| fs::copy(finished, &staging).map(|_| ()));
    if let Err(e) = staged {
        let _ = fs::remove_file(&staging);
        return Err(Error::Composition(format!(
            "cannot stage {} in {}: {}",
            finished.display(),
            output_dir.display(),
            e
        )));
    }

    if target.exists() {
        warn!("File {} already exists, replacing it", target.display());
    }
    if let Err(first) = fs::rename(&staging, &target) {
        // Some platforms refuse to rename over an existing file.
        let retried = fs::remove_file(&target).and_then(|_| fs::rename(&staging, &target));
        if let Err(e) = retried {
            let _ = fs::remove_file(&staging);
            return Err(Error::Composition(format!(
                "cannot publish {}: {} ({})",
                target.display(),
                e,
                first
            )));
        }
    }
    let size = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
    info!("Final video moved to: {} ({} bytes)", target.display(), size);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn subtitle_filter_letterboxes_to_even_size() {
        let filter = subtitle_filter(Path::new("/tmp/run/subs/subtitles.srt"), (1280, 960));
        assert!(filter.starts_with("subtitles=/tmp/run/subs/subtitles.srt:force_style='Fontsize=18,"));
        assert!(filter.ends_with(
            ",scale=1280:960:force_original_aspect_ratio=decrease,pad=1280:960:(ow-iw)/2:(oh-ih)/2"
        ));
    }

    #[test]
    fn stack_order_follows_position() {
        assert_eq!(
            stack_filter(1280, SecondaryPosition::Bottom),
            "[0:v]scale=1280:-2,setsar=1[upper];[1:v]scale=1280:-2,setsar=1[lower];[upper][lower]vstack=inputs=2[v]"
        );
        assert!(stack_filter(720, SecondaryPosition::Top).starts_with("[1:v]scale=720:-2"));
    }

    #[test]
    fn mux_copies_video_unless_padding() {
        let plain = strings(mux_args(Path::new("v.mp4"), Path::new("a.mp3"), Path::new("o.mp4"), None, "libx264"));
        assert!(plain.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert!(plain.windows(2).any(|w| w == ["-c:a", "aac"]));

        let padded = strings(mux_args(Path::new("v.mp4"), Path::new("a.mp3"), Path::new("o.mp4"), Some(2.0), "libx264"));
        assert!(padded.contains(&"tpad=stop_mode=clone:stop_duration=2.000".to_string()));
        assert!(padded.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(!padded.contains(&"-shortest".to_string()));
    }

    #[test]
    fn publish_replaces_existing_output() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let out_dir = out.path().join("Output");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("final_video.mp4"), b"old").unwrap();

        let finished = work.path().join("final_combined.mp4");
        fs::write(&finished, b"new").unwrap();
        let target = publish(&finished, &out_dir, "final_video.mp4").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!out_dir.join(".final_video.mp4.partial").exists());
        assert!(!finished.exists());
    }

    #[test]
    fn publish_creates_output_dir() {
        let work = tempfile::tempdir().unwrap();
        let finished = work.path().join("done.mp4");
        fs::write(&finished, b"video").unwrap();
        let out_dir = work.path().join("nested").join("Output");
        let target = publish(&finished, &out_dir, "final_video.mp4").unwrap();
        assert_eq!(target, out_dir.join("final_video.mp4"));
    }

    #[test]
    fn publish_without_input_leaves_nothing() {
        let work = tempfile::tempdir().unwrap();
        let out_dir = work.path().join("Output");
        let err = publish(&work.path().join("missing.mp4"), &out_dir, "final_video.mp4").unwrap_err();
        assert!(matches!(err, Error::Composition(_)));
        assert!(!out_dir.join("final_video.mp4").exists());
        assert!(!out_dir.join(".final_video.mp4.partial").exists());
    }
}
