use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::audio::wav_params;
use crate::config::ProbeFailurePolicy;
use crate::error::{Error, Result};
use crate::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// A file taking part in a run. The duration is probed at most once.
#[derive(Debug)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    duration: OnceLock<f64>,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            kind,
            duration: OnceLock::new(),
        }
    }

    #[cfg(test)]
    pub fn with_duration(path: impl Into<PathBuf>, kind: MediaKind, seconds: f64) -> Self {
        let asset = Self::new(path, kind);
        let _ = asset.duration.set(seconds);
        asset
    }

    pub fn known_duration(&self) -> Option<f64> {
        self.duration.get().copied()
    }

    pub fn duration(&self, resolver: &DurationResolver<'_>) -> Result<f64> {
        if let Some(d) = self.known_duration() {
            return Ok(d);
        }
        debug!("Probing {:?} duration of {}", self.kind, self.path.display());
        let d = resolver.resolve(&self.path)?;
        Ok(*self.duration.get_or_init(|| d))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    Video {
        codec: String,
        width: u32,
        height: u32,
        frame_rate: String,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
    },
}

impl StreamParams {
    pub fn codec(&self) -> &str {
        match self {
            StreamParams::Video { codec, .. } | StreamParams::Audio { codec, .. } => codec,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeStreams {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

/// Thin wrapper over `ffprobe`.
#[derive(Debug, Clone)]
pub struct Prober {
    tool: Tool,
}

impl Prober {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    pub fn duration(&self, path: &Path) -> Result<f64> {
        let stdout = self.run_probe(
            path,
            &[
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )?;
        let d = parse_duration(path, &stdout)?;
        debug!("Probed {}: {:.3}s", path.display(), d);
        Ok(d)
    }

    pub fn dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        let stdout = self.run_probe(
            path,
            &[
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=p=0",
            ],
        )?;
        parse_dimensions(path, &stdout)
    }

    /// Codec and timing parameters of the first stream of `kind`.
    pub fn stream(&self, path: &Path, kind: MediaKind) -> Result<StreamParams> {
        let is_wav = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if kind == MediaKind::Audio && is_wav {
            ensure_exists(path)?;
            return wav_params(path);
        }
        let (selector, entries) = match kind {
            MediaKind::Audio => ("a:0", "stream=codec_name,sample_rate,channels"),
            _ => ("v:0", "stream=codec_name,width,height,r_frame_rate"),
        };
        let stdout = self.run_probe(
            path,
            &["-select_streams", selector, "-show_entries", entries, "-of", "json"],
        )?;
        parse_stream(path, kind, &stdout)
    }

    fn run_probe(&self, path: &Path, options: &[&str]) -> Result<String> {
        ensure_exists(path)?;
        let mut args: Vec<OsString> = ["-v", "error"]
            .iter()
            .chain(options)
            .map(|s| OsString::from(*s))
            .collect();
        args.push(path.as_os_str().to_os_string());
        self.tool
            .run(&args)
            .map_err(|f| Error::from_tool(f, |msg| Error::probe(path, msg)))
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::probe(path, "file not found"))
    }
}

pub fn parse_duration(path: &Path, stdout: &str) -> Result<f64> {
    let text = stdout.trim();
    if text.is_empty() {
        return Err(Error::probe(path, "probe returned empty output"));
    }
    let d: f64 = text
        .parse()
        .map_err(|_| Error::probe(path, format!("non-numeric duration '{}'", text)))?;
    if !d.is_finite() || d <= 0.0 {
        return Err(Error::probe(path, format!("unusable duration {}", d)));
    }
    Ok(d)
}

pub fn parse_dimensions(path: &Path, stdout: &str) -> Result<(u32, u32)> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(line) = line else {
        return Err(Error::probe(path, "probe returned no video stream"));
    };
    let mut parts = line.split(',').map(str::trim);
    let width = parts.next().and_then(|w| w.parse::<u32>().ok());
    let height = parts.next().and_then(|h| h.parse::<u32>().ok());
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(Error::probe(path, format!("unparseable dimensions '{}'", line))),
    }
}

fn parse_stream(path: &Path, kind: MediaKind, stdout: &str) -> Result<StreamParams> {
    let parsed: ProbeStreams = serde_json::from_str(stdout)
        .map_err(|e| Error::probe(path, format!("unparseable stream info: {}", e)))?;
    let Some(stream) = parsed.streams.into_iter().next() else {
        return Err(Error::probe(path, "no matching stream"));
    };
    let codec = stream
        .codec_name
        .ok_or_else(|| Error::probe(path, "stream has no codec"))?;
    match kind {
        MediaKind::Audio => {
            let sample_rate = stream
                .sample_rate
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::probe(path, "audio stream has no sample rate"))?;
            Ok(StreamParams::Audio {
                codec,
                sample_rate,
                channels: stream.channels.unwrap_or(0),
            })
        }
        _ => Ok(StreamParams::Video {
            codec,
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            frame_rate: stream.r_frame_rate.unwrap_or_default(),
        }),
    }
}

/// Rounds up to the next even integer.
pub fn even_up(n: u32) -> u32 {
    n + (n % 2)
}

pub fn even_dimensions((w, h): (u32, u32)) -> (u32, u32) {
    (even_up(w), even_up(h))
}

/// Applies the caller's [`ProbeFailurePolicy`] on top of a [`Prober`].
pub struct DurationResolver<'a> {
    prober: &'a Prober,
    policy: ProbeFailurePolicy,
}

impl<'a> DurationResolver<'a> {
    pub fn new(prober: &'a Prober, policy: ProbeFailurePolicy) -> Self {
        Self { prober, policy }
    }

    pub fn resolve(&self, path: &Path) -> Result<f64> {
        match self.prober.duration(path) {
            Err(err @ Error::Probe { .. }) => match self.policy {
                ProbeFailurePolicy::Fail => Err(err),
                ProbeFailurePolicy::SubstituteDefault(seconds) => {
                    warn!("{}; substituting {:.2}s", err, seconds);
                    Ok(seconds)
                }
            },
            other => other,
        }
    }
}
