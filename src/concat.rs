use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::probe::{MediaKind, Prober, StreamParams};
use crate::tool::{Tool, ffmpeg_base, forward_slashes};

/// One line of a concat-demuxer list. `outpoint` ends the entry early.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatEntry {
    pub path: PathBuf,
    pub outpoint: Option<f64>,
}

impl ConcatEntry {
    pub fn whole(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            outpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    StreamCopy,
    Reencode,
}

pub fn render_list(entries: &[ConcatEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let path = forward_slashes(&entry.path).replace('\'', r"'\''");
        out.push_str(&format!("file '{}'\n", path));
        if let Some(outpoint) = entry.outpoint {
            out.push_str(&format!("outpoint {:.3}\n", outpoint));
        }
    }
    out
}

/// Stream copy when every input shares one codec; fails on any timing or geometry mismatch.
pub fn check_compatible(params: &[(PathBuf, StreamParams)]) -> Result<ConcatMode> {
    let Some((first_path, first)) = params.first() else {
        return Err(Error::Concat("no inputs to concatenate".into()));
    };
    let mut mode = ConcatMode::StreamCopy;
    for (path, p) in &params[1..] {
        match (first, p) {
            (
                StreamParams::Video {
                    width: w0,
                    height: h0,
                    frame_rate: r0,
                    ..
                },
                StreamParams::Video {
                    width, height, frame_rate, ..
                },
            ) => {
                if frame_rate != r0 {
                    return Err(mismatch(first_path, path, "frame rate", r0, frame_rate));
                }
                if (width, height) != (w0, h0) {
                    return Err(mismatch(
                        first_path,
                        path,
                        "dimensions",
                        format!("{}x{}", w0, h0),
                        format!("{}x{}", width, height),
                    ));
                }
            }
            (
                StreamParams::Audio {
                    sample_rate: r0,
                    channels: c0,
                    ..
                },
                StreamParams::Audio {
                    sample_rate, channels, ..
                },
            ) => {
                if sample_rate != r0 {
                    return Err(mismatch(first_path, path, "sample rate", r0, sample_rate));
                }
                if channels != c0 {
                    return Err(mismatch(first_path, path, "channel count", c0, channels));
                }
            }
            _ => {
                return Err(Error::Concat(format!(
                    "{} and {} carry different stream kinds",
                    first_path.display(),
                    path.display()
                )));
            }
        }
        if p.codec() != first.codec() {
            mode = ConcatMode::Reencode;
        }
    }
    Ok(mode)
}

fn mismatch(
    a: &Path,
    b: &Path,
    what: &str,
    left: impl std::fmt::Display,
    right: impl std::fmt::Display,
) -> Error {
    Error::Concat(format!(
        "{} mismatch: {} has {}, {} has {}",
        what,
        a.display(),
        left,
        b.display(),
        right
    ))
}

pub struct Concatenator<'a> {
    ffmpeg: &'a Tool,
    prober: &'a Prober,
    encoder: &'a str,
}

impl<'a> Concatenator<'a> {
    pub fn new(ffmpeg: &'a Tool, prober: &'a Prober, encoder: &'a str) -> Self {
        Self {
            ffmpeg,
            prober,
            encoder,
        }
    }

    /// Joins `entries` in the given order into `work_dir/<stem>.<ext>`.
    pub fn concat(&self, entries: &[ConcatEntry], kind: MediaKind, work_dir: &Path, stem: &str) -> Result<PathBuf> {
        if entries.is_empty() {
            return Err(Error::Concat(format!("no inputs for {}", stem)));
        }
        if let Some(missing) = entries.iter().find(|e| !e.path.is_file()) {
            return Err(Error::Concat(format!("missing input {}", missing.path.display())));
        }

        let mut params = Vec::new();
        for entry in entries {
            if params.iter().any(|(p, _): &(PathBuf, StreamParams)| p == &entry.path) {
                continue;
            }
            let p = self.prober.stream(&entry.path, kind).map_err(|e| match e {
                Error::Probe { path, reason } => {
                    Error::Concat(format!("cannot inspect {}: {}", path.display(), reason))
                }
                other => other,
            })?;
            params.push((entry.path.clone(), p));
        }
        let mode = check_compatible(&params)?;

        let list_path = work_dir.join(format!("{}_list.txt", stem));
        fs::write(&list_path, render_list(entries))?;

        let ext = match mode {
            ConcatMode::StreamCopy => entries[0]
                .path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("mp4")
                .to_string(),
            ConcatMode::Reencode if kind == MediaKind::Audio => "wav".to_string(),
            ConcatMode::Reencode => "mp4".to_string(),
        };
        let output = work_dir.join(format!("{}.{}", stem, ext));

        let mut args = ffmpeg_base();
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
        args.push(list_path.as_os_str().to_os_string());
        match (mode, kind) {
            (ConcatMode::StreamCopy, _) => args.extend(["-c", "copy"].map(OsString::from)),
            (ConcatMode::Reencode, MediaKind::Audio) => {
                warn!("Audio inputs use different codecs; re-encoding {}", stem);
                args.extend(["-vn", "-c:a", "pcm_s16le"].map(OsString::from));
            }
            (ConcatMode::Reencode, _) => {
                warn!("Video inputs use different codecs; re-encoding {}", stem);
                args.extend(
                    ["-an", "-c:v", self.encoder, "-pix_fmt", "yuv420p"].map(OsString::from),
                );
            }
        }
        args.push(output.as_os_str().to_os_string());

        self.ffmpeg
            .run(&args)
            .map_err(|f| Error::from_tool(f, Error::Concat))?;
        info!(
            "Concatenated {} inputs into {} ({:?})",
            entries.len(),
            output.display(),
            mode
        );
        Ok(output)
    }
}
