use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info};

use crate::error::ToolFailure;

/// Cooperative stop flag, checked before each stage and each tool launch.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An external program invoked with an argument vector, never through a shell.
#[derive(Clone, Debug)]
pub struct Tool {
    program: PathBuf,
    cancel: Cancellation,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>, cancel: Cancellation) -> Self {
        Self {
            program: program.into(),
            cancel,
        }
    }

    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Runs to completion and returns stdout. Non-zero exit carries stderr verbatim.
    pub fn run<I, S>(&self, args: I) -> Result<String, ToolFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_inner(collect_args(args), None)
    }

    /// Same as [`Tool::run`], writing `input` to the child's stdin first.
    pub fn run_with_stdin<I, S>(&self, args: I, input: &[u8]) -> Result<String, ToolFailure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_inner(collect_args(args), Some(input))
    }

    fn run_inner(&self, args: Vec<OsString>, input: Option<&[u8]>) -> Result<String, ToolFailure> {
        let program = self.name();
        if self.cancel.is_cancelled() {
            return Err(ToolFailure::Cancelled { program });
        }
        debug!("Running {} {}", self.program.display(), render_args(&args));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolFailure::Spawn {
                program: program.clone(),
                source,
            })?;

        // stdin is fed from its own thread while stdout and stderr are drained.
        let stdin = child.stdin.take();
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || match (stdin, input) {
                (Some(mut pipe), Some(bytes)) => pipe.write_all(bytes),
                _ => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = output.map_err(|source| ToolFailure::Spawn {
            program: program.clone(),
            source,
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ToolFailure::Exit {
                program,
                status: output.status,
                stderr,
            });
        }
        written.map_err(|source| ToolFailure::Spawn {
            program: program.clone(),
            source,
        })?;
        if !stderr.trim().is_empty() {
            debug!("{} stderr: {}", program, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn collect_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().map(|a| a.as_ref().to_os_string()).collect()
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Leading arguments shared by every ffmpeg invocation.
pub fn ffmpeg_base() -> Vec<OsString> {
    ["-y", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(OsString::from)
        .collect()
}

/// Path as it must appear inside ffmpeg text arguments (concat lists, filter graphs).
pub fn forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Escapes a path for use as a filter option value inside a filter graph.
///
/// Applies both levels of ffmpeg escaping: the option-value level (`\ ' :`)
/// and then the graph level (`\ ' [ ] , ;`).
pub fn filter_graph_path(path: &Path) -> String {
    let value = escape_chars(&forward_slashes(path), &['\\', '\'', ':']);
    escape_chars(&value, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const HARDWARE_ENCODERS: [&str; 3] = ["h264_nvenc", "h264_amf", "h264_qsv"];
pub const SOFTWARE_ENCODER: &str = "libx264";

/// Picks the first hardware H.264 encoder listed by `ffmpeg -encoders`.
pub fn pick_hardware_encoder(listing: &str) -> Option<&'static str> {
    HARDWARE_ENCODERS.into_iter().find(|name| {
        listing
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(*name))
    })
}

pub fn detect_encoder(ffmpeg: &Tool) -> String {
    match ffmpeg.run(["-hide_banner", "-encoders"]) {
        Ok(listing) => match pick_hardware_encoder(&listing) {
            Some(name) => {
                info!("Hardware encoder detected, using {}", name);
                name.to_string()
            }
            None => {
                info!("No hardware encoders found, using {}", SOFTWARE_ENCODER);
                SOFTWARE_ENCODER.to_string()
            }
        },
        Err(e) => {
            debug!("Encoder listing failed ({}); using {}", e, SOFTWARE_ENCODER);
            SOFTWARE_ENCODER.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_path_escapes_drive_colon_and_quotes() {
        assert_eq!(
            filter_graph_path(Path::new("C:\\work\\subs.srt")),
            "C\\\\:/work/subs.srt"
        );
        assert_eq!(
            filter_graph_path(Path::new("/tmp/it's here/subs.srt")),
            "/tmp/it\\\\\\'s here/subs.srt"
        );
        assert_eq!(filter_graph_path(Path::new("/tmp/a/subs.srt")), "/tmp/a/subs.srt");
    }

    #[test]
    fn hardware_encoder_is_picked_from_listing() {
        let listing = "Encoders:\n V....D libx264              libx264 H.264\n V....D h264_qsv             H.264 (Intel Quick Sync)\n V....D h264_nvenc           NVIDIA NVENC H.264\n";
        assert_eq!(pick_hardware_encoder(listing), Some("h264_nvenc"));
        assert_eq!(
            pick_hardware_encoder(" V....D libx264  libx264 H.264\n"),
            None
        );
    }

    #[test]
    fn cancelled_tool_never_launches() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let tool = Tool::new("definitely-not-a-real-binary", cancel);
        match tool.run(["-version"]) {
            Err(ToolFailure::Cancelled { program }) => {
                assert_eq!(program, "definitely-not-a-real-binary")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn large_stdin_is_streamed_while_output_is_read() {
        let input = vec![b'x'; 1 << 20];
        let tool = Tool::new("cat", Cancellation::new());
        let echoed = tool.run_with_stdin(Vec::<OsString>::new(), &input).unwrap();
        assert_eq!(echoed.len(), input.len());
    }

    #[test]
    fn missing_binary_is_a_spawn_failure() {
        let tool = Tool::new("definitely-not-a-real-binary", Cancellation::new());
        assert!(matches!(
            tool.run(["-version"]),
            Err(ToolFailure::Spawn { .. })
        ));
    }
}
