use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Narration,
    Probe,
    Subtitles,
    Images,
    Clips,
    ConcatVideo,
    ConcatAudio,
    Mux,
    BurnSubtitles,
    Secondary,
    Stack,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Narration => "narration",
            Stage::Probe => "probe",
            Stage::Subtitles => "subtitles",
            Stage::Images => "images",
            Stage::Clips => "clips",
            Stage::ConcatVideo => "concat-video",
            Stage::ConcatAudio => "concat-audio",
            Stage::Mux => "mux",
            Stage::BurnSubtitles => "burn-subtitles",
            Stage::Secondary => "secondary",
            Stage::Stack => "stack",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// Failure of one external tool invocation. `Exit` keeps stderr verbatim.
#[derive(Error, Debug)]
pub enum ToolFailure {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}:\n{stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("cancelled before launching {program}")]
    Cancelled { program: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("probe failed for {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("clip synthesis failed for {}: {reason}", path.display())]
    Synthesis { path: PathBuf, reason: String },

    #[error("concatenation failed: {0}")]
    Concat(String),

    #[error("composition failed: {0}")]
    Composition(String),

    #[error("invalid configuration value for `{key}`: {reason}")]
    Config { key: String, reason: String },

    #[error("narration failed: {0}")]
    Narration(String),

    #[error("image provider failed: {0}")]
    ImageProvider(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("{stage} stage failed")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Probe {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn synthesis(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Synthesis {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Maps a tool failure into a stage error, except cancellation which stays `Cancelled`.
    pub fn from_tool(failure: ToolFailure, wrap: impl FnOnce(String) -> Error) -> Self {
        match failure {
            ToolFailure::Cancelled { .. } => Error::Cancelled,
            other => wrap(other.to_string()),
        }
    }

    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Error::StageFailed { .. } | Error::Cancelled => self,
            other => Error::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_wrapped_by_tool_mapping() {
        let failure = ToolFailure::Cancelled {
            program: "ffmpeg".into(),
        };
        let err = Error::from_tool(failure, Error::Composition);
        assert!(err.is_cancelled());
    }

    #[test]
    fn stage_wrapping_names_the_stage_once() {
        let err = Error::Concat("no inputs".into()).in_stage(Stage::ConcatVideo);
        assert_eq!(err.to_string(), "concat-video stage failed");
        let again = err.in_stage(Stage::Publish);
        match again {
            Error::StageFailed { stage, source } => {
                assert_eq!(stage, Stage::ConcatVideo);
                assert_eq!(source.to_string(), "concatenation failed: no inputs");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
