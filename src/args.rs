use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(
    name = "reelsmith",
    version,
    about = "Assemble narrated, subtitled short-form videos from stills and speech"
)]
pub struct Args {
    /// Flat key=value configuration file (defaults to CONFIG.txt next to the narration text)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override a configuration value, e.g. --set zoom_factor=1.4
    #[clap(long = "set", value_name = "KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the whole chain and publish one finished video
    Assemble(AssembleArgs),

    /// Time subtitles against existing narration fragments and write an SRT file
    Subtitles(SubtitlesArgs),

    /// Print a media file's duration and dimensions
    Probe {
        path: PathBuf,
    },

    /// Show which recordings would be stacked under a video of the given length
    PlanSecondary {
        #[clap(long)]
        dir: PathBuf,

        #[clap(long)]
        duration: f64,
    },
}

#[derive(ClapArgs, Debug)]
pub struct AssembleArgs {
    /// Narration text; split into one sentence per audio fragment
    #[clap(long)]
    pub text: PathBuf,

    /// Directory of pre-rendered images
    #[clap(long, conflicts_with = "image_endpoint")]
    pub images: Option<PathBuf>,

    /// OpenAI-compatible image generation endpoint
    #[clap(long)]
    pub image_endpoint: Option<String>,

    /// One image prompt per line
    #[clap(long)]
    pub prompts: Option<PathBuf>,

    /// Directory of per-sentence narration fragments (otherwise Piper is run)
    #[clap(long, conflicts_with = "piper_model")]
    pub audio_dir: Option<PathBuf>,

    #[clap(long)]
    pub piper_model: Option<PathBuf>,

    /// Directory of recorded minigame footage to stack with the video
    #[clap(long)]
    pub minigame_dir: Option<PathBuf>,

    #[clap(long)]
    pub add_minigame: bool,

    #[clap(long)]
    pub zoom_factor: Option<f64>,

    #[clap(long)]
    pub out_dir: Option<PathBuf>,

    /// fail | substitute_default
    #[clap(long)]
    pub on_probe_failure: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct SubtitlesArgs {
    #[clap(long)]
    pub text: PathBuf,

    #[clap(long)]
    pub audio_dir: PathBuf,

    #[clap(long, default_value = "subtitles.srt")]
    pub out: PathBuf,

    /// fail | substitute_default
    #[clap(long)]
    pub on_probe_failure: Option<String>,
}

impl Args {
    /// `--set` values as (key, value) pairs.
    pub fn parsed_overrides(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.overrides
            .iter()
            .map(|kv| {
                kv.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| anyhow::anyhow!("--set expects KEY=VALUE, got '{}'", kv))
            })
            .collect()
    }
}

impl AssembleArgs {
    /// Flags that shadow configuration keys. Paths are made absolute against the
    /// working directory, so the config file's directory never applies to them.
    pub fn config_overrides(&self) -> anyhow::Result<Vec<(&'static str, String)>> {
        let mut out = Vec::new();
        if let Some(z) = self.zoom_factor {
            out.push(("zoom_factor", z.to_string()));
        }
        if let Some(dir) = &self.out_dir {
            out.push(("output_dir", absolute_string(dir)?));
        }
        if let Some(policy) = &self.on_probe_failure {
            out.push(("on_probe_failure", policy.clone()));
        }
        if let Some(model) = &self.piper_model {
            out.push(("piper_model", absolute_string(model)?));
        }
        if let Some(dir) = &self.minigame_dir {
            out.push(("minigame_dir", absolute_string(dir)?));
        }
        if self.add_minigame {
            out.push(("add_minigame", "true".to_string()));
        }
        if let Some(endpoint) = &self.image_endpoint {
            out.push(("image_endpoint", endpoint.clone()));
        }
        Ok(out)
    }
}

fn absolute_string(path: &Path) -> anyhow::Result<String> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    Ok(abs.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assemble_with_overrides() {
        let args = Args::parse_from([
            "reelsmith",
            "assemble",
            "--text",
            "processed.txt",
            "--images",
            "out/images",
            "--audio-dir",
            "out/audio",
            "--zoom-factor",
            "1.4",
            "--set",
            "fps=30",
        ]);
        assert_eq!(
            args.parsed_overrides().unwrap(),
            vec![("fps".to_string(), "30".to_string())]
        );
        let Command::Assemble(assemble) = args.command else {
            panic!("expected assemble");
        };
        assert_eq!(
            assemble.config_overrides().unwrap(),
            vec![("zoom_factor", "1.4".to_string())]
        );
    }

    #[test]
    fn audio_dir_and_piper_conflict() {
        let result = Args::try_parse_from([
            "reelsmith",
            "assemble",
            "--text",
            "t.txt",
            "--audio-dir",
            "a",
            "--piper-model",
            "m.onnx",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_set_is_rejected() {
        let args = Args::parse_from(["reelsmith", "--set", "fps", "probe", "x.mp4"]);
        assert!(args.parsed_overrides().is_err());
    }
}
