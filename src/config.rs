use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// What to do when a duration probe fails. Has no default; callers must choose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeFailurePolicy {
    Fail,
    SubstituteDefault(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryPosition {
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderChoice {
    Auto,
    Named(String),
}

const KNOWN_KEYS: &[&str] = &[
    "zoom_factor",
    "output_dir",
    "output_name",
    "fps",
    "width",
    "height",
    "voice",
    "piper_model",
    "on_probe_failure",
    "probe_fallback_seconds",
    "skip_failed_clips",
    "clip_workers",
    "add_minigame",
    "minigame_dir",
    "secondary_position",
    "min_segment_seconds",
    "encoder",
    "ffmpeg",
    "ffprobe",
    "piper",
    "subtitle_wrap",
    "keep_temp",
    "image_filter",
    "image_endpoint",
    "image_model",
    "image_size",
];

/// Flat `key=value` configuration, as written by the desktop front end.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    entries: BTreeMap<String, String>,
    base_dir: PathBuf,
}

impl RawConfig {
    pub fn empty(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: BTreeMap::new(),
            base_dir: base_dir.into(),
        }
    }

    /// Loads `path`. A missing file yields an empty config unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !path.exists() {
            if required {
                return Err(Error::config(
                    "config",
                    format!("{} does not exist", path.display()),
                ));
            }
            debug!("No config file at {}; using defaults", path.display());
            return Ok(Self::empty(base_dir));
        }
        info!("Reading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text, base_dir)
    }

    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::empty(base_dir);
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::config(
                    format!("line {}", n + 1),
                    format!("expected key=value, got '{}'", line),
                ));
            };
            config.set(key, value);
        }
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        let key = key.trim();
        if !KNOWN_KEYS.contains(&key) {
            debug!("Ignoring unknown config key '{}'", key);
            return;
        }
        self.entries
            .insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn parse_value<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::config(key, format!("cannot parse '{}'", raw))),
        }
    }

    fn parse_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(None),
            Some("true" | "yes" | "1" | "on") => Ok(Some(true)),
            Some("false" | "no" | "0" | "off") => Ok(Some(false)),
            Some(other) => Err(Error::config(key, format!("'{}' is not a boolean", other))),
        }
    }

    /// Relative paths resolve against the directory holding the config file.
    fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(|raw| {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                self.base_dir.join(p)
            }
        })
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub zoom_factor: f64,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub fps: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub voice: Option<String>,
    pub piper_model: Option<PathBuf>,
    pub on_probe_failure: ProbeFailurePolicy,
    pub skip_failed_clips: bool,
    pub clip_workers: usize,
    pub add_minigame: bool,
    pub minigame_dir: Option<PathBuf>,
    pub secondary_position: SecondaryPosition,
    pub min_segment_seconds: f64,
    pub encoder: EncoderChoice,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub piper: PathBuf,
    pub subtitle_wrap: usize,
    pub keep_temp: bool,
    pub image_filter: Option<String>,
    pub image_endpoint: Option<String>,
    pub image_model: String,
    pub image_size: String,
}

impl Settings {
    pub fn from_raw(raw: &RawConfig) -> Result<Self> {
        let zoom_factor = raw.parse_value::<f64>("zoom_factor")?.unwrap_or(1.25);
        if !zoom_factor.is_finite() || zoom_factor < 1.0 {
            return Err(Error::config("zoom_factor", "must be a number >= 1.0"));
        }

        let fps = raw.parse_value::<u32>("fps")?.unwrap_or(60);
        if fps == 0 {
            return Err(Error::config("fps", "must be positive"));
        }

        let probe_fallback = raw
            .parse_value::<f64>("probe_fallback_seconds")?
            .unwrap_or(5.0);
        let on_probe_failure = match raw.get("on_probe_failure") {
            Some("fail") => ProbeFailurePolicy::Fail,
            Some("substitute_default") => {
                if !probe_fallback.is_finite() || probe_fallback <= 0.0 {
                    return Err(Error::config(
                        "probe_fallback_seconds",
                        "must be a positive number",
                    ));
                }
                ProbeFailurePolicy::SubstituteDefault(probe_fallback)
            }
            Some(other) => {
                return Err(Error::config(
                    "on_probe_failure",
                    format!("'{}' is not one of fail, substitute_default", other),
                ));
            }
            None => {
                return Err(Error::config(
                    "on_probe_failure",
                    "must be set to fail or substitute_default",
                ));
            }
        };

        let secondary_position = match raw.get("secondary_position").unwrap_or("bottom") {
            "bottom" => SecondaryPosition::Bottom,
            "top" => SecondaryPosition::Top,
            other => {
                return Err(Error::config(
                    "secondary_position",
                    format!("'{}' is not one of top, bottom", other),
                ));
            }
        };

        let min_segment_seconds = raw
            .parse_value::<f64>("min_segment_seconds")?
            .unwrap_or(10.0);
        if !min_segment_seconds.is_finite() || min_segment_seconds < 0.0 {
            return Err(Error::config("min_segment_seconds", "must be >= 0"));
        }

        let clip_workers = raw.parse_value::<usize>("clip_workers")?.unwrap_or(1);
        if clip_workers == 0 {
            return Err(Error::config("clip_workers", "must be at least 1"));
        }

        let encoder = match raw.get("encoder") {
            None | Some("libx264") => EncoderChoice::Named("libx264".into()),
            Some("auto") => EncoderChoice::Auto,
            Some(name) => EncoderChoice::Named(name.to_string()),
        };

        Ok(Self {
            zoom_factor,
            output_dir: raw
                .path("output_dir")
                .unwrap_or_else(|| raw.base_dir.join("Output")),
            output_name: raw
                .get("output_name")
                .unwrap_or("final_video.mp4")
                .to_string(),
            fps,
            width: raw.parse_value("width")?,
            height: raw.parse_value("height")?,
            voice: raw.get("voice").map(str::to_string),
            piper_model: raw.path("piper_model"),
            on_probe_failure,
            skip_failed_clips: raw.parse_bool("skip_failed_clips")?.unwrap_or(true),
            clip_workers,
            add_minigame: raw.parse_bool("add_minigame")?.unwrap_or(false),
            minigame_dir: raw.path("minigame_dir"),
            secondary_position,
            min_segment_seconds,
            encoder,
            ffmpeg: raw.get("ffmpeg").unwrap_or("ffmpeg").into(),
            ffprobe: raw.get("ffprobe").unwrap_or("ffprobe").into(),
            piper: raw.get("piper").unwrap_or("piper").into(),
            subtitle_wrap: raw.parse_value("subtitle_wrap")?.unwrap_or(42),
            keep_temp: raw.parse_bool("keep_temp")?.unwrap_or(false),
            image_filter: raw.get("image_filter").map(str::to_string),
            image_endpoint: raw.get("image_endpoint").map(str::to_string),
            image_model: raw.get("image_model").unwrap_or("dall-e-3").to_string(),
            image_size: raw.get("image_size").unwrap_or("1024x1792").to_string(),
        })
    }

    /// Piper speaker id, when `voice` names one of a multi-speaker model's voices by number.
    pub fn speaker(&self) -> Option<u32> {
        self.voice.as_deref().and_then(|v| v.parse().ok())
    }

    /// Clip resolution: a full vertical frame, or the top half when a secondary
    /// track will be stacked beneath.
    pub fn clip_resolution(&self) -> (u32, u32) {
        let default_height = if self.add_minigame { 960 } else { 1920 };
        (
            self.width.unwrap_or(1280),
            self.height.unwrap_or(default_height),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# written by the UI
voice=alloy
vibe='Calm'
zoom_factor="1.5"
output_dir=renders
on_probe_failure=fail
add_minigame=True
main_selected_game=circlegame
"#;

    #[test]
    fn parses_flat_file_with_quotes_and_relative_paths() {
        let raw = RawConfig::parse(SAMPLE, "/srv/farm").unwrap();
        let settings = Settings::from_raw(&raw).unwrap();
        assert_eq!(settings.zoom_factor, 1.5);
        assert_eq!(settings.voice.as_deref(), Some("alloy"));
        assert_eq!(settings.speaker(), None);
        assert_eq!(settings.output_dir, PathBuf::from("/srv/farm/renders"));
        assert!(settings.add_minigame);
        assert_eq!(settings.clip_resolution(), (1280, 960));
        assert_eq!(settings.on_probe_failure, ProbeFailurePolicy::Fail);
        assert_eq!(settings.secondary_position, SecondaryPosition::Bottom);
    }

    #[test]
    fn numeric_voice_selects_piper_speaker() {
        let raw = RawConfig::parse("voice=3\non_probe_failure=fail\n", "/srv/farm").unwrap();
        assert_eq!(Settings::from_raw(&raw).unwrap().speaker(), Some(3));
    }

    #[test]
    fn probe_policy_must_be_chosen() {
        let raw = RawConfig::parse("zoom_factor=1.2", "/tmp").unwrap();
        let err = Settings::from_raw(&raw).unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == "on_probe_failure"));

        let raw = RawConfig::parse(
            "on_probe_failure=substitute_default\nprobe_fallback_seconds=4",
            "/tmp",
        )
        .unwrap();
        assert_eq!(
            Settings::from_raw(&raw).unwrap().on_probe_failure,
            ProbeFailurePolicy::SubstituteDefault(4.0)
        );
    }

    #[test]
    fn zoom_below_one_is_rejected() {
        let raw = RawConfig::parse("zoom_factor=0.8\non_probe_failure=fail", "/tmp").unwrap();
        let err = Settings::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("zoom_factor"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut raw = RawConfig::parse("zoom_factor=1.5\non_probe_failure=fail", "/tmp").unwrap();
        raw.set("zoom_factor", "2.0");
        raw.set("encoder", "auto");
        let settings = Settings::from_raw(&raw).unwrap();
        assert_eq!(settings.zoom_factor, 2.0);
        assert_eq!(settings.encoder, EncoderChoice::Auto);
    }

    #[test]
    fn malformed_line_is_reported() {
        let err = RawConfig::parse("zoom_factor 1.5", "/tmp").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn missing_optional_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawConfig::load(&dir.path().join("CONFIG.txt"), false).unwrap();
        assert!(raw.get("zoom_factor").is_none());
        assert!(RawConfig::load(&dir.path().join("CONFIG.txt"), true).is_err());
    }
}
