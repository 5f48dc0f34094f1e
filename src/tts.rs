use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::probe::{MediaAsset, MediaKind};
use crate::tool::Tool;
use crate::utils::sequence_name;

/// Piper TTS, one WAV fragment per sentence.
pub struct Narrator<'a> {
    piper: &'a Tool,
    model: PathBuf,
    speaker: Option<u32>,
}

fn piper_args(model: &Path, out_path: &Path, speaker: Option<u32>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--model".into(), model.as_os_str().to_os_string()];
    if let Some(id) = speaker {
        args.push("--speaker".into());
        args.push(id.to_string().into());
    }
    args.push("--output_file".into());
    args.push(out_path.as_os_str().to_os_string());
    args
}

impl<'a> Narrator<'a> {
    pub fn new(piper: &'a Tool, model: impl Into<PathBuf>) -> Self {
        Self {
            piper,
            model: model.into(),
            speaker: None,
        }
    }

    pub fn with_speaker(mut self, speaker: Option<u32>) -> Self {
        self.speaker = speaker;
        self
    }

    pub fn synthesize(&self, text: &str, out_path: &Path) -> Result<()> {
        let args = piper_args(&self.model, out_path, self.speaker);
        let mut line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        line.push('\n');
        self.piper
            .run_with_stdin(&args, line.as_bytes())
            .map_err(|f| {
                Error::from_tool(f, |msg| {
                    error!("Piper TTS command failed for {}", out_path.display());
                    Error::synthesis(out_path, msg)
                })
            })?;
        if !out_path.is_file() {
            return Err(Error::synthesis(
                out_path,
                "piper reported success but wrote no file",
            ));
        }
        Ok(())
    }

    /// Synthesizes every sentence in order. Any failure aborts, since a missing
    /// fragment would shift every later cue.
    pub fn narrate(&self, sentences: &[String], out_dir: &Path) -> Result<Vec<MediaAsset>> {
        if !self.model.is_file() {
            return Err(Error::Narration(format!(
                "piper model not found: {}",
                self.model.display()
            )));
        }
        fs::create_dir_all(out_dir)?;
        let mut fragments = Vec::with_capacity(sentences.len());
        for (i, sentence) in sentences.iter().enumerate() {
            let path = out_dir.join(sequence_name("sentence", i, sentences.len(), "wav"));
            info!(
                "Generating sentence {}/{} ({} chars)",
                i + 1,
                sentences.len(),
                sentence.len()
            );
            debug!("Sentence text: {}", sentence);
            self.synthesize(sentence, &path)?;
            fragments.push(MediaAsset::new(path, MediaKind::Audio));
        }
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Cancellation;

    #[test]
    fn missing_model_is_reported_before_running_piper() {
        let dir = tempfile::tempdir().unwrap();
        let piper = Tool::new("piper", Cancellation::new());
        let narrator = Narrator::new(&piper, dir.path().join("voice.onnx"));
        let err = narrator
            .narrate(&["Hello there.".to_string()], dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("piper model not found"));
    }

    #[test]
    fn speaker_id_goes_before_output() {
        let args: Vec<String> = piper_args(Path::new("m.onnx"), Path::new("s.wav"), Some(2))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["--model", "m.onnx", "--speaker", "2", "--output_file", "s.wav"]
        );
        assert_eq!(piper_args(Path::new("m.onnx"), Path::new("s.wav"), None).len(), 4);
    }

    #[test]
    fn failed_sentence_is_a_synthesis_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        fs::write(&model, b"model").unwrap();
        let piper = Tool::new("definitely-not-piper", Cancellation::new());
        let narrator = Narrator::new(&piper, &model);
        let err = narrator
            .narrate(&["Hello there.".to_string()], &dir.path().join("out"))
            .unwrap_err();
        match err {
            Error::Synthesis { path, .. } => assert!(path.ends_with("sentence_000.wav")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cancelled_narration_stops() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        fs::write(&model, b"model").unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();
        let piper = Tool::new("piper", cancel);
        let narrator = Narrator::new(&piper, &model);
        let err = narrator
            .narrate(&["Hello there.".to_string()], &dir.path().join("out"))
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
