use std::fs;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::error::{Error, Result};
use crate::probe::{MediaAsset, MediaKind, StreamParams};

const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "m4a", "aac", "ogg", "flac"];

/// Reads codec, sample rate and channel count straight from a WAV header.
pub fn wav_params(path: &Path) -> Result<StreamParams> {
    let reader = WavReader::open(path)
        .map_err(|e| Error::probe(path, format!("unreadable WAV header: {}", e)))?;
    let spec = reader.spec();
    let codec = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, bits) => format!("pcm_f{}le", bits),
        (SampleFormat::Int, 8) => "pcm_u8".to_string(),
        (SampleFormat::Int, bits) => format!("pcm_s{}le", bits),
    };
    Ok(StreamParams::Audio {
        codec,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Narration fragments in a directory, ordered by file name.
pub fn collect_fragments(dir: &Path) -> Result<Vec<MediaAsset>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_audio = path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
            AUDIO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        });
        if path.is_file() && is_audio {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(Error::Narration(format!(
            "no audio fragments found in {}",
            dir.display()
        )));
    }
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|p| MediaAsset::new(p, MediaKind::Audio))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * channels as u32 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_header_gives_stream_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.wav");
        write_wav(&path, 22050, 1, 100);
        assert_eq!(
            wav_params(&path).unwrap(),
            StreamParams::Audio {
                codec: "pcm_s16le".into(),
                sample_rate: 22050,
                channels: 1,
            }
        );
    }

    #[test]
    fn fragments_are_ordered_by_name_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["sentence_010.wav", "sentence_002.mp3", "notes.txt", "sentence_001.WAV"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = collect_fragments(dir.path())
            .unwrap()
            .iter()
            .map(|a| a.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["sentence_001.WAV", "sentence_002.mp3", "sentence_010.wav"]
        );
    }

    #[test]
    fn empty_fragment_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            collect_fragments(dir.path()),
            Err(Error::Narration(_))
        ));
    }
}
