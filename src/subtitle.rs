use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// One cue per sentence, each lasting exactly as long as that sentence's audio.
///
/// Mismatched lists are truncated to the shorter one. The last cue ends at the
/// exact sum of the used durations.
pub fn build_cues(sentences: &[String], durations: &[f64]) -> Vec<SubtitleCue> {
    if sentences.len() != durations.len() {
        warn!(
            "Number of sentences ({}) doesn't match number of audio fragments ({}); using {}",
            sentences.len(),
            durations.len(),
            sentences.len().min(durations.len())
        );
    }

    let mut cues = Vec::with_capacity(sentences.len().min(durations.len()));
    let mut cumulative_seconds = 0.0_f64;
    for (text, &dur) in sentences.iter().zip(durations) {
        let start = cumulative_seconds;
        cumulative_seconds += dur;
        cues.push(SubtitleCue {
            start,
            end: cumulative_seconds,
            text: text.clone(),
        });
    }

    let total: f64 = durations[..cues.len()].iter().sum();
    if let Some(last) = cues.last_mut() {
        last.end = total;
    }
    cues
}

pub fn render_srt(cues: &[SubtitleCue], wrap_width: usize) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_srt_time(cue.start),
            format_srt_time(cue.end)
        ));
        for line in wrap_text(&cue.text, wrap_width) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub fn write_srt(path: &Path, cues: &[SubtitleCue], wrap_width: usize) -> Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    f.write_all(render_srt(cues, wrap_width).as_bytes())?;
    f.flush()?;
    Ok(())
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn cues_follow_fragment_durations() {
        let cues = build_cues(
            &sentences(&["One.", "Two.", "Three."]),
            &[2.0, 3.5, 1.2],
        );
        let spans: Vec<(f64, f64)> = cues.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans[0], (0.0, 2.0));
        assert_eq!(spans[1], (2.0, 5.5));
        assert_eq!(spans[2].0, 5.5);
        assert!((spans[2].1 - 6.7).abs() < 1e-9);
    }

    #[test]
    fn cues_are_contiguous_and_close_on_total() {
        let durations = [0.1, 0.2, 0.30000000000000004, 1.7, 2.333, 0.05];
        let texts: Vec<String> = (0..durations.len()).map(|i| format!("s{i}")).collect();
        let cues = build_cues(&texts, &durations);
        for pair in cues.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(cues.last().unwrap().end, durations.iter().sum::<f64>());
    }

    #[test]
    fn mismatched_lengths_truncate_to_shorter() {
        let texts = sentences(&["a1", "b2", "c3", "d4"]);
        assert_eq!(build_cues(&texts, &[1.0, 1.0]).len(), 2);
        let cues = build_cues(&texts[..1], &[1.0, 2.0, 3.0]);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].end, 1.0);
        assert!(build_cues(&[], &[1.0]).is_empty());
    }

    #[test]
    fn srt_timestamps_use_comma_milliseconds() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(5.5), "00:00:05,500");
        assert_eq!(format_srt_time(3723.0456), "01:02:03,046");
    }

    #[test]
    fn renders_numbered_blocks() {
        let cues = build_cues(&sentences(&["Hello world.", "Bye."]), &[1.25, 0.75]);
        assert_eq!(
            render_srt(&cues, 42),
            "1\n00:00:00,000 --> 00:00:01,250\nHello world.\n\n2\n00:00:01,250 --> 00:00:02,000\nBye.\n\n"
        );
    }

    #[test]
    fn long_cues_wrap() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 15);
        assert_eq!(lines, vec!["the quick brown", "fox jumps over", "the lazy dog"]);
    }

    #[test]
    fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.srt");
        let cues = build_cues(&sentences(&["Only one."]), &[4.0]);
        write_srt(&path, &cues, 42).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("1\n00:00:00,000 --> 00:00:04,000\nOnly one.\n"));
    }
}
