use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s).*?[.!?]+(?:\s+|$)|.+$").expect("sentence pattern is valid")
});

/// Splits on `.`, `!` or `?` followed by whitespace or end of text.
/// Fragments shorter than two characters are dropped, as the TTS step skips them.
pub fn split_sentences(text: &str) -> Vec<String> {
    let sentences: Vec<String> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| s.chars().count() >= 2)
        .map(str::to_string)
        .collect();
    if sentences.is_empty() && !text.trim().is_empty() {
        warn!("No usable sentences found in narration text");
    }
    sentences
}

/// Zero-padding width for `count` sequence numbers, never below 3 digits.
pub fn sequence_width(count: usize) -> usize {
    let largest = count.saturating_sub(1);
    largest.to_string().len().max(3)
}

/// `prefix_007.ext`, padded so name order equals sequence order.
pub fn sequence_name(prefix: &str, index: usize, count: usize, ext: &str) -> String {
    format!(
        "{}_{:0width$}.{}",
        prefix,
        index,
        ext,
        width = sequence_width(count)
    )
}
