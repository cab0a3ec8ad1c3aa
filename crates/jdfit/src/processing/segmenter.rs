use std::sync::LazyLock;

use crate::config::{SegmentationConfig, DEFAULT_MIN_UNIT_CHARS};
use crate::types::TextUnit;

static WHITESPACE_RUN_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\s+").expect("whitespace regex is valid")
});

/// Splits raw text into line-level units.
///
/// Granularity is one unit per line, not per sentence. Each line has its
/// whitespace collapsed and trimmed; lines left shorter than `min_unit_chars`
/// characters are dropped.
#[derive(Debug, Clone)]
pub struct Segmenter {
    min_unit_chars: usize,
}

impl Segmenter {
    pub fn new(min_unit_chars: usize) -> Self {
        Self { min_unit_chars }
    }

    pub fn from_config(config: &SegmentationConfig) -> Self {
        Self::new(config.min_unit_chars)
    }

    /// Lazily yield units in document order. Indices count only kept units.
    pub fn units<'a>(&'a self, text: &'a str) -> impl Iterator<Item = TextUnit> + 'a {
        split_lines(text)
            .map(clean_unit)
            .filter(move |line| line.chars().count() >= self.min_unit_chars)
            .enumerate()
            .map(|(index, text)| TextUnit { index, text })
    }

    pub fn segment(&self, text: &str) -> Vec<TextUnit> {
        self.units(text).collect()
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_UNIT_CHARS)
    }
}

/// Split on `\r\n`, `\r` and `\n` alike.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').flat_map(|line| {
        let line = line.strip_suffix('\r').unwrap_or(line);
        line.split('\r')
    })
}

fn clean_unit(raw: &str) -> String {
    WHITESPACE_RUN_RE.replace_all(raw, " ").trim().to_string()
}
