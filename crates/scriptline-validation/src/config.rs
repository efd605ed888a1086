use serde::{Deserialize, Serialize};

/// Limits and switches for [`crate::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum counted characters
    pub min_chars: usize,
    /// Maximum counted characters
    pub max_chars: usize,
    /// Relative distance past a bound that is still only a warning.
    ///
    /// With `min_chars = 1000` and `error_ratio = 0.1`, 950 characters is a
    /// warning and 850 an error.
    pub error_ratio: f64,
    /// Pause delimiter; must stand alone on its line
    pub marker: String,
    /// Paragraphs shorter than this (counted characters) are never reported as duplicates
    pub duplicate_min_chars: usize,
    pub forbid_headings: bool,
    pub forbid_lists: bool,
    pub forbid_urls: bool,
    pub forbid_footnotes: bool,
    /// Warn about percentages/multipliers without an attribution on the same line
    pub flag_numeric_claims: bool,
    /// Characters accepted as the end of the final sentence
    pub sentence_endings: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_chars: 1000,
            max_chars: 1600,
            error_ratio: 0.1,
            marker: "---".to_string(),
            duplicate_min_chars: 40,
            forbid_headings: true,
            forbid_lists: true,
            forbid_urls: true,
            forbid_footnotes: true,
            flag_numeric_claims: true,
            sentence_endings: ".!?。！？…\"”’」』)）".to_string(),
        }
    }
}

impl ValidatorConfig {
    /// Midpoint of the length band; the target for rescue and rebuild.
    #[must_use]
    pub fn target_chars(&self) -> usize {
        self.min_chars + (self.max_chars.saturating_sub(self.min_chars)) / 2
    }

    #[must_use]
    pub fn with_limits(mut self, min_chars: usize, max_chars: usize) -> Self {
        self.min_chars = min_chars;
        self.max_chars = max_chars;
        self
    }

    #[must_use]
    pub fn is_sentence_end(&self, c: char) -> bool {
        self.sentence_endings.contains(c)
    }
}
