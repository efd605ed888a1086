//! Named clean-up passes for generated text.
//!
//! Every transform is a pure `&str -> String` function. A pipeline runs its
//! transforms in order and repeats until the text stops changing, so applying
//! a pipeline twice yields the same text as applying it once.

use regex::Regex;
use scriptline_utils::error::ConfigError;
use std::fmt;
use std::sync::LazyLock;

use crate::segments::is_marker_line;

/// Transforms applied to `generate` stages that do not list their own.
pub const DEFAULT_TRANSFORMS: &[&str] = &[
    "normalize_line_endings",
    "strip_code_fences",
    "strip_headings",
    "strip_list_markers",
    "strip_urls",
    "strip_footnotes",
    "isolate_markers",
    "trim_trailing_whitespace",
    "collapse_blank_lines",
];

const MAX_PASSES: usize = 32;

static HEADING_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#{1,6}(?:\s+|$))+").unwrap());
static LIST_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:(?:[-*+•・]|\d{1,3}[.)])\s+)+").unwrap());
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\(?\b(?:https?://|www\.)[^\s)]+\)?").unwrap());
static FOOTNOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^[^\]]+\]|\[\d{1,3}\]|※\d*").unwrap());
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(```|~~~)").unwrap());

pub trait TextTransform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, text: &str) -> String;
}

/// Apply `f` to every line, keeping the original trailing newline.
fn map_lines(text: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(mapped) = f(line) {
            out.push(mapped);
        }
    }
    let mut joined = out.join("\n");
    if text.ends_with('\n') && !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

struct NormalizeLineEndings;

impl TextTransform for NormalizeLineEndings {
    fn name(&self) -> &'static str {
        "normalize_line_endings"
    }

    fn apply(&self, text: &str) -> String {
        text.replace("\r\n", "\n").replace('\r', "\n")
    }
}

/// Drops the fence lines of fenced code blocks and keeps their content.
struct StripCodeFences;

impl TextTransform for StripCodeFences {
    fn name(&self) -> &'static str {
        "strip_code_fences"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| {
            (!CODE_FENCE.is_match(line)).then(|| line.to_string())
        })
    }
}

struct StripHeadings;

impl TextTransform for StripHeadings {
    fn name(&self) -> &'static str {
        "strip_headings"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| {
            Some(HEADING_PREFIX.replace(line, "").into_owned())
        })
    }
}

struct StripListMarkers {
    marker: String,
}

impl TextTransform for StripListMarkers {
    fn name(&self) -> &'static str {
        "strip_list_markers"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| {
            if is_marker_line(line, &self.marker) {
                return Some(line.to_string());
            }
            Some(LIST_PREFIX.replace(line, "").into_owned())
        })
    }
}

struct StripUrls;

impl TextTransform for StripUrls {
    fn name(&self) -> &'static str {
        "strip_urls"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| Some(URL.replace_all(line, "").into_owned()))
    }
}

struct StripFootnotes;

impl TextTransform for StripFootnotes {
    fn name(&self) -> &'static str {
        "strip_footnotes"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| Some(FOOTNOTE.replace_all(line, "").into_owned()))
    }
}

/// Moves inline markers onto their own lines.
struct IsolateMarkers {
    marker: String,
}

impl TextTransform for IsolateMarkers {
    fn name(&self) -> &'static str {
        "isolate_markers"
    }

    fn apply(&self, text: &str) -> String {
        if self.marker.is_empty() {
            return text.to_string();
        }
        map_lines(text, |line| {
            if is_marker_line(line, &self.marker) || !line.contains(self.marker.as_str()) {
                return Some(line.to_string());
            }
            let mut parts = Vec::new();
            for (i, piece) in line.split(self.marker.as_str()).enumerate() {
                if i > 0 {
                    parts.push(self.marker.clone());
                }
                let piece = piece.trim();
                if !piece.is_empty() {
                    parts.push(piece.to_string());
                }
            }
            Some(parts.join("\n"))
        })
    }
}

struct TrimTrailingWhitespace;

impl TextTransform for TrimTrailingWhitespace {
    fn name(&self) -> &'static str {
        "trim_trailing_whitespace"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| Some(line.trim_end().to_string()))
    }
}

/// At most one blank line in a row; no blank lines at either end.
struct CollapseBlankLines;

impl TextTransform for CollapseBlankLines {
    fn name(&self) -> &'static str {
        "collapse_blank_lines"
    }

    fn apply(&self, text: &str) -> String {
        let mut out: Vec<&str> = Vec::new();
        for line in text.lines() {
            let blank = line.trim().is_empty();
            if blank && out.last().is_none_or(|prev| prev.trim().is_empty()) {
                continue;
            }
            out.push(if blank { "" } else { line });
        }
        while out.last().is_some_and(|l| l.is_empty()) {
            out.pop();
        }
        if out.is_empty() {
            return String::new();
        }
        let mut joined = out.join("\n");
        joined.push('\n');
        joined
    }
}

/// Replaces each marker line with a blank line for the rendered narration.
struct MarkersToPauses {
    marker: String,
}

impl TextTransform for MarkersToPauses {
    fn name(&self) -> &'static str {
        "markers_to_pauses"
    }

    fn apply(&self, text: &str) -> String {
        map_lines(text, |line| {
            if is_marker_line(line, &self.marker) {
                Some(String::new())
            } else {
                Some(line.to_string())
            }
        })
    }
}

fn lookup(name: &str, marker: &str) -> Option<Box<dyn TextTransform>> {
    let marker = marker.to_string();
    let transform: Box<dyn TextTransform> = match name {
        "normalize_line_endings" => Box::new(NormalizeLineEndings),
        "strip_code_fences" => Box::new(StripCodeFences),
        "strip_headings" => Box::new(StripHeadings),
        "strip_list_markers" => Box::new(StripListMarkers { marker }),
        "strip_urls" => Box::new(StripUrls),
        "strip_footnotes" => Box::new(StripFootnotes),
        "isolate_markers" => Box::new(IsolateMarkers { marker }),
        "trim_trailing_whitespace" => Box::new(TrimTrailingWhitespace),
        "collapse_blank_lines" => Box::new(CollapseBlankLines),
        "markers_to_pauses" => Box::new(MarkersToPauses { marker }),
        _ => return None,
    };
    Some(transform)
}

/// Every name accepted by [`TransformPipeline::from_names`].
#[must_use]
pub fn known_transforms() -> Vec<&'static str> {
    let mut names = DEFAULT_TRANSFORMS.to_vec();
    names.push("markers_to_pauses");
    names
}

/// An ordered list of transforms.
#[derive(Default)]
pub struct TransformPipeline {
    transforms: Vec<Box<dyn TextTransform>>,
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl TransformPipeline {
    /// Resolve transform names. Unknown names are a configuration error.
    pub fn from_names<S: AsRef<str>>(names: &[S], marker: &str) -> Result<Self, ConfigError> {
        let transforms = names
            .iter()
            .map(|name| {
                lookup(name.as_ref(), marker)
                    .ok_or_else(|| ConfigError::UnknownTransform(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { transforms })
    }

    /// The default `generate` pipeline.
    pub fn defaults(marker: &str) -> Self {
        // Every default name resolves.
        Self::from_names(DEFAULT_TRANSFORMS, marker).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Run every transform in order until the text reaches a fixpoint.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        for _ in 0..MAX_PASSES {
            let next = self
                .transforms
                .iter()
                .fold(current.clone(), |acc, t| t.apply(&acc));
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn defaults() -> TransformPipeline {
        TransformPipeline::defaults("---")
    }

    #[test]
    fn test_unknown_transform_is_rejected() {
        let err = TransformPipeline::from_names(&["strip_urls", "shout"], "---").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTransform(name) if name == "shout"));
    }

    #[test]
    fn test_default_pipeline_cleans_markdown() {
        let raw = "# Opening\r\n\r\n- First point [1]\r\n2. Second point, see https://example.com\r\n\r\n\r\n\r\nBody text. --- More text.   \r\n";
        let cleaned = defaults().apply(raw);
        assert_eq!(
            cleaned,
            "Opening\n\nFirst point\nSecond point, see\n\nBody text.\n---\nMore text.\n"
        );
    }

    #[test]
    fn test_code_fences_keep_content() {
        let cleaned = defaults().apply("```text\nSpoken line.\n```\n");
        assert_eq!(cleaned, "Spoken line.\n");
    }

    #[test]
    fn test_list_markers_leave_marker_lines_alone() {
        let cleaned = defaults().apply("Intro.\n\n---\n\n* item one\n");
        assert_eq!(cleaned, "Intro.\n\n---\n\nitem one\n");
    }

    #[test]
    fn test_markers_to_pauses() {
        let pipeline =
            TransformPipeline::from_names(&["markers_to_pauses", "collapse_blank_lines"], "---")
                .unwrap();
        assert_eq!(pipeline.apply("One.\n\n---\n\nTwo.\n"), "One.\n\nTwo.\n");
    }

    #[test]
    fn test_names_round_trip() {
        assert_eq!(defaults().names(), DEFAULT_TRANSFORMS.to_vec());
        assert!(known_transforms().contains(&"markers_to_pauses"));
        assert!(TransformPipeline::default().is_empty());
    }

    proptest! {
        #[test]
        fn prop_default_pipeline_is_idempotent(text in "[a-z #*\\-\\n\\r.\\[\\]0-9:/]{0,200}") {
            let pipeline = defaults();
            let once = pipeline.apply(&text);
            let twice = pipeline.apply(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
