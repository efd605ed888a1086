use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::config::ValidatorConfig;
use crate::issue::{Issue, IssueCode, RuleClass};
use crate::segments::{is_marker_line, paragraphs};

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}(\s|$)").unwrap());
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+•・]|\d{1,3}[.)])\s+\S").unwrap());
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap());
static FOOTNOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\^[^\]]+\]|\[\d{1,3}\]|※\d*").unwrap());
static NUMERIC_CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(?:[.,]\d+)?\s*(?:%|％|percent\b|per cent\b|times\b|倍)").unwrap()
});
static ATTRIBUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:according to|survey|study|studies|report(?:s|ed)?|research|data from|source)\b|によると|調査|統計",
    )
    .unwrap()
});

/// Measurements taken while validating. Same input and config, same stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    /// Non-whitespace characters outside standalone marker lines
    pub char_count: usize,
    /// Every character, markers and whitespace included
    pub raw_char_count: usize,
    pub line_count: usize,
    pub paragraph_count: usize,
    pub marker_count: usize,
    pub heading_count: usize,
    pub list_item_count: usize,
    pub url_count: usize,
    pub footnote_count: usize,
    pub numeric_claim_count: usize,
    pub duplicate_paragraph_count: usize,
    pub min_chars: usize,
    pub max_chars: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }

    /// The length issue, if the count falls outside `[min, max]` at all.
    #[must_use]
    pub fn length_issue(&self) -> Option<&Issue> {
        self.issues
            .iter()
            .find(|i| i.code.class() == RuleClass::Length)
    }

    /// Error-severity issues from every class except length.
    pub fn hard_errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.is_error() && i.code.class() != RuleClass::Length)
    }

    /// Out of the length band while every other class is error-free.
    #[must_use]
    pub fn is_length_only(&self) -> bool {
        self.length_issue().is_some() && self.hard_errors().next().is_none()
    }

    /// Signed distance to the band: negative when short, positive when long, 0 inside.
    #[must_use]
    pub fn length_delta(&self) -> i64 {
        let count = self.stats.char_count as i64;
        if count < self.stats.min_chars as i64 {
            count - self.stats.min_chars as i64
        } else if count > self.stats.max_chars as i64 {
            count - self.stats.max_chars as i64
        } else {
            0
        }
    }
}

/// Count characters the way the length rule does: whitespace and standalone
/// marker lines are excluded.
#[must_use]
pub fn count_chars(text: &str, marker: &str) -> usize {
    text.lines()
        .filter(|line| !is_marker_line(line, marker))
        .map(|line| line.chars().filter(|c| !c.is_whitespace()).count())
        .sum()
}

/// Validate `text` against `config`.
///
/// All four rule classes always run; issues are appended in class order
/// (length, marker, forbidden, hygiene) and by line within a class.
#[must_use]
pub fn validate(text: &str, config: &ValidatorConfig) -> ValidationReport {
    let mut stats = ValidationStats {
        char_count: count_chars(text, &config.marker),
        raw_char_count: text.chars().count(),
        line_count: text.lines().count(),
        min_chars: config.min_chars,
        max_chars: config.max_chars,
        ..ValidationStats::default()
    };

    let mut issues = Vec::new();
    check_length(&stats, config, &mut issues);
    check_markers(text, config, &mut stats, &mut issues);
    check_forbidden(text, config, &mut stats, &mut issues);
    check_hygiene(text, config, &mut stats, &mut issues);

    ValidationReport { issues, stats }
}

fn check_length(stats: &ValidationStats, config: &ValidatorConfig, issues: &mut Vec<Issue>) {
    let count = stats.char_count;
    let (code, bound, distance) = if count < config.min_chars {
        (IssueCode::LengthTooShort, config.min_chars, config.min_chars - count)
    } else if count > config.max_chars {
        (IssueCode::LengthTooLong, config.max_chars, count - config.max_chars)
    } else {
        return;
    };

    let ratio = if bound == 0 {
        f64::INFINITY
    } else {
        distance as f64 / bound as f64
    };
    let message = format!(
        "{count} characters, expected {}..={} ({distance} {})",
        config.min_chars,
        config.max_chars,
        if code == IssueCode::LengthTooShort {
            "short"
        } else {
            "over"
        }
    );
    if ratio <= config.error_ratio {
        issues.push(Issue::warning(code, message, None));
    } else {
        issues.push(Issue::error(code, message, None));
    }
}

fn check_markers(
    text: &str,
    config: &ValidatorConfig,
    stats: &mut ValidationStats,
    issues: &mut Vec<Issue>,
) {
    if config.marker.is_empty() {
        return;
    }
    for (idx, line) in text.lines().enumerate() {
        if is_marker_line(line, &config.marker) {
            stats.marker_count += 1;
        } else if line.contains(config.marker.as_str()) {
            issues.push(Issue::error(
                IssueCode::MarkerInline,
                format!("'{}' must stand alone on its own line", config.marker),
                Some(idx + 1),
            ));
        }
    }
}

fn check_forbidden(
    text: &str,
    config: &ValidatorConfig,
    stats: &mut ValidationStats,
    issues: &mut Vec<Issue>,
) {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !is_marker_line(line, &config.marker))
        .map(|(idx, line)| (idx + 1, line))
        .collect();

    if config.forbid_headings {
        for &(n, line) in &lines {
            if HEADING.is_match(line) {
                stats.heading_count += 1;
                issues.push(Issue::error(
                    IssueCode::Heading,
                    "Headings are not allowed in narration",
                    Some(n),
                ));
            }
        }
    }

    if config.forbid_lists {
        for &(n, line) in &lines {
            if LIST_ITEM.is_match(line) {
                stats.list_item_count += 1;
                issues.push(Issue::error(
                    IssueCode::ListItem,
                    "Bulleted or numbered list items are not allowed",
                    Some(n),
                ));
            }
        }
    }

    if config.forbid_urls {
        for &(n, line) in &lines {
            for m in URL.find_iter(line) {
                stats.url_count += 1;
                issues.push(Issue::error(
                    IssueCode::Url,
                    format!("URL '{}' cannot be read aloud", m.as_str()),
                    Some(n),
                ));
            }
        }
    }

    if config.forbid_footnotes {
        for &(n, line) in &lines {
            for m in FOOTNOTE.find_iter(line) {
                stats.footnote_count += 1;
                issues.push(Issue::error(
                    IssueCode::Footnote,
                    format!("Footnote marker '{}' is not allowed", m.as_str()),
                    Some(n),
                ));
            }
        }
    }

    if config.flag_numeric_claims {
        for &(n, line) in &lines {
            if ATTRIBUTION.is_match(line) {
                continue;
            }
            for m in NUMERIC_CLAIM.find_iter(line) {
                stats.numeric_claim_count += 1;
                issues.push(Issue::warning(
                    IssueCode::NumericClaim,
                    format!("Numeric claim '{}' has no attribution", m.as_str().trim()),
                    Some(n),
                ));
            }
        }
    }
}

fn check_hygiene(
    text: &str,
    config: &ValidatorConfig,
    stats: &mut ValidationStats,
    issues: &mut Vec<Issue>,
) {
    let paras = paragraphs(text, &config.marker);
    stats.paragraph_count = paras.len();

    if paras.is_empty() {
        issues.push(Issue::error(
            IssueCode::EmptyText,
            "The text has no content",
            None,
        ));
        return;
    }

    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for para in &paras {
        let counted = para.normalized.chars().filter(|c| !c.is_whitespace()).count();
        if counted < config.duplicate_min_chars {
            continue;
        }
        match first_seen.get(para.normalized.as_str()) {
            Some(&first) => {
                stats.duplicate_paragraph_count += 1;
                issues.push(Issue::error(
                    IssueCode::DuplicateParagraph,
                    format!("Paragraph repeats the one starting at line {first}"),
                    Some(para.line),
                ));
            }
            None => {
                first_seen.insert(para.normalized.as_str(), para.line);
            }
        }
    }

    let lines: Vec<&str> = text.lines().collect();
    let last = lines
        .iter()
        .rposition(|line| !line.trim().is_empty() && !is_marker_line(line, &config.marker));
    if let Some(idx) = last
        && let Some(c) = lines[idx].trim_end().chars().last()
        && !config.is_sentence_end(c)
    {
        issues.push(Issue::error(
            IssueCode::IncompleteEnding,
            "The text does not end on a complete sentence",
            Some(idx + 1),
        ));
    }
}
