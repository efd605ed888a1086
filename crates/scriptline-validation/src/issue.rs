use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// The four independent rule classes, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleClass {
    Length,
    Marker,
    Forbidden,
    Hygiene,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    LengthTooShort,
    LengthTooLong,
    MarkerInline,
    Heading,
    ListItem,
    Url,
    Footnote,
    NumericClaim,
    DuplicateParagraph,
    IncompleteEnding,
    EmptyText,
}

impl IssueCode {
    #[must_use]
    pub const fn class(self) -> RuleClass {
        match self {
            Self::LengthTooShort | Self::LengthTooLong => RuleClass::Length,
            Self::MarkerInline => RuleClass::Marker,
            Self::Heading | Self::ListItem | Self::Url | Self::Footnote | Self::NumericClaim => {
                RuleClass::Forbidden
            }
            Self::DuplicateParagraph | Self::IncompleteEnding | Self::EmptyText => {
                RuleClass::Hygiene
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LengthTooShort => "length_too_short",
            Self::LengthTooLong => "length_too_long",
            Self::MarkerInline => "marker_inline",
            Self::Heading => "heading",
            Self::ListItem => "list_item",
            Self::Url => "url",
            Self::Footnote => "footnote",
            Self::NumericClaim => "numeric_claim",
            Self::DuplicateParagraph => "duplicate_paragraph",
            Self::IncompleteEnding => "incomplete_ending",
            Self::EmptyText => "empty_text",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding of the validator. Issues are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: IssueCode,
    pub message: String,
    pub severity: Severity,
    /// 1-based line number, when the issue is tied to a line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub(crate) fn error(code: IssueCode, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
            line,
        }
    }

    pub(crate) fn warning(code: IssueCode, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
            line,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.severity.as_str();
        match self.line {
            Some(line) => write!(f, "{level}[{}] line {line}: {}", self.code, self.message),
            None => write!(f, "{level}[{}]: {}", self.code, self.message),
        }
    }
}
