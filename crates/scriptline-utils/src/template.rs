//! Output path templates.
//!
//! Stage outputs are declared as templates relative to the job directory,
//! e.g. `content/{key}_script.md`. Supported tokens are `{key}`, `{channel}`
//! and `{video}`. Templates are checked when parsed so a registry with a typo
//! fails at load time rather than mid-run.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::job_key::JobKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Path template is empty")]
    Empty,

    #[error("Unknown token '{{{token}}}' in path template '{template}'")]
    UnknownToken { template: String, token: String },

    #[error("Unclosed '{{' in path template '{0}'")]
    Unclosed(String),

    #[error("Path template '{0}' must be relative to the job directory")]
    Absolute(String),

    #[error("Path template '{0}' must not contain '..'")]
    ParentTraversal(String),
}

const TOKENS: &[&str] = &["key", "channel", "video"];

/// A validated, job-relative path template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathTemplate(String);

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        if raw.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| TemplateError::Unclosed(raw.to_string()))?;
            let token = &after[..close];
            if !TOKENS.contains(&token) {
                return Err(TemplateError::UnknownToken {
                    template: raw.to_string(),
                    token: token.to_string(),
                });
            }
            rest = &after[close + 1..];
        }

        let path = Utf8Path::new(raw);
        if path.is_absolute() || raw.starts_with('/') || raw.starts_with('\\') {
            return Err(TemplateError::Absolute(raw.to_string()));
        }
        if path
            .components()
            .any(|c| matches!(c, Utf8Component::ParentDir))
        {
            return Err(TemplateError::ParentTraversal(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute tokens for `key`, yielding a job-relative path.
    #[must_use]
    pub fn render(&self, key: &JobKey) -> Utf8PathBuf {
        let rendered = self
            .0
            .replace("{key}", &key.to_string())
            .replace("{channel}", key.channel())
            .replace("{video}", &format!("{:03}", key.video()));
        Utf8PathBuf::from(rendered)
    }

    /// Render and join onto the job directory.
    #[must_use]
    pub fn resolve(&self, job_dir: &Utf8Path, key: &JobKey) -> Utf8PathBuf {
        job_dir.join(self.render(key))
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for PathTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PathTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PathTemplate::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> JobKey {
        "CH01-7".parse().unwrap()
    }

    #[test]
    fn test_render_all_tokens() {
        let t = PathTemplate::parse("{channel}/{video}/{key}_script.md").unwrap();
        assert_eq!(t.render(&key()).as_str(), "CH01/007/CH01-007_script.md");
    }

    #[test]
    fn test_plain_path_is_valid() {
        let t = PathTemplate::parse("content/draft.md").unwrap();
        assert_eq!(
            t.resolve(Utf8Path::new("/jobs/CH01-007"), &key()).as_str(),
            "/jobs/CH01-007/content/draft.md"
        );
    }

    #[test]
    fn test_rejects_unknown_token() {
        assert_eq!(
            PathTemplate::parse("content/{episode}.md"),
            Err(TemplateError::UnknownToken {
                template: "content/{episode}.md".to_string(),
                token: "episode".to_string(),
            })
        );
    }

    #[test]
    fn test_rejects_escapes() {
        assert!(matches!(
            PathTemplate::parse("/etc/passwd"),
            Err(TemplateError::Absolute(_))
        ));
        assert!(matches!(
            PathTemplate::parse("content/../../x"),
            Err(TemplateError::ParentTraversal(_))
        ));
        assert!(matches!(
            PathTemplate::parse("content/{key"),
            Err(TemplateError::Unclosed(_))
        ));
        assert_eq!(PathTemplate::parse("  "), Err(TemplateError::Empty));
    }
}
